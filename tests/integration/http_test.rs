// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Integration tests for the plain HTTP endpoints

use crate::integration::{assigned_machine, token_secret, TestServer, NAMESPACE};
use base64::prelude::*;
use machine_registrar::config::SETTING_CACERTS;
use machine_registrar::server::cacerts::{sign, HASH_HEADER, NONCE_HEADER};
use machine_registrar::store::indexes::token_hash;
use machine_registrar::store::Store;
use serde_json::{json, Value};

const CA_BUNDLE: &str = "-----BEGIN CERTIFICATE-----\nMIIBfake\n-----END CERTIFICATE-----\n";

/// Store with a machine bound to a token secret.
fn shared_secret_store() -> Store {
    let store = Store::new();
    let mut machine = assigned_machine(&store, "m-edge-1", "");
    machine.spec.machine_token_secret_name = "m-edge-1-token".to_string();
    machine.spec.config.labels.insert("zone".to_string(), "a".to_string());
    store.machines().upsert(machine);
    store
        .secrets()
        .upsert(token_secret("m-edge-1-token", b"machine-token"));
    store
}

fn bearer(token: &[u8]) -> String {
    format!("Bearer {}", BASE64_STANDARD.encode(token))
}

#[tokio::test]
async fn test_healthz() {
    let server = TestServer::start(Store::new()).await;

    let response = reqwest::get(server.root_url("/healthz")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_shared_secret_join_config() {
    let server = TestServer::start(shared_secret_store()).await;

    let response = reqwest::Client::new()
        .get(server.url(""))
        .header("Authorization", bearer(b"machine-token"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let config: Value = response.json().await.unwrap();
    assert_eq!(
        config,
        json!({"role": "worker", "labels": ["zone=a"], "token": "K10-join-token"})
    );
}

#[tokio::test]
async fn test_shared_secret_accepted_on_post() {
    let server = TestServer::start(shared_secret_store()).await;

    let response = reqwest::Client::new()
        .post(server.url(""))
        .header("Authorization", bearer(b"machine-token"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn test_unknown_token_rejected() {
    let server = TestServer::start(shared_secret_store()).await;

    let response = reqwest::Client::new()
        .get(server.url(""))
        .header("Authorization", bearer(b"someone-else"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(response.text().await.unwrap(), "token not found\n");
}

#[tokio::test]
async fn test_missing_join_token_is_not_found() {
    let store = shared_secret_store();
    store.join_tokens().remove(NAMESPACE, "prod-join");
    let server = TestServer::start(store).await;

    let response = reqwest::Client::new()
        .get(server.url(""))
        .header("Authorization", bearer(b"machine-token"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.text().await.unwrap(), "cluster token not assigned\n");
}

#[tokio::test]
async fn test_no_credentials_unauthorized() {
    let server = TestServer::start(shared_secret_store()).await;

    let response = reqwest::get(server.url("")).await.unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn test_cacerts_plain() {
    let store = Store::new();
    store.set_setting(SETTING_CACERTS, CA_BUNDLE);
    let server = TestServer::start(store).await;

    let response = reqwest::get(server.url("/cacerts")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.headers().get(HASH_HEADER).is_none());
    assert_eq!(response.text().await.unwrap(), CA_BUNDLE);
}

#[tokio::test]
async fn test_cacerts_with_tamper_evidence() {
    let store = shared_secret_store();
    store.set_setting(SETTING_CACERTS, CA_BUNDLE);
    let server = TestServer::start(store).await;

    let response = reqwest::Client::new()
        .get(server.url("/cacerts"))
        .header("Authorization", format!("Bearer {}", token_hash(b"machine-token")))
        .header(NONCE_HEADER, "f00d")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let hash = response
        .headers()
        .get(HASH_HEADER)
        .expect("hash header")
        .to_str()
        .unwrap()
        .to_string();
    let body = response.bytes().await.unwrap();
    assert_eq!(hash, sign(b"machine-token", b"f00d", &body));
}
