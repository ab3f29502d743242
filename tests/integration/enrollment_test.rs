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

//! Integration tests for enrollment through a registration ticket

use crate::integration::soft_tpm::{SoftTpm, TestCa};
use crate::integration::{
    answer_challenge, attest, connect, enrollment_store, next_message, TestServer, NAMESPACE,
    REGISTRATION_TOKEN, SERVER_URL,
};
use base64::prelude::*;
use machine_registrar::auth::tpm::{TLS_CERT_KEY, TPM_CA_SECRET};
use machine_registrar::model::{ObjectMeta, SecretRecord};
use machine_registrar::config::SETTING_SERVER_URL;
use machine_registrar::server::register::SMBIOS_HEADER;
use machine_registrar::server::socket::SocketTimeouts;
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

const SMBIOS: &str = r#"{"System Information": {"Manufacturer": "Dell Inc.", "Product Name": "R640", "Serial Number": "ABC123"}}"#;

fn registration_path() -> String {
    format!("/registration/{REGISTRATION_TOKEN}")
}

fn smbios_header() -> Vec<(&'static str, String)> {
    vec![(SMBIOS_HEADER, BASE64_STANDARD.encode(SMBIOS))]
}

#[tokio::test]
async fn test_enrollment_records_machine() {
    let tpm = SoftTpm::issued_by(&TestCa::new("TPM Manufacturer CA"));
    let store = enrollment_store();
    let server = TestServer::start(store.clone()).await;

    let payload = attest(&server.ws_url(&registration_path()), &tpm, &smbios_header()).await;

    let install: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(install["rancherd"]["server"], SERVER_URL);
    assert_eq!(install["rancherd"]["token"], "tpm://");
    assert_eq!(install["rancheros"]["install"]["automatic"], true);

    let machines = store.machines().list();
    assert_eq!(machines.len(), 1);
    let machine = &machines[0];
    assert_eq!(machine.metadata.namespace, NAMESPACE);
    assert_eq!(machine.metadata.generate_name, "m-dell-inc-r640-abc123-");
    assert!(machine.metadata.name.starts_with("m-dell-inc-r640-abc123-"));
    assert!(machine.metadata.name.len() > machine.metadata.generate_name.len());
    assert_eq!(machine.metadata.labels["site"], "edge");
    assert_eq!(machine.spec.tpm_hash, tpm.fingerprint());
    assert_eq!(
        machine.spec.smbios.as_ref().unwrap()["System Information"]["Serial Number"],
        "ABC123"
    );
}

#[tokio::test]
async fn test_repeat_enrollment_creates_once() {
    let tpm = SoftTpm::issued_by(&TestCa::new("TPM Manufacturer CA"));
    let store = enrollment_store();
    let server = TestServer::start(store.clone()).await;
    let url = server.ws_url(&registration_path());

    let first = attest(&url, &tpm, &smbios_header()).await;
    let second = attest(&url, &tpm, &smbios_header()).await;

    assert_eq!(first, second);
    assert_eq!(store.machines().len(), 1);
}

#[tokio::test]
async fn test_enrollment_without_smbios_uses_bare_prefix() {
    let tpm = SoftTpm::issued_by(&TestCa::new("TPM Manufacturer CA"));
    let store = enrollment_store();
    let server = TestServer::start(store.clone()).await;

    attest(&server.ws_url(&registration_path()), &tpm, &[]).await;

    let machines = store.machines().list();
    assert_eq!(machines.len(), 1);
    assert_eq!(machines[0].metadata.generate_name, "m-");
    assert!(machines[0].spec.smbios.is_none());
}

#[tokio::test]
async fn test_enrollment_with_untrusted_ek_rejected() {
    let trusted = TestCa::new("TPM Manufacturer CA");
    let tpm = SoftTpm::issued_by(&TestCa::new("Counterfeit CA"));
    let store = enrollment_store();
    let mut secret = SecretRecord {
        metadata: ObjectMeta::named(NAMESPACE, TPM_CA_SECRET),
        ..Default::default()
    };
    secret
        .data
        .insert(TLS_CERT_KEY.to_string(), trusted.pem().into_bytes());
    store.secrets().upsert(secret);
    let server = TestServer::start(store.clone()).await;

    match connect(&server.ws_url(&registration_path()), &tpm, &smbios_header()).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(store.machines().is_empty());
}

#[tokio::test]
async fn test_unauthenticated_request_gets_sample_config() {
    let server = TestServer::start(enrollment_store()).await;

    let response = reqwest::get(server.url(&registration_path())).await.unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body = response.text().await.unwrap();
    assert!(body.starts_with("#cloud-config\n"), "body: {body}");
    assert!(body.contains("registrationURL"));
    assert!(body.contains(&format!("/registration/{REGISTRATION_TOKEN}")));
}

#[tokio::test]
async fn test_unknown_registration_token_rejected() {
    let server = TestServer::start(enrollment_store()).await;

    let response = reqwest::get(server.url("/registration/not-a-ticket")).await.unwrap();
    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(response.text().await.unwrap(), "registration not found\n");
}

#[tokio::test]
async fn test_malformed_smbios_rejected() {
    let server = TestServer::start(enrollment_store()).await;

    let response = reqwest::Client::new()
        .get(server.url(&registration_path()))
        .header(SMBIOS_HEADER, "%%%")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn test_enrollment_with_wrong_secret_creates_nothing() {
    let tpm = SoftTpm::issued_by(&TestCa::new("TPM Manufacturer CA"));
    let store = enrollment_store();
    let server = TestServer::start(store.clone()).await;

    let mut socket = connect(&server.ws_url(&registration_path()), &tpm, &smbios_header())
        .await
        .unwrap();
    answer_challenge(&mut socket, &tpm, Some(vec![0u8; 32])).await;

    match next_message(&mut socket).await {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert_eq!(frame.reason, "challenge failed");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    assert!(store.machines().is_empty());
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let tpm = SoftTpm::issued_by(&TestCa::new("TPM Manufacturer CA"));
    let store = enrollment_store();
    let timeouts = SocketTimeouts {
        read: Duration::from_millis(200),
        ..SocketTimeouts::default()
    };
    let server = TestServer::start_with_timeouts(store.clone(), timeouts).await;

    let mut socket = connect(&server.ws_url(&registration_path()), &tpm, &[])
        .await
        .unwrap();
    assert!(matches!(next_message(&mut socket).await, Message::Binary(_)));

    match next_message(&mut socket).await {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Error);
            assert!(frame.reason.contains("challenge response"), "reason: {}", frame.reason);
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    assert!(store.machines().is_empty());
}

#[tokio::test]
async fn test_missing_server_url_is_server_error() {
    let store = enrollment_store();
    store.set_setting(SETTING_SERVER_URL, "");
    let server = TestServer::start(store).await;

    let response = reqwest::get(server.url(&registration_path())).await.unwrap();
    assert_eq!(response.status().as_u16(), 500);
    assert_eq!(response.text().await.unwrap(), "Setting server-url is not set\n");
}
