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

//! Integration tests for TPM-attested join configuration

use crate::integration::soft_tpm::{SoftTpm, TestCa};
use crate::integration::{
    answer_challenge, assigned_machine, attest, connect, next_message, TestServer, NAMESPACE,
};
use machine_registrar::auth::tpm::{TLS_CERT_KEY, TPM_CA_SECRET};
use machine_registrar::model::{MachineRecord, ObjectMeta, SecretRecord};
use machine_registrar::store::Store;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

fn tpm_ca_secret(ca: &TestCa) -> SecretRecord {
    let mut secret = SecretRecord {
        metadata: ObjectMeta::named(NAMESPACE, TPM_CA_SECRET),
        ..Default::default()
    };
    secret
        .data
        .insert(TLS_CERT_KEY.to_string(), ca.pem().into_bytes());
    secret
}

fn expect_rejected(result: Result<impl std::fmt::Debug, WsError>, status: u16) {
    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), status),
        other => panic!("expected HTTP {status}, got {other:?}"),
    }
}

#[tokio::test]
async fn test_join_config_over_attestation_socket() {
    let ca = TestCa::new("TPM Manufacturer CA");
    let tpm = SoftTpm::issued_by(&ca);
    let store = Store::new();
    store.secrets().upsert(tpm_ca_secret(&ca));
    assigned_machine(&store, "m-edge-1", &tpm.fingerprint());
    let server = TestServer::start(store).await;

    let payload = attest(&server.ws_url(""), &tpm, &[]).await;

    assert_eq!(payload.last(), Some(&b'\n'));
    let config: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(config, json!({"role": "worker", "token": "K10-join-token"}));
}

#[tokio::test]
async fn test_namespace_without_ca_trusts_any_ek() {
    let tpm = SoftTpm::issued_by(&TestCa::new("Unlisted CA"));
    let store = Store::new();
    assigned_machine(&store, "m-edge-1", &tpm.fingerprint());
    let server = TestServer::start(store).await;

    let payload = attest(&server.ws_url(""), &tpm, &[]).await;
    let config: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(config["token"], "K10-join-token");
}

#[tokio::test]
async fn test_unknown_device_rejected_before_upgrade() {
    let tpm = SoftTpm::issued_by(&TestCa::new("TPM Manufacturer CA"));
    let server = TestServer::start(Store::new()).await;

    expect_rejected(connect(&server.ws_url(""), &tpm, &[]).await, 401);
}

#[tokio::test]
async fn test_untrusted_ek_rejected_before_upgrade() {
    let trusted = TestCa::new("TPM Manufacturer CA");
    let tpm = SoftTpm::issued_by(&TestCa::new("Counterfeit CA"));
    let store = Store::new();
    store.secrets().upsert(tpm_ca_secret(&trusted));
    assigned_machine(&store, "m-edge-1", &tpm.fingerprint());
    let server = TestServer::start(store).await;

    expect_rejected(connect(&server.ws_url(""), &tpm, &[]).await, 401);
}

#[tokio::test]
async fn test_wrong_secret_closes_with_policy_violation() {
    let tpm = SoftTpm::issued_by(&TestCa::new("TPM Manufacturer CA"));
    let store = Store::new();
    assigned_machine(&store, "m-edge-1", &tpm.fingerprint());
    let server = TestServer::start(store).await;

    let mut socket = connect(&server.ws_url(""), &tpm, &[]).await.unwrap();
    answer_challenge(&mut socket, &tpm, Some(vec![0u8; 32])).await;

    match next_message(&mut socket).await {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert_eq!(frame.reason, "challenge failed");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unassigned_machine_told_over_socket() {
    let tpm = SoftTpm::issued_by(&TestCa::new("TPM Manufacturer CA"));
    let store = Store::new();
    let mut machine = MachineRecord {
        metadata: ObjectMeta::named(NAMESPACE, "m-edge-1"),
        ..Default::default()
    };
    machine.spec.tpm_hash = tpm.fingerprint();
    store.machines().upsert(machine);
    let server = TestServer::start(store).await;

    let mut socket = connect(&server.ws_url(""), &tpm, &[]).await.unwrap();
    answer_challenge(&mut socket, &tpm, None).await;

    match next_message(&mut socket).await {
        Message::Binary(data) => assert_eq!(data, b"cluster not assigned"),
        other => panic!("expected error message, got {other:?}"),
    }
    match next_message(&mut socket).await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {other:?}"),
    }
}
