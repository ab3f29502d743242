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

//! Integration test utilities and helpers
//!
//! Starts the real registrar on an ephemeral port and provides fixtures for
//! the records it reads, plus a WebSocket client that plays the device side
//! of the attestation exchange.

#![allow(dead_code)]

pub mod soft_tpm;

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use machine_registrar::config::SETTING_SERVER_URL;
use machine_registrar::model::{
    ClusterJoinToken, MachineRecord, ObjectMeta, RegistrationTicket, SecretRecord,
};
use machine_registrar::server::socket::SocketTimeouts;
use machine_registrar::server::{self, AppState};
use machine_registrar::store::indexes::{TOKEN_KEY, TOKEN_SECRET_TYPE};
use machine_registrar::store::Store;
use machine_registrar::tpm::{Challenge, ChallengeResponse};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use soft_tpm::SoftTpm;

/// Path prefix the test server mounts its API under.
pub const BASE_PATH: &str = "/v1-rancheros";

/// Namespace all fixtures live in.
pub const NAMESPACE: &str = "fleet";

/// Registration token of the fixture ticket.
pub const REGISTRATION_TOKEN: &str = "reg-token-1";

/// Server URL handed to enrolled machines.
pub const SERVER_URL: &str = "https://rancher.example.com";

/// A registrar serving on a loopback port.
pub struct TestServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Serve `store` on an ephemeral port.
    pub async fn start(store: Store) -> Self {
        Self::start_with_timeouts(store, SocketTimeouts::default()).await
    }

    /// Serve `store` with custom attestation socket deadlines.
    pub async fn start_with_timeouts(store: Store, timeouts: SocketTimeouts) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Listener address");
        let router = server::router(AppState::new(store, timeouts), BASE_PATH);
        let handle = tokio::spawn(async move {
            let _ = server::serve(listener, router).await;
        });
        Self { addr, handle }
    }

    /// HTTP URL for a path under the base path.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{BASE_PATH}{path}", self.addr)
    }

    /// WebSocket URL for a path under the base path.
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{BASE_PATH}{path}", self.addr)
    }

    /// HTTP URL for a path outside the base path.
    pub fn root_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Store with the `server-url` setting and one registration ticket.
pub fn enrollment_store() -> Store {
    let store = Store::new();
    store.set_setting(SETTING_SERVER_URL, SERVER_URL);

    let mut ticket = RegistrationTicket {
        metadata: ObjectMeta::named(NAMESPACE, "edge-sites"),
        ..Default::default()
    };
    ticket.status.registration_token = REGISTRATION_TOKEN.to_string();
    ticket.status.registration_url = format!("{SERVER_URL}{BASE_PATH}/registration/{REGISTRATION_TOKEN}");
    ticket
        .spec
        .machine_inventory_labels
        .insert("site".to_string(), "edge".to_string());
    store.registrations().upsert(ticket);
    store
}

/// An enrolled machine assigned to cluster `prod` with a provisioned join
/// token.
pub fn assigned_machine(store: &Store, name: &str, fingerprint: &str) -> MachineRecord {
    let mut token = ClusterJoinToken {
        metadata: ObjectMeta::named(NAMESPACE, "prod-join"),
        ..Default::default()
    };
    token.status.token = "K10-join-token".to_string();
    store.join_tokens().upsert(token);

    let mut machine = MachineRecord {
        metadata: ObjectMeta::named(NAMESPACE, name),
        ..Default::default()
    };
    machine.spec.tpm_hash = fingerprint.to_string();
    machine.spec.cluster_name = "prod".to_string();
    machine.spec.config.role = "worker".to_string();
    machine.status.cluster_registration_token_namespace = NAMESPACE.to_string();
    machine.status.cluster_registration_token_name = "prod-join".to_string();
    store.machines().upsert(machine.clone());
    machine
}

/// A machine token secret holding `token`.
pub fn token_secret(name: &str, token: &[u8]) -> SecretRecord {
    let mut secret = SecretRecord {
        metadata: ObjectMeta::named(NAMESPACE, name),
        secret_type: TOKEN_SECRET_TYPE.to_string(),
        ..Default::default()
    };
    secret.data.insert(TOKEN_KEY.to_string(), token.to_vec());
    secret
}

pub type DeviceSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the attestation socket with `tpm`'s evidence and extra headers.
///
/// Header names must be lowercase.
pub async fn connect(
    url: &str,
    tpm: &SoftTpm,
    headers: &[(&'static str, String)],
) -> Result<DeviceSocket, tokio_tungstenite::tungstenite::Error> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        "authorization",
        HeaderValue::from_str(&tpm.authorization()).expect("header value"),
    );
    for (name, value) in headers {
        request
            .headers_mut()
            .insert(*name, HeaderValue::from_str(value).expect("header value"));
    }
    let (socket, _) = connect_async(request).await?;
    Ok(socket)
}

/// Read the challenge and answer it with `secret`, or with the activated
/// secret when `secret` is `None`.
pub async fn answer_challenge(socket: &mut DeviceSocket, tpm: &SoftTpm, secret: Option<Vec<u8>>) {
    let challenge = match next_message(socket).await {
        Message::Binary(data) => serde_json::from_slice::<Challenge>(&data).expect("challenge JSON"),
        other => panic!("expected challenge, got {other:?}"),
    };
    let secret = match secret {
        Some(secret) => secret,
        None => tpm
            .activate_credential(&challenge.ec)
            .expect("credential activation"),
    };
    let response = serde_json::to_vec(&ChallengeResponse { secret }).expect("response JSON");
    socket
        .send(Message::Binary(response))
        .await
        .expect("send response");
}

/// Next data or close message, skipping pings.
pub async fn next_message(socket: &mut DeviceSocket) -> Message {
    loop {
        match socket.next().await {
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(message)) => return message,
            Some(Err(e)) => panic!("socket error: {e}"),
            None => panic!("socket closed without a close frame"),
        }
    }
}

/// Run the full device side of an attestation and return the payload.
pub async fn attest(url: &str, tpm: &SoftTpm, headers: &[(&'static str, String)]) -> Vec<u8> {
    let mut socket = connect(url, tpm, headers).await.expect("socket upgrade");
    answer_challenge(&mut socket, tpm, None).await;
    let payload = match next_message(&mut socket).await {
        Message::Binary(data) => data,
        other => panic!("expected payload, got {other:?}"),
    };
    match next_message(&mut socket).await {
        Message::Close(frame) => assert_normal_close(frame),
        other => panic!("expected close, got {other:?}"),
    }
    payload
}

fn assert_normal_close(frame: Option<CloseFrame<'static>>) {
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    let frame = frame.expect("close frame");
    assert_eq!(frame.code, CloseCode::Normal);
}
