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

//! Response sinks and the attestation socket round trip.
//!
//! A TPM-attested request is answered over a WebSocket: the server writes
//! one challenge, reads one answer and, if the answer is right, writes the
//! handler's response on the same socket before closing it. Every socket
//! operation runs under a deadline measured from the upgrade.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::auth::PendingAttestation;
use crate::error::{ErrorClass, RegistrarError, Result};
use crate::model::MachineRecord;

use super::{AppState, Followup};

/// Largest close reason a control frame can carry.
const MAX_CLOSE_REASON: usize = 123;

/// Deadlines for the attestation socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketTimeouts {
    /// Upgrade must complete within this long of the request being accepted.
    pub handshake: Duration,
    /// Writes must finish within this long of the upgrade.
    pub write: Duration,
    /// The answer must arrive within this long of the upgrade.
    pub read: Duration,
}

impl Default for SocketTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(5),
            write: Duration::from_secs(10),
            read: Duration::from_secs(10),
        }
    }
}

/// Where an authenticated handler writes its answer.
#[async_trait]
pub trait ResponseSink: Send {
    /// Write the response payload.
    async fn send(&mut self, payload: Vec<u8>) -> Result<()>;

    /// Report a failure to the machine.
    async fn fail(&mut self, err: &RegistrarError) -> Result<()>;
}

/// Sink that becomes the HTTP response body.
#[derive(Debug)]
pub struct HttpSink {
    status: StatusCode,
    body: Vec<u8>,
}

impl Default for HttpSink {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            body: Vec::new(),
        }
    }
}

#[async_trait]
impl ResponseSink for HttpSink {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        self.body.extend_from_slice(&payload);
        Ok(())
    }

    async fn fail(&mut self, err: &RegistrarError) -> Result<()> {
        self.status = err.status_code();
        self.body = format!("{err}\n").into_bytes();
        Ok(())
    }
}

impl IntoResponse for HttpSink {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        if self.status != StatusCode::OK {
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
        }
        response
    }
}

/// Sink that writes binary messages on the attestation socket.
pub struct SocketSink {
    socket: WebSocket,
    write_deadline: Instant,
}

impl SocketSink {
    /// Close the socket normally.
    pub async fn close(mut self) -> Result<()> {
        let frame = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Borrowed(""),
        }));
        write(&mut self.socket, frame, self.write_deadline).await
    }
}

#[async_trait]
impl ResponseSink for SocketSink {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        write(&mut self.socket, Message::Binary(payload), self.write_deadline).await
    }

    async fn fail(&mut self, err: &RegistrarError) -> Result<()> {
        let message = Message::Binary(err.to_string().into_bytes());
        write(&mut self.socket, message, self.write_deadline).await
    }
}

async fn write(socket: &mut WebSocket, message: Message, deadline: Instant) -> Result<()> {
    timeout_at(deadline, socket.send(message))
        .await
        .map_err(|_| RegistrarError::Timeout("socket write"))?
        .map_err(|e| RegistrarError::socket(e.to_string()))
}

/// Read the next data message, skipping control frames.
async fn read(socket: &mut WebSocket, deadline: Instant) -> Result<Vec<u8>> {
    loop {
        let next = timeout_at(deadline, socket.recv())
            .await
            .map_err(|_| RegistrarError::Timeout("challenge response"))?;
        match next {
            None => return Err(RegistrarError::socket("connection closed before response")),
            Some(Err(e)) => return Err(RegistrarError::socket(e.to_string())),
            Some(Ok(Message::Binary(data))) => return Ok(data),
            Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) => {
                return Err(RegistrarError::socket("connection closed before response"));
            }
        }
    }
}

/// Write the challenge, read the answer and check it.
async fn round_trip(
    socket: &mut WebSocket,
    pending: PendingAttestation,
    write_deadline: Instant,
    read_deadline: Instant,
) -> Result<MachineRecord> {
    let challenge = pending.challenge_message()?;
    write(socket, Message::Binary(challenge), write_deadline).await?;
    let answer = read(socket, read_deadline).await?;
    pending.verify(&answer)
}

/// Upgrade the request and run the attestation exchange on the socket.
///
/// Returns the `101 Switching Protocols` response immediately; the exchange
/// and `followup` run once the upgrade completes.
pub(crate) fn accept(
    ws: WebSocketUpgrade,
    pending: PendingAttestation,
    state: AppState,
    followup: Followup,
) -> Response {
    let handshake_deadline = Instant::now() + state.timeouts.handshake;
    ws.on_failed_upgrade(|e| warn!(error = %e, "Attestation socket upgrade failed"))
        .on_upgrade(move |socket| attest(socket, pending, state, followup, handshake_deadline))
}

async fn attest(
    mut socket: WebSocket,
    pending: PendingAttestation,
    state: AppState,
    followup: Followup,
    handshake_deadline: Instant,
) {
    let fingerprint = pending.fingerprint().to_string();
    let upgraded = Instant::now();
    if upgraded > handshake_deadline {
        let err = RegistrarError::Timeout("socket handshake");
        warn!(%fingerprint, error = %err, "Attestation aborted");
        close_with_error(socket, &err, upgraded + state.timeouts.write).await;
        return;
    }

    let write_deadline = upgraded + state.timeouts.write;
    let read_deadline = upgraded + state.timeouts.read;

    let machine = match round_trip(&mut socket, pending, write_deadline, read_deadline).await {
        Ok(machine) => machine,
        Err(err) => {
            warn!(%fingerprint, error = %err, "Attestation failed");
            close_with_error(socket, &err, write_deadline).await;
            return;
        }
    };
    info!(%fingerprint, namespace = %machine.metadata.namespace, "Attestation succeeded");

    let mut sink = SocketSink {
        socket,
        write_deadline,
    };
    followup.run(&state, machine, &mut sink).await;
    if let Err(e) = sink.close().await {
        debug!(%fingerprint, error = %e, "Closing attestation socket failed");
    }
}

async fn close_with_error(mut socket: WebSocket, err: &RegistrarError, deadline: Instant) {
    let code = match err.class() {
        ErrorClass::MalformedInput | ErrorClass::ProofFailure | ErrorClass::UnknownIdentity => {
            close_code::POLICY
        }
        ErrorClass::Transport | ErrorClass::Dependency => close_code::ERROR,
    };
    let frame = Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Owned(close_reason(&err.to_string())),
    }));
    if let Err(e) = write(&mut socket, frame, deadline).await {
        debug!(error = %e, "Sending close frame failed");
    }
}

/// Truncate a close reason to fit a control frame.
fn close_reason(message: &str) -> String {
    if message.len() <= MAX_CLOSE_REASON {
        return message.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
