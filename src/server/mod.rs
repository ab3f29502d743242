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

//! HTTP surface of the registrar.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET/POST <base>` | Join configuration for an authenticated machine |
//! | `GET/POST <base>/registration/<token>` | Enrollment through a registration ticket |
//! | `GET <base>/cacerts` | CA bundle, optionally with a tamper-evidence MAC |
//! | `GET /healthz` | Liveness |
//!
//! Requests that authenticate with TPM evidence are answered over an
//! upgraded socket; see [`socket`].

pub mod cacerts;
pub mod config_response;
pub mod register;
pub mod socket;

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::auth::{AuthChain, Authenticated};
use crate::error::{RegistrarError, Result};
use crate::model::MachineRecord;
use crate::store::{MachineClient, Store};

use register::Enrollment;
use socket::{HttpSink, ResponseSink, SocketTimeouts};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub auth: AuthChain,
    pub machines: Arc<dyn MachineClient>,
    pub timeouts: SocketTimeouts,
}

impl AppState {
    /// State backed entirely by `store`.
    pub fn new(store: Store, timeouts: SocketTimeouts) -> Self {
        Self {
            auth: AuthChain::new(store.clone()),
            machines: Arc::new(store.clone()),
            store,
            timeouts,
        }
    }
}

/// Build the router with the API mounted under `base_path`.
pub fn router(state: AppState, base_path: &str) -> Router {
    let base = base_path.trim_end_matches('/');
    Router::new()
        .route(base, get(join_config).post(join_config))
        .route(&format!("{base}/cacerts"), get(cacerts::handler))
        .route(
            &format!("{base}/registration/:token"),
            get(register::handler).post(register::handler),
        )
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Serve `router` until interrupted.
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "Registrar listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Registrar stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    debug!("Shutdown signal received");
}

async fn healthz() -> &'static str {
    "ok"
}

async fn join_config(
    State(state): State<AppState>,
    ws: Option<WebSocketUpgrade>,
    headers: HeaderMap,
) -> Response {
    respond(state, ws, &headers, None, Followup::JoinConfig).await
}

/// What an authenticated request does with its machine.
pub(crate) enum Followup {
    /// Answer with the machine's join configuration.
    JoinConfig,
    /// Record the machine, then answer with its install configuration.
    Enroll(Enrollment),
}

impl Followup {
    /// Run the followup and write its outcome to `sink`.
    pub(crate) async fn run<S: ResponseSink>(
        self,
        state: &AppState,
        machine: MachineRecord,
        sink: &mut S,
    ) {
        let outcome = match self {
            Self::JoinConfig => config_response::assemble(&state.store, &machine),
            Self::Enroll(enrollment) => enrollment.complete(state, &machine).await,
        };
        let written = match outcome {
            Ok(payload) => sink.send(payload).await,
            Err(err) => {
                warn!(machine = %machine.metadata.key(), error = %err, "Request failed");
                sink.fail(&err).await
            }
        };
        if let Err(e) = written {
            debug!(error = %e, "Writing response failed");
        }
    }

    /// Response for a request no authenticator recognised.
    fn unauthenticated(self) -> Response {
        match self {
            Self::JoinConfig => text_response(StatusCode::UNAUTHORIZED, "Unauthorized\n".into()),
            Self::Enroll(enrollment) => enrollment.sample_config(),
        }
    }
}

/// Authenticate the request and run `followup` for the machine.
pub(crate) async fn respond(
    state: AppState,
    ws: Option<WebSocketUpgrade>,
    headers: &HeaderMap,
    namespace: Option<&str>,
    followup: Followup,
) -> Response {
    match state.auth.authenticate(headers, namespace) {
        Err(err) => {
            warn!(namespace = namespace.unwrap_or_default(), error = %err, "Authentication failed");
            error_response(&err)
        }
        Ok(None) => followup.unauthenticated(),
        Ok(Some(Authenticated::Direct(machine))) => {
            let mut sink = HttpSink::default();
            followup.run(&state, machine, &mut sink).await;
            sink.into_response()
        }
        Ok(Some(Authenticated::Challenge(pending))) => match ws {
            Some(ws) => socket::accept(ws, pending, state, followup),
            None => error_response(&RegistrarError::Upgrade(
                "TPM attestation requires a websocket upgrade".to_string(),
            )),
        },
    }
}

/// Plain-text error response carrying the error message.
pub(crate) fn error_response(err: &RegistrarError) -> Response {
    text_response(err.status_code(), format!("{err}\n"))
}

pub(crate) fn text_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        body,
    )
        .into_response()
}
