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

//! Machine authentication.
//!
//! Two authenticators are tried in a fixed order:
//!
//! 1. [`TpmAuthenticator`] for `Authorization: Bearer TPM<evidence>`
//! 2. [`SharedSecretAuthenticator`] for a plain bearer token
//!
//! The first authenticator that recognises the request decides it, whether
//! it succeeds or fails. A request neither recognises is unauthenticated.
//!
//! TPM authentication cannot finish inside the request: the device must
//! answer a challenge over an upgraded socket. It therefore yields an
//! [`Authenticated::Challenge`] that the server completes once the socket is
//! up.

pub mod shared_secret;
pub mod tpm;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::error::Result;
use crate::model::MachineRecord;
use crate::store::Store;

pub use shared_secret::SharedSecretAuthenticator;
pub use tpm::{PendingAttestation, TpmAuthenticator};

/// Outcome of an authenticator that recognised the request.
#[derive(Debug)]
pub enum Authenticated {
    /// The machine is authenticated; the response goes in the HTTP body.
    Direct(MachineRecord),
    /// The machine must answer a challenge over an upgraded socket.
    Challenge(PendingAttestation),
}

/// The closed set of authenticators.
#[derive(Debug, Clone)]
pub enum Authenticator {
    ModuleAttestation(TpmAuthenticator),
    SharedSecret(SharedSecretAuthenticator),
}

impl Authenticator {
    /// Authenticate a request.
    ///
    /// `namespace` is set for enrollment requests and names the namespace
    /// the machine is enrolling into. `Ok(None)` means the authenticator does
    /// not apply to this request.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        namespace: Option<&str>,
    ) -> Result<Option<Authenticated>> {
        match self {
            Self::ModuleAttestation(auth) => auth.authenticate(headers, namespace),
            Self::SharedSecret(auth) => auth.authenticate(headers, namespace),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ModuleAttestation(_) => "tpm",
            Self::SharedSecret(_) => "shared-secret",
        }
    }
}

/// Authenticators in the order they are tried.
#[derive(Debug, Clone)]
pub struct AuthChain {
    authenticators: Vec<Authenticator>,
}

impl AuthChain {
    /// The standard chain: TPM attestation, then shared secret.
    pub fn new(store: Store) -> Self {
        Self {
            authenticators: vec![
                Authenticator::ModuleAttestation(TpmAuthenticator::new(store.clone())),
                Authenticator::SharedSecret(SharedSecretAuthenticator::new(store)),
            ],
        }
    }

    /// Run the chain. `Ok(None)` means no authenticator applied.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        namespace: Option<&str>,
    ) -> Result<Option<Authenticated>> {
        for authenticator in &self.authenticators {
            if let Some(outcome) = authenticator.authenticate(headers, namespace)? {
                tracing::debug!(authenticator = authenticator.name(), "Request recognised");
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }
}

/// The `Authorization` header with any `Bearer ` prefix removed.
///
/// Returns an empty string when the header is absent or not valid text.
pub fn bearer_token(headers: &HeaderMap) -> &str {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    value.strip_prefix("Bearer ").unwrap_or(value)
}
