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

//! Pre-shared token authenticator for enrolled machines.

use axum::http::HeaderMap;
use tracing::debug;

use crate::error::{RegistrarError, Result};
use crate::model::object_key;
use crate::store::indexes::{MACHINE_BY_SECRET_NAME, SECRET_BY_TOKEN};
use crate::store::Store;

use super::{bearer_token, Authenticated};

/// Authenticates a machine by the token stored in its bound secret.
///
/// The bearer token is the base64 encoding of the secret's raw `token`
/// value. Enrollment requests are never handled here.
#[derive(Debug, Clone)]
pub struct SharedSecretAuthenticator {
    store: Store,
}

impl SharedSecretAuthenticator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        namespace: Option<&str>,
    ) -> Result<Option<Authenticated>> {
        let token = bearer_token(headers);
        if token.is_empty() || namespace.is_some() {
            return Ok(None);
        }

        let secret = self
            .store
            .secrets()
            .find_unique(SECRET_BY_TOKEN, token)?
            .unique()
            .ok_or(RegistrarError::TokenNotFound)?;

        let secret_key = object_key(&secret.metadata.namespace, &secret.metadata.name);
        let machine = self
            .store
            .machines()
            .find_unique(MACHINE_BY_SECRET_NAME, &secret_key)?
            .unique()
            .ok_or(RegistrarError::MachineNotFound)?;

        debug!(machine = %machine.metadata.key(), secret = %secret_key, "Token accepted");
        Ok(Some(Authenticated::Direct((*machine).clone())))
    }
}
