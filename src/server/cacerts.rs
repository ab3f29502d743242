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

//! CA bundle distribution.
//!
//! The bundle is served without authentication. A client that already holds
//! a token can ask for tamper evidence by sending a nonce and
//! `base64(SHA-256(token))` as its bearer token; the response then carries
//! `X-Cattle-Hash: base64(HMAC-SHA512(token, nonce ‖ 0 ‖ body ‖ 0))`.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use tracing::debug;

use crate::auth::bearer_token;
use crate::config::{SETTING_CACERTS, SETTING_INTERNAL_CACERTS};
use crate::store::indexes::{MACHINE_BY_TOKEN_HASH, SECRET_BY_TOKEN_HASH, TOKEN_KEY};
use crate::store::{Match, Store};

use super::AppState;

/// Request header carrying the client's nonce.
pub const NONCE_HEADER: &str = "x-cattle-nonce";

/// Response header carrying the MAC over the bundle.
pub const HASH_HEADER: &str = "x-cattle-hash";

pub(super) async fn handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let body = ca_bundle(&state.store);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

    let nonce = headers
        .get(NONCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let token = bearer_token(&headers);
    if !token.is_empty() && !nonce.is_empty() {
        match mac_key(&state.store, token) {
            Some(key) => {
                let hash = sign(&key, nonce.as_bytes(), &body);
                if let Ok(value) = HeaderValue::from_str(&hash) {
                    response_headers.insert(HeaderName::from_static(HASH_HEADER), value);
                }
            }
            None => debug!("No token matches the CA request, sending bundle without hash"),
        }
    }

    (response_headers, body).into_response()
}

/// The CA bundle, newline-terminated, or empty when none is configured.
pub fn ca_bundle(store: &Store) -> Vec<u8> {
    let mut ca = store.setting(SETTING_CACERTS);
    if ca.is_empty() {
        ca = store.setting(SETTING_INTERNAL_CACERTS);
    }
    if ca.trim().is_empty() {
        return Vec::new();
    }
    if !ca.ends_with('\n') {
        ca.push('\n');
    }
    ca.into_bytes()
}

/// Resolve the MAC key for a hashed token.
///
/// Token secrets are consulted first; a machine identified by the hash of its
/// fingerprint signs with the fingerprint itself.
fn mac_key(store: &Store, token_hash: &str) -> Option<Vec<u8>> {
    if let Ok(Match::One(secret)) = store.secrets().find_unique(SECRET_BY_TOKEN_HASH, token_hash) {
        return secret.value(TOKEN_KEY).map(<[u8]>::to_vec);
    }
    if let Ok(Match::One(machine)) = store
        .machines()
        .find_unique(MACHINE_BY_TOKEN_HASH, token_hash)
    {
        return Some(machine.spec.tpm_hash.clone().into_bytes());
    }
    None
}

/// base64(HMAC-SHA512(key, nonce ‖ 0 ‖ body ‖ 0)).
pub fn sign(key: &[u8], nonce: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let Ok(mut mac) = <Hmac<Sha512> as Mac>::new_from_slice(key) else {
        return String::new();
    };
    mac.update(nonce);
    mac.update(&[0]);
    mac.update(body);
    mac.update(&[0]);
    BASE64_STANDARD.encode(mac.finalize().into_bytes())
}
