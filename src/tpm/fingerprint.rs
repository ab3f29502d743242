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

//! Identity fingerprints.
//!
//! A machine is identified by the lowercase hex SHA-256 of the DER encoding
//! of its endorsement key's SubjectPublicKeyInfo. The same key always yields
//! the same fingerprint whether it arrived bare or inside a certificate.

use der::Encode;
use sha2::{Digest, Sha256};
use spki::SubjectPublicKeyInfoOwned;

use crate::error::{RegistrarError, Result};

/// Fingerprint of a public key.
pub fn fingerprint(public_key: &SubjectPublicKeyInfoOwned) -> Result<String> {
    let der = public_key.to_der().map_err(|e| {
        RegistrarError::key_material(format!("Failed to encode public key: {e}"))
    })?;
    Ok(fingerprint_der(&der))
}

/// Fingerprint of an already DER-encoded SubjectPublicKeyInfo.
pub fn fingerprint_der(spki_der: &[u8]) -> String {
    hex::encode(Sha256::digest(spki_der))
}

/// Format a fingerprint as colon-separated uppercase hex for display.
///
/// Example output: "AB:CD:EF:01:23:45:..."
pub fn format_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(":")
}
