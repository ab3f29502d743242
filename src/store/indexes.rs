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

//! Identity index definitions.

use base64::prelude::*;
use sha2::{Digest, Sha256};

use crate::model::{object_key, MachineRecord, RegistrationTicket, SecretRecord};

/// Machines by identity fingerprint.
pub const MACHINE_BY_FINGERPRINT: &str = "tpmHashIndex";

/// Machines by `namespace/machineTokenSecretName`.
pub const MACHINE_BY_SECRET_NAME: &str = "machineBySecretNameIndex";

/// Machines by base64(SHA-256(fingerprint)).
pub const MACHINE_BY_TOKEN_HASH: &str = "tokenByHash";

/// Token secrets by base64 of the raw token.
pub const SECRET_BY_TOKEN: &str = "tokenIndex";

/// Token secrets by base64(SHA-256(raw token)).
pub const SECRET_BY_TOKEN_HASH: &str = "tokenByHash";

/// Registration tickets by registration token.
pub const REGISTRATION_BY_TOKEN: &str = "registrationTokenIndex";

/// Secret type carrying a machine token.
pub const TOKEN_SECRET_TYPE: &str = "rancheros.cattle.io/token";

/// Secret data key holding the raw machine token.
pub const TOKEN_KEY: &str = "token";

/// base64(SHA-256(data)), the form in which tokens travel on the CA path.
pub fn token_hash(data: &[u8]) -> String {
    BASE64_STANDARD.encode(Sha256::digest(data))
}

pub fn machine_by_fingerprint(machine: &MachineRecord) -> Vec<String> {
    if machine.spec.tpm_hash.is_empty() {
        return Vec::new();
    }
    vec![machine.spec.tpm_hash.clone()]
}

pub fn machine_by_secret_name(machine: &MachineRecord) -> Vec<String> {
    if machine.spec.machine_token_secret_name.is_empty() {
        return Vec::new();
    }
    vec![object_key(
        &machine.metadata.namespace,
        &machine.spec.machine_token_secret_name,
    )]
}

pub fn machine_by_token_hash(machine: &MachineRecord) -> Vec<String> {
    if machine.spec.tpm_hash.is_empty() {
        return Vec::new();
    }
    vec![token_hash(machine.spec.tpm_hash.as_bytes())]
}

fn machine_token(secret: &SecretRecord) -> Option<&[u8]> {
    if secret.secret_type != TOKEN_SECRET_TYPE {
        return None;
    }
    secret.value(TOKEN_KEY).filter(|token| !token.is_empty())
}

pub fn secret_by_token(secret: &SecretRecord) -> Vec<String> {
    machine_token(secret)
        .map(|token| vec![BASE64_STANDARD.encode(token)])
        .unwrap_or_default()
}

pub fn secret_by_token_hash(secret: &SecretRecord) -> Vec<String> {
    machine_token(secret)
        .map(|token| vec![token_hash(token)])
        .unwrap_or_default()
}

pub fn registration_by_token(ticket: &RegistrationTicket) -> Vec<String> {
    if ticket.status.registration_token.is_empty() {
        return Vec::new();
    }
    vec![ticket.status.registration_token.clone()]
}
