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

//! Trusted platform module attestation primitives.
//!
//! A device proves its identity with two keys held by its TPM:
//!
//! - the **endorsement key** (EK), provisioned by the manufacturer and
//!   optionally certified by them; its fingerprint is the machine identity
//! - an **attestation key** (AK), a restricted signing key created in the
//!   same TPM
//!
//! The verifier encrypts a secret to the EK, bound to the AK name
//! ([`credential`]). Only the TPM that holds both keys can return it.
//!
//! The JSON documents exchanged with devices keep the field names devices
//! already send, with byte fields as standard base64.

pub mod chain;
pub mod credential;
pub mod ek;
pub mod fingerprint;
pub mod structures;

use serde::{Deserialize, Serialize};

use crate::codec::base64_bytes;

pub use chain::{verify_ek_certificate, CertificateValidator, ValidationConfig, ValidationResult};
pub use credential::{check_ak_parameters, make_credential, ActivationParameters};
pub use ek::{EkPublicKey, EndorsementKey};
pub use fingerprint::{fingerprint, format_fingerprint};

/// Attestation key parameters as reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationParameters {
    /// Encoded `TPMT_PUBLIC` of the attestation key.
    #[serde(rename = "Public", with = "base64_bytes", default)]
    pub public: Vec<u8>,

    /// TPM 1.2 activation format; never accepted.
    #[serde(rename = "UseTCSDActivationFormat", default)]
    pub use_tcsd_activation_format: bool,

    /// `TPMS_CREATION_DATA` returned when the key was created.
    #[serde(rename = "CreateData", with = "base64_bytes", default)]
    pub create_data: Vec<u8>,

    /// `TPMS_ATTEST` certifying the creation data.
    #[serde(rename = "CreateAttestation", with = "base64_bytes", default)]
    pub create_attestation: Vec<u8>,

    /// `TPMT_SIGNATURE` over the attestation, made by the key itself.
    #[serde(rename = "CreateSignature", with = "base64_bytes", default)]
    pub create_signature: Vec<u8>,
}

/// Identity evidence carried in the `Authorization` header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationData {
    /// PEM-encoded EK certificate or public key.
    #[serde(rename = "EK", with = "base64_bytes", default)]
    pub ek: Vec<u8>,

    #[serde(rename = "AK", default)]
    pub ak: AttestationParameters,
}

/// Credential blob produced by `TPM2_MakeCredential`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCredential {
    /// `TPM2B_ID_OBJECT`.
    #[serde(rename = "Credential", with = "base64_bytes", default)]
    pub credential: Vec<u8>,

    /// `TPM2B_ENCRYPTED_SECRET`.
    #[serde(rename = "Secret", with = "base64_bytes", default)]
    pub secret: Vec<u8>,
}

/// Challenge sent to the device over the attestation socket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "EC")]
    pub ec: EncryptedCredential,
}

/// The device's answer: the decrypted activation secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    #[serde(rename = "Secret", with = "base64_bytes", default)]
    pub secret: Vec<u8>,
}
