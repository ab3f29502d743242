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

//! Endorsement key decoding.

use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION, SECP_256_R_1};
use der::asn1::ObjectIdentifier;
use der::{Decode, Encode};
use p256::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use spki::SubjectPublicKeyInfoOwned;
use x509_cert::Certificate;

use crate::error::{RegistrarError, Result};

use super::fingerprint::fingerprint;

/// A usable endorsement public key.
#[derive(Debug, Clone)]
pub enum EkPublicKey {
    Rsa(RsaPublicKey),
    EcP256(p256::PublicKey),
}

/// An endorsement key as presented by a device.
#[derive(Debug, Clone)]
pub struct EndorsementKey {
    /// Manufacturer certificate, when the device sent one.
    pub certificate: Option<Certificate>,
    /// The key itself.
    pub public: SubjectPublicKeyInfoOwned,
}

impl EndorsementKey {
    /// Decode a PEM block labelled `CERTIFICATE` or `PUBLIC KEY`.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let (label, der) = der::pem::decode_vec(pem)
            .map_err(|e| RegistrarError::key_material(format!("invalid EK PEM: {e}")))?;

        match label {
            "CERTIFICATE" => {
                let certificate = Certificate::from_der(&der).map_err(|e| {
                    RegistrarError::key_material(format!("invalid EK certificate: {e}"))
                })?;
                let public = certificate.tbs_certificate.subject_public_key_info.clone();
                Ok(Self {
                    certificate: Some(certificate),
                    public,
                })
            }
            "PUBLIC KEY" => {
                let public = SubjectPublicKeyInfoOwned::from_der(&der).map_err(|e| {
                    RegistrarError::key_material(format!("invalid EK public key: {e}"))
                })?;
                Ok(Self {
                    certificate: None,
                    public,
                })
            }
            other => Err(RegistrarError::key_material(format!(
                "invalid pem type: {other}"
            ))),
        }
    }

    /// Identity fingerprint of this key.
    pub fn fingerprint(&self) -> Result<String> {
        fingerprint(&self.public)
    }

    /// The key in a form usable for encryption.
    pub fn public_key(&self) -> Result<EkPublicKey> {
        public_key_from_spki(&self.public)
    }
}

/// Decode a SubjectPublicKeyInfo into an RSA or P-256 key.
pub(crate) fn public_key_from_spki(spki: &SubjectPublicKeyInfoOwned) -> Result<EkPublicKey> {
    let der = spki
        .to_der()
        .map_err(|e| RegistrarError::key_material(format!("Failed to encode public key: {e}")))?;
    let oid = spki.algorithm.oid;

    if oid == RSA_ENCRYPTION {
        return RsaPublicKey::from_public_key_der(&der)
            .map(EkPublicKey::Rsa)
            .map_err(|e| RegistrarError::key_material(format!("invalid RSA key: {e}")));
    }

    if oid == ID_EC_PUBLIC_KEY {
        let curve = spki
            .algorithm
            .parameters
            .as_ref()
            .and_then(|p| p.decode_as::<ObjectIdentifier>().ok());
        if curve != Some(SECP_256_R_1) {
            return Err(RegistrarError::key_material(
                "unsupported elliptic curve, only P-256 is supported",
            ));
        }
        return p256::PublicKey::from_public_key_der(&der)
            .map(EkPublicKey::EcP256)
            .map_err(|e| RegistrarError::key_material(format!("invalid EC key: {e}")));
    }

    Err(RegistrarError::key_material(format!(
        "unsupported public key algorithm {oid}"
    )))
}
