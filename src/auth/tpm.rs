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

//! TPM attestation authenticator.
//!
//! The device sends `Authorization: Bearer TPM<base64 JSON>` carrying its
//! endorsement key and attestation key parameters. The authenticator
//! resolves the machine, checks the EK certificate against the namespace's
//! TPM CA and prepares a credential activation challenge. The server then
//! upgrades the connection and completes the exchange with
//! [`PendingAttestation::verify`].

use std::fmt;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::prelude::*;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::error::{RegistrarError, Result};
use crate::model::{MachineRecord, MachineSpec, ObjectMeta};
use crate::store::indexes::MACHINE_BY_FINGERPRINT;
use crate::store::Store;
use crate::tpm::{
    verify_ek_certificate, ActivationParameters, AttestationData, AttestationParameters,
    Challenge, ChallengeResponse, EndorsementKey,
};

use super::Authenticated;

/// Prefix of an `Authorization` header carrying TPM evidence.
pub const TPM_BEARER_PREFIX: &str = "Bearer TPM";

/// Secret holding a namespace's TPM manufacturer CA bundle.
pub const TPM_CA_SECRET: &str = "tpm-ca";

/// Key of the PEM bundle inside [`TPM_CA_SECRET`].
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Authenticates machines by TPM credential activation.
#[derive(Debug, Clone)]
pub struct TpmAuthenticator {
    store: Store,
}

impl TpmAuthenticator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Resolve the machine and prepare its challenge.
    ///
    /// With a `namespace` the machine is enrolling and a stub record carrying
    /// only the fingerprint is produced. Without one the machine must already
    /// be known by its fingerprint.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        namespace: Option<&str>,
    ) -> Result<Option<Authenticated>> {
        let Some(evidence) = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix(TPM_BEARER_PREFIX))
        else {
            return Ok(None);
        };

        let data = decode_evidence(evidence)?;
        let ek = EndorsementKey::from_pem(&data.ek)?;
        let fingerprint = ek.fingerprint()?;

        let machine = match namespace {
            Some(namespace) => {
                self.verify_chain(&ek, namespace, &fingerprint)?;
                MachineRecord {
                    metadata: ObjectMeta {
                        namespace: namespace.to_string(),
                        ..Default::default()
                    },
                    spec: MachineSpec {
                        tpm_hash: fingerprint.clone(),
                        ..Default::default()
                    },
                    ..Default::default()
                }
            }
            None => {
                let machine = match self
                    .store
                    .machines()
                    .find_unique(MACHINE_BY_FINGERPRINT, &fingerprint)?
                    .unique()
                {
                    Some(machine) => machine,
                    None => {
                        debug!(%fingerprint, "No unique machine for fingerprint");
                        return Err(RegistrarError::UnknownDevice);
                    }
                };
                self.verify_chain(&ek, &machine.metadata.namespace, &fingerprint)?;
                (*machine).clone()
            }
        };

        let pending = PendingAttestation::new(machine, &ek, &data.ak)?;
        Ok(Some(Authenticated::Challenge(pending)))
    }

    /// Check the EK certificate against the namespace's TPM CA.
    ///
    /// A namespace without a CA secret accepts any endorsement key.
    fn verify_chain(&self, ek: &EndorsementKey, namespace: &str, fingerprint: &str) -> Result<()> {
        let Some(secret) = self.store.secrets().get(namespace, TPM_CA_SECRET) else {
            debug!(%namespace, %fingerprint, "No TPM CA configured, accepting endorsement key");
            return Ok(());
        };
        let bundle = secret.value(TLS_CERT_KEY).unwrap_or_default();
        verify_ek_certificate(ek.certificate.as_ref(), bundle).inspect_err(|e| {
            warn!(%namespace, %fingerprint, error = %e, "Endorsement key rejected");
        })
    }
}

fn decode_evidence(evidence: &str) -> Result<AttestationData> {
    let json = BASE64_STANDARD.decode(evidence.as_bytes())?;
    Ok(serde_json::from_slice(&json)?)
}

/// A machine waiting to answer its activation challenge.
pub struct PendingAttestation {
    machine: MachineRecord,
    secret: Vec<u8>,
    challenge: Challenge,
}

impl PendingAttestation {
    /// Build a challenge for `ek` bound to the attestation key `ak`.
    pub fn new(
        machine: MachineRecord,
        ek: &EndorsementKey,
        ak: &AttestationParameters,
    ) -> Result<Self> {
        let public = ek.public_key()?;
        let (secret, ec) = ActivationParameters { ek: &public, ak }.generate()?;
        Ok(Self {
            machine,
            secret,
            challenge: Challenge { ec },
        })
    }

    /// Fingerprint of the machine being challenged.
    pub fn fingerprint(&self) -> &str {
        &self.machine.spec.tpm_hash
    }

    /// The challenge message to send to the device.
    pub fn challenge_message(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.challenge)?)
    }

    /// Check the device's answer, yielding the authenticated machine.
    pub fn verify(self, response: &[u8]) -> Result<MachineRecord> {
        let response: ChallengeResponse = serde_json::from_slice(response)
            .map_err(|e| RegistrarError::ChallengeResponse(e.to_string()))?;
        if !bool::from(self.secret.as_slice().ct_eq(response.secret.as_slice())) {
            return Err(RegistrarError::ChallengeFailed);
        }
        Ok(self.machine)
    }
}

impl fmt::Debug for PendingAttestation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAttestation")
            .field("machine", &self.machine.metadata.key())
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}
