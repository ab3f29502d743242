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

//! Endorsement key certificate chain verification.
//!
//! Every certificate in a namespace's trust bundle is a trust anchor, so an
//! endorsement key certificate is accepted when it chains, through
//! signature-verified issuers, to any certificate in the bundle.
//!
//! # Example
//!
//! ```no_run
//! use machine_registrar::tpm::chain::{CertificateValidator, load_trust_anchors};
//!
//! # fn example(bundle: &[u8], ek_cert: &x509_cert::Certificate) -> machine_registrar::Result<()> {
//! let validator = CertificateValidator::new(load_trust_anchors(bundle)?);
//! let result = validator.validate(ek_cert, &[])?;
//!
//! if result.is_valid {
//!     println!("EK certificate chains to a trusted manufacturer CA");
//! }
//! # Ok(())
//! # }
//! ```

use const_oid::db::rfc5280::ID_CE_BASIC_CONSTRAINTS;
use const_oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, SHA_256_WITH_RSA_ENCRYPTION,
    SHA_384_WITH_RSA_ENCRYPTION, SHA_512_WITH_RSA_ENCRYPTION,
};
use der::{Decode, Encode};
use p256::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use rsa::signature::Verifier;
use sha2::{Sha256, Sha384, Sha512};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use x509_cert::Certificate;
use x509_cert::ext::pkix::BasicConstraints;

use crate::error::{RegistrarError, Result};

/// Configuration for certificate validation.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Maximum chain length (default: 10).
    pub max_chain_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_chain_length: 10,
        }
    }
}

/// Result of certificate validation.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the certificate is valid.
    pub is_valid: bool,

    /// The validated certificate chain, from end-entity to trust anchor.
    pub chain: Vec<Certificate>,

    /// Validation errors encountered.
    pub errors: Vec<String>,

    /// Validation warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// Parse every certificate in a PEM bundle.
pub fn load_trust_anchors(pem_bundle: &[u8]) -> Result<Vec<Certificate>> {
    let anchors = Certificate::load_pem_chain(pem_bundle)
        .map_err(|e| RegistrarError::chain_verification(format!("invalid CA bundle: {e}")))?;
    if anchors.is_empty() {
        return Err(RegistrarError::chain_verification("CA bundle is empty"));
    }
    Ok(anchors)
}

/// Verify an endorsement key certificate against a PEM trust bundle.
///
/// A bare endorsement public key cannot be verified and is rejected.
pub fn verify_ek_certificate(certificate: Option<&Certificate>, pem_bundle: &[u8]) -> Result<()> {
    let certificate = certificate.ok_or_else(|| {
        RegistrarError::chain_verification("EK has no certificate to verify against the CA")
    })?;
    let validator = CertificateValidator::new(load_trust_anchors(pem_bundle)?);
    let result = validator.validate(certificate, &[])?;
    if result.is_valid {
        Ok(())
    } else {
        Err(RegistrarError::chain_verification(result.errors.join("; ")))
    }
}

/// Certificate path validator.
pub struct CertificateValidator {
    trust_anchors: Vec<Certificate>,
    config: ValidationConfig,
}

impl CertificateValidator {
    /// Create a new certificate validator with trusted CAs.
    pub fn new(trust_anchors: Vec<Certificate>) -> Self {
        Self {
            trust_anchors,
            config: ValidationConfig::default(),
        }
    }

    /// Validate a certificate chain.
    ///
    /// Issuers are searched among the trust anchors first, then among
    /// `intermediates`. Each link must verify cryptographically.
    pub fn validate(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
    ) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let chain = match self.build_chain(end_entity, intermediates) {
            Ok(chain) => chain,
            Err(e) => {
                errors.push(format!("Failed to build certificate chain: {e}"));
                return Ok(ValidationResult {
                    is_valid: false,
                    chain: vec![],
                    errors,
                    warnings,
                });
            }
        };

        debug!(length = chain.len(), "Built certificate chain");

        for (i, cert) in chain.iter().enumerate() {
            if let Err(e) = check_validity_period(cert) {
                errors.push(format!("Certificate {i} invalid: {e}"));
            }

            if i > 0 {
                match is_ca(cert) {
                    Some(true) => {}
                    Some(false) => {
                        errors.push(format!("Certificate {i} is not a CA certificate"))
                    }
                    None => {
                        warn!("CA certificate missing basic constraints extension");
                        warnings.push(format!(
                            "Certificate {i} has no basic constraints extension"
                        ));
                    }
                }
            }
        }

        Ok(ValidationResult {
            is_valid: errors.is_empty(),
            chain,
            errors,
            warnings,
        })
    }

    /// Build a certificate chain from end-entity to a trust anchor.
    fn build_chain(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
    ) -> Result<Vec<Certificate>> {
        let mut chain = vec![end_entity.clone()];

        for _ in 0..self.config.max_chain_length {
            let current = &chain[chain.len() - 1];
            if self.is_trust_anchor(current) {
                return Ok(chain);
            }

            let issuer = self
                .find_issuer(current, &self.trust_anchors)
                .or_else(|| self.find_issuer(current, intermediates))
                .ok_or_else(|| {
                    RegistrarError::chain_verification("could not find a trusted issuer")
                })?;
            chain.push(issuer);
        }

        Err(RegistrarError::chain_verification(format!(
            "certificate chain longer than {}",
            self.config.max_chain_length
        )))
    }

    /// Find a candidate whose subject matches the issuer and whose key
    /// verifies the certificate's signature.
    fn find_issuer(&self, cert: &Certificate, candidates: &[Certificate]) -> Option<Certificate> {
        let issuer_dn = &cert.tbs_certificate.issuer;

        candidates
            .iter()
            .filter(|candidate| &candidate.tbs_certificate.subject == issuer_dn)
            .find(|candidate| match verify_signature(cert, candidate) {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "Issuer candidate rejected");
                    false
                }
            })
            .cloned()
    }

    fn is_trust_anchor(&self, cert: &Certificate) -> bool {
        self.trust_anchors.iter().any(|anchor| anchor == cert)
    }
}

/// Check certificate validity period against the current time.
fn check_validity_period(cert: &Certificate) -> Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| RegistrarError::chain_verification(format!("system clock: {e}")))?;
    let validity = &cert.tbs_certificate.validity;

    if now < validity.not_before.to_unix_duration() {
        return Err(RegistrarError::chain_verification("certificate not yet valid"));
    }
    if now > validity.not_after.to_unix_duration() {
        return Err(RegistrarError::chain_verification("certificate has expired"));
    }
    Ok(())
}

/// The cA flag of the basic constraints extension, if present.
fn is_ca(cert: &Certificate) -> Option<bool> {
    let extensions = cert.tbs_certificate.extensions.as_ref()?;
    let ext = extensions
        .iter()
        .find(|ext| ext.extn_id == ID_CE_BASIC_CONSTRAINTS)?;
    BasicConstraints::from_der(ext.extn_value.as_bytes())
        .ok()
        .map(|bc| bc.ca)
}

/// Verify `cert`'s signature with `issuer`'s public key.
fn verify_signature(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    let tbs = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| RegistrarError::chain_verification(format!("encode TBS: {e}")))?;
    let signature = cert.signature.as_bytes().ok_or_else(|| {
        RegistrarError::chain_verification("signature has unused bits")
    })?;
    let key_der = issuer
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| RegistrarError::chain_verification(format!("encode issuer key: {e}")))?;

    let oid = cert.signature_algorithm.oid;
    if oid == SHA_256_WITH_RSA_ENCRYPTION {
        verify_rsa::<Sha256>(&key_der, &tbs, signature)
    } else if oid == SHA_384_WITH_RSA_ENCRYPTION {
        verify_rsa::<Sha384>(&key_der, &tbs, signature)
    } else if oid == SHA_512_WITH_RSA_ENCRYPTION {
        verify_rsa::<Sha512>(&key_der, &tbs, signature)
    } else if oid == ECDSA_WITH_SHA_256 {
        let key = p256::ecdsa::VerifyingKey::from_public_key_der(&key_der)
            .map_err(|e| RegistrarError::chain_verification(format!("issuer key: {e}")))?;
        let signature = p256::ecdsa::Signature::from_der(signature)
            .map_err(|e| RegistrarError::chain_verification(format!("signature: {e}")))?;
        key.verify(&tbs, &signature)
            .map_err(|_| RegistrarError::chain_verification("bad ECDSA signature"))
    } else if oid == ECDSA_WITH_SHA_384 {
        let key = p384::ecdsa::VerifyingKey::from_public_key_der(&key_der)
            .map_err(|e| RegistrarError::chain_verification(format!("issuer key: {e}")))?;
        let signature = p384::ecdsa::Signature::from_der(signature)
            .map_err(|e| RegistrarError::chain_verification(format!("signature: {e}")))?;
        key.verify(&tbs, &signature)
            .map_err(|_| RegistrarError::chain_verification("bad ECDSA signature"))
    } else {
        Err(RegistrarError::chain_verification(format!(
            "unsupported signature algorithm {oid}"
        )))
    }
}

fn verify_rsa<D>(key_der: &[u8], message: &[u8], signature: &[u8]) -> Result<()>
where
    D: sha2::Digest + const_oid::AssociatedOid,
{
    let key = RsaPublicKey::from_public_key_der(key_der)
        .map_err(|e| RegistrarError::chain_verification(format!("issuer key: {e}")))?;
    let signature = rsa::pkcs1v15::Signature::try_from(signature)
        .map_err(|e| RegistrarError::chain_verification(format!("signature: {e}")))?;
    rsa::pkcs1v15::VerifyingKey::<D>::new(key)
        .verify(message, &signature)
        .map_err(|_| RegistrarError::chain_verification("bad RSA signature"))
}
