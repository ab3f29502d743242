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

//! Software TPM for integration tests
//!
//! Holds a P-256 endorsement key (with an rcgen-issued certificate) and a
//! P-256 attestation key, and performs the device half of credential
//! activation: ECDH against the ephemeral point, KDFe to the seed, HMAC
//! check against the AK name, then AES-CFB decryption.

use aes::Aes128;
use base64::prelude::*;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use machine_registrar::tpm::credential::{kdf_a, kdf_e};
use machine_registrar::tpm::structures::{
    alg, attributes, object_name, AttestationInfo, ClockInfo, CreationInfo, HashAlg,
    PublicParameters, PublicUnique, Scheme, SymmetricDef, TpmPublic, TpmSignature,
    TPM_ECC_NIST_P256, TPM_GENERATED_VALUE, TPM_ST_ATTEST_CREATION,
};
use machine_registrar::tpm::{
    AttestationData, AttestationParameters, EncryptedCredential, EndorsementKey,
};
use p256::ecdsa::signature::Signer;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::DecodePrivateKey;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, PKCS_ECDSA_P256_SHA256};
use sha2::{Digest, Sha256};

/// A manufacturer CA that issues EK certificates.
pub struct TestCa {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl TestCa {
    pub fn new(name: &str) -> Self {
        let key = KeyPair::generate().expect("CA key");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params.self_signed(&key).expect("CA certificate");
        Self { cert, key }
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }
}

/// Device-side TPM state.
pub struct SoftTpm {
    ek: p256::SecretKey,
    ek_pem: String,
    ak: p256::ecdsa::SigningKey,
    ak_public: Vec<u8>,
}

impl SoftTpm {
    /// A TPM whose EK certificate is issued by `ca`.
    pub fn issued_by(ca: &TestCa) -> Self {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).expect("EK key");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("EK params");
        params
            .distinguished_name
            .push(DnType::CommonName, "Soft TPM EK");
        let cert = params
            .signed_by(&key, &ca.cert, &ca.key)
            .expect("EK certificate");
        let ek = p256::SecretKey::from_pkcs8_der(&key.serialize_der()).expect("EK secret");

        let ak = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let ak_public = ak_public_area(&ak);
        Self {
            ek,
            ek_pem: cert.pem(),
            ak,
            ak_public,
        }
    }

    /// Identity fingerprint the registrar will compute for this TPM.
    pub fn fingerprint(&self) -> String {
        EndorsementKey::from_pem(self.ek_pem.as_bytes())
            .and_then(|ek| ek.fingerprint())
            .expect("fingerprint")
    }

    /// `Authorization` header value carrying this TPM's evidence.
    pub fn authorization(&self) -> String {
        let data = AttestationData {
            ek: self.ek_pem.as_bytes().to_vec(),
            ak: self.attestation_parameters(),
        };
        let json = serde_json::to_vec(&data).expect("evidence JSON");
        format!("Bearer TPM{}", BASE64_STANDARD.encode(json))
    }

    /// The AK public area with a creation attestation signed by the AK.
    pub fn attestation_parameters(&self) -> AttestationParameters {
        let create_data = b"soft tpm creation data".to_vec();
        let attestation = AttestationInfo {
            magic: TPM_GENERATED_VALUE,
            attest_type: TPM_ST_ATTEST_CREATION,
            qualified_signer: vec![],
            extra_data: vec![],
            clock_info: ClockInfo::default(),
            firmware_version: 0,
            creation: Some(CreationInfo {
                object_name: object_name(&self.ak_public).expect("AK name"),
                creation_hash: Sha256::digest(&create_data).to_vec(),
            }),
        }
        .encode()
        .expect("attestation");

        let signature: p256::ecdsa::Signature = self.ak.sign(&attestation);
        let (r, s) = signature.split_bytes();
        let create_signature = TpmSignature::Ecdsa {
            hash: alg::SHA256,
            r: r.to_vec(),
            s: s.to_vec(),
        }
        .encode()
        .expect("signature");

        AttestationParameters {
            public: self.ak_public.clone(),
            use_tcsd_activation_format: false,
            create_data,
            create_attestation: attestation,
            create_signature,
        }
    }

    /// Recover the activation secret, as `TPM2_ActivateCredential` does.
    pub fn activate_credential(&self, credential: &EncryptedCredential) -> Result<Vec<u8>, String> {
        let (encrypted_seed, _) = sized(&credential.secret)?;
        let (x, rest) = sized(encrypted_seed)?;
        let (y, _) = sized(rest)?;

        let mut sec1 = vec![0x04];
        sec1.extend_from_slice(x);
        sec1.extend_from_slice(y);
        let ephemeral = p256::PublicKey::from_sec1_bytes(&sec1).map_err(|e| e.to_string())?;
        let z = p256::ecdh::diffie_hellman(self.ek.to_nonzero_scalar(), ephemeral.as_affine());
        let ek_point = self.ek.public_key().to_encoded_point(false);
        let ek_x = ek_point.x().ok_or("EK at infinity")?;
        let seed = kdf_e(
            HashAlg::Sha256,
            z.raw_secret_bytes().as_slice(),
            b"IDENTITY",
            x,
            ek_x.as_slice(),
            256,
        );

        let name = object_name(&self.ak_public).map_err(|e| e.to_string())?;
        let (id_object, _) = sized(&credential.credential)?;
        let (integrity, enc_identity) = sized(id_object)?;

        let mac_key = kdf_a(HashAlg::Sha256, &seed, b"INTEGRITY", &[], &[], 256)
            .map_err(|e| e.to_string())?;
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&mac_key).map_err(|e| e.to_string())?;
        mac.update(enc_identity);
        mac.update(&name);
        mac.verify_slice(integrity)
            .map_err(|_| "integrity check failed".to_string())?;

        // Standard EK templates carry AES-128-CFB.
        let sym_key = kdf_a(HashAlg::Sha256, &seed, b"STORAGE", &name, &[], 128)
            .map_err(|e| e.to_string())?;
        let mut plain = enc_identity.to_vec();
        cfb_mode::Decryptor::<Aes128>::new_from_slices(&sym_key, &[0u8; 16])
            .map_err(|e| e.to_string())?
            .decrypt(&mut plain);
        let (secret, _) = sized(&plain)?;
        Ok(secret.to_vec())
    }
}

fn ak_public_area(ak: &p256::ecdsa::SigningKey) -> Vec<u8> {
    let point = ak.verifying_key().to_encoded_point(false);
    TpmPublic {
        name_alg: alg::SHA256,
        attributes: attributes::FIXED_TPM
            | attributes::FIXED_PARENT
            | attributes::SENSITIVE_DATA_ORIGIN
            | attributes::USER_WITH_AUTH
            | attributes::RESTRICTED
            | attributes::SIGN,
        auth_policy: vec![],
        parameters: PublicParameters::Ecc {
            symmetric: SymmetricDef::NULL,
            scheme: Scheme {
                alg: alg::ECDSA,
                hash: alg::SHA256,
            },
            curve: TPM_ECC_NIST_P256,
            kdf: Scheme::NULL,
        },
        unique: PublicUnique::Ecc {
            x: point.x().expect("AK x").to_vec(),
            y: point.y().expect("AK y").to_vec(),
        },
    }
    .encode()
    .expect("AK public area")
}

/// Split a `TPM2B` off the front of `buf`.
fn sized(buf: &[u8]) -> Result<(&[u8], &[u8]), String> {
    if buf.len() < 2 {
        return Err("truncated size prefix".to_string());
    }
    let len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
    let rest = &buf[2..];
    if rest.len() < len {
        return Err("truncated TPM2B".to_string());
    }
    Ok(rest.split_at(len))
}
