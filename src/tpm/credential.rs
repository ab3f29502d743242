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

//! Credential activation (TPM2_MakeCredential on the verifier side).
//!
//! The verifier encrypts a random secret so that only the TPM holding the
//! endorsement key can recover it, and only while the named attestation key
//! is loaded alongside it. A device that returns the secret has therefore
//! proven possession of both keys.
//!
//! Construction, following TPM 2.0 Part 1 §24:
//!
//! 1. A seed is shared with the endorsement key: RSA-OAEP with label
//!    `IDENTITY`, or an ephemeral P-256 ECDH exchange run through KDFe.
//! 2. `KDFa(seed, "STORAGE", name)` yields the AES-128 key that encrypts the
//!    size-prefixed secret in CFB mode with a zero IV.
//! 3. `KDFa(seed, "INTEGRITY")` yields the HMAC key binding the ciphertext to
//!    the attestation key name.
//!
//! Every step hashes with the endorsement key's name algorithm and sizes the
//! storage key by its symmetric algorithm. Both are fixed by the standard EK
//! templates (SHA-256 and AES-128-CFB), so they do not depend on the
//! attestation key.

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use rsa::{BigUint, Oaep, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};

use crate::error::{RegistrarError, Result};

use super::ek::EkPublicKey;
use super::structures::{
    attributes, object_name, put_sized, AttestationInfo, HashAlg, PublicParameters, PublicUnique,
    TpmPublic, TpmSignature, TPM_ECC_NIST_P256, TPM_GENERATED_VALUE, TPM_ST_ATTEST_CREATION,
};
use super::{AttestationParameters, EncryptedCredential};

/// Length of the activation secret in bytes.
pub const ACTIVATION_SECRET_LEN: usize = 32;

/// AES block size; the CFB IV is one block of zeros.
const SYM_BLOCK_SIZE: usize = 16;

/// Name algorithm of the standard endorsement key templates.
pub const EK_NAME_ALG: HashAlg = HashAlg::Sha256;

/// Key size of the endorsement key's symmetric algorithm (AES-128-CFB).
pub const EK_SYM_KEY_BITS: usize = 128;

/// Signatures shorter than this cannot be a `TPMT_SIGNATURE`.
const MIN_SIGNATURE_LEN: usize = 8;

const LABEL_IDENTITY: &[u8] = b"IDENTITY";
const LABEL_STORAGE: &[u8] = b"STORAGE";
const LABEL_INTEGRITY: &[u8] = b"INTEGRITY";

/// OAEP label for RSA seeds; the TPM includes the terminating NUL.
const OAEP_LABEL_IDENTITY: &str = "IDENTITY\0";

/// HMAC with the given hash over the concatenation of `parts`.
fn hmac(hash: HashAlg, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
    fn run<M: Mac + hmac::digest::KeyInit>(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
        let mut mac = <M as Mac>::new_from_slice(key)
            .map_err(|e| RegistrarError::challenge_generation(format!("HMAC key: {e}")))?;
        for part in parts {
            mac.update(part);
        }
        Ok(mac.finalize().into_bytes().to_vec())
    }
    match hash {
        HashAlg::Sha256 => run::<Hmac<Sha256>>(key, parts),
        HashAlg::Sha384 => run::<Hmac<Sha384>>(key, parts),
        HashAlg::Sha512 => run::<Hmac<Sha512>>(key, parts),
    }
}

/// KDFa from TPM 2.0 Part 1 §11.4.10.2 (SP 800-108 counter mode).
///
/// `bits` must be a multiple of eight.
pub fn kdf_a(
    hash: HashAlg,
    key: &[u8],
    label: &[u8],
    context_u: &[u8],
    context_v: &[u8],
    bits: usize,
) -> Result<Vec<u8>> {
    let len = bits / 8;
    let bits_be = u32::try_from(bits)
        .map_err(|_| RegistrarError::challenge_generation("KDFa output too large"))?
        .to_be_bytes();
    let mut out = Vec::with_capacity(len + hash.size());
    let mut counter: u32 = 0;
    while out.len() < len {
        counter += 1;
        let block = hmac(
            hash,
            key,
            &[
                &counter.to_be_bytes(),
                label,
                &[0],
                context_u,
                context_v,
                &bits_be,
            ],
        )?;
        out.extend_from_slice(&block);
    }
    out.truncate(len);
    Ok(out)
}

/// KDFe from TPM 2.0 Part 1 §11.4.10.3 (SP 800-56A concatenation KDF).
pub fn kdf_e(
    hash: HashAlg,
    z: &[u8],
    label: &[u8],
    party_u: &[u8],
    party_v: &[u8],
    bits: usize,
) -> Vec<u8> {
    let len = bits / 8;
    let mut out = Vec::with_capacity(len + hash.size());
    let mut counter: u32 = 0;
    while out.len() < len {
        counter += 1;
        let mut input = Vec::with_capacity(4 + z.len() + label.len() + 1 + party_u.len() + party_v.len());
        input.extend_from_slice(&counter.to_be_bytes());
        input.extend_from_slice(z);
        input.extend_from_slice(label);
        input.push(0);
        input.extend_from_slice(party_u);
        input.extend_from_slice(party_v);
        out.extend_from_slice(&hash.digest(&input));
    }
    out.truncate(len);
    out
}

fn aes_cfb_encrypt(key: &[u8], data: &mut [u8]) -> Result<()> {
    let iv = [0u8; SYM_BLOCK_SIZE];
    cfb_mode::Encryptor::<Aes128>::new_from_slices(key, &iv)
        .map_err(|e| RegistrarError::challenge_generation(format!("AES key: {e}")))?
        .encrypt(data);
    Ok(())
}

/// Share a seed with the endorsement key.
///
/// Returns the seed and the encrypted seed (`TPM2B_ENCRYPTED_SECRET`
/// contents) that the TPM will decrypt.
fn create_seed<R: RngCore + CryptoRng>(
    rng: &mut R,
    ek: &EkPublicKey,
    hash: HashAlg,
) -> Result<(Vec<u8>, Vec<u8>)> {
    match ek {
        EkPublicKey::Rsa(key) => {
            let mut seed = vec![0u8; SYM_BLOCK_SIZE];
            rng.fill_bytes(&mut seed);
            let encrypted = match hash {
                HashAlg::Sha256 => key.encrypt(rng, Oaep::new_with_label::<Sha256, _>(OAEP_LABEL_IDENTITY), &seed),
                HashAlg::Sha384 => key.encrypt(rng, Oaep::new_with_label::<Sha384, _>(OAEP_LABEL_IDENTITY), &seed),
                HashAlg::Sha512 => key.encrypt(rng, Oaep::new_with_label::<Sha512, _>(OAEP_LABEL_IDENTITY), &seed),
            }
            .map_err(|e| RegistrarError::challenge_generation(format!("OAEP: {e}")))?;
            Ok((seed, encrypted))
        }
        EkPublicKey::EcP256(key) => {
            use p256::elliptic_curve::sec1::ToEncodedPoint;

            let ephemeral = p256::ecdh::EphemeralSecret::random(rng);
            let ephemeral_point = ephemeral.public_key().to_encoded_point(false);
            let ek_point = key.to_encoded_point(false);
            let shared = ephemeral.diffie_hellman(key);

            let (Some(eph_x), Some(eph_y), Some(ek_x)) =
                (ephemeral_point.x(), ephemeral_point.y(), ek_point.x())
            else {
                return Err(RegistrarError::challenge_generation(
                    "endorsement key is the point at infinity",
                ));
            };

            let seed = kdf_e(
                hash,
                shared.raw_secret_bytes().as_slice(),
                LABEL_IDENTITY,
                eph_x.as_slice(),
                ek_x.as_slice(),
                hash.size() * 8,
            );

            let mut encrypted = Vec::with_capacity(4 + eph_x.len() + eph_y.len());
            put_sized(&mut encrypted, eph_x.as_slice())?;
            put_sized(&mut encrypted, eph_y.as_slice())?;
            Ok((seed, encrypted))
        }
    }
}

/// Build an encrypted credential for `secret`, bound to the attestation key
/// `name` and decryptable only by `ek`.
///
/// `name` is the full TPM name (`nameAlg ‖ digest`).
pub fn make_credential<R: RngCore + CryptoRng>(
    rng: &mut R,
    ek: &EkPublicKey,
    name: &[u8],
    secret: &[u8],
) -> Result<EncryptedCredential> {
    if name.len() < 2 {
        return Err(RegistrarError::challenge_generation("attestation key name is empty"));
    }
    HashAlg::from_id(u16::from_be_bytes([name[0], name[1]]))
        .map_err(|e| RegistrarError::challenge_generation(e.to_string()))?;
    let hash = EK_NAME_ALG;

    let (seed, encrypted_seed) = create_seed(rng, ek, hash)?;

    let sym_key = kdf_a(hash, &seed, LABEL_STORAGE, name, &[], EK_SYM_KEY_BITS)?;
    let mut enc_identity = Vec::with_capacity(2 + secret.len());
    put_sized(&mut enc_identity, secret)?;
    aes_cfb_encrypt(&sym_key, &mut enc_identity)?;

    let mac_key = kdf_a(hash, &seed, LABEL_INTEGRITY, &[], &[], hash.size() * 8)?;
    let integrity = hmac(hash, &mac_key, &[&enc_identity, name])?;

    let mut id_object = Vec::with_capacity(2 + integrity.len() + enc_identity.len());
    put_sized(&mut id_object, &integrity)?;
    id_object.extend_from_slice(&enc_identity);

    let mut credential = Vec::with_capacity(2 + id_object.len());
    put_sized(&mut credential, &id_object)?;
    let mut encrypted_secret = Vec::with_capacity(2 + encrypted_seed.len());
    put_sized(&mut encrypted_secret, &encrypted_seed)?;

    Ok(EncryptedCredential {
        credential,
        secret: encrypted_secret,
    })
}

/// Inputs to a credential activation challenge.
pub struct ActivationParameters<'a> {
    /// Endorsement key the challenge is encrypted to.
    pub ek: &'a EkPublicKey,
    /// Attestation key the challenge is bound to.
    pub ak: &'a AttestationParameters,
}

impl ActivationParameters<'_> {
    /// Check the attestation key and build a challenge.
    ///
    /// Returns the expected secret and the encrypted credential.
    pub fn generate(&self) -> Result<(Vec<u8>, EncryptedCredential)> {
        let name = check_ak_parameters(self.ak)?;

        let mut secret = vec![0u8; ACTIVATION_SECRET_LEN];
        OsRng.fill_bytes(&mut secret);

        let credential = make_credential(&mut OsRng, self.ek, &name, &secret)?;
        Ok((secret, credential))
    }
}

/// Verify that the attestation key is a restricted signing key resident in
/// the TPM and that it signed its own creation data.
///
/// Returns the attestation key name.
pub fn check_ak_parameters(ak: &AttestationParameters) -> Result<Vec<u8>> {
    if ak.use_tcsd_activation_format {
        return Err(RegistrarError::attestation_parameters(
            "TPM 1.2 activation format is not supported",
        ));
    }
    if ak.create_signature.len() < MIN_SIGNATURE_LEN {
        return Err(RegistrarError::attestation_parameters(format!(
            "signature is too short to be a TPM signature ({} bytes)",
            ak.create_signature.len()
        )));
    }

    let public = TpmPublic::decode(&ak.public)
        .map_err(|e| RegistrarError::attestation_parameters(format!("decoding public area: {e}")))?;
    let name = object_name(&ak.public)
        .map_err(|e| RegistrarError::attestation_parameters(format!("computing name: {e}")))?;
    let name_hash = HashAlg::from_id(public.name_alg)
        .map_err(|e| RegistrarError::attestation_parameters(e.to_string()))?;

    let attest = AttestationInfo::decode(&ak.create_attestation)
        .map_err(|e| RegistrarError::attestation_parameters(format!("decoding attestation: {e}")))?;
    if attest.magic != TPM_GENERATED_VALUE {
        return Err(RegistrarError::attestation_parameters(
            "creation attestation was not produced by a TPM",
        ));
    }
    let Some(creation) = attest.creation else {
        return Err(RegistrarError::attestation_parameters(format!(
            "creation attestation is of type {:#06x}, expected {:#06x}",
            attest.attest_type, TPM_ST_ATTEST_CREATION
        )));
    };
    if creation.object_name != name {
        return Err(RegistrarError::attestation_parameters(
            "create attestation refers to a different key",
        ));
    }
    if creation.creation_hash != name_hash.digest(&ak.create_data) {
        return Err(RegistrarError::attestation_parameters(
            "create attestation does not match the creation data",
        ));
    }

    if !public.has_attributes(attributes::FIXED_TPM) {
        return Err(RegistrarError::attestation_parameters("AK is exportable"));
    }
    if !public.has_attributes(
        attributes::RESTRICTED | attributes::FIXED_PARENT | attributes::SENSITIVE_DATA_ORIGIN,
    ) {
        return Err(RegistrarError::attestation_parameters(
            "provided key is not limited to attestation",
        ));
    }
    if !public.has_attributes(attributes::SIGN) {
        return Err(RegistrarError::attestation_parameters(
            "provided key is not a signing key",
        ));
    }

    let signature = TpmSignature::decode(&ak.create_signature)
        .map_err(|e| RegistrarError::attestation_parameters(format!("decoding signature: {e}")))?;
    verify_creation_signature(&public, &ak.create_attestation, &signature)?;

    Ok(name)
}

fn verify_creation_signature(
    public: &TpmPublic,
    message: &[u8],
    signature: &TpmSignature,
) -> Result<()> {
    let hash = HashAlg::from_id(signature.hash_alg())
        .map_err(|e| RegistrarError::attestation_parameters(e.to_string()))?;
    let digest = hash.digest(message);
    let bad = || RegistrarError::attestation_parameters("signature does not verify");

    match (&public.parameters, &public.unique, signature) {
        (
            PublicParameters::Rsa { exponent, .. },
            PublicUnique::Rsa { modulus },
            TpmSignature::RsaSsa { signature, .. },
        ) => {
            let exponent = if *exponent == 0 { 65537 } else { *exponent };
            let key = RsaPublicKey::new(BigUint::from_bytes_be(modulus), BigUint::from(exponent))
                .map_err(|e| RegistrarError::attestation_parameters(format!("AK public key: {e}")))?;
            let scheme = match hash {
                HashAlg::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
                HashAlg::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
                HashAlg::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
            };
            key.verify(scheme, &digest, signature).map_err(|_| bad())
        }
        (
            PublicParameters::Ecc { curve, .. },
            PublicUnique::Ecc { x, y },
            TpmSignature::Ecdsa { r, s, .. },
        ) => {
            use p256::ecdsa::signature::hazmat::PrehashVerifier;

            if *curve != TPM_ECC_NIST_P256 {
                return Err(RegistrarError::attestation_parameters(format!(
                    "unsupported AK curve {curve:#06x}"
                )));
            }
            let mut point = Vec::with_capacity(65);
            point.push(0x04);
            point.extend_from_slice(&left_pad::<32>(x)?);
            point.extend_from_slice(&left_pad::<32>(y)?);
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|e| RegistrarError::attestation_parameters(format!("AK public key: {e}")))?;
            let signature =
                p256::ecdsa::Signature::from_scalars(left_pad::<32>(r)?, left_pad::<32>(s)?)
                    .map_err(|_| bad())?;
            key.verify_prehash(&digest, &signature).map_err(|_| bad())
        }
        _ => Err(RegistrarError::attestation_parameters(
            "signature scheme does not match the attestation key type",
        )),
    }
}

/// Left-pad a big-endian integer to `N` bytes.
fn left_pad<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    let trimmed = match bytes.iter().position(|b| *b != 0) {
        Some(first) => &bytes[first..],
        None => &[],
    };
    if trimmed.len() > N {
        return Err(RegistrarError::attestation_parameters(format!(
            "integer of {} bytes does not fit {N}",
            trimmed.len()
        )));
    }
    let mut out = [0u8; N];
    out[N - trimmed.len()..].copy_from_slice(trimmed);
    Ok(out)
}
