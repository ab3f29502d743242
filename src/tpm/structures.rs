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

//! TPM 2.0 wire structures used during credential activation.
//!
//! Only the structures a verifier needs are modelled: `TPMT_PUBLIC` for the
//! attestation key, `TPMS_ATTEST` for its creation certificate and
//! `TPMT_SIGNATURE` for the signature over it. All integers are big-endian
//! and variable-length fields carry a 16-bit size prefix (`TPM2B_*`).

use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{RegistrarError, Result};

/// TPM algorithm identifiers (`TPM_ALG_ID`).
pub mod alg {
    pub const RSA: u16 = 0x0001;
    pub const SHA1: u16 = 0x0004;
    pub const HMAC: u16 = 0x0005;
    pub const AES: u16 = 0x0006;
    pub const KEYEDHASH: u16 = 0x0008;
    pub const SHA256: u16 = 0x000B;
    pub const SHA384: u16 = 0x000C;
    pub const SHA512: u16 = 0x000D;
    pub const NULL: u16 = 0x0010;
    pub const RSASSA: u16 = 0x0014;
    pub const RSAES: u16 = 0x0015;
    pub const RSAPSS: u16 = 0x0016;
    pub const OAEP: u16 = 0x0017;
    pub const ECDSA: u16 = 0x0018;
    pub const ECDH: u16 = 0x0019;
    pub const ECC: u16 = 0x0023;
    pub const CFB: u16 = 0x0043;
}

/// Object attribute bits (`TPMA_OBJECT`).
pub mod attributes {
    pub const FIXED_TPM: u32 = 0x0000_0002;
    pub const FIXED_PARENT: u32 = 0x0000_0010;
    pub const SENSITIVE_DATA_ORIGIN: u32 = 0x0000_0020;
    pub const USER_WITH_AUTH: u32 = 0x0000_0040;
    pub const NO_DA: u32 = 0x0000_0400;
    pub const RESTRICTED: u32 = 0x0001_0000;
    pub const DECRYPT: u32 = 0x0002_0000;
    pub const SIGN: u32 = 0x0004_0000;
}

/// `TPM_GENERATED_VALUE`, the magic prefix of TPM-produced attestations.
pub const TPM_GENERATED_VALUE: u32 = 0xff54_4347;

/// `TPM_ST_ATTEST_CREATION`.
pub const TPM_ST_ATTEST_CREATION: u16 = 0x801A;

/// `TPM_ECC_NIST_P256`.
pub const TPM_ECC_NIST_P256: u16 = 0x0003;

/// Hash algorithms accepted as a name algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlg {
    /// Map a `TPM_ALG_ID` to a hash algorithm.
    pub fn from_id(id: u16) -> Result<Self> {
        match id {
            alg::SHA256 => Ok(Self::Sha256),
            alg::SHA384 => Ok(Self::Sha384),
            alg::SHA512 => Ok(Self::Sha512),
            other => Err(RegistrarError::key_material(format!(
                "unsupported hash algorithm {other:#06x}"
            ))),
        }
    }

    /// The `TPM_ALG_ID` of this algorithm.
    pub fn id(self) -> u16 {
        match self {
            Self::Sha256 => alg::SHA256,
            Self::Sha384 => alg::SHA384,
            Self::Sha512 => alg::SHA512,
        }
    }

    /// Digest size in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Hash `data`.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

// ============================================================================
// Marshalling helpers
// ============================================================================

/// Cursor over a TPM-encoded buffer.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(RegistrarError::key_material(format!(
                "{} is truncated",
                self.what
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(out))
    }

    /// A `TPM2B` field: 16-bit length followed by that many bytes.
    pub(crate) fn sized(&mut self) -> Result<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }
}

/// Append a `TPM2B` field.
pub(crate) fn put_sized(out: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| {
        RegistrarError::challenge_generation(format!(
            "field of {} bytes does not fit a TPM2B",
            data.len()
        ))
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(data);
    Ok(())
}

// ============================================================================
// TPMT_PUBLIC
// ============================================================================

/// `TPMT_SYM_DEF_OBJECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymmetricDef {
    pub alg: u16,
    pub key_bits: u16,
    pub mode: u16,
}

impl SymmetricDef {
    /// No symmetric algorithm.
    pub const NULL: Self = Self {
        alg: alg::NULL,
        key_bits: 0,
        mode: 0,
    };

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let alg = r.u16()?;
        if alg == alg::NULL {
            return Ok(Self::NULL);
        }
        Ok(Self {
            alg,
            key_bits: r.u16()?,
            mode: r.u16()?,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.alg.to_be_bytes());
        if self.alg != alg::NULL {
            out.extend_from_slice(&self.key_bits.to_be_bytes());
            out.extend_from_slice(&self.mode.to_be_bytes());
        }
    }
}

/// A signing, key-exchange or KDF scheme with its hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheme {
    pub alg: u16,
    pub hash: u16,
}

impl Scheme {
    /// No scheme.
    pub const NULL: Self = Self {
        alg: alg::NULL,
        hash: 0,
    };

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let alg = r.u16()?;
        if alg == alg::NULL {
            return Ok(Self::NULL);
        }
        Ok(Self { alg, hash: r.u16()? })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.alg.to_be_bytes());
        if self.alg != alg::NULL {
            out.extend_from_slice(&self.hash.to_be_bytes());
        }
    }
}

/// Type-specific public parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicParameters {
    Rsa {
        symmetric: SymmetricDef,
        scheme: Scheme,
        key_bits: u16,
        /// Public exponent; zero means the default of 65537.
        exponent: u32,
    },
    Ecc {
        symmetric: SymmetricDef,
        scheme: Scheme,
        curve: u16,
        kdf: Scheme,
    },
}

/// Public key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicUnique {
    Rsa { modulus: Vec<u8> },
    Ecc { x: Vec<u8>, y: Vec<u8> },
}

/// `TPMT_PUBLIC` for an RSA or ECC key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmPublic {
    pub name_alg: u16,
    pub attributes: u32,
    pub auth_policy: Vec<u8>,
    pub parameters: PublicParameters,
    pub unique: PublicUnique,
}

impl TpmPublic {
    /// Decode a `TPMT_PUBLIC`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "public area");
        let key_type = r.u16()?;
        let name_alg = r.u16()?;
        let attributes = r.u32()?;
        let auth_policy = r.sized()?.to_vec();

        let (parameters, unique) = match key_type {
            alg::RSA => {
                let symmetric = SymmetricDef::decode(&mut r)?;
                let scheme = Scheme::decode(&mut r)?;
                let key_bits = r.u16()?;
                let exponent = r.u32()?;
                let modulus = r.sized()?.to_vec();
                (
                    PublicParameters::Rsa {
                        symmetric,
                        scheme,
                        key_bits,
                        exponent,
                    },
                    PublicUnique::Rsa { modulus },
                )
            }
            alg::ECC => {
                let symmetric = SymmetricDef::decode(&mut r)?;
                let scheme = Scheme::decode(&mut r)?;
                let curve = r.u16()?;
                let kdf = Scheme::decode(&mut r)?;
                let x = r.sized()?.to_vec();
                let y = r.sized()?.to_vec();
                (
                    PublicParameters::Ecc {
                        symmetric,
                        scheme,
                        curve,
                        kdf,
                    },
                    PublicUnique::Ecc { x, y },
                )
            }
            other => {
                return Err(RegistrarError::key_material(format!(
                    "unsupported public key type {other:#06x}"
                )));
            }
        };

        Ok(Self {
            name_alg,
            attributes,
            auth_policy,
            parameters,
            unique,
        })
    }

    /// Encode as a `TPMT_PUBLIC`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(128);
        let key_type = match self.parameters {
            PublicParameters::Rsa { .. } => alg::RSA,
            PublicParameters::Ecc { .. } => alg::ECC,
        };
        out.extend_from_slice(&key_type.to_be_bytes());
        out.extend_from_slice(&self.name_alg.to_be_bytes());
        out.extend_from_slice(&self.attributes.to_be_bytes());
        put_sized(&mut out, &self.auth_policy)?;

        match (&self.parameters, &self.unique) {
            (
                PublicParameters::Rsa {
                    symmetric,
                    scheme,
                    key_bits,
                    exponent,
                },
                PublicUnique::Rsa { modulus },
            ) => {
                symmetric.encode(&mut out);
                scheme.encode(&mut out);
                out.extend_from_slice(&key_bits.to_be_bytes());
                out.extend_from_slice(&exponent.to_be_bytes());
                put_sized(&mut out, modulus)?;
            }
            (
                PublicParameters::Ecc {
                    symmetric,
                    scheme,
                    curve,
                    kdf,
                },
                PublicUnique::Ecc { x, y },
            ) => {
                symmetric.encode(&mut out);
                scheme.encode(&mut out);
                out.extend_from_slice(&curve.to_be_bytes());
                kdf.encode(&mut out);
                put_sized(&mut out, x)?;
                put_sized(&mut out, y)?;
            }
            _ => {
                return Err(RegistrarError::key_material(
                    "public parameters and unique field disagree on key type",
                ));
            }
        }
        Ok(out)
    }

    /// Whether every bit of `mask` is set in the object attributes.
    pub fn has_attributes(&self, mask: u32) -> bool {
        self.attributes & mask == mask
    }
}

/// Compute the TPM name of an encoded public area: `nameAlg ‖ H(public)`.
///
/// The digest covers the bytes as received, not a re-encoding.
pub fn object_name(public: &[u8]) -> Result<Vec<u8>> {
    let mut r = Reader::new(public, "public area");
    let _key_type = r.u16()?;
    let hash = HashAlg::from_id(r.u16()?)?;
    let mut name = Vec::with_capacity(2 + hash.size());
    name.extend_from_slice(&hash.id().to_be_bytes());
    name.extend_from_slice(&hash.digest(public));
    Ok(name)
}

// ============================================================================
// TPMS_ATTEST
// ============================================================================

/// `TPMS_CLOCK_INFO`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockInfo {
    pub clock: u64,
    pub reset_count: u32,
    pub restart_count: u32,
    pub safe: bool,
}

/// `TPMS_CREATION_INFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationInfo {
    pub object_name: Vec<u8>,
    pub creation_hash: Vec<u8>,
}

/// `TPMS_ATTEST` restricted to creation attestations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationInfo {
    pub magic: u32,
    pub attest_type: u16,
    pub qualified_signer: Vec<u8>,
    pub extra_data: Vec<u8>,
    pub clock_info: ClockInfo,
    pub firmware_version: u64,
    /// Present when `attest_type` is `TPM_ST_ATTEST_CREATION`.
    pub creation: Option<CreationInfo>,
}

impl AttestationInfo {
    /// Decode a `TPMS_ATTEST`.
    ///
    /// Only creation attestations carry a decoded body; other types are
    /// returned with `creation` unset so the caller can report the type.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "attestation");
        let magic = r.u32()?;
        let attest_type = r.u16()?;
        let qualified_signer = r.sized()?.to_vec();
        let extra_data = r.sized()?.to_vec();
        let clock_info = ClockInfo {
            clock: r.u64()?,
            reset_count: r.u32()?,
            restart_count: r.u32()?,
            safe: r.u8()? != 0,
        };
        let firmware_version = r.u64()?;
        let creation = if attest_type == TPM_ST_ATTEST_CREATION {
            Some(CreationInfo {
                object_name: r.sized()?.to_vec(),
                creation_hash: r.sized()?.to_vec(),
            })
        } else {
            None
        };

        Ok(Self {
            magic,
            attest_type,
            qualified_signer,
            extra_data,
            clock_info,
            firmware_version,
            creation,
        })
    }

    /// Encode as a `TPMS_ATTEST`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.magic.to_be_bytes());
        out.extend_from_slice(&self.attest_type.to_be_bytes());
        put_sized(&mut out, &self.qualified_signer)?;
        put_sized(&mut out, &self.extra_data)?;
        out.extend_from_slice(&self.clock_info.clock.to_be_bytes());
        out.extend_from_slice(&self.clock_info.reset_count.to_be_bytes());
        out.extend_from_slice(&self.clock_info.restart_count.to_be_bytes());
        out.push(u8::from(self.clock_info.safe));
        out.extend_from_slice(&self.firmware_version.to_be_bytes());
        if let Some(creation) = &self.creation {
            put_sized(&mut out, &creation.object_name)?;
            put_sized(&mut out, &creation.creation_hash)?;
        }
        Ok(out)
    }
}

// ============================================================================
// TPMT_SIGNATURE
// ============================================================================

/// `TPMT_SIGNATURE` for the schemes an attestation key may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmSignature {
    RsaSsa { hash: u16, signature: Vec<u8> },
    RsaPss { hash: u16, signature: Vec<u8> },
    Ecdsa { hash: u16, r: Vec<u8>, s: Vec<u8> },
}

impl TpmSignature {
    /// Decode a `TPMT_SIGNATURE`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "signature");
        let sig_alg = r.u16()?;
        let hash = r.u16()?;
        match sig_alg {
            alg::RSASSA => Ok(Self::RsaSsa {
                hash,
                signature: r.sized()?.to_vec(),
            }),
            alg::RSAPSS => Ok(Self::RsaPss {
                hash,
                signature: r.sized()?.to_vec(),
            }),
            alg::ECDSA => Ok(Self::Ecdsa {
                hash,
                r: r.sized()?.to_vec(),
                s: r.sized()?.to_vec(),
            }),
            other => Err(RegistrarError::key_material(format!(
                "unsupported signature algorithm {other:#06x}"
            ))),
        }
    }

    /// Encode as a `TPMT_SIGNATURE`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(80);
        match self {
            Self::RsaSsa { hash, signature } | Self::RsaPss { hash, signature } => {
                let sig_alg = if matches!(self, Self::RsaSsa { .. }) {
                    alg::RSASSA
                } else {
                    alg::RSAPSS
                };
                out.extend_from_slice(&sig_alg.to_be_bytes());
                out.extend_from_slice(&hash.to_be_bytes());
                put_sized(&mut out, signature)?;
            }
            Self::Ecdsa { hash, r, s } => {
                out.extend_from_slice(&alg::ECDSA.to_be_bytes());
                out.extend_from_slice(&hash.to_be_bytes());
                put_sized(&mut out, r)?;
                put_sized(&mut out, s)?;
            }
        }
        Ok(out)
    }

    /// Hash algorithm the signature was computed over.
    pub fn hash_alg(&self) -> u16 {
        match self {
            Self::RsaSsa { hash, .. } | Self::RsaPss { hash, .. } | Self::Ecdsa { hash, .. } => {
                *hash
            }
        }
    }
}
