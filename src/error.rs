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

//! Error types for the machine registrar.

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for registrar operations.
pub type Result<T> = std::result::Result<T, RegistrarError>;

/// Errors that can occur while authenticating or enrolling a machine.
#[derive(Debug, Error)]
pub enum RegistrarError {
    /// An inbound header could not be decoded.
    #[error("Invalid {header} header: {message}")]
    InvalidHeader {
        /// Header name.
        header: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// Endorsement key or attestation key material could not be decoded.
    #[error("Invalid key material: {0}")]
    KeyMaterial(String),

    /// No unique machine matches the presented identity fingerprint.
    #[error("unknown device")]
    UnknownDevice,

    /// No unique token secret matches the presented bearer token.
    #[error("token not found")]
    TokenNotFound,

    /// No unique machine is bound to the matched token secret.
    #[error("machine not found")]
    MachineNotFound,

    /// No unique registration ticket matches the request path.
    #[error("registration not found")]
    RegistrationNotFound,

    /// The endorsement key certificate does not chain to a trust anchor.
    #[error("Certificate chain verification failed: {0}")]
    ChainVerification(String),

    /// The attestation key parameters failed validation.
    #[error("Invalid attestation parameters: {0}")]
    AttestationParameters(String),

    /// A credential activation challenge could not be built.
    #[error("Failed to generate challenge: {0}")]
    ChallengeGeneration(String),

    /// The device answered the challenge with a malformed response.
    #[error("Invalid challenge response: {0}")]
    ChallengeResponse(String),

    /// The device answered the challenge with the wrong secret.
    #[error("challenge failed")]
    ChallengeFailed,

    /// The HTTP connection could not be upgraded to a socket.
    #[error("Socket upgrade failed: {0}")]
    Upgrade(String),

    /// A socket operation did not finish before its deadline.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// Sending or receiving on the socket failed.
    #[error("Socket error: {0}")]
    Socket(String),

    /// The machine has not been assigned to a cluster.
    #[error("cluster not assigned")]
    ClusterNotAssigned,

    /// The machine's cluster join token is missing or not yet provisioned.
    #[error("cluster token not assigned")]
    ClusterTokenNotAssigned,

    /// A required setting is missing.
    #[error("Setting {0} is not set")]
    SettingMissing(&'static str),

    /// The resource store rejected an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad failure classes used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Undecodable headers, key material or payloads.
    MalformedInput,
    /// The presented identity does not resolve to exactly one record.
    UnknownIdentity,
    /// The presented identity resolved but its proof was rejected.
    ProofFailure,
    /// The socket could not be established or timed out.
    Transport,
    /// A backing resource is missing or the store failed.
    Dependency,
}

impl RegistrarError {
    /// Create an invalid header error.
    pub fn invalid_header(header: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            header,
            message: message.into(),
        }
    }

    /// Create a key material error.
    pub fn key_material(msg: impl Into<String>) -> Self {
        Self::KeyMaterial(msg.into())
    }

    /// Create a chain verification error.
    pub fn chain_verification(msg: impl Into<String>) -> Self {
        Self::ChainVerification(msg.into())
    }

    /// Create an attestation parameters error.
    pub fn attestation_parameters(msg: impl Into<String>) -> Self {
        Self::AttestationParameters(msg.into())
    }

    /// Create a challenge generation error.
    pub fn challenge_generation(msg: impl Into<String>) -> Self {
        Self::ChallengeGeneration(msg.into())
    }

    /// Create a socket error.
    pub fn socket(msg: impl Into<String>) -> Self {
        Self::Socket(msg.into())
    }

    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidHeader { .. }
            | Self::KeyMaterial(_)
            | Self::Json(_)
            | Self::Base64(_) => ErrorClass::MalformedInput,
            Self::UnknownDevice
            | Self::TokenNotFound
            | Self::MachineNotFound
            | Self::RegistrationNotFound => ErrorClass::UnknownIdentity,
            Self::ChainVerification(_)
            | Self::AttestationParameters(_)
            | Self::ChallengeResponse(_)
            | Self::ChallengeFailed => ErrorClass::ProofFailure,
            Self::Upgrade(_) | Self::Timeout(_) | Self::Socket(_) | Self::Io(_) => {
                ErrorClass::Transport
            }
            Self::ChallengeGeneration(_)
            | Self::ClusterNotAssigned
            | Self::ClusterTokenNotAssigned
            | Self::SettingMissing(_)
            | Self::Store(_)
            | Self::Config(_) => ErrorClass::Dependency,
        }
    }

    /// HTTP status to answer with when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ClusterNotAssigned | Self::ClusterTokenNotAssigned => StatusCode::NOT_FOUND,
            _ => match self.class() {
                ErrorClass::MalformedInput
                | ErrorClass::UnknownIdentity
                | ErrorClass::ProofFailure => StatusCode::UNAUTHORIZED,
                ErrorClass::Transport | ErrorClass::Dependency => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}
