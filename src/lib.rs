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

//! # machine-registrar
//!
//! Attestation and enrollment server for machines that boot unattended.
//!
//! A machine proves who it is in one of two ways:
//!
//! - **TPM attestation**: the device sends its endorsement key and a freshly
//!   created attestation key. The registrar checks the EK against the
//!   namespace's manufacturer CAs, wraps a random secret to the EK bound to
//!   the AK's name, and accepts the device only if it can unwrap it over the
//!   upgraded socket.
//! - **Shared secret**: the device presents a token previously issued to it,
//!   hashed.
//!
//! An authenticated machine either receives its cluster join configuration
//! or, when it arrives through a registration ticket, is recorded and sent
//! its install configuration.
//!
//! ## Running the server
//!
//! ```no_run
//! use machine_registrar::config::ConfigLoader;
//! use machine_registrar::server::{self, AppState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load_or_default()?;
//!     let store = config.build_store()?;
//!
//!     let state = AppState::new(store, config.attestation.timeouts());
//!     let router = server::router(state, &config.server.base_path);
//!
//!     let listener = tokio::net::TcpListener::bind(config.listen_addr()?).await?;
//!     server::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Fingerprints
//!
//! Machines are identified by the SHA-256 of their EK's SubjectPublicKeyInfo:
//!
//! ```no_run
//! use machine_registrar::tpm::EndorsementKey;
//!
//! # fn example(pem: &[u8]) -> machine_registrar::Result<()> {
//! let ek = EndorsementKey::from_pem(pem)?;
//! println!("{}", ek.fingerprint()?);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod naming;
pub mod server;
pub mod store;
pub mod tpm;

pub use error::{RegistrarError, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
