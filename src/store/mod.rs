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

//! In-memory stand-in for the declarative resource store.
//!
//! The registrar only reads from the store's caches and issues one write:
//! creating a machine record. [`Store`] provides both, seeded from a JSON
//! snapshot of the control plane.
//!
//! # Example
//!
//! ```
//! use machine_registrar::model::{MachineRecord, ObjectMeta};
//! use machine_registrar::store::{indexes, Store};
//!
//! let store = Store::new();
//! let mut machine = MachineRecord::default();
//! machine.metadata = ObjectMeta::named("fleet-default", "m-1");
//! machine.spec.tpm_hash = "ab12".to_string();
//! store.machines().upsert(machine);
//!
//! let found = store
//!     .machines()
//!     .get_by_index(indexes::MACHINE_BY_FINGERPRINT, "ab12")
//!     .unwrap();
//! assert_eq!(found.len(), 1);
//! ```

pub mod cache;
pub mod indexes;

pub use cache::{IndexedCache, Match};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{RegistrarError, Result};
use crate::model::{
    ClusterJoinToken, MachineRecord, RegistrationTicket, SecretRecord, Setting,
};

/// Characters used for generated name suffixes.
const NAME_SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Length of a generated name suffix.
const NAME_SUFFIX_LEN: usize = 5;

/// Creates machine records in the backing store.
#[async_trait]
pub trait MachineClient: Send + Sync {
    /// Create a machine record, returning it as stored.
    ///
    /// When `metadata.name` is empty a name is generated from
    /// `metadata.generateName`.
    async fn create(&self, machine: MachineRecord) -> Result<MachineRecord>;
}

/// Records and settings loaded from the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub machines: Vec<MachineRecord>,
    #[serde(default)]
    pub registrations: Vec<RegistrationTicket>,
    #[serde(default)]
    pub secrets: Vec<SecretRecord>,
    #[serde(default)]
    pub join_tokens: Vec<ClusterJoinToken>,
    #[serde(default)]
    pub settings: Vec<Setting>,
}

/// Caches for every record kind the registrar reads.
#[derive(Debug, Clone)]
pub struct Store {
    machines: IndexedCache<MachineRecord>,
    registrations: IndexedCache<RegistrationTicket>,
    secrets: IndexedCache<SecretRecord>,
    join_tokens: IndexedCache<ClusterJoinToken>,
    settings: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create an empty store with all identity indexes registered.
    pub fn new() -> Self {
        Self {
            machines: IndexedCache::builder()
                .index(indexes::MACHINE_BY_FINGERPRINT, indexes::machine_by_fingerprint)
                .index(indexes::MACHINE_BY_SECRET_NAME, indexes::machine_by_secret_name)
                .index(indexes::MACHINE_BY_TOKEN_HASH, indexes::machine_by_token_hash)
                .build(),
            registrations: IndexedCache::builder()
                .index(indexes::REGISTRATION_BY_TOKEN, indexes::registration_by_token)
                .build(),
            secrets: IndexedCache::builder()
                .index(indexes::SECRET_BY_TOKEN, indexes::secret_by_token)
                .index(indexes::SECRET_BY_TOKEN_HASH, indexes::secret_by_token_hash)
                .build(),
            join_tokens: IndexedCache::builder().build(),
            settings: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a store primed from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        store.apply_snapshot(snapshot);
        store
    }

    /// Load a JSON snapshot file.
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RegistrarError::store(format!("Failed to read {}: {e}", path.display()))
        })?;
        let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
            RegistrarError::store(format!("Failed to parse {}: {e}", path.display()))
        })?;
        info!(
            path = %path.display(),
            machines = snapshot.machines.len(),
            registrations = snapshot.registrations.len(),
            secrets = snapshot.secrets.len(),
            "Loaded store snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Upsert every record of a snapshot.
    pub fn apply_snapshot(&self, snapshot: Snapshot) {
        for machine in snapshot.machines {
            self.machines.upsert(machine);
        }
        for ticket in snapshot.registrations {
            self.registrations.upsert(ticket);
        }
        for secret in snapshot.secrets {
            self.secrets.upsert(secret);
        }
        for token in snapshot.join_tokens {
            self.join_tokens.upsert(token);
        }
        for setting in snapshot.settings {
            self.set_setting(setting.name, setting.value);
        }
    }

    pub fn machines(&self) -> &IndexedCache<MachineRecord> {
        &self.machines
    }

    pub fn registrations(&self) -> &IndexedCache<RegistrationTicket> {
        &self.registrations
    }

    pub fn secrets(&self) -> &IndexedCache<SecretRecord> {
        &self.secrets
    }

    pub fn join_tokens(&self) -> &IndexedCache<ClusterJoinToken> {
        &self.join_tokens
    }

    /// Value of a global setting, empty when unset.
    pub fn setting(&self, name: &str) -> String {
        self.settings.read().get(name).cloned().unwrap_or_default()
    }

    /// Set a global setting.
    pub fn set_setting(&self, name: impl Into<String>, value: impl Into<String>) {
        self.settings.write().insert(name.into(), value.into());
    }
}

fn generate_name(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..NAME_SUFFIX_LEN)
        .map(|_| NAME_SUFFIX_ALPHABET[rng.gen_range(0..NAME_SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}{suffix}")
}

#[async_trait]
impl MachineClient for Store {
    async fn create(&self, mut machine: MachineRecord) -> Result<MachineRecord> {
        let meta = &mut machine.metadata;
        if meta.name.is_empty() {
            if meta.generate_name.is_empty() {
                return Err(RegistrarError::store(
                    "name or generateName is required",
                ));
            }
            meta.name = generate_name(&meta.generate_name);
        }
        if self.machines.get(&meta.namespace, &meta.name).is_some() {
            return Err(RegistrarError::store(format!(
                "machine {} already exists",
                meta.key()
            )));
        }

        debug!(machine = %machine.metadata.key(), "Creating machine record");
        let stored = self.machines.upsert(machine);
        Ok((*stored).clone())
    }
}
