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

//! Records exchanged with the resource store.
//!
//! All records are namespaced and serialize with camelCase field names so
//! that snapshots written by the control plane load unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::codec::base64_map;

/// Opaque nested JSON object (SMBIOS data, cloud-config, extra config).
pub type GenericMap = serde_json::Map<String, serde_json::Value>;

/// Metadata common to every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Record name, unique within its namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Prefix used by the store to generate a name when `name` is empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generate_name: String,

    /// Namespace of the record.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for a named record in a namespace.
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// The `namespace/name` key used by the caches.
    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }
}

/// Build a `namespace/name` cache key.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// A record kind held by the store.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Human-readable kind, used in log and error messages.
    const KIND: &'static str;

    /// Record metadata.
    fn metadata(&self) -> &ObjectMeta;

    /// Mutable record metadata.
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}

macro_rules! impl_resource {
    ($ty:ty, $kind:literal) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

// ============================================================================
// MachineRecord
// ============================================================================

/// A physical machine known to the control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    /// Record metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Desired state.
    #[serde(default)]
    pub spec: MachineSpec,

    /// Observed state.
    #[serde(default)]
    pub status: MachineStatus,
}

impl_resource!(MachineRecord, "machine");

/// Desired state of a machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Identity fingerprint of the machine's endorsement key. Write-once.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tpm_hash: String,

    /// SMBIOS data reported at enrollment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smbios: Option<GenericMap>,

    /// Cluster the machine is assigned to.
    #[serde(default)]
    pub cluster_name: String,

    /// Name of the token secret bound to this machine.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine_token_secret_name: String,

    /// Join-time runtime configuration.
    #[serde(default)]
    pub config: MachineRuntimeConfig,
}

/// Runtime configuration handed to a machine when it joins a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineRuntimeConfig {
    #[serde(default)]
    pub role: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub internal_address: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra_config: GenericMap,
}

/// A node taint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,

    pub effect: String,
}

impl fmt::Display for Taint {
    /// Formats as `key=value:effect`, or `key:effect` when the value is empty.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}:{}", self.key, self.effect)
        } else {
            write!(f, "{}={}:{}", self.key, self.value, self.effect)
        }
    }
}

/// Observed state of a machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_registration_token_namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_registration_token_name: String,
}

// ============================================================================
// RegistrationTicket
// ============================================================================

/// A registration endpoint that admits new machines into a namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationTicket {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: RegistrationSpec,

    #[serde(default)]
    pub status: RegistrationStatus,
}

impl_resource!(RegistrationTicket, "registration");

/// Desired state of a registration ticket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSpec {
    /// Name template for machines enrolled through this ticket.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine_name: String,

    /// Labels copied onto enrolled machines.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub machine_inventory_labels: BTreeMap<String, String>,

    /// Annotations copied onto enrolled machines.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub machine_inventory_annotations: BTreeMap<String, String>,

    /// Cloud-config merged into the enrollment response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_config: Option<GenericMap>,
}

/// Observed state of a registration ticket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationStatus {
    #[serde(
        rename = "registrationURL",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub registration_url: String,

    #[serde(
        rename = "registrationToken",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub registration_token: String,
}

// ============================================================================
// SecretRecord
// ============================================================================

/// An opaque secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Secret type.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub secret_type: String,

    /// Secret payload.
    #[serde(with = "base64_map", default)]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl_resource!(SecretRecord, "secret");

impl SecretRecord {
    /// Value stored under `key`, if any.
    pub fn value(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }
}

// ============================================================================
// ClusterJoinToken
// ============================================================================

/// A cluster registration token provisioned by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterJoinToken {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub status: JoinTokenStatus,
}

impl_resource!(ClusterJoinToken, "cluster registration token");

/// Observed state of a join token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinTokenStatus {
    /// The token; empty until provisioned.
    #[serde(default)]
    pub token: String,
}

// ============================================================================
// Setting
// ============================================================================

/// A global control-plane setting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,

    #[serde(default)]
    pub value: String,
}
