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

//! Join configuration for an authenticated machine.

use serde::Serialize;

use crate::error::{RegistrarError, Result};
use crate::model::{GenericMap, MachineRecord};
use crate::store::Store;

/// The document a machine uses to join its cluster.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinConfig<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    role: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    node_name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    address: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    internal_address: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    taints: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    labels: Vec<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    extra_config: &'a GenericMap,
    #[serde(skip_serializing_if = "str::is_empty")]
    token: &'a str,
}

/// Render the join configuration, newline-terminated.
///
/// Fails when the machine has no cluster or its cluster join token has not
/// been provisioned yet.
pub fn assemble(store: &Store, machine: &MachineRecord) -> Result<Vec<u8>> {
    if machine.spec.cluster_name.is_empty() {
        return Err(RegistrarError::ClusterNotAssigned);
    }
    let join_token = store
        .join_tokens()
        .get(
            &machine.status.cluster_registration_token_namespace,
            &machine.status.cluster_registration_token_name,
        )
        .filter(|t| !t.status.token.is_empty())
        .ok_or(RegistrarError::ClusterTokenNotAssigned)?;

    let runtime = &machine.spec.config;
    let config = JoinConfig {
        role: &runtime.role,
        node_name: &runtime.node_name,
        address: &runtime.address,
        internal_address: &runtime.internal_address,
        taints: runtime.taints.iter().map(ToString::to_string).collect(),
        labels: runtime
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect(),
        extra_config: &runtime.extra_config,
        token: &join_token.status.token,
    };

    let mut body = serde_json::to_vec(&config)?;
    body.push(b'\n');
    Ok(body)
}
