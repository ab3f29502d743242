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

//! Enrollment through a registration ticket.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use base64::prelude::*;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::SETTING_SERVER_URL;
use crate::error::{RegistrarError, Result};
use crate::model::{GenericMap, MachineRecord, MachineSpec, ObjectMeta, RegistrationTicket};
use crate::naming::{build_name, DEFAULT_MACHINE_NAME};
use crate::store::indexes::{MACHINE_BY_FINGERPRINT, REGISTRATION_BY_TOKEN};
use crate::store::Store;

use super::{error_response, respond, text_response, AppState, Followup};

/// Header carrying base64 JSON SMBIOS data.
pub const SMBIOS_HEADER: &str = "x-cattle-smbios";

/// Token telling the installed machine to join with TPM attestation.
const TPM_JOIN_TOKEN: &str = "tpm://";

pub(super) async fn handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ws: Option<WebSocketUpgrade>,
    headers: HeaderMap,
) -> Response {
    let enrollment = match Enrollment::prepare(&state.store, &token, &headers) {
        Ok(enrollment) => enrollment,
        Err(err) => {
            warn!(error = %err, "Rejecting enrollment");
            return error_response(&err);
        }
    };
    let namespace = enrollment.ticket.metadata.namespace.clone();
    respond(
        state,
        ws,
        &headers,
        Some(&namespace),
        Followup::Enroll(enrollment),
    )
    .await
}

/// An enrollment ready to run once the machine is authenticated.
#[derive(Debug)]
pub(crate) struct Enrollment {
    ticket: Arc<RegistrationTicket>,
    machine: MachineRecord,
    install_config: Vec<u8>,
}

impl Enrollment {
    /// Resolve the ticket and render the machine record and install
    /// configuration.
    pub(crate) fn prepare(store: &Store, token: &str, headers: &HeaderMap) -> Result<Self> {
        let smbios = decode_smbios(headers)?;

        let ticket = store
            .registrations()
            .find_unique(REGISTRATION_BY_TOKEN, token)?
            .unique()
            .ok_or(RegistrarError::RegistrationNotFound)?;

        let template = match ticket.spec.machine_name.as_str() {
            "" => DEFAULT_MACHINE_NAME,
            name => name,
        };
        let generate_name = build_name(smbios.as_ref().unwrap_or(&GenericMap::new()), template);

        let server_url = store.setting(SETTING_SERVER_URL);
        if server_url.is_empty() {
            return Err(RegistrarError::SettingMissing(SETTING_SERVER_URL));
        }
        let mut install = ticket.spec.cloud_config.clone().unwrap_or_default();
        put_value(&mut install, &["rancherd", "server"], json!(server_url));
        put_value(&mut install, &["rancherd", "token"], json!(TPM_JOIN_TOKEN));
        put_value(&mut install, &["rancheros", "install", "automatic"], json!(true));
        let install_config = serde_json::to_vec(&Value::Object(install))?;

        let machine = MachineRecord {
            metadata: ObjectMeta {
                generate_name,
                namespace: ticket.metadata.namespace.clone(),
                labels: ticket.spec.machine_inventory_labels.clone(),
                annotations: ticket.spec.machine_inventory_annotations.clone(),
                ..Default::default()
            },
            spec: MachineSpec {
                smbios,
                ..Default::default()
            },
            ..Default::default()
        };

        debug!(
            ticket = %ticket.metadata.key(),
            generate_name = %machine.metadata.generate_name,
            "Enrollment prepared"
        );
        Ok(Self {
            ticket,
            machine,
            install_config,
        })
    }

    /// Record the authenticated machine and return its install configuration.
    ///
    /// A machine whose fingerprint is already recorded is left untouched.
    /// The lookup and the create are not atomic: two simultaneous
    /// enrollments of one device can both create a record.
    pub(crate) async fn complete(self, state: &AppState, authenticated: &MachineRecord) -> Result<Vec<u8>> {
        let fingerprint = &authenticated.spec.tpm_hash;
        let existing = state
            .store
            .machines()
            .get_by_index(MACHINE_BY_FINGERPRINT, fingerprint)?;
        if !existing.is_empty() {
            debug!(%fingerprint, "Machine already enrolled");
            return Ok(self.install_config);
        }

        let mut machine = self.machine;
        machine.spec.tpm_hash = fingerprint.clone();
        let created = state.machines.create(machine).await?;
        info!(
            machine = %created.metadata.key(),
            ticket = %self.ticket.metadata.key(),
            %fingerprint,
            "Machine enrolled"
        );
        Ok(self.install_config)
    }

    /// The answer to an unauthenticated enrollment request: a cloud-config
    /// stub pointing the installer at this ticket.
    pub(crate) fn sample_config(&self) -> Response {
        let sample = json!({
            "rancheros": {
                "install": {
                    "registrationURL": self.ticket.status.registration_url,
                }
            }
        });
        match serde_yaml::to_string(&sample) {
            Ok(yaml) => text_response(
                StatusCode::UNAUTHORIZED,
                format!("#cloud-config\n{yaml}"),
            ),
            Err(e) => {
                debug!(error = %e, "Rendering sample config failed");
                text_response(StatusCode::UNAUTHORIZED, "authorization required\n".into())
            }
        }
    }
}

/// Decode the optional SMBIOS header.
fn decode_smbios(headers: &HeaderMap) -> Result<Option<GenericMap>> {
    let Some(value) = headers.get(SMBIOS_HEADER) else {
        return Ok(None);
    };
    let invalid = |message: String| RegistrarError::invalid_header("X-Cattle-Smbios", message);
    let value = value.to_str().map_err(|e| invalid(e.to_string()))?;
    if value.is_empty() {
        return Ok(None);
    }
    let json = BASE64_STANDARD
        .decode(value.as_bytes())
        .map_err(|e| invalid(e.to_string()))?;
    serde_json::from_slice(&json)
        .map(Some)
        .map_err(|e| invalid(e.to_string()))
}

/// Set `value` at `path`, replacing anything that is not an object on the
/// way.
fn put_value(map: &mut GenericMap, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = map;
    for key in parents {
        let entry = current
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(GenericMap::new()));
        if !entry.is_object() {
            *entry = Value::Object(GenericMap::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}
