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

//! Registrar configuration.
//!
//! The configuration is a TOML document. Every section is optional; an empty
//! file yields a server listening on `0.0.0.0:8443` under `/v1-rancheros`.
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8443"
//! base_path = "/v1-rancheros"
//!
//! [attestation]
//! handshake_timeout_secs = 5
//! write_timeout_secs = 10
//! read_timeout_secs = 10
//!
//! [settings]
//! server_url = "https://rancher.example.com"
//!
//! [store]
//! snapshot = "/var/lib/machine-registrar/snapshot.json"
//!
//! [logging]
//! level = "info"
//! ```

mod expand;
mod loader;

pub use expand::expand_variables;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RegistrarError, Result};
use crate::server::socket::SocketTimeouts;
use crate::store::Store;

/// Setting holding the externally reachable control-plane URL.
pub const SETTING_SERVER_URL: &str = "server-url";

/// Setting holding the published CA bundle.
pub const SETTING_CACERTS: &str = "cacerts";

/// Setting holding the internal CA bundle, used when `cacerts` is empty.
pub const SETTING_INTERNAL_CACERTS: &str = "internal-cacerts";

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrarConfig {
    /// HTTP listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Attestation socket deadlines.
    #[serde(default)]
    pub attestation: AttestationConfig,

    /// Setting overrides applied on top of the store snapshot.
    #[serde(default)]
    pub settings: SettingsConfig,

    /// Resource store source.
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RegistrarConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| RegistrarError::config(format!("Invalid TOML: {e}")))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| RegistrarError::config(format!("TOML serialize: {e}")))
    }

    /// Expand `${VAR}` references from the environment.
    pub fn expand_variables(&mut self) -> Result<()> {
        self.server.listen = expand_variables(&self.server.listen)?;
        self.server.base_path = expand_variables(&self.server.base_path)?;

        for value in [
            &mut self.settings.server_url,
            &mut self.settings.cacerts,
            &mut self.settings.internal_cacerts,
        ]
        .into_iter()
        .flatten()
        {
            *value = expand_variables(value.as_str())?;
        }

        if let Some(ref mut path) = self.store.snapshot {
            let expanded = expand_variables(&path.to_string_lossy())?;
            *path = PathBuf::from(expanded);
        }

        Ok(())
    }

    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.server.listen.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "server.listen is not a socket address: {}",
                self.server.listen
            ));
        }

        let base = &self.server.base_path;
        if !base.starts_with('/') {
            errors.push("server.base_path must start with '/'".to_string());
        } else if base.len() > 1 && base.ends_with('/') {
            errors.push("server.base_path must not end with '/'".to_string());
        } else if base == "/" {
            errors.push("server.base_path must not be '/'".to_string());
        }

        for (name, secs) in [
            ("handshake_timeout_secs", self.attestation.handshake_timeout_secs),
            ("write_timeout_secs", self.attestation.write_timeout_secs),
            ("read_timeout_secs", self.attestation.read_timeout_secs),
        ] {
            if secs == 0 {
                errors.push(format!("attestation.{name} must be greater than zero"));
            }
        }

        if let Some(ref url) = self.settings.server_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                errors.push("settings.server_url must be an http(s) URL".to_string());
            }
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            errors.push(format!("logging.level is invalid: {}", self.logging.level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RegistrarError::config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server.listen.parse().map_err(|e| {
            RegistrarError::config(format!("Invalid listen address {}: {e}", self.server.listen))
        })
    }

    /// Build the store: the snapshot if configured, then setting overrides.
    pub fn build_store(&self) -> Result<Store> {
        let store = match self.store.snapshot {
            Some(ref path) => Store::load_snapshot(path)?,
            None => Store::new(),
        };
        self.settings.apply(&store);
        Ok(store)
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path prefix under which every endpoint is mounted.
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            base_path: default_base_path(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_base_path() -> String {
    "/v1-rancheros".to_string()
}

/// Deadlines for the attestation socket round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttestationConfig {
    /// Seconds allowed for the socket upgrade to complete.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Seconds allowed to write the challenge.
    #[serde(default = "default_io_timeout")]
    pub write_timeout_secs: u64,

    /// Seconds allowed for the device to answer.
    #[serde(default = "default_io_timeout")]
    pub read_timeout_secs: u64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            write_timeout_secs: default_io_timeout(),
            read_timeout_secs: default_io_timeout(),
        }
    }
}

impl AttestationConfig {
    /// Deadlines as durations.
    pub fn timeouts(&self) -> SocketTimeouts {
        SocketTimeouts {
            handshake: Duration::from_secs(self.handshake_timeout_secs),
            write: Duration::from_secs(self.write_timeout_secs),
            read: Duration::from_secs(self.read_timeout_secs),
        }
    }
}

fn default_handshake_timeout() -> u64 {
    5
}

fn default_io_timeout() -> u64 {
    10
}

/// Setting overrides.
///
/// Values set here replace the corresponding store setting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsConfig {
    /// `server-url` setting.
    #[serde(default)]
    pub server_url: Option<String>,

    /// `cacerts` setting.
    #[serde(default)]
    pub cacerts: Option<String>,

    /// `internal-cacerts` setting.
    #[serde(default)]
    pub internal_cacerts: Option<String>,
}

impl SettingsConfig {
    /// Write the configured overrides into a store.
    pub fn apply(&self, store: &Store) {
        for (name, value) in [
            (SETTING_SERVER_URL, &self.server_url),
            (SETTING_CACERTS, &self.cacerts),
            (SETTING_INTERNAL_CACERTS, &self.internal_cacerts),
        ] {
            if let Some(value) = value {
                store.set_setting(name, value.clone());
            }
        }
    }
}

/// Resource store source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// JSON snapshot to load at startup.
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON formatted logs.
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RegistrarConfig::from_toml("").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8443");
        assert_eq!(config.server.base_path, "/v1-rancheros");
        assert_eq!(config.attestation.handshake_timeout_secs, 5);
        assert_eq!(config.attestation.write_timeout_secs, 10);
        assert_eq!(config.attestation.read_timeout_secs, 10);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_full_document() {
        let toml = r#"
[server]
listen = "127.0.0.1:9000"
base_path = "/v2"

[attestation]
handshake_timeout_secs = 1
write_timeout_secs = 2
read_timeout_secs = 3

[settings]
server_url = "https://rancher.example.com"
cacerts = "PEM"

[store]
snapshot = "/tmp/snapshot.json"

[logging]
level = "debug"
json_format = true
"#;
        let config = RegistrarConfig::from_toml(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 9000);
        let timeouts = config.attestation.timeouts();
        assert_eq!(timeouts.handshake, Duration::from_secs(1));
        assert_eq!(timeouts.write, Duration::from_secs(2));
        assert_eq!(timeouts.read, Duration::from_secs(3));
        assert_eq!(config.store.snapshot, Some(PathBuf::from("/tmp/snapshot.json")));
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let toml = r#"
[server]
listen = "127.0.0.1:9000"
tls = true
"#;
        assert!(RegistrarConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_validation_collects_errors() {
        let toml = r#"
[server]
listen = "not an address"
base_path = "v1/"

[attestation]
read_timeout_secs = 0

[logging]
level = "loud"
"#;
        let err = RegistrarConfig::from_toml(toml)
            .unwrap()
            .validate()
            .unwrap_err()
            .to_string();
        assert!(err.contains("server.listen"));
        assert!(err.contains("base_path"));
        assert!(err.contains("read_timeout_secs"));
        assert!(err.contains("logging.level"));
    }

    #[test]
    fn test_trailing_slash_rejected() {
        let mut config = RegistrarConfig::default();
        config.server.base_path = "/v1-rancheros/".to_string();
        assert!(config.validate().is_err());
        config.server.base_path = "/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_override_store() {
        let mut config = RegistrarConfig::default();
        config.settings.server_url = Some("https://r.example.com".to_string());
        let store = config.build_store().unwrap();
        assert_eq!(store.setting(SETTING_SERVER_URL), "https://r.example.com");
        assert_eq!(store.setting(SETTING_CACERTS), "");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = RegistrarConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = RegistrarConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.server.base_path, config.server.base_path);
    }
}
