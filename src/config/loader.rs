// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Configuration file discovery and loading.

use std::path::{Path, PathBuf};

use crate::error::{RegistrarError, Result};

use super::RegistrarConfig;

/// Configuration file loader with discovery and precedence rules.
///
/// # Search Order
///
/// Configuration files are searched in the following order (first found wins):
///
/// 1. Explicit path (if set via `with_path()`)
/// 2. Environment variable `REGISTRAR_CONFIG`
/// 3. `/etc/machine-registrar/config.toml`
/// 4. `~/.config/machine-registrar/config.toml`
/// 5. Current directory: `./registrar.toml`
///
/// # Example
///
/// ```no_run
/// use machine_registrar::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_path("/etc/machine-registrar/config.toml")
///     .load()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    explicit_path: Option<PathBuf>,
    expand_variables: bool,
    validate: bool,
    env_var_name: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader with default settings.
    pub fn new() -> Self {
        Self {
            explicit_path: None,
            expand_variables: true,
            validate: true,
            env_var_name: "REGISTRAR_CONFIG".to_string(),
        }
    }

    /// Set an explicit configuration file path.
    ///
    /// When set, only this path will be checked (no discovery).
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enable or disable variable expansion. Default: `true`
    pub fn with_expand_variables(mut self, expand: bool) -> Self {
        self.expand_variables = expand;
        self
    }

    /// Enable or disable validation after loading. Default: `true`
    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Set the environment variable name for path override.
    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var_name = name.into();
        self
    }

    /// Load the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if no configuration file is found, the file cannot
    /// be read, the TOML is invalid, or validation fails.
    pub fn load(&self) -> Result<RegistrarConfig> {
        let config_path = self.find_config_file()?;

        let toml_content = std::fs::read_to_string(&config_path).map_err(|e| {
            RegistrarError::config(format!("Failed to read {}: {e}", config_path.display()))
        })?;

        self.load_from_str(&toml_content)
    }

    /// Load the configuration file, or defaults when none is discoverable.
    ///
    /// An explicit path or environment override that does not exist is still
    /// an error.
    pub fn load_or_default(&self) -> Result<RegistrarConfig> {
        if self.explicit_path.is_some() || std::env::var_os(&self.env_var_name).is_some() {
            return self.load();
        }
        match self.search_paths().into_iter().find(|p| p.exists()) {
            Some(path) => self.clone().with_path(path).load(),
            None => self.finish(RegistrarConfig::default()),
        }
    }

    /// Load the configuration from a TOML string.
    pub fn load_from_str(&self, toml_content: &str) -> Result<RegistrarConfig> {
        self.finish(RegistrarConfig::from_toml(toml_content)?)
    }

    fn finish(&self, mut config: RegistrarConfig) -> Result<RegistrarConfig> {
        if self.expand_variables {
            config.expand_variables()?;
        }
        if self.validate {
            config.validate()?;
        }
        Ok(config)
    }

    /// Find the configuration file path.
    pub fn find_config_file(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.explicit_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(RegistrarError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        if let Ok(env_path) = std::env::var(&self.env_var_name) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok(path);
            }
            return Err(RegistrarError::config(format!(
                "Configuration file from {} not found: {}",
                self.env_var_name, env_path
            )));
        }

        let paths = self.search_paths();
        if let Some(path) = paths.iter().find(|p| p.exists()) {
            return Ok(path.clone());
        }

        Err(RegistrarError::config(format!(
            "No configuration file found. Searched:\n  - {}",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join("\n  - ")
        )))
    }

    /// Standard locations searched when no explicit path is given.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/machine-registrar/config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("machine-registrar").join("config.toml"));
        }

        paths.push(PathBuf::from("registrar.toml"));
        paths
    }
}
