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

//! Machine Registrar Command-Line Tool
//!
//! # Usage
//!
//! ```text
//! machine-registrar [OPTIONS] <COMMAND>
//!
//! Commands:
//!   serve        Run the registrar HTTP server
//!   fingerprint  Print the identity fingerprint of an EK certificate or key
//!   config       Configuration management
//!
//! Options:
//!   -c, --config <PATH>   Path to configuration file
//!   -v, --verbose         Enable verbose output
//!   -q, --quiet           Suppress non-error output
//!   -h, --help            Print help
//!   -V, --version         Print version
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Serve with the discovered configuration
//! machine-registrar serve
//!
//! # Fingerprint a device's EK certificate
//! machine-registrar fingerprint ek.pem
//!
//! # Validate a configuration file
//! machine-registrar config validate --config /etc/machine-registrar/config.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use machine_registrar::config::{ConfigLoader, LoggingConfig, RegistrarConfig};
use machine_registrar::server::{self, AppState};
use machine_registrar::tpm::{format_fingerprint, EndorsementKey};

/// Machine Registrar Command-Line Tool
#[derive(Parser)]
#[command(name = "machine-registrar")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Device attestation and enrollment server", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registrar HTTP server
    Serve,

    /// Print the identity fingerprint of an EK certificate or public key
    Fingerprint {
        /// PEM file holding a CERTIFICATE or PUBLIC KEY block
        #[arg(value_name = "PEM")]
        path: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate configuration file
    Validate,

    /// Display effective configuration
    Show {
        /// Output format (toml, json)
        #[arg(long, default_value = "toml")]
        format: ConfigFormat,
    },
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum ConfigFormat {
    Json,
    #[default]
    Toml,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Serve => cmd_serve(&cli),
        Commands::Fingerprint { path } => {
            init_logging(&cli, None);
            cmd_fingerprint(path)
        }
        Commands::Config { action } => {
            init_logging(&cli, None);
            cmd_config(&cli, action)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Install the global subscriber.
///
/// `--quiet` and `--verbose` win over the configured level.
fn init_logging(cli: &Cli, logging: Option<&LoggingConfig>) {
    let configured = logging
        .and_then(|l| l.level.parse::<tracing::Level>().ok())
        .unwrap_or(tracing::Level::INFO);
    let log_level = if cli.quiet {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        configured
    };

    if logging.is_some_and(|l| l.json_format) {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(log_level)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_target(false)
            .init();
    }
}

fn loader(cli: &Cli) -> ConfigLoader {
    let mut loader = ConfigLoader::new();
    if let Some(ref path) = cli.config {
        loader = loader.with_path(path);
    }
    loader
}

fn cmd_serve(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = loader(cli).load_or_default()?;
    init_logging(cli, Some(&config.logging));

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create async runtime: {e}"))?;
    runtime.block_on(serve(config))
}

async fn serve(config: RegistrarConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = config.build_store()?;
    tracing::info!(
        machines = store.machines().len(),
        registrations = store.registrations().len(),
        secrets = store.secrets().len(),
        join_tokens = store.join_tokens().len(),
        "Store loaded"
    );

    let state = AppState::new(store, config.attestation.timeouts());
    let router = server::router(state, &config.server.base_path);
    let listener = tokio::net::TcpListener::bind(config.listen_addr()?).await?;
    server::serve(listener, router).await?;
    Ok(())
}

fn cmd_fingerprint(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let pem = std::fs::read(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let ek = EndorsementKey::from_pem(&pem)?;
    let fingerprint = ek.fingerprint()?;

    println!("Fingerprint: {}", fingerprint);
    println!("SHA-256:     {}", format_fingerprint(&fingerprint));
    if let Some(ref certificate) = ek.certificate {
        println!("Subject:     {}", certificate.tbs_certificate.subject);
        println!("Issuer:      {}", certificate.tbs_certificate.issuer);
    }
    Ok(())
}

fn cmd_config(cli: &Cli, action: &ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Validate => {
            println!("Validating configuration...");

            match loader(cli).load() {
                Ok(config) => {
                    println!("Configuration is valid.");
                    println!();
                    println!("Summary:");
                    println!("  Listen: {}", config.server.listen);
                    println!("  Base Path: {}", config.server.base_path);
                    println!(
                        "  Server URL: {}",
                        config.settings.server_url.as_deref().unwrap_or("(from store)")
                    );
                    match config.store.snapshot {
                        Some(ref path) => println!("  Snapshot: {}", path.display()),
                        None => println!("  Snapshot: (none)"),
                    }
                }
                Err(e) => {
                    println!("Configuration validation failed:");
                    println!("  {}", e);
                    return Err("Validation failed".into());
                }
            }
        }
        ConfigAction::Show { format } => {
            let config = loader(cli).load_or_default()?;
            match *format {
                ConfigFormat::Toml => println!("{}", config.to_toml()?),
                ConfigFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }
    }
    Ok(())
}
