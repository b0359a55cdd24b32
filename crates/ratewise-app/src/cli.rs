//! CLI argument definitions for the ratewise binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use ratewise_core::config::RatewiseConfig;

/// Ratewise - rate-sheet ingestion and freight quote resolution service.
#[derive(Parser, Debug)]
#[command(name = "ratewise", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Priority: --config flag > RATEWISE_CONFIG env var > ~/.ratewise/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("RATEWISE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Priority: --port flag > RATEWISE_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        self.port
            .or_else(|| {
                std::env::var("RATEWISE_PORT")
                    .ok()
                    .and_then(|val| val.parse::<u16>().ok())
            })
            .unwrap_or(config_port)
    }

    /// Fold the CLI and env overrides into `config`.
    pub fn apply(&self, config: &mut RatewiseConfig) {
        config.general.port = self.resolve_port(config.general.port);
        if let Some(ref dir) = self.data_dir {
            config.general.data_dir = dir.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(rest),
        },
        None => PathBuf::from(path),
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .map(PathBuf::from)
}

fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".ratewise").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}
