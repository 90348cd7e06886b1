//! herald-ap specific configuration
//!
//! Merges command-line overrides into the TOML bootstrap config.

use crate::fetch::FetchPolicy;
use crate::playback::ControllerConfig;
use herald_common::config::{LoggingConfig, TomlConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Resolved player configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub files_path: PathBuf,
    pub port: u16,
    pub stop_wait: Duration,
    pub default_volume: u8,
    pub fetch: FetchPolicy,
    pub logging: LoggingConfig,
}

/// Values given on the command line; `None` keeps the TOML value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub database_path: Option<PathBuf>,
    pub files_path: Option<PathBuf>,
}

impl Config {
    pub fn resolve(toml: TomlConfig, overrides: Overrides) -> Self {
        Self {
            database_path: overrides.database_path.unwrap_or(toml.database_path),
            files_path: overrides.files_path.unwrap_or(toml.files_path),
            port: overrides.port.unwrap_or(toml.port),
            stop_wait: Duration::from_millis(toml.stop_wait_ms),
            default_volume: toml.default_volume.min(100),
            fetch: FetchPolicy {
                max_attempts: toml.fetch_retries.max(1),
                backoff: Duration::from_millis(toml.fetch_backoff_ms),
                timeout: Duration::from_secs(toml.fetch_timeout_s),
            },
            logging: toml.logging,
        }
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            files_path: self.files_path.clone(),
            settle_delay: self.stop_wait,
            default_volume: self.default_volume,
        }
    }
}
