//! Bootstrap configuration
//!
//! Settings that cannot change while the process runs live in a TOML file.
//! Runtime state (the active bill, the enable flag) lives in the SQLite
//! settings table instead.
//!
//! Config file lookup order:
//! 1. Command-line argument (highest priority)
//! 2. `HERALD_CONFIG` environment variable
//! 3. `~/.config/herald/config.toml`
//! 4. `/etc/herald/config.toml`

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "HERALD_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory holding local and downloaded audio files
    #[serde(default = "default_files_path")]
    pub files_path: PathBuf,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Settle delay after pausing a session, in milliseconds
    #[serde(default = "default_stop_wait_ms")]
    pub stop_wait_ms: u64,

    /// Volume applied at startup (0..100)
    #[serde(default = "default_volume")]
    pub default_volume: u8,

    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    #[serde(default = "default_fetch_backoff_ms")]
    pub fetch_backoff_ms: u64,

    /// Per-attempt download timeout in seconds
    #[serde(default = "default_fetch_timeout_s")]
    pub fetch_timeout_s: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            files_path: default_files_path(),
            port: default_port(),
            stop_wait_ms: default_stop_wait_ms(),
            default_volume: default_volume(),
            fetch_retries: default_fetch_retries(),
            fetch_backoff_ms: default_fetch_backoff_ms(),
            fetch_timeout_s: default_fetch_timeout_s(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("herald.db")
}

fn default_files_path() -> PathBuf {
    default_data_dir().join("files")
}

fn default_port() -> u16 {
    5730
}

fn default_stop_wait_ms() -> u64 {
    50
}

fn default_volume() -> u8 {
    100
}

fn default_fetch_retries() -> u32 {
    3
}

fn default_fetch_backoff_ms() -> u64 {
    5000
}

fn default_fetch_timeout_s() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// OS-dependent data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("herald"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/herald"))
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Locate and load the config file, falling back to defaults when none exists
    ///
    /// An explicitly named file (CLI or environment) that cannot be loaded is
    /// an error; a missing default-location file is not.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&path));
        }
        match find_config_file() {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            return Err(Error::Config(format!(
                "default_volume {} must be between 0 and 100",
                self.default_volume
            )));
        }
        if self.port == 0 {
            return Err(Error::Config("port must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Platform config file, if one exists
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("herald").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/herald/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }
    None
}
