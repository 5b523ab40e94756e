//! Daemon configuration.
//!
//! Resolution order (highest priority first):
//! 1. Environment variables (`RENAMER_*`)
//! 2. TOML file (`--config <path>`, else `<config dir>/renamer/config.toml`)
//! 3. Compiled defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::delivery::RetryPolicy;
use crate::server::DEFAULT_SOCKET_PATH;

/// Environment variable names for overrides.
pub const ENV_SOCKET: &str = "RENAMER_SOCKET";
pub const ENV_DOWNLOADS_DIR: &str = "RENAMER_DOWNLOADS_DIR";
pub const ENV_OUTBOX_DIR: &str = "RENAMER_OUTBOX_DIR";
pub const ENV_MAX_FILE_SIZE_MB: &str = "RENAMER_MAX_FILE_SIZE_MB";
pub const ENV_SESSION_TIMEOUT_SECS: &str = "RENAMER_SESSION_TIMEOUT_SECS";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid config {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Delivery retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_secs: 2,
            max_backoff_secs: 10,
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    /// Where uploads are staged while a session is live.
    pub downloads_dir: PathBuf,
    /// Where delivered copies are placed.
    pub outbox_dir: PathBuf,
    pub max_file_size_mb: u64,
    /// Inactivity window before a session times out.
    pub session_timeout_secs: u64,
    pub max_sessions: usize,
    /// Failed delivery rounds before a session is given up.
    pub max_delivery_rounds: u32,
    /// Lowercase extensions without the dot. Empty allows any.
    pub allowed_extensions: Vec<String>,
    pub delivery: DeliveryConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let state = state_dir();
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            downloads_dir: state.join("downloads"),
            outbox_dir: state.join("outbox"),
            max_file_size_mb: 200,
            session_timeout_secs: 600,
            max_sessions: crate::store::MAX_SESSIONS,
            max_delivery_rounds: 3,
            allowed_extensions: Vec::new(),
            delivery: DeliveryConfig::default(),
        }
    }
}

/// Returns the daemon's state directory (`<state dir>/renamer`, else `/tmp/renamer`).
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("renamer")
}

impl DaemonConfig {
    /// Loads configuration from file and environment, then validates it.
    ///
    /// An explicit `path` must exist. The default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => {
                    debug!("No config file, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Returns `<config dir>/renamer/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("renamer").join("config.toml"))
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content, path)?;
        info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, Path::new("<string>"))
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Applies `RENAMER_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_SOCKET) {
            self.socket_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_DOWNLOADS_DIR) {
            self.downloads_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_OUTBOX_DIR) {
            self.outbox_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_MAX_FILE_SIZE_MB) {
            self.max_file_size_mb = parse_number(ENV_MAX_FILE_SIZE_MB, &v)?;
        }
        if let Some(v) = lookup(ENV_SESSION_TIMEOUT_SECS) {
            self.session_timeout_secs = parse_number(ENV_SESSION_TIMEOUT_SECS, &v)?;
        }
        Ok(())
    }

    /// Rejects zero limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_file_size_mb", self.max_file_size_mb),
            ("session_timeout_secs", self.session_timeout_secs),
            ("max_sessions", self.max_sessions as u64),
            ("max_delivery_rounds", u64::from(self.max_delivery_rounds)),
            ("delivery.max_attempts", u64::from(self.delivery.max_attempts)),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than 0".to_string(),
                });
            }
        }
        if self.delivery.max_backoff_secs < self.delivery.initial_backoff_secs {
            return Err(ConfigError::Invalid {
                field: "delivery.max_backoff_secs",
                message: "must not be less than initial_backoff_secs".to_string(),
            });
        }
        Ok(())
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Builds the delivery retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.delivery.max_attempts,
            initial_backoff: Duration::from_secs(self.delivery.initial_backoff_secs),
            max_backoff: Duration::from_secs(self.delivery.max_backoff_secs),
            ..RetryPolicy::default()
        }
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}
