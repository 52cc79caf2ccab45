//! Hub configuration.
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults ([`defaults`])
//! 2. `remotehub.toml` (or an explicit path)
//! 3. Environment variables ([`env_vars`])

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "remotehub.toml";

/// Default values.
pub mod defaults {
    pub const DISPATCH_TIMEOUT_MS: u64 = 5_000;
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;
    pub const POLL_INTERVAL_SECS: u64 = 30;
    pub const PROBE_TIMEOUT_MS: u64 = 1_000;
    /// HTTP, webOS (3000/3001) and Tizen (8001/8002) control ports.
    pub const PROBE_PORTS: &[u16] = &[80, 3000, 3001, 8001, 8002];
    pub const DB_PATH: &str = "data/remotehub.redb";
    pub const LOG_FILTER: &str = "remotehub=info";
    pub const EVENT_CHANNEL_CAPACITY: usize = 1000;
}

/// Environment variable names.
pub mod env_vars {
    pub const POLL_INTERVAL_SECS: &str = "REMOTEHUB_POLL_INTERVAL_SECS";
    pub const PROBE_TIMEOUT_MS: &str = "REMOTEHUB_PROBE_TIMEOUT_MS";
    pub const DISPATCH_TIMEOUT_MS: &str = "REMOTEHUB_DISPATCH_TIMEOUT_MS";
    pub const DB_PATH: &str = "REMOTEHUB_DB_PATH";
    pub const LOG_JSON: &str = "REMOTEHUB_LOG_JSON";
    pub const LOG_FILTER: &str = "REMOTEHUB_LOG_FILTER";
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level hub configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HubConfig {
    pub dispatch: DispatchConfig,
    pub connection: ConnectionConfig,
    pub liveness: LivenessConfig,
    pub activity: ActivityConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub events: EventsConfig,
}

/// Per-call dispatch bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on one adapter call.
    pub timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::DISPATCH_TIMEOUT_MS,
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Connection lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    /// When a connect to the same address is already in flight, wait for it
    /// (`true`) or return "retry later" immediately (`false`).
    pub wait_for_in_flight: bool,
    /// Used only when the caller supplies no address.
    pub default_address: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            wait_for_in_flight: true,
            default_address: None,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Liveness polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub probe_timeout_ms: u64,
    /// Ports tried by the TCP reachability probe.
    pub probe_ports: Vec<u16>,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: defaults::POLL_INTERVAL_SECS,
            probe_timeout_ms: defaults::PROBE_TIMEOUT_MS,
            probe_ports: defaults::PROBE_PORTS.to_vec(),
        }
    }
}

impl LivenessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Activity execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Reject a run while the same activity is already running.
    pub exclusive_runs: bool,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            exclusive_runs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(defaults::DB_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: defaults::LOG_FILTER.to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl HubConfig {
    /// Parse a TOML document. Missing sections and keys take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from `path`, or from [`DEFAULT_CONFIG_FILE`] when
    /// it exists, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                tracing::info!(category = "config", "No config file, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(category = "config", path = %path.display(), "Loading config");
        Self::from_toml_str(&content)
    }

    /// Apply overrides from a variable lookup (normally `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(env_vars::POLL_INTERVAL_SECS) {
            self.liveness.poll_interval_secs = parse_env(env_vars::POLL_INTERVAL_SECS, v)?;
        }
        if let Some(v) = lookup(env_vars::PROBE_TIMEOUT_MS) {
            self.liveness.probe_timeout_ms = parse_env(env_vars::PROBE_TIMEOUT_MS, v)?;
        }
        if let Some(v) = lookup(env_vars::DISPATCH_TIMEOUT_MS) {
            self.dispatch.timeout_ms = parse_env(env_vars::DISPATCH_TIMEOUT_MS, v)?;
        }
        if let Some(v) = lookup(env_vars::DB_PATH) {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(v) = lookup(env_vars::LOG_JSON) {
            self.logging.json = parse_env(env_vars::LOG_JSON, v)?;
        }
        if let Some(v) = lookup(env_vars::LOG_FILTER) {
            self.logging.filter = v;
        }
        Ok(())
    }

    /// Reject settings the runtime cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.liveness.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "liveness.poll_interval_secs must be greater than zero".into(),
            ));
        }
        let poll_ms = self.liveness.poll_interval_secs.saturating_mul(1000);
        if self.liveness.probe_timeout_ms == 0 || self.liveness.probe_timeout_ms >= poll_ms {
            return Err(ConfigError::Invalid(format!(
                "liveness.probe_timeout_ms must be in 1..{}",
                poll_ms
            )));
        }
        if self.dispatch.timeout_ms == 0 || self.dispatch.timeout_ms >= poll_ms {
            return Err(ConfigError::Invalid(format!(
                "dispatch.timeout_ms must be in 1..{} (below the poll interval)",
                poll_ms
            )));
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection.connect_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "events.channel_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}
