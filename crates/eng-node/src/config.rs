//! Node configuration.
//!
//! Values are layered, later layers winning:
//!
//! 1. built-in defaults ([`NodeConfig::default`]);
//! 2. an optional YAML file (`--config`);
//! 3. `ENG_`-prefixed environment variables, `__` separating nested keys
//!    (`ENG_REALTIME__HEARTBEAT_INTERVAL_SECS=10`);
//! 4. command-line flags ([`CliOverrides`]).

use crate::observability::LogFormat;
use config::{Config, Environment, File, FileFormat};
use eng_realtime::{CoordinatorConfig, ReconnectPolicy, MAX_PARTICIPANTS_LIMIT};
use eng_vcs::MergeStrategy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ENG";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Where objects and refs are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Lost on restart.
    #[default]
    Memory,
    /// Loose objects and ref snapshots under `data_dir`.
    Filesystem,
}

/// Collaboration session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub heartbeat_interval_secs: u64,
    pub missed_heartbeats: u32,
    pub max_participants_default: usize,
    pub reconnect_max_attempts: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            missed_heartbeats: 2,
            max_participants_default: 10,
            reconnect_max_attempts: 5,
        }
    }
}

impl RealtimeConfig {
    /// Session coordinator settings.
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            missed_heartbeats: self.missed_heartbeats,
            max_participants_default: self.max_participants_default,
        }
    }

    /// Backoff clients should use when their connection drops.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::with_max_attempts(self.reconnect_max_attempts)
    }
}

/// Configuration for the eng node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP listen address.
    pub api_addr: SocketAddr,
    /// Data directory.
    pub data_dir: PathBuf,
    pub storage_backend: StorageBackend,
    /// Log level.
    pub log_level: String,
    pub log_format: LogFormat,
    /// Merge strategy for new and loaded projects.
    pub merge_strategy: MergeStrategy,
    pub realtime: RealtimeConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: PathBuf::from("./data"),
            storage_backend: StorageBackend::Memory,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            merge_strategy: MergeStrategy::Path,
            realtime: RealtimeConfig::default(),
        }
    }
}

/// Command-line values that override file and environment settings.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_addr: Option<SocketAddr>,
    pub data_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

impl NodeConfig {
    /// Loads defaults, then `file`, then `ENG_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(file, Environment::with_prefix(ENV_PREFIX))
    }

    /// Like [`NodeConfig::load`] with an explicit environment source.
    pub fn load_with_env(file: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&NodeConfig::default())?);
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }
        let config: NodeConfig = builder
            .add_source(
                env.prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies command-line overrides and re-validates.
    pub fn apply_overrides(mut self, overrides: CliOverrides) -> Result<Self, ConfigError> {
        if let Some(addr) = overrides.api_addr {
            self.api_addr = addr;
        }
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
        if let Some(format) = overrides.log_format {
            self.log_format = format;
        }
        self.validate()?;
        Ok(self)
    }

    /// Rejects settings the node cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let realtime = &self.realtime;
        if realtime.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "realtime.heartbeat_interval_secs must be greater than zero".into(),
            ));
        }
        if realtime.missed_heartbeats == 0 {
            return Err(ConfigError::Invalid(
                "realtime.missed_heartbeats must be greater than zero".into(),
            ));
        }
        if realtime.reconnect_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "realtime.reconnect_max_attempts must be greater than zero".into(),
            ));
        }
        if realtime.max_participants_default == 0
            || realtime.max_participants_default > MAX_PARTICIPANTS_LIMIT
        {
            return Err(ConfigError::Invalid(format!(
                "realtime.max_participants_default must be between 1 and {}",
                MAX_PARTICIPANTS_LIMIT
            )));
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid("log_level must not be empty".into()));
        }
        Ok(())
    }

    /// The effective configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
