//! routerhost.toml configuration parser.
//!
//! Every field carries a default, so an empty file (or no file at all)
//! yields a working configuration. Durations are kept as strings in the
//! file and parsed on access; [`RouterHostConfig::validate`] checks them
//! once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::time::parse_duration;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterHostConfig {
    pub scheduling: SchedulingConfig,
    pub liveness: LivenessConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Router type used when a create request names none.
    pub default_router_type: String,
    /// Router type of legacy network-namespace routers (never hosted).
    pub namespace_router_type_name: String,
    /// Time between renewed scheduling attempts of backlogged routers.
    pub backlog_processing_interval: String,
    pub router_auto_schedule: bool,
    pub share_hosting_device: bool,
    /// Devices created within this window of the oldest candidate are
    /// considered equally old by the default scheduler.
    pub equivalence_window: String,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            default_router_type: "CSR1kv_router".to_string(),
            namespace_router_type_name: "NetworkNamespace_router".to_string(),
            backlog_processing_interval: "10s".to_string(),
            router_auto_schedule: true,
            share_hosting_device: true,
            equivalence_window: "7m".to_string(),
        }
    }
}

/// How hosting-device reachability is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Ping,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Time a backlogged hosting device may stay unreachable before it
    /// is presumed dead.
    pub hosting_device_dead_timeout: String,
    /// Booting time assumed for templates that do not declare one.
    pub default_booting_time: String,
    pub device_connection_timeout: String,
    pub check_interval: String,
    pub probe: ProbeKind,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            hosting_device_dead_timeout: "300s".to_string(),
            default_booting_time: "420s".to_string(),
            device_connection_timeout: "30s".to_string(),
            check_interval: "10s".to_string(),
            probe: ProbeKind::Ping,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9696".to_string(),
            data_dir: PathBuf::from("/var/lib/routerhost"),
        }
    }
}

impl RouterHostConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RouterHostConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every duration and name once, so bad values fail at startup
    /// instead of on the first sweep.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduling.default_router_type.trim().is_empty() {
            return Err(ConfigError::Empty("scheduling.default_router_type"));
        }
        if self.scheduling.namespace_router_type_name.trim().is_empty() {
            return Err(ConfigError::Empty("scheduling.namespace_router_type_name"));
        }
        self.backlog_processing_interval()?;
        self.equivalence_window()?;
        self.hosting_device_dead_timeout()?;
        self.default_booting_time()?;
        self.device_connection_timeout()?;
        self.liveness_check_interval()?;
        Ok(())
    }

    pub fn backlog_processing_interval(&self) -> Result<Duration, ConfigError> {
        duration_field(
            "scheduling.backlog_processing_interval",
            &self.scheduling.backlog_processing_interval,
        )
    }

    pub fn equivalence_window(&self) -> Result<Duration, ConfigError> {
        duration_field("scheduling.equivalence_window", &self.scheduling.equivalence_window)
    }

    pub fn hosting_device_dead_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field(
            "liveness.hosting_device_dead_timeout",
            &self.liveness.hosting_device_dead_timeout,
        )
    }

    pub fn default_booting_time(&self) -> Result<Duration, ConfigError> {
        duration_field("liveness.default_booting_time", &self.liveness.default_booting_time)
    }

    pub fn device_connection_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field(
            "liveness.device_connection_timeout",
            &self.liveness.device_connection_timeout,
        )
    }

    pub fn liveness_check_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("liveness.check_interval", &self.liveness.check_interval)
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}
