//! routerhost-core — shared configuration and time helpers.

pub mod config;
pub mod time;

pub use config::{ConfigError, LivenessConfig, ProbeKind, RouterHostConfig, SchedulingConfig, ServerConfig};
pub use time::{epoch_secs, parse_duration};
