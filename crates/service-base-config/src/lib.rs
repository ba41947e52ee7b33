//! Shared configuration for the service host and its installer front end.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then a
//! TOML file named by `--config-path` (or `SERVICE_BASE_CONFIG_PATH`), then
//! `SERVICE_BASE_*` environment variables, then command-line flags. The same
//! structure is consumed by the lifecycle controller (telemetry, runtime
//! files) and by the registrar (registry location, stop polling budget).

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod logging;
mod runtime;

pub use defaults::{
    APPLICATION_DIR, DEFAULT_LOG_FILTER, DEFAULT_STOP_POLL_INTERVAL_MS, DEFAULT_STOP_TIMEOUT_SECS,
    default_log_filter, default_log_filter_string, default_log_format,
    default_registry_directory, default_runtime_directory, default_stop_poll_interval_ms,
    default_stop_timeout_secs,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};

/// Resolved configuration for the service binaries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "SERVICE_BASE")]
pub struct Config {
    /// `tracing` filter expression applied to the telemetry subscriber.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format of the telemetry subscriber.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Directory holding registration records on hosts without a native
    /// service database.
    #[serde(default)]
    pub registry_dir: Option<Utf8PathBuf>,
    /// Directory holding lock, pid and status files of running services.
    #[serde(default)]
    pub runtime_dir: Option<Utf8PathBuf>,
    /// Milliseconds between status polls while uninstall waits for a stop.
    #[serde(default = "default_stop_poll_interval_ms")]
    #[ortho_config(default = DEFAULT_STOP_POLL_INTERVAL_MS)]
    pub stop_poll_interval_ms: u64,
    /// Seconds uninstall waits for a service to leave `StopPending`.
    #[serde(default = "default_stop_timeout_secs")]
    #[ortho_config(default = DEFAULT_STOP_TIMEOUT_SECS)]
    pub stop_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            registry_dir: None,
            runtime_dir: None,
            stop_poll_interval_ms: DEFAULT_STOP_POLL_INTERVAL_MS,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Filter expression for the telemetry subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format for the telemetry subscriber.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Registry directory, falling back to the platform default.
    #[must_use]
    pub fn registry_dir(&self) -> Utf8PathBuf {
        self.registry_dir
            .clone()
            .unwrap_or_else(default_registry_directory)
    }

    /// Runtime directory, falling back to the platform default.
    #[must_use]
    pub fn runtime_dir(&self) -> Utf8PathBuf {
        self.runtime_dir
            .clone()
            .unwrap_or_else(default_runtime_directory)
    }

    /// Interval between status polls during uninstall.
    #[must_use]
    pub const fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }

    /// Overall budget for waiting on a stopping service during uninstall.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}
