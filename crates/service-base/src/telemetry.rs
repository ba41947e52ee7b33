//! Process-wide `tracing` subscriber for service hosts and the installer.
//!
//! The subscriber is a registry carrying one formatting layer and an
//! `EnvFilter`, installed once per process. Each call to [`initialise`] also
//! opens a root span naming the service and the role the process was launched
//! in, so installer output and hosted-service output can be told apart in a
//! shared log.

use std::fmt;
use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::span::Entered;
use tracing::{Span, info_span};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

use service_base_config::{Config, LogFormat};

use crate::supervisor::LaunchMode;

const TELEMETRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::telemetry");

static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

/// What the process was launched to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Adding or removing the service registration.
    Installer,
    /// Hosting the service in the given mode.
    Host(LaunchMode),
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installer => f.write_str("installer"),
            Self::Host(mode) => write!(f, "host:{mode}"),
        }
    }
}

/// Root span of a process whose subscriber is installed.
#[derive(Debug, Clone)]
pub struct TelemetryHandle {
    format: LogFormat,
    role: ProcessRole,
    span: Span,
}

impl TelemetryHandle {
    /// Output format of the installed subscriber.
    ///
    /// The first successful call wins; later configurations do not change it.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }

    #[must_use]
    pub const fn role(&self) -> ProcessRole {
        self.role
    }

    /// Span carrying the service name and role.
    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }

    /// Enters the root span on the calling thread until the guard drops.
    pub fn enter(&self) -> Entered<'_> {
        self.span.enter()
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter '{filter}': {reason}")]
    Filter {
        /// Expression as configured.
        filter: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// Another subscriber already owns the process.
    #[error("failed to install telemetry subscriber: {0}")]
    Install(#[from] TryInitError),
}

/// Installs the subscriber on first use and opens the root span for
/// `service` launched as `role`.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] when the first configuration carries a
/// malformed filter and [`TelemetryError::Install`] when a foreign global
/// subscriber is already set.
pub fn initialise(
    config: &Config,
    service: &str,
    role: ProcessRole,
) -> Result<TelemetryHandle, TelemetryError> {
    let format = *INSTALLED.get_or_try_init(|| install(config))?;
    let span = info_span!(target: TELEMETRY_TARGET, "service", name = %service, role = %role);
    Ok(TelemetryHandle { format, role, span })
}

fn install(config: &Config) -> Result<LogFormat, TelemetryError> {
    let format = config.log_format();
    let filter = filter_for(config)?;
    tracing_subscriber::registry()
        .with(format_layer(format))
        .with(filter)
        .try_init()?;
    Ok(format)
}

fn filter_for(config: &Config) -> Result<EnvFilter, TelemetryError> {
    let expression = config.log_filter();
    EnvFilter::try_new(expression).map_err(|error| TelemetryError::Filter {
        filter: expression.to_owned(),
        reason: error.to_string(),
    })
}

fn format_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    // Colour is limited to compact output on a terminal.
    let ansi = format == LogFormat::Compact && io::stderr().is_terminal();
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_names(true)
        .with_timer(UtcTime::rfc_3339());
    match format {
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}
