//! Connections to the external service supervisor.
//!
//! A [`Supervisor`] owns the dispatcher loop: `connect` blocks until the
//! supervisor allows the process to exit. While connected it calls
//! [`dispatch::service_main`](crate::dispatch::service_main) once and routes
//! every inbound control through
//! [`dispatch::handle_control`](crate::dispatch::handle_control).

use std::io;
use std::sync::Arc;

use strum::{Display, EnumString};
use thiserror::Error;

use service_base_config::Config;

use crate::status::ServiceStatus;

#[cfg(unix)]
mod guard;
#[cfg(unix)]
mod process;
#[cfg(windows)]
mod console;
#[cfg(windows)]
mod scm;
#[cfg(any(test, feature = "test-support"))]
mod scripted;

#[cfg(unix)]
pub use guard::{RuntimeFileError, RuntimeGuard, StatusSnapshot, process_alive, read_snapshot};
#[cfg(unix)]
pub use process::ProcessSupervisor;
#[cfg(windows)]
pub use console::ConsoleSupervisor;
#[cfg(windows)]
pub use scm::ScmSupervisor;
#[cfg(any(test, feature = "test-support"))]
pub use scripted::{RecordingStatusReporter, ScriptedSupervisor};

pub(crate) const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

/// How the process is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LaunchMode {
    /// Managed by the platform service supervisor.
    Service,
    /// A plain foreground process driven by console signals.
    Process,
}

/// Receives status reports for one registered service.
pub trait StatusReporter: Send + Sync {
    /// Publishes `status` to the supervisor.
    fn report(&self, status: &ServiceStatus) -> Result<(), SupervisorError>;
}

/// External supervisor hosting a single service.
pub trait Supervisor: Send + Sync {
    /// Connects the process under `service` and blocks until the supervisor
    /// lets it exit.
    fn connect(&self, service: &str) -> Result<(), SupervisorError>;

    /// Registers the control handler for `service` and returns the channel
    /// used for status reports. Called from inside `service_main`.
    fn register_control_handler(
        &self,
        service: &str,
    ) -> Result<Arc<dyn StatusReporter>, SupervisorError>;
}

/// Errors raised by supervisor backends.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Connecting to the supervisor failed.
    #[error("failed to connect service '{service}' to the supervisor: {source}")]
    Connect {
        /// Service being connected.
        service: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Registering the control handler failed.
    #[error("failed to register control handler for '{service}': {source}")]
    RegisterHandler {
        /// Service being registered.
        service: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A handler was requested before `connect` ran.
    #[error("service '{service}' is not connected to a supervisor")]
    NotConnected {
        /// Service requesting the handler.
        service: String,
    },
    /// Publishing a status report failed.
    #[error("failed to report status for '{service}': {source}")]
    Report {
        /// Service whose status was reported.
        service: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Installing console signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Signals {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Managing runtime artefacts failed.
    #[cfg(unix)]
    #[error("runtime files unavailable: {source}")]
    Runtime {
        /// Underlying runtime file error.
        #[source]
        source: RuntimeFileError,
    },
}

impl SupervisorError {
    /// Raw OS error code carried by the failure, if any.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Connect { source, .. }
            | Self::RegisterHandler { source, .. }
            | Self::Report { source, .. }
            | Self::Signals { source } => source.raw_os_error(),
            Self::NotConnected { .. } => None,
            #[cfg(unix)]
            Self::Runtime { source } => source.raw_os_error(),
        }
    }
}

#[cfg(unix)]
impl From<RuntimeFileError> for SupervisorError {
    fn from(source: RuntimeFileError) -> Self {
        Self::Runtime { source }
    }
}

/// Builds the supervisor used on this platform for `mode`.
#[cfg(unix)]
pub fn system_supervisor(
    config: &Config,
    mode: LaunchMode,
    arguments: Vec<std::ffi::OsString>,
) -> Arc<dyn Supervisor> {
    Arc::new(ProcessSupervisor::new(config.clone(), mode, arguments))
}

/// Builds the supervisor used on this platform for `mode`.
#[cfg(windows)]
pub fn system_supervisor(
    _config: &Config,
    mode: LaunchMode,
    arguments: Vec<std::ffi::OsString>,
) -> Arc<dyn Supervisor> {
    match mode {
        LaunchMode::Service => Arc::new(ScmSupervisor::new()),
        LaunchMode::Process => Arc::new(ConsoleSupervisor::new(arguments)),
    }
}
