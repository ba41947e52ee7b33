//! Lifecycle plumbing for long-running services.
//!
//! A concrete service implements [`ServiceHooks`] and hands them to a
//! [`ServiceLifecycleController`], which connects to the platform supervisor
//! through a [`Supervisor`] backend and drives the service through its
//! states: start, pause, continue, stop and host shutdown. Every transition
//! is reported back to the supervisor with a checkpoint so its watchdog can
//! tell a slow service from a hung one.
//!
//! On Windows the supervisor is the Service Control Manager. Elsewhere the
//! [`ProcessSupervisor`] maps console signals onto the same control codes
//! and publishes status snapshots under the runtime directory.
//!
//! [`ServiceRegistrar`] installs and removes the supervisor entry together
//! with an optional log source. Both halves are written through narrow
//! traits ([`ServiceDatabase`] and [`LogRegistrar`]) so tests can substitute
//! in-memory stores.
//!
//! Only one controller may be active per process. The supervisor calls back
//! into the library through [`dispatch::service_main`] and
//! [`dispatch::handle_control`], which route to whichever controller holds
//! the process-wide slot.

mod controller;
pub mod dispatch;
mod error;
mod identity;
mod log_sink;
pub mod registrar;
mod status;
pub mod supervisor;
mod telemetry;

pub use controller::{HookError, ServiceContext, ServiceHooks, ServiceLifecycleController};
pub use dispatch::ControlDisposition;
pub use error::ServiceError;
pub use identity::{Capabilities, ServiceIdentity};
pub use log_sink::{LogRecord, LogSink, LogSinkError, ServiceLog, Severity, TracingLogSink};
#[cfg(unix)]
pub use registrar::{FileLogRegistrar, FileServiceDatabase};
#[cfg(windows)]
pub use registrar::{RegistryLogRegistrar, ScmServiceDatabase};
pub use registrar::{
    CommandLine, InstallReport, LogRegistration, RegistrarError, RegistrationRequest,
    ServiceRegistrar, StartType, StopOutcome, StopPolicy, UninstallObserver, UninstallReport,
};
pub use status::{
    AcceptedControls, ControlCode, NO_ERROR, START_FAILURE_EXIT_CODE, ServiceState,
    ServiceStatus,
};
#[cfg(unix)]
pub use supervisor::ProcessSupervisor;
pub use supervisor::{LaunchMode, StatusReporter, Supervisor, SupervisorError, system_supervisor};
pub use telemetry::{
    ProcessRole, TelemetryError, TelemetryHandle, initialise as initialise_telemetry,
};

#[cfg(test)]
mod tests;
