//! Lifecycle hooks implemented by a concrete service.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use super::ServiceLifecycleController;
use crate::dispatch;
use crate::identity::ServiceIdentity;
use crate::log_sink::{ServiceLog, Severity};

/// Errors a hook reports back to the controller.
#[derive(Debug, Error)]
pub enum HookError {
    /// The start arguments were unusable.
    #[error("invalid start arguments: {reason}")]
    InvalidArguments {
        /// Human-readable reason.
        reason: String,
    },
    /// An OS-level operation failed.
    #[error("{operation} failed: {source}")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The hook failed for a service-specific reason.
    #[error("{message}")]
    Failed {
        /// Human-readable description.
        message: String,
    },
    /// The hook panicked.
    #[error("hook panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
}

impl HookError {
    /// Builds a [`HookError::Failed`] from any displayable message.
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed {
            message: message.to_string(),
        }
    }
}

/// Callbacks invoked by [`ServiceLifecycleController`] as controls arrive.
///
/// Every method defaults to a no-op so services override only the
/// transitions they care about. Hooks run without the controller's status
/// lock held and may block.
pub trait ServiceHooks: Send + Sync {
    /// Called while the service is `StartPending`.
    fn on_start(&self, context: &ServiceContext<'_>, arguments: &[OsString]) -> Result<(), HookError> {
        let _ = (context, arguments);
        Ok(())
    }

    /// Called while the service is `StopPending`.
    fn on_stop(&self, context: &ServiceContext<'_>) -> Result<(), HookError> {
        let _ = context;
        Ok(())
    }

    /// Called while the service is `PausePending`.
    fn on_pause(&self, context: &ServiceContext<'_>) -> Result<(), HookError> {
        let _ = context;
        Ok(())
    }

    /// Called while the service is `ContinuePending`.
    fn on_continue(&self, context: &ServiceContext<'_>) -> Result<(), HookError> {
        let _ = context;
        Ok(())
    }

    /// Called when the host is shutting down.
    ///
    /// Runs only from `Running` or `Paused`. A shutdown that arrives in any
    /// other state, pending or stopped, is ignored and this hook is not
    /// called. The service reports `Stopped` afterwards even when the hook
    /// fails.
    fn on_shutdown(&self, context: &ServiceContext<'_>) -> Result<(), HookError> {
        let _ = context;
        Ok(())
    }
}

/// View of the controller handed to hooks.
pub struct ServiceContext<'a> {
    controller: &'a ServiceLifecycleController,
}

impl<'a> ServiceContext<'a> {
    pub(super) const fn new(controller: &'a ServiceLifecycleController) -> Self {
        Self { controller }
    }

    /// Identity of the running service.
    #[must_use]
    pub fn identity(&self) -> &ServiceIdentity {
        self.controller.identity()
    }

    /// Command line recorded for the process.
    #[must_use]
    pub fn command_line(&self) -> &[OsString] {
        self.controller.command_line()
    }

    /// Log handle that can be moved onto worker threads.
    #[must_use]
    pub fn log(&self) -> ServiceLog {
        self.controller.log().clone()
    }

    /// Writes a log entry under the service's source.
    pub fn write_log_entry(&self, message: &str, severity: Severity, event_id: u32, category: u16) {
        self.controller
            .write_log_entry(message, severity, event_id, category);
    }

    /// Writes an error entry naming the failed `operation`.
    pub fn write_error_log_entry(&self, operation: &str, error: &dyn fmt::Display) {
        self.controller.write_error_log_entry(operation, error);
    }

    /// Re-reports the current pending state with a fresh checkpoint.
    ///
    /// Long transitions call this so the supervisor's watchdog does not
    /// expire. Outside a pending state it does nothing.
    pub fn report_progress(&self, wait_hint: Duration) {
        self.controller.report_progress(wait_hint);
    }

    /// Asks the active controller to stop from a separate thread.
    ///
    /// The stop runs `on_stop` on that thread, so a worker may call this and
    /// keep running until `on_stop` asks it to finish. Called from `on_start`,
    /// the stop is held until the start hook returns and then runs straight
    /// after the `Running` report.
    pub fn request_stop(&self) -> Result<(), HookError> {
        dispatch::request_stop().map_err(|source| HookError::Io {
            operation: "request_stop",
            source,
        })
    }
}

impl fmt::Debug for ServiceContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("service", &self.controller.identity().name())
            .finish()
    }
}
