//! Service control state machine.
//!
//! The controller owns the status record. Every transition is decided and
//! reported under one mutex, so a control that arrives while another is in
//! flight sees the pending state and is ignored. Hooks run after the lock is
//! released; a pending report therefore always reaches the supervisor before
//! its hook executes, and the terminal report follows the hook's return.

mod hooks;

use std::any::Any;
use std::ffi::OsString;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

pub use hooks::{HookError, ServiceContext, ServiceHooks};

use crate::dispatch::{self, ControlDisposition};
use crate::error::ServiceError;
use crate::identity::{Capabilities, ServiceIdentity};
use crate::log_sink::{LogSink, ServiceLog, Severity, TracingLogSink};
use crate::status::{
    ControlCode, NO_ERROR, START_FAILURE_EXIT_CODE, ServiceState, ServiceStatus,
};
use crate::supervisor::{StatusReporter, Supervisor, SupervisorError};

pub(crate) const CONTROLLER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::controller");

const STOPPABLE: &[ServiceState] = &[ServiceState::Running, ServiceState::Paused];

struct ControllerState {
    status: ServiceStatus,
    reporter: Option<Arc<dyn StatusReporter>>,
    registration_failure: Option<SupervisorError>,
    stop_deferred: bool,
}

/// Drives one service through its lifecycle on behalf of a supervisor.
pub struct ServiceLifecycleController {
    identity: ServiceIdentity,
    capabilities: Capabilities,
    hooks: Arc<dyn ServiceHooks>,
    log: ServiceLog,
    command_line: Vec<OsString>,
    state: Mutex<ControllerState>,
}

impl ServiceLifecycleController {
    /// Builds a stopped controller. Nothing is registered until [`run`].
    ///
    /// [`run`]: Self::run
    #[must_use]
    pub fn new(
        identity: ServiceIdentity,
        capabilities: Capabilities,
        hooks: Arc<dyn ServiceHooks>,
    ) -> Self {
        let log = ServiceLog::new(identity.name(), Arc::new(TracingLogSink));
        Self {
            identity,
            capabilities,
            hooks,
            log,
            command_line: Vec::new(),
            state: Mutex::new(ControllerState {
                status: ServiceStatus::stopped(capabilities.accepted_controls()),
                reporter: None,
                registration_failure: None,
                stop_deferred: false,
            }),
        }
    }

    /// Routes log entries to `sink` instead of `tracing`.
    #[must_use]
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log = ServiceLog::new(self.identity.name(), sink);
        self
    }

    /// Records the process command line for hooks to inspect.
    #[must_use]
    pub fn with_command_line(mut self, command_line: Vec<OsString>) -> Self {
        self.command_line = command_line;
        self
    }

    /// Identity of the service.
    #[must_use]
    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Controls the service accepts.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Process command line recorded by [`with_command_line`](Self::with_command_line).
    #[must_use]
    pub fn command_line(&self) -> &[OsString] {
        &self.command_line
    }

    /// Log handle bound to the service's source name.
    #[must_use]
    pub fn log(&self) -> &ServiceLog {
        &self.log
    }

    /// Copy of the current status.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        self.lock_state().status
    }

    /// Hosts the service under `supervisor` until the supervisor releases it.
    ///
    /// Claims the process-wide dispatch slot for the duration of the call.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::DuplicateRegistration`] when another controller
    /// is active in this process and [`ServiceError::Supervisor`] when the
    /// supervisor refuses the connection or the control handler.
    pub fn run(self: Arc<Self>, supervisor: Arc<dyn Supervisor>) -> Result<(), ServiceError> {
        let service = self.identity.name().to_owned();
        let _claim = dispatch::claim(Arc::clone(&self), Arc::clone(&supervisor))?;
        info!(
            target: CONTROLLER_TARGET,
            service = %service,
            "connecting to service supervisor"
        );
        let connected = supervisor
            .connect(&service)
            .and_then(|()| self.lock_state().registration_failure.take().map_or(Ok(()), Err));
        match connected {
            Ok(()) => {
                info!(
                    target: CONTROLLER_TARGET,
                    service = %service,
                    state = %self.status().state,
                    "service supervisor released the process"
                );
                Ok(())
            }
            Err(source) => {
                error!(
                    target: CONTROLLER_TARGET,
                    service = %service,
                    error = %source,
                    "service supervisor session failed"
                );
                Err(ServiceError::Supervisor { source })
            }
        }
    }

    /// Writes a log entry under the service's source.
    pub fn write_log_entry(&self, message: &str, severity: Severity, event_id: u32, category: u16) {
        self.log.write(severity, category, event_id, message);
    }

    /// Writes an error entry naming the failed `operation`, using the
    /// identity's error event and category.
    pub fn write_error_log_entry(&self, operation: &str, error: &dyn fmt::Display) {
        let message = format!("{operation} failed: {error}");
        self.log.write(
            Severity::Error,
            self.identity.error_category_id(),
            self.identity.error_event_id(),
            &message,
        );
    }

    /// Registers with the supervisor and runs the start transition.
    pub(crate) fn service_main(&self, supervisor: &dyn Supervisor, arguments: &[OsString]) {
        let reporter = match supervisor.register_control_handler(self.identity.name()) {
            Ok(reporter) => reporter,
            Err(error) => {
                error!(
                    target: CONTROLLER_TARGET,
                    service = %self.identity.name(),
                    error = %error,
                    "control handler registration failed"
                );
                self.write_error_log_entry("register_control_handler", &error);
                self.lock_state().registration_failure = Some(error);
                return;
            }
        };
        {
            let mut state = self.lock_state();
            state.reporter = Some(reporter);
            if state.status.state != ServiceState::Stopped {
                warn!(
                    target: CONTROLLER_TARGET,
                    service = %self.identity.name(),
                    state = %state.status.state,
                    "start requested for a service that is not stopped"
                );
                return;
            }
            state.stop_deferred = false;
            self.apply_status(&mut state, ServiceState::StartPending, NO_ERROR, Duration::ZERO);
        }

        let context = ServiceContext::new(self);
        let started = self.invoke(|| self.hooks.on_start(&context, arguments));
        if let Err(error) = &started {
            self.write_error_log_entry("service start", error);
        }
        let stop_deferred = {
            let mut state = self.lock_state();
            let (settled, exit_code) = match &started {
                Ok(()) => (ServiceState::Running, NO_ERROR),
                Err(_) => (ServiceState::Stopped, START_FAILURE_EXIT_CODE),
            };
            self.apply_status(&mut state, settled, exit_code, Duration::ZERO);
            std::mem::take(&mut state.stop_deferred) && settled == ServiceState::Running
        };
        if stop_deferred {
            debug!(
                target: CONTROLLER_TARGET,
                service = %self.identity.name(),
                "honouring stop requested during start"
            );
            self.stop();
        }
    }

    /// Applies an inbound control code.
    pub(crate) fn handle_control(&self, code: ControlCode) -> ControlDisposition {
        if let Some(required) = code.required_control()
            && !self.capabilities.accepted_controls().contains(required)
        {
            debug!(
                target: CONTROLLER_TARGET,
                service = %self.identity.name(),
                control = ?code,
                "control not accepted"
            );
            return ControlDisposition::NotAccepted;
        }
        match code {
            ControlCode::Stop => self.stop(),
            ControlCode::Pause => self.pause(),
            ControlCode::Continue => self.resume(),
            ControlCode::Shutdown => self.shutdown(),
            ControlCode::Interrogate => {
                let state = self.lock_state();
                self.publish(&state, &state.status);
                ControlDisposition::Handled
            }
            ControlCode::Other(_) => ControlDisposition::NotImplemented,
        }
    }

    /// Records a self-initiated stop that arrives while the service starts.
    ///
    /// Returns `true` when the stop was deferred; `service_main` runs it once
    /// the start hook has returned and the service is running.
    pub(crate) fn defer_stop_while_starting(&self) -> bool {
        let mut state = self.lock_state();
        if state.status.state != ServiceState::StartPending {
            return false;
        }
        state.stop_deferred = true;
        true
    }

    /// Runs the stop transition on the calling thread.
    ///
    /// Used for self-initiated stops, which are honoured whether or not the
    /// supervisor may send `Stop`.
    pub(crate) fn stop(&self) -> ControlDisposition {
        let Some(previous) = self.begin_transition(STOPPABLE, ServiceState::StopPending) else {
            return ControlDisposition::Ignored;
        };
        let context = ServiceContext::new(self);
        match self.invoke(|| self.hooks.on_stop(&context)) {
            Ok(()) => self.set_status(ServiceState::Stopped, NO_ERROR, Duration::ZERO),
            Err(error) => {
                self.write_error_log_entry("service stop", &error);
                self.set_status(previous, NO_ERROR, Duration::ZERO);
            }
        }
        ControlDisposition::Handled
    }

    fn pause(&self) -> ControlDisposition {
        let Some(previous) =
            self.begin_transition(&[ServiceState::Running], ServiceState::PausePending)
        else {
            return ControlDisposition::Ignored;
        };
        let context = ServiceContext::new(self);
        match self.invoke(|| self.hooks.on_pause(&context)) {
            Ok(()) => self.set_status(ServiceState::Paused, NO_ERROR, Duration::ZERO),
            Err(error) => {
                self.write_error_log_entry("service pause", &error);
                self.set_status(previous, NO_ERROR, Duration::ZERO);
            }
        }
        ControlDisposition::Handled
    }

    fn resume(&self) -> ControlDisposition {
        let Some(previous) =
            self.begin_transition(&[ServiceState::Paused], ServiceState::ContinuePending)
        else {
            return ControlDisposition::Ignored;
        };
        let context = ServiceContext::new(self);
        match self.invoke(|| self.hooks.on_continue(&context)) {
            Ok(()) => self.set_status(ServiceState::Running, NO_ERROR, Duration::ZERO),
            Err(error) => {
                self.write_error_log_entry("service continue", &error);
                self.set_status(previous, NO_ERROR, Duration::ZERO);
            }
        }
        ControlDisposition::Handled
    }

    fn shutdown(&self) -> ControlDisposition {
        if self
            .begin_transition(STOPPABLE, ServiceState::StopPending)
            .is_none()
        {
            return ControlDisposition::Ignored;
        }
        let context = ServiceContext::new(self);
        if let Err(error) = self.invoke(|| self.hooks.on_shutdown(&context)) {
            self.write_error_log_entry("service shutdown", &error);
        }
        self.set_status(ServiceState::Stopped, NO_ERROR, Duration::ZERO);
        ControlDisposition::Handled
    }

    /// Re-reports the current pending state with a fresh checkpoint.
    pub(crate) fn report_progress(&self, wait_hint: Duration) {
        let mut state = self.lock_state();
        let current = state.status;
        if current.state.is_pending() {
            self.apply_status(&mut state, current.state, current.win32_exit_code, wait_hint);
        }
    }

    /// Updates the status and reports it to the supervisor.
    ///
    /// Pending states advance the checkpoint; settled states reset it.
    pub(crate) fn set_status(&self, state: ServiceState, win32_exit_code: u32, wait_hint: Duration) {
        let mut guard = self.lock_state();
        self.apply_status(&mut guard, state, win32_exit_code, wait_hint);
    }

    fn begin_transition(
        &self,
        allowed_from: &[ServiceState],
        pending: ServiceState,
    ) -> Option<ServiceState> {
        let mut state = self.lock_state();
        let previous = state.status.state;
        if !allowed_from.contains(&previous) {
            debug!(
                target: CONTROLLER_TARGET,
                service = %self.identity.name(),
                state = %previous,
                requested = %pending,
                "transition not permitted from current state"
            );
            return None;
        }
        self.apply_status(&mut state, pending, NO_ERROR, Duration::ZERO);
        Some(previous)
    }

    fn apply_status(
        &self,
        state: &mut ControllerState,
        next: ServiceState,
        win32_exit_code: u32,
        wait_hint: Duration,
    ) {
        let status = &mut state.status;
        status.state = next;
        status.win32_exit_code = win32_exit_code;
        status.wait_hint = wait_hint;
        status.checkpoint = if next.is_pending() {
            status.checkpoint.saturating_add(1)
        } else {
            0
        };
        let snapshot = *status;
        debug!(
            target: CONTROLLER_TARGET,
            service = %self.identity.name(),
            state = %snapshot.state,
            checkpoint = snapshot.checkpoint,
            exit_code = snapshot.win32_exit_code,
            "status updated"
        );
        self.publish(state, &snapshot);
    }

    fn publish(&self, state: &ControllerState, status: &ServiceStatus) {
        let Some(reporter) = state.reporter.as_ref() else {
            return;
        };
        if let Err(error) = reporter.report(status) {
            warn!(
                target: CONTROLLER_TARGET,
                service = %self.identity.name(),
                state = %status.state,
                error = %error,
                "status report failed"
            );
        }
    }

    fn invoke<F>(&self, hook: F) -> Result<(), HookError>
    where
        F: FnOnce() -> Result<(), HookError>,
    {
        panic::catch_unwind(AssertUnwindSafe(hook)).unwrap_or_else(|payload| {
            Err(HookError::Panicked {
                message: panic_message(payload.as_ref()),
            })
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ServiceLifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceLifecycleController")
            .field("identity", &self.identity)
            .field("capabilities", &self.capabilities)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}
