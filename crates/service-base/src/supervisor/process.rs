//! In-process supervisor for Unix hosts.
//!
//! Console signals stand in for supervisor controls: SIGTERM and SIGINT stop
//! the service, SIGQUIT announces shutdown, SIGUSR1 and SIGUSR2 pause and
//! continue, and SIGHUP interrogates. The signal loop runs on the thread that
//! called [`Supervisor::connect`]; `service_main` runs on its own thread so
//! controls keep flowing while `on_start` executes.

use std::ffi::OsString;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::{Handle, Signals};
use tracing::{debug, info, warn};

use service_base_config::{Config, RuntimePaths};

use super::guard::RuntimeGuard;
use super::{LaunchMode, SUPERVISOR_TARGET, StatusReporter, Supervisor, SupervisorError};
use crate::dispatch;
use crate::status::{ControlCode, ServiceState, ServiceStatus};

const CONTROL_SIGNALS: [i32; 6] = [SIGTERM, SIGINT, SIGQUIT, SIGUSR1, SIGUSR2, SIGHUP];

/// Supervisor that drives a service from console signals.
#[derive(Debug)]
pub struct ProcessSupervisor {
    config: Config,
    mode: LaunchMode,
    arguments: Vec<OsString>,
    session: Mutex<Option<Arc<Session>>>,
}

#[derive(Debug)]
struct Session {
    service: String,
    handle: Handle,
    guard: Mutex<Option<RuntimeGuard>>,
    registered: AtomicBool,
}

impl Session {
    fn finish(&self) {
        self.handle.close();
    }

    fn release_runtime_files(&self) {
        drop(
            self.guard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
    }
}

impl ProcessSupervisor {
    /// Builds a supervisor that passes `arguments` to `service_main`.
    #[must_use]
    pub fn new(config: Config, mode: LaunchMode, arguments: Vec<OsString>) -> Self {
        Self {
            config,
            mode,
            arguments,
            session: Mutex::new(None),
        }
    }

    fn runtime_guard(&self, service: &str) -> Result<Option<RuntimeGuard>, SupervisorError> {
        if self.mode != LaunchMode::Service {
            return Ok(None);
        }
        let paths = RuntimePaths::for_service(&self.config, service).map_err(|source| {
            SupervisorError::Runtime {
                source: source.into(),
            }
        })?;
        let mut guard = RuntimeGuard::acquire(paths)?;
        guard.write_pid(std::process::id())?;
        Ok(Some(guard))
    }

    fn set_session(&self, session: Option<Arc<Session>>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

impl Supervisor for ProcessSupervisor {
    fn connect(&self, service: &str) -> Result<(), SupervisorError> {
        let guard = self.runtime_guard(service)?;
        let mut signals =
            Signals::new(CONTROL_SIGNALS).map_err(|source| SupervisorError::Signals { source })?;
        let session = Arc::new(Session {
            service: service.to_owned(),
            handle: signals.handle(),
            guard: Mutex::new(guard),
            registered: AtomicBool::new(false),
        });
        self.set_session(Some(Arc::clone(&session)));
        info!(
            target: SUPERVISOR_TARGET,
            service,
            mode = %self.mode,
            pid = std::process::id(),
            "connected to in-process supervisor"
        );

        let arguments = self.arguments.clone();
        let main_session = Arc::clone(&session);
        let spawned = thread::Builder::new()
            .name(String::from("service-main"))
            .spawn(move || {
                dispatch::service_main(arguments);
                if !main_session.registered.load(Ordering::Acquire) {
                    main_session.finish();
                }
            });
        let service_main = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                session.release_runtime_files();
                self.set_session(None);
                return Err(SupervisorError::Connect {
                    service: service.to_owned(),
                    source,
                });
            }
        };

        for signal in signals.forever() {
            let Some(code) = control_for_signal(signal) else {
                continue;
            };
            debug!(
                target: SUPERVISOR_TARGET,
                signal,
                control = ?code,
                "signal mapped to control"
            );
            let disposition = dispatch::handle_control(code);
            debug!(
                target: SUPERVISOR_TARGET,
                control = ?code,
                disposition = ?disposition,
                "control dispatched"
            );
        }

        if service_main.join().is_err() {
            warn!(
                target: SUPERVISOR_TARGET,
                service,
                "service main thread panicked"
            );
        }
        session.release_runtime_files();
        self.set_session(None);
        info!(
            target: SUPERVISOR_TARGET,
            service,
            "in-process supervisor released service"
        );
        Ok(())
    }

    fn register_control_handler(
        &self,
        service: &str,
    ) -> Result<Arc<dyn StatusReporter>, SupervisorError> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|session| session.service == service)
            .ok_or_else(|| SupervisorError::NotConnected {
                service: service.to_owned(),
            })?;
        session.registered.store(true, Ordering::Release);
        Ok(Arc::new(ProcessStatusReporter { session }))
    }
}

#[derive(Debug)]
struct ProcessStatusReporter {
    session: Arc<Session>,
}

impl StatusReporter for ProcessStatusReporter {
    fn report(&self, status: &ServiceStatus) -> Result<(), SupervisorError> {
        let guard = self
            .session
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let outcome = match guard.as_ref() {
            Some(guard) => guard
                .write_status(status)
                .map_err(|source| SupervisorError::Report {
                    service: self.session.service.clone(),
                    source: io::Error::other(source),
                }),
            None => Ok(()),
        };
        drop(guard);
        info!(
            target: SUPERVISOR_TARGET,
            service = %self.session.service,
            state = %status.state,
            checkpoint = status.checkpoint,
            wait_hint_ms = u64::try_from(status.wait_hint.as_millis()).unwrap_or(u64::MAX),
            exit_code = status.win32_exit_code,
            "service status reported"
        );
        if status.state == ServiceState::Stopped {
            self.session.finish();
        }
        outcome
    }
}

fn control_for_signal(signal: i32) -> Option<ControlCode> {
    match signal {
        SIGTERM | SIGINT => Some(ControlCode::Stop),
        SIGQUIT => Some(ControlCode::Shutdown),
        SIGUSR1 => Some(ControlCode::Pause),
        SIGUSR2 => Some(ControlCode::Continue),
        SIGHUP => Some(ControlCode::Interrogate),
        _ => None,
    }
}
