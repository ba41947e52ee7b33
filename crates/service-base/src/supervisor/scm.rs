//! Service Control Manager supervisor for Windows.

use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use tracing::debug;
use windows_service::service::{
    ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState as ScmState,
    ServiceStatus as ScmStatus, ServiceType,
};
use windows_service::service_control_handler::{
    self, ServiceControlHandlerResult, ServiceStatusHandle,
};
use windows_service::{define_windows_service, service_dispatcher};

use super::{SUPERVISOR_TARGET, StatusReporter, Supervisor, SupervisorError};
use crate::dispatch::{self, ControlDisposition};
use crate::status::{ControlCode, ServiceState, ServiceStatus};

define_windows_service!(ffi_service_main, scm_service_main);

fn scm_service_main(arguments: Vec<OsString>) {
    dispatch::service_main(arguments);
}

fn into_io(error: windows_service::Error) -> io::Error {
    match error {
        windows_service::Error::Winapi(source) => source,
        other => io::Error::other(other),
    }
}

/// Supervisor that hands the process to the Service Control Manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScmSupervisor;

impl ScmSupervisor {
    /// Builds the supervisor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Supervisor for ScmSupervisor {
    fn connect(&self, service: &str) -> Result<(), SupervisorError> {
        service_dispatcher::start(service, ffi_service_main).map_err(|error| {
            SupervisorError::Connect {
                service: service.to_owned(),
                source: into_io(error),
            }
        })
    }

    fn register_control_handler(
        &self,
        service: &str,
    ) -> Result<Arc<dyn StatusReporter>, SupervisorError> {
        let handle = service_control_handler::register(service, |control| {
            let code = match control {
                ServiceControl::Stop => ControlCode::Stop,
                ServiceControl::Pause => ControlCode::Pause,
                ServiceControl::Continue => ControlCode::Continue,
                ServiceControl::Interrogate => ControlCode::Interrogate,
                ServiceControl::Shutdown => ControlCode::Shutdown,
                _ => return ServiceControlHandlerResult::NotImplemented,
            };
            match dispatch::handle_control(code) {
                ControlDisposition::Handled | ControlDisposition::Ignored => {
                    ServiceControlHandlerResult::NoError
                }
                disposition => {
                    debug!(
                        target: SUPERVISOR_TARGET,
                        control = ?code,
                        disposition = ?disposition,
                        "control rejected"
                    );
                    ServiceControlHandlerResult::NotImplemented
                }
            }
        })
        .map_err(|error| SupervisorError::RegisterHandler {
            service: service.to_owned(),
            source: into_io(error),
        })?;
        Ok(Arc::new(ScmStatusReporter {
            service: service.to_owned(),
            handle,
        }))
    }
}

struct ScmStatusReporter {
    service: String,
    handle: ServiceStatusHandle,
}

impl StatusReporter for ScmStatusReporter {
    fn report(&self, status: &ServiceStatus) -> Result<(), SupervisorError> {
        let current_state = match status.state {
            ServiceState::Stopped => ScmState::Stopped,
            ServiceState::StartPending => ScmState::StartPending,
            ServiceState::StopPending => ScmState::StopPending,
            ServiceState::Running => ScmState::Running,
            ServiceState::ContinuePending => ScmState::ContinuePending,
            ServiceState::PausePending => ScmState::PausePending,
            ServiceState::Paused => ScmState::Paused,
        };
        let controls_accepted =
            ServiceControlAccept::from_bits_truncate(status.accepted_controls.bits());
        self.handle
            .set_service_status(ScmStatus {
                service_type: ServiceType::OWN_PROCESS,
                current_state,
                controls_accepted,
                exit_code: ServiceExitCode::Win32(status.win32_exit_code),
                checkpoint: status.checkpoint,
                wait_hint: status.wait_hint,
                process_id: None,
            })
            .map_err(|error| SupervisorError::Report {
                service: self.service.clone(),
                source: into_io(error),
            })
    }
}
