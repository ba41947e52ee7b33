//! Foreground supervisor for Windows consoles.
//!
//! Starts the service on a worker thread and stops it when the operator
//! presses Enter.

use std::ffi::OsString;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use super::{SUPERVISOR_TARGET, StatusReporter, Supervisor, SupervisorError};
use crate::dispatch;
use crate::status::{ControlCode, ServiceStatus};

/// Supervisor for `LaunchMode::Process` on Windows.
#[derive(Debug, Clone)]
pub struct ConsoleSupervisor {
    arguments: Vec<OsString>,
}

impl ConsoleSupervisor {
    /// Builds a supervisor that passes `arguments` to `service_main`.
    #[must_use]
    pub const fn new(arguments: Vec<OsString>) -> Self {
        Self { arguments }
    }
}

impl Supervisor for ConsoleSupervisor {
    fn connect(&self, service: &str) -> Result<(), SupervisorError> {
        let arguments = self.arguments.clone();
        let service_main = thread::Builder::new()
            .name(String::from("service-main"))
            .spawn(move || dispatch::service_main(arguments))
            .map_err(|source| SupervisorError::Connect {
                service: service.to_owned(),
                source,
            })?;
        info!(
            target: SUPERVISOR_TARGET,
            service,
            "running in the foreground; press Enter to stop"
        );
        let mut line = String::new();
        if let Err(error) = io::stdin().lock().read_line(&mut line) {
            warn!(target: SUPERVISOR_TARGET, error = %error, "console input unavailable");
        }
        if service_main.join().is_err() {
            warn!(target: SUPERVISOR_TARGET, service, "service main thread panicked");
        }
        dispatch::handle_control(ControlCode::Stop);
        Ok(())
    }

    fn register_control_handler(
        &self,
        service: &str,
    ) -> Result<Arc<dyn StatusReporter>, SupervisorError> {
        Ok(Arc::new(ConsoleStatusReporter {
            service: service.to_owned(),
        }))
    }
}

struct ConsoleStatusReporter {
    service: String,
}

impl StatusReporter for ConsoleStatusReporter {
    fn report(&self, status: &ServiceStatus) -> Result<(), SupervisorError> {
        info!(
            target: SUPERVISOR_TARGET,
            service = %self.service,
            state = %status.state,
            checkpoint = status.checkpoint,
            "service status reported"
        );
        Ok(())
    }
}
