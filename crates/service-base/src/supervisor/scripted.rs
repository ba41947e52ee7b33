//! Deterministic supervisor double for tests.
//!
//! `connect` runs `service_main` on the calling thread and then replays a
//! fixed script of controls through the dispatch trampoline, so a test
//! observes the whole lifecycle without threads or signals.

use std::ffi::OsString;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use super::{StatusReporter, Supervisor, SupervisorError};
use crate::dispatch::{self, ControlDisposition};
use crate::status::{ControlCode, ServiceState, ServiceStatus};

/// Records every status report it receives.
#[derive(Debug, Default)]
pub struct RecordingStatusReporter {
    reports: Mutex<Vec<ServiceStatus>>,
    failing: bool,
}

impl RecordingStatusReporter {
    /// Reporter whose reports are recorded and then rejected.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    /// Copy of every recorded report, oldest first.
    #[must_use]
    pub fn reports(&self) -> Vec<ServiceStatus> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// States of every recorded report, oldest first.
    #[must_use]
    pub fn states(&self) -> Vec<ServiceState> {
        self.reports().iter().map(|status| status.state).collect()
    }

    /// Most recent report.
    #[must_use]
    pub fn last(&self) -> Option<ServiceStatus> {
        self.reports().last().copied()
    }
}

impl StatusReporter for RecordingStatusReporter {
    fn report(&self, status: &ServiceStatus) -> Result<(), SupervisorError> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*status);
        if self.failing {
            return Err(SupervisorError::Report {
                service: String::from("scripted"),
                source: io::Error::other("scripted report failure"),
            });
        }
        Ok(())
    }
}

/// Supervisor that replays a scripted sequence of controls.
#[derive(Debug)]
pub struct ScriptedSupervisor {
    arguments: Vec<OsString>,
    script: Vec<ControlCode>,
    reporter: Arc<RecordingStatusReporter>,
    connect_error: Option<i32>,
    register_error: Option<i32>,
    dispositions: Mutex<Vec<ControlDisposition>>,
}

impl ScriptedSupervisor {
    /// Supervisor that starts the service with `arguments` and then delivers
    /// `script` in order.
    #[must_use]
    pub fn new(arguments: Vec<OsString>, script: Vec<ControlCode>) -> Self {
        Self {
            arguments,
            script,
            reporter: Arc::new(RecordingStatusReporter::default()),
            connect_error: None,
            register_error: None,
            dispositions: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the reporter handed to the controller.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<RecordingStatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Makes `connect` fail with the OS error `code`.
    #[must_use]
    pub const fn failing_connect(mut self, code: i32) -> Self {
        self.connect_error = Some(code);
        self
    }

    /// Makes handler registration fail with the OS error `code`.
    #[must_use]
    pub const fn failing_registration(mut self, code: i32) -> Self {
        self.register_error = Some(code);
        self
    }

    /// Reporter receiving the controller's status reports.
    #[must_use]
    pub fn reporter(&self) -> Arc<RecordingStatusReporter> {
        Arc::clone(&self.reporter)
    }

    /// Dispositions returned for each scripted control.
    #[must_use]
    pub fn dispositions(&self) -> Vec<ControlDisposition> {
        self.dispositions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Supervisor for ScriptedSupervisor {
    fn connect(&self, service: &str) -> Result<(), SupervisorError> {
        if let Some(code) = self.connect_error {
            return Err(SupervisorError::Connect {
                service: service.to_owned(),
                source: io::Error::from_raw_os_error(code),
            });
        }
        dispatch::service_main(self.arguments.clone());
        for code in &self.script {
            let disposition = dispatch::handle_control(*code);
            self.dispositions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(disposition);
        }
        Ok(())
    }

    fn register_control_handler(
        &self,
        service: &str,
    ) -> Result<Arc<dyn StatusReporter>, SupervisorError> {
        if let Some(code) = self.register_error {
            return Err(SupervisorError::RegisterHandler {
                service: service.to_owned(),
                source: io::Error::from_raw_os_error(code),
            });
        }
        Ok(self.reporter())
    }
}
