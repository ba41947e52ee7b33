//! Shared fixtures for the front end tests.

use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard, PoisonError};

use service_base::{LogRecord, LogSink, LogSinkError, Severity};
use service_base_config::Config;
use tempfile::TempDir;

use crate::config::ConfigLoader;
use crate::errors::AppError;
use crate::{ExitStatus, run_with_loader};

static RUNS: Mutex<()> = Mutex::new(());

/// Serialises tests that claim the process-wide dispatch slot.
pub(crate) fn serialise_runs() -> MutexGuard<'static, ()> {
    RUNS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loader returning a fixed configuration.
pub(crate) struct StaticConfigLoader {
    pub(crate) config: Config,
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

/// Configuration rooted in a fresh temporary registry.
pub(crate) fn temp_config() -> (TempDir, StaticConfigLoader) {
    let dir = TempDir::new().expect("create temp dir");
    let root = dir.path().to_string_lossy().into_owned();
    let config = Config {
        registry_dir: Some(format!("{root}/registry").into()),
        runtime_dir: Some(format!("{root}/run").into()),
        stop_poll_interval_ms: 1,
        stop_timeout_secs: 1,
        ..Config::default()
    };
    (dir, StaticConfigLoader { config })
}

/// Output captured from one front end invocation.
pub(crate) struct Invocation {
    pub(crate) status: ExitStatus,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

pub(crate) fn invoke(args: &[&str], loader: &StaticConfigLoader) -> Invocation {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let status = run_with_loader(
        args.iter().map(OsString::from),
        &mut stdout,
        &mut stderr,
        loader,
    );
    Invocation {
        status,
        stdout: String::from_utf8(stdout).expect("utf-8 stdout"),
        stderr: String::from_utf8(stderr).expect("utf-8 stderr"),
    }
}

/// Sink keeping every record written by the service.
#[derive(Debug, Default)]
pub(crate) struct CapturingSink {
    records: Mutex<Vec<(Severity, u32, String)>>,
}

impl CapturingSink {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, _, message)| message.clone())
            .collect()
    }

    pub(crate) fn contains(&self, fragment: &str) -> bool {
        self.messages()
            .iter()
            .any(|message| message.contains(fragment))
    }

    pub(crate) fn event_ids(&self) -> Vec<u32> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, event_id, _)| *event_id)
            .collect()
    }
}

impl LogSink for CapturingSink {
    fn write(&self, record: &LogRecord<'_>) -> Result<(), LogSinkError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((record.severity, record.event_id, record.message.to_owned()));
        Ok(())
    }
}
