//! Runtime artefacts of a service hosted by the in-process supervisor.
//!
//! While a service runs in [`LaunchMode::Service`](super::LaunchMode) the
//! guard holds an exclusive lock file, records the pid and mirrors every
//! status report into a JSON snapshot. The registrar reads the snapshot to
//! find the process it must signal and to poll its state.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use service_base_config::{RuntimePaths, RuntimePathsError};

use super::SUPERVISOR_TARGET;
use crate::status::{ServiceState, ServiceStatus};

/// Errors raised while managing runtime artefacts.
#[derive(Debug, Error)]
pub enum RuntimeFileError {
    /// Runtime paths could not be derived or prepared.
    #[error(transparent)]
    Paths(#[from] RuntimePathsError),
    /// Lock file creation failed.
    #[error("failed to create lock file '{path}': {source}")]
    LockCreate {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A live process already holds the lock.
    #[error("service already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded in the existing PID file.
        pid: u32,
    },
    /// Removing a stale artefact failed.
    #[error("failed to remove stale file '{path}': {source}")]
    Cleanup {
        /// Artefact path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the PID file failed.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the status snapshot failed.
    #[error("failed to write status snapshot '{path}': {source}")]
    StatusWrite {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Reading the status snapshot failed.
    #[error("failed to read status snapshot '{path}': {source}")]
    StatusRead {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The snapshot could not be encoded or decoded.
    #[error("malformed status snapshot: {source}")]
    StatusFormat {
        /// Underlying serialisation error.
        #[from]
        source: serde_json::Error,
    },
    /// Obtaining the current timestamp failed.
    #[error("failed to read system time: {source}")]
    Clock {
        /// Underlying system time error.
        #[source]
        source: SystemTimeError,
    },
    /// Probing a recorded PID failed.
    #[error("failed to check process {pid}: {source}")]
    CheckProcess {
        /// PID whose liveness check failed.
        pid: u32,
        /// Underlying OS error.
        source: Errno,
    },
    /// Status was written before the PID.
    #[error("pid must be written before updating the status snapshot")]
    MissingPid,
}

impl RuntimeFileError {
    /// Raw OS error code carried by the failure, if any.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Paths(RuntimePathsError::RuntimeDirectory { source, .. })
            | Self::LockCreate { source, .. }
            | Self::Cleanup { source, .. }
            | Self::PidWrite { source, .. }
            | Self::StatusWrite { source, .. }
            | Self::StatusRead { source, .. } => source.raw_os_error(),
            Self::CheckProcess { source, .. } => Some(*source as i32),
            _ => None,
        }
    }
}

/// Status snapshot persisted next to the PID file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Current state.
    pub state: ServiceState,
    /// Win32 numeric value of `state`.
    pub state_code: u32,
    /// Accepted-controls mask.
    pub accepted_controls: u32,
    /// Exit code reported with the state.
    pub win32_exit_code: u32,
    /// Checkpoint of the latest report.
    pub checkpoint: u32,
    /// Wait hint of the latest report, in milliseconds.
    pub wait_hint_ms: u64,
    /// Process hosting the service.
    pub pid: u32,
    /// Seconds since the Unix epoch when the snapshot was written.
    pub timestamp: u64,
}

impl StatusSnapshot {
    fn new(status: &ServiceStatus, pid: u32) -> Result<Self, RuntimeFileError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|source| RuntimeFileError::Clock { source })?
            .as_secs();
        Ok(Self {
            state: status.state,
            state_code: status.state.code(),
            accepted_controls: status.accepted_controls.bits(),
            win32_exit_code: status.win32_exit_code,
            checkpoint: status.checkpoint,
            wait_hint_ms: u64::try_from(status.wait_hint.as_millis()).unwrap_or(u64::MAX),
            pid,
            timestamp,
        })
    }
}

/// Exclusive ownership of a service's runtime artefacts.
///
/// Dropping the guard removes the lock, PID and status files.
#[derive(Debug)]
pub struct RuntimeGuard {
    paths: RuntimePaths,
    _lock: File,
    pid: Option<u32>,
}

impl RuntimeGuard {
    /// Prepares the runtime directory and takes the lock, clearing artefacts
    /// left behind by a process that no longer exists.
    pub fn acquire(paths: RuntimePaths) -> Result<Self, RuntimeFileError> {
        paths.prepare()?;
        let lock = acquire_lock(&paths)?;
        Ok(Self {
            paths,
            _lock: lock,
            pid: None,
        })
    }

    /// Records `pid` as the owner of the lock.
    pub fn write_pid(&mut self, pid: u32) -> Result<(), RuntimeFileError> {
        let path = self.paths.pid_path();
        let pid_error = |source| RuntimeFileError::PidWrite {
            path: path.to_path_buf(),
            source,
        };
        let mut file = owner_only().truncate(true).open(path).map_err(pid_error)?;
        writeln!(file, "{pid}").map_err(pid_error)?;
        file.sync_all().map_err(pid_error)?;
        self.pid = Some(pid);
        info!(
            target: SUPERVISOR_TARGET,
            pid,
            file = %path.display(),
            "pid file written"
        );
        Ok(())
    }

    /// Replaces the status snapshot with `status`.
    ///
    /// The snapshot is written to a sibling file and renamed into place so
    /// readers never observe a partial document.
    pub fn write_status(&self, status: &ServiceStatus) -> Result<(), RuntimeFileError> {
        let pid = self.pid.ok_or(RuntimeFileError::MissingPid)?;
        let snapshot = StatusSnapshot::new(status, pid)?;
        let path = self.paths.status_path();
        let staging = path.with_extension("status.tmp");
        let write_error = |source| RuntimeFileError::StatusWrite {
            path: path.to_path_buf(),
            source,
        };
        let mut file = owner_only()
            .truncate(true)
            .open(&staging)
            .map_err(write_error)?;
        serde_json::to_writer(&mut file, &snapshot)?;
        file.write_all(b"\n").map_err(write_error)?;
        file.sync_all().map_err(write_error)?;
        fs::rename(&staging, path).map_err(write_error)?;
        debug!(
            target: SUPERVISOR_TARGET,
            state = %snapshot.state,
            checkpoint = snapshot.checkpoint,
            file = %path.display(),
            "status snapshot updated"
        );
        Ok(())
    }

    /// Paths owned by the guard.
    #[must_use]
    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        for path in [
            self.paths.status_path(),
            self.paths.pid_path(),
            self.paths.lock_path(),
        ] {
            if let Err(error) = fs::remove_file(path)
                && error.kind() != io::ErrorKind::NotFound
            {
                warn!(
                    target: SUPERVISOR_TARGET,
                    file = %path.display(),
                    error = %error,
                    "failed to remove runtime file"
                );
            }
        }
    }
}

/// Reads the status snapshot at `path`; `None` when no snapshot exists.
pub fn read_snapshot(path: &Path) -> Result<Option<StatusSnapshot>, RuntimeFileError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RuntimeFileError::StatusRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Reports whether a process with `pid` exists.
pub fn process_alive(pid: u32) -> Result<bool, RuntimeFileError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    if raw == 0 {
        return Ok(false);
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH | Errno::ECHILD) => Ok(false),
        Err(errno) => Err(RuntimeFileError::CheckProcess { pid, source: errno }),
    }
}

fn owner_only() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(0o600);
    options
}

fn acquire_lock(paths: &RuntimePaths) -> Result<File, RuntimeFileError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true).mode(0o600);
    match options.open(paths.lock_path()) {
        Ok(file) => {
            info!(
                target: SUPERVISOR_TARGET,
                file = %paths.lock_path().display(),
                "acquired service lock"
            );
            Ok(file)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => handle_existing_lock(paths),
        Err(source) => Err(RuntimeFileError::LockCreate {
            path: paths.lock_path().to_path_buf(),
            source,
        }),
    }
}

fn handle_existing_lock(paths: &RuntimePaths) -> Result<File, RuntimeFileError> {
    if let Some(pid) = read_pid(paths.pid_path()) {
        if process_alive(pid)? {
            info!(
                target: SUPERVISOR_TARGET,
                pid,
                "refusing to start: existing service process alive"
            );
            return Err(RuntimeFileError::AlreadyRunning { pid });
        }
        warn!(
            target: SUPERVISOR_TARGET,
            pid,
            "previous service process not detected; cleaning stale files"
        );
    }
    remove_stale(paths.lock_path())?;
    remove_stale(paths.pid_path())?;
    remove_stale(paths.status_path())?;
    acquire_lock(paths)
}

fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok()
}

fn remove_stale(path: &Path) -> Result<(), RuntimeFileError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RuntimeFileError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}
