//! Derives runtime artefact paths shared by the supervisor and the registrar.
//!
//! A service running under the in-process supervisor records its lock, pid
//! and status snapshot in the runtime directory. The registrar reads the same
//! files when it asks a registered service to stop, so both sides must agree
//! on the layout.

use std::fs::DirBuilder;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

/// Canonical paths for the runtime artefacts of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    lock_path: PathBuf,
    pid_path: PathBuf,
    status_path: PathBuf,
}

impl RuntimePaths {
    /// Derives the paths for `service` from the shared configuration without
    /// touching the filesystem.
    pub fn for_service(config: &Config, service: &str) -> Result<Self, RuntimePathsError> {
        if service.is_empty() || service.contains(['/', '\\']) || service == ".." {
            return Err(RuntimePathsError::InvalidServiceName {
                name: service.to_owned(),
            });
        }
        let runtime_dir = config.runtime_dir().into_std_path_buf();
        Ok(Self {
            lock_path: runtime_dir.join(format!("{service}.lock")),
            pid_path: runtime_dir.join(format!("{service}.pid")),
            status_path: runtime_dir.join(format!("{service}.status")),
            runtime_dir,
        })
    }

    /// Creates the runtime directory with owner-only permissions.
    pub fn prepare(&self) -> Result<(), RuntimePathsError> {
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(&self.runtime_dir)
            .map_err(|source| RuntimePathsError::RuntimeDirectory {
                path: self.runtime_dir.clone(),
                source,
            })
    }

    /// Directory holding runtime artefacts.
    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the lock file guarding single-instance startup.
    pub fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }

    /// Path to the PID file.
    pub fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }

    /// Path to the JSON status snapshot.
    pub fn status_path(&self) -> &Path {
        self.status_path.as_path()
    }
}

/// Errors raised while deriving service runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// The service name cannot be used as a file name.
    #[error("service name '{name}' cannot name runtime files")]
    InvalidServiceName { name: String },
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
