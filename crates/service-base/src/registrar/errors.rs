//! Error surface for service registration.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while installing or uninstalling a service.
#[derive(Debug, Error)]
pub enum RegistrarError {
    /// The request was malformed; nothing was touched.
    #[error("invalid registration request: {reason}")]
    Validation {
        /// Human-readable reason.
        reason: String,
    },
    /// A service with the same name is already registered.
    #[error("service '{name}' is already registered")]
    DuplicateRegistration {
        /// Conflicting service name.
        name: String,
    },
    /// No service with this name is registered.
    #[error("service '{name}' is not registered")]
    NotFound {
        /// Requested service name.
        name: String,
    },
    /// The caller lacks the rights for the operation.
    #[error("permission denied while trying to {operation}: {source}")]
    PermissionDenied {
        /// Operation that was refused.
        operation: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The registration store failed.
    #[error("failed to {operation}: {source}")]
    RegistrationIo {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A persisted record could not be encoded or decoded.
    #[error("malformed registration record '{path}': {source}")]
    Record {
        /// Record path.
        path: PathBuf,
        /// Underlying serialisation error.
        #[source]
        source: serde_json::Error,
    },
}

impl RegistrarError {
    /// Classifies an IO failure of `operation`.
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            Self::PermissionDenied { operation, source }
        } else {
            Self::RegistrationIo { operation, source }
        }
    }

    /// Raw OS error code carried by the failure, if any.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::PermissionDenied { source, .. } | Self::RegistrationIo { source, .. } => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}
