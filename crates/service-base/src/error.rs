//! Errors surfaced by [`ServiceLifecycleController`](crate::ServiceLifecycleController).

use thiserror::Error;

use crate::supervisor::SupervisorError;

/// Errors returned while building or running a lifecycle controller.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The identity or capabilities were malformed.
    #[error("invalid service definition: {reason}")]
    Validation {
        /// Human-readable reason.
        reason: String,
    },
    /// Another controller already owns the process-wide dispatch slot.
    #[error("service '{active}' is already running in this process")]
    DuplicateRegistration {
        /// Name of the controller holding the slot.
        active: String,
    },
    /// The supervisor refused the connection or handler registration.
    #[error("service supervisor failed: {source}")]
    Supervisor {
        /// Underlying supervisor error.
        #[source]
        source: SupervisorError,
    },
}

impl ServiceError {
    /// OS error code to surface as the process exit code, when one exists.
    #[must_use]
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::Supervisor { source } => source.raw_os_error(),
            Self::Validation { .. } | Self::DuplicateRegistration { .. } => None,
        }
    }
}

impl From<SupervisorError> for ServiceError {
    fn from(source: SupervisorError) -> Self {
        Self::Supervisor { source }
    }
}
