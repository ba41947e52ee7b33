//! Error types and exit statuses for the sample service front end.

use std::sync::Arc;

use thiserror::Error;

use service_base::{RegistrarError, ServiceError, TelemetryError};

/// Process exit status returned by [`crate::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitStatus(i32);

impl ExitStatus {
    /// The command succeeded.
    pub const SUCCESS: Self = Self(0);
    /// Arguments or the install request were invalid.
    pub const INVALID_ARGUMENTS: Self = Self(1);
    /// Install failed for a reason other than bad input.
    pub const UNEXPECTED: Self = Self(2);

    /// Exit status carrying an OS error code, or `1` without one.
    #[must_use]
    pub fn from_os_code(code: Option<i32>) -> Self {
        match code {
            Some(code) if code != 0 => Self(code),
            _ => Self(1),
        }
    }

    /// Numeric code handed to the operating system.
    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }
}

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("Couldn't install service: {0}")]
    Install(RegistrarError),
    #[error("Couldn't uninstall service: {0}")]
    Uninstall(RegistrarError),
    #[error("Service failed to run with error code: 0x{code:08x}: {source}")]
    Run {
        code: i32,
        #[source]
        source: ServiceError,
    },
}

impl AppError {
    pub(crate) fn run(source: ServiceError) -> Self {
        let code = ExitStatus::from_os_code(source.os_code()).code();
        Self::Run { code, source }
    }

    /// Exit status the process reports for this failure.
    pub(crate) fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Install(RegistrarError::Validation { .. }) => ExitStatus::INVALID_ARGUMENTS,
            Self::Install(_) => ExitStatus::UNEXPECTED,
            Self::Uninstall(error) => ExitStatus::from_os_code(error.raw_os_error()),
            Self::Run { code, .. } => ExitStatus(*code),
            Self::LoadConfiguration(_) | Self::Telemetry(_) => ExitStatus::INVALID_ARGUMENTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, 1)]
    #[case(Some(0), 1)]
    #[case(Some(1063), 1063)]
    fn os_codes_become_exit_statuses(#[case] code: Option<i32>, #[case] expected: i32) {
        assert_eq!(ExitStatus::from_os_code(code).code(), expected);
    }

    #[test]
    fn install_validation_failures_exit_with_one() {
        let error = AppError::Install(RegistrarError::Validation {
            reason: String::from("bad start type"),
        });
        assert_eq!(error.exit_status(), ExitStatus::INVALID_ARGUMENTS);

        let error = AppError::Install(RegistrarError::DuplicateRegistration {
            name: String::from("sample-service"),
        });
        assert_eq!(error.exit_status(), ExitStatus::UNEXPECTED);
    }

    #[test]
    fn run_failures_render_the_code_in_hex() {
        let error = AppError::run(ServiceError::DuplicateRegistration {
            active: String::from("other"),
        });
        assert_eq!(error.exit_status().code(), 1);
        assert!(error.to_string().starts_with("Service failed to run with error code: 0x00000001"));
    }
}
