//! Registration requests and their validation.

use std::env;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::errors::RegistrarError;

/// When the supervisor starts a registered service.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StartType {
    /// Loaded by the boot loader.
    Boot,
    /// Started during kernel initialisation.
    System,
    /// Started automatically at system startup.
    Auto,
    /// Started on demand.
    Demand,
    /// Cannot be started until re-enabled.
    Disabled,
}

impl StartType {
    /// Returns the Win32 numeric value.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Boot => 0,
            Self::System => 1,
            Self::Auto => 2,
            Self::Demand => 3,
            Self::Disabled => 4,
        }
    }

    /// Parses any Win32 start type value.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Boot),
            1 => Some(Self::System),
            2 => Some(Self::Auto),
            3 => Some(Self::Demand),
            4 => Some(Self::Disabled),
            _ => None,
        }
    }

    /// Parses a start type given on the command line, where only the
    /// user-mode values 2, 3 and 4 are allowed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrarError::Validation`] for any other value.
    pub fn from_cli(value: &str) -> Result<Self, RegistrarError> {
        match value.trim() {
            "2" => Ok(Self::Auto),
            "3" => Ok(Self::Demand),
            "4" => Ok(Self::Disabled),
            _ => Err(RegistrarError::Validation {
                reason: String::from("service start type must be a number between 2 and 4"),
            }),
        }
    }

    /// Reports whether the value may be requested for a user-mode service.
    #[must_use]
    pub const fn is_user_mode(self) -> bool {
        matches!(self, Self::Auto | Self::Demand | Self::Disabled)
    }
}

/// Executable plus arguments the supervisor launches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    /// Absolute path to the executable.
    pub program: PathBuf,
    /// Arguments passed after the program path.
    pub arguments: Vec<String>,
}

impl CommandLine {
    /// Command line for `program` with `arguments`.
    pub fn new<I, S>(program: impl Into<PathBuf>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }

    /// Command line launching the current executable with `arguments`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrarError::RegistrationIo`] when the path of the
    /// running executable cannot be resolved.
    pub fn for_current_exe<I, S>(arguments: I) -> Result<Self, RegistrarError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = env::current_exe().map_err(|source| RegistrarError::RegistrationIo {
            operation: "resolve current executable",
            source,
        })?;
        Ok(Self::new(program, arguments))
    }

    /// Arguments rendered as one string, quoting any that contain
    /// whitespace or quotes.
    #[must_use]
    pub fn parameters(&self) -> String {
        self.arguments
            .iter()
            .map(|argument| quote(argument))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Renders `"<program>" <parameters>`.
    #[must_use]
    pub fn render(&self) -> String {
        let program = self.program.display();
        let parameters = self.parameters();
        if parameters.is_empty() {
            format!("\"{program}\"")
        } else {
            format!("\"{program}\" {parameters}")
        }
    }
}

fn quote(argument: &str) -> String {
    if !argument.is_empty() && !argument.contains(|c: char| c.is_whitespace() || c == '"') {
        return argument.to_owned();
    }
    format!("\"{}\"", argument.replace('"', "\\\""))
}

/// Account a service runs under.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    /// Account name, such as `NT AUTHORITY\LocalService`.
    pub name: String,
    /// Credential for the account; `None` for built-in accounts.
    pub password: Option<String>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Log source registration requested alongside the service entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogRegistration {
    /// Number of event categories; zero registers none.
    pub category_count: u32,
    /// Message resource path; `None` uses the service executable.
    pub resource_path: Option<PathBuf>,
}

/// Everything needed to register a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// Service name.
    pub name: String,
    /// Display name.
    pub display_name: String,
    /// Description; empty leaves it unset.
    pub description: String,
    /// Program and parameters to launch.
    pub command_line: CommandLine,
    /// Start type.
    pub start_type: StartType,
    /// Services that must start first, in order.
    pub dependencies: Vec<String>,
    /// Account to run as; `None` uses the supervisor's default.
    pub account: Option<Account>,
    /// Log source registration; `None` skips it.
    pub log_registration: Option<LogRegistration>,
}

impl RegistrationRequest {
    /// Request for `name` launching `command_line` with demand start and no
    /// optional settings.
    pub fn new(name: impl Into<String>, command_line: CommandLine) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            command_line,
            start_type: StartType::Demand,
            dependencies: Vec::new(),
            account: None,
            log_registration: None,
        }
    }

    /// Checks the request before any database is touched.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrarError::Validation`] naming the first problem: a
    /// blank name or one with path separators, a driver start type, an empty
    /// executable path or a blank dependency.
    pub fn validate(&self) -> Result<(), RegistrarError> {
        if self.name.trim().is_empty() {
            return Err(RegistrarError::Validation {
                reason: String::from("service name must not be empty"),
            });
        }
        if self.name.contains(['/', '\\']) {
            return Err(RegistrarError::Validation {
                reason: format!("service name '{}' must not contain path separators", self.name),
            });
        }
        if !self.start_type.is_user_mode() {
            return Err(RegistrarError::Validation {
                reason: format!(
                    "start type {} is reserved for drivers; use auto, demand or disabled",
                    self.start_type.code()
                ),
            });
        }
        if self.command_line.program.as_os_str().is_empty() {
            return Err(RegistrarError::Validation {
                reason: String::from("service executable path must not be empty"),
            });
        }
        if let Some(dependency) = self
            .dependencies
            .iter()
            .find(|dependency| dependency.trim().is_empty())
        {
            return Err(RegistrarError::Validation {
                reason: format!("dependency '{dependency}' must not be blank"),
            });
        }
        Ok(())
    }

    /// Resource path recorded for the log source.
    #[must_use]
    pub fn log_resource_path(&self) -> Option<PathBuf> {
        self.log_registration.as_ref().map(|registration| {
            registration
                .resource_path
                .clone()
                .unwrap_or_else(|| self.command_line.program.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request() -> RegistrationRequest {
        RegistrationRequest::new("svcA", CommandLine::new("/opt/svc/bin/svc", ["serve"]))
    }

    #[rstest]
    #[case("2", StartType::Auto)]
    #[case("3", StartType::Demand)]
    #[case("4", StartType::Disabled)]
    fn cli_start_types_parse(#[case] value: &str, #[case] expected: StartType) {
        assert_eq!(StartType::from_cli(value).ok(), Some(expected));
    }

    #[rstest]
    #[case("0")]
    #[case("1")]
    #[case("5")]
    #[case("auto")]
    #[case("")]
    fn cli_start_types_outside_range_fail(#[case] value: &str) {
        assert!(matches!(
            StartType::from_cli(value),
            Err(RegistrarError::Validation { .. })
        ));
    }

    #[test]
    fn command_line_quotes_program_and_spaced_arguments() {
        let line = CommandLine::new("/opt/my svc/bin/svc", ["serve", "-config", "a b.cfg"]);
        assert_eq!(line.render(), "\"/opt/my svc/bin/svc\" serve -config \"a b.cfg\"");
        assert_eq!(line.parameters(), "serve -config \"a b.cfg\"");
        assert_eq!(
            CommandLine::new("/bin/svc", Vec::<String>::new()).render(),
            "\"/bin/svc\""
        );
    }

    #[test]
    fn driver_start_types_are_rejected() {
        let mut request = request();
        request.start_type = StartType::Boot;
        assert!(matches!(
            request.validate(),
            Err(RegistrarError::Validation { .. })
        ));
    }

    #[test]
    fn log_resource_defaults_to_executable() {
        let mut request = request();
        assert_eq!(request.log_resource_path(), None);
        request.log_registration = Some(LogRegistration::default());
        assert_eq!(
            request.log_resource_path(),
            Some(PathBuf::from("/opt/svc/bin/svc"))
        );
    }

    #[test]
    fn account_debug_redacts_password() {
        let account = Account {
            name: String::from("svc-user"),
            password: Some(String::from("hunter2")),
        };
        let rendered = format!("{account:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("redacted"));
    }
}
