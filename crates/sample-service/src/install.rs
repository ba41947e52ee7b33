//! The `install` and `uninstall` verbs.

use std::cell::RefCell;
use std::io::Write;

use tracing::info;

use service_base::registrar::{
    Account, CommandLine, LogRegistrar, LogRegistration, LogSourceCleanup, RegistrarError,
    RegistrationRequest, ServiceDatabase, ServiceRegistrar, StartType, StopOutcome, StopPolicy,
    UninstallObserver, UninstallReport,
};
use service_base_config::Config;

use crate::cli::InstallArgs;
use crate::errors::AppError;
use crate::service::{DESCRIPTION, DISPLAY_NAME, SAMPLE_TARGET, SERVE_VERB, SERVICE_NAME};

/// Account the service runs as unless `--account` is given.
#[cfg(windows)]
pub(crate) const DEFAULT_ACCOUNT: Option<&str> = Some(r"NT AUTHORITY\LocalService");
/// Account the service runs as unless `--account` is given.
#[cfg(not(windows))]
pub(crate) const DEFAULT_ACCOUNT: Option<&str> = None;

/// Builds the registration request for `args` launching `program`.
pub(crate) fn registration_request(
    args: &InstallArgs,
    command_line: impl FnOnce(Vec<String>) -> Result<CommandLine, RegistrarError>,
) -> Result<RegistrationRequest, RegistrarError> {
    let start_type = match args.start_type.as_deref() {
        Some(value) => StartType::from_cli(value)?,
        None => StartType::Auto,
    };

    let mut parameters = vec![String::from(SERVE_VERB)];
    if let Some(config) = &args.config {
        parameters.push(String::from("-config"));
        parameters.push(config.display().to_string());
    }

    let account = match (&args.account, DEFAULT_ACCOUNT) {
        (Some(name), _) => Some(Account {
            name: name.clone(),
            password: args.password.clone(),
        }),
        (None, Some(name)) => Some(Account {
            name: String::from(name),
            password: args.password.clone(),
        }),
        (None, None) => None,
    };

    let mut request = RegistrationRequest::new(SERVICE_NAME, command_line(parameters)?);
    request.display_name = String::from(DISPLAY_NAME);
    request.description = String::from(DESCRIPTION);
    request.start_type = start_type;
    request.account = account;
    request.log_registration = Some(LogRegistration {
        category_count: 1,
        resource_path: None,
    });
    Ok(request)
}

/// Installs the sample service.
pub(crate) fn install<D, L, W>(
    registrar: &ServiceRegistrar<D, L>,
    args: &InstallArgs,
    stdout: &mut W,
) -> Result<(), AppError>
where
    D: ServiceDatabase,
    L: LogRegistrar,
    W: Write,
{
    let request =
        registration_request(args, CommandLine::for_current_exe).map_err(AppError::Install)?;
    let report = registrar.install(&request).map_err(AppError::Install)?;
    info!(
        target: SAMPLE_TARGET,
        service = %report.name,
        command_line = %request.command_line.render(),
        "sample service installed"
    );
    let _ = writeln!(stdout, "{} is installed.", report.name);
    Ok(())
}

/// Prints stop progress the way an operator expects from a console tool.
struct ConsoleObserver<'a, W: Write> {
    stdout: RefCell<&'a mut W>,
}

impl<W: Write> UninstallObserver for ConsoleObserver<'_, W> {
    fn stop_requested(&self, name: &str) {
        let _ = write!(self.stdout.borrow_mut(), "Stopping {name}.");
    }

    fn still_stopping(&self, _name: &str) {
        let mut stdout = self.stdout.borrow_mut();
        let _ = write!(stdout, ".");
        let _ = stdout.flush();
    }
}

/// Stops and removes the sample service.
pub(crate) fn uninstall<D, L, W>(
    registrar: &ServiceRegistrar<D, L>,
    stdout: &mut W,
) -> Result<(), AppError>
where
    D: ServiceDatabase,
    L: LogRegistrar,
    W: Write,
{
    let observer = ConsoleObserver {
        stdout: RefCell::new(&mut *stdout),
    };
    let report = registrar
        .uninstall_observed(SERVICE_NAME, &observer)
        .map_err(AppError::Uninstall)?;
    drop(observer);
    describe_uninstall(&report, stdout);
    Ok(())
}

fn describe_uninstall<W: Write>(report: &UninstallReport, stdout: &mut W) {
    match &report.stop {
        StopOutcome::NotRunning => {}
        StopOutcome::Stopped => {
            let _ = writeln!(stdout, "\n{} is stopped.", report.name);
        }
        StopOutcome::FailedToStop { last_state } => {
            let _ = writeln!(
                stdout,
                "\n{} failed to stop; last state {last_state}.",
                report.name
            );
        }
        StopOutcome::Unreachable { reason } => {
            let _ = writeln!(stdout, "{} could not be stopped: {reason}", report.name);
        }
    }
    let _ = writeln!(stdout, "{} is removed.", report.name);
    if let LogSourceCleanup::Failed { reason } = &report.log_source {
        let _ = writeln!(stdout, "Couldn't remove the log source: {reason}");
    }
}

/// Registrar for this platform.
#[cfg(unix)]
pub(crate) fn platform_registrar(
    config: &Config,
) -> ServiceRegistrar<service_base::FileServiceDatabase, service_base::FileLogRegistrar> {
    ServiceRegistrar::new(
        service_base::FileServiceDatabase::from_config(config),
        service_base::FileLogRegistrar::from_config(config),
    )
    .with_stop_policy(StopPolicy::from_config(config))
}

/// Registrar for this platform.
#[cfg(windows)]
pub(crate) fn platform_registrar(
    config: &Config,
) -> ServiceRegistrar<service_base::ScmServiceDatabase, service_base::RegistryLogRegistrar> {
    ServiceRegistrar::new(
        service_base::ScmServiceDatabase,
        service_base::RegistryLogRegistrar,
    )
    .with_stop_policy(StopPolicy::from_config(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixed_program(parameters: Vec<String>) -> Result<CommandLine, RegistrarError> {
        Ok(CommandLine::new("/opt/sample/bin/sample-service", parameters))
    }

    #[test]
    fn defaults_install_an_automatic_service_with_one_category() {
        let request = registration_request(&InstallArgs::default(), fixed_program)
            .expect("defaults are valid");
        assert_eq!(request.name, SERVICE_NAME);
        assert_eq!(request.display_name, DISPLAY_NAME);
        assert_eq!(request.start_type, StartType::Auto);
        assert_eq!(request.command_line.parameters(), "serve");
        assert_eq!(
            request.account.as_ref().map(|account| account.name.as_str()),
            DEFAULT_ACCOUNT
        );
        let log = request.log_registration.expect("log source requested");
        assert_eq!(log.category_count, 1);
        assert_eq!(log.resource_path, None);
    }

    #[test]
    fn config_paths_are_forwarded_to_the_service_command_line() {
        let args = InstallArgs {
            config: Some(PathBuf::from("/etc/sample service/config.cfg")),
            ..InstallArgs::default()
        };
        let request = registration_request(&args, fixed_program).expect("valid request");
        assert_eq!(
            request.command_line.render(),
            "\"/opt/sample/bin/sample-service\" serve -config \"/etc/sample service/config.cfg\""
        );
    }

    #[test]
    fn explicit_accounts_carry_their_password() {
        let args = InstallArgs {
            account: Some(String::from("svc-user")),
            password: Some(String::from("hunter2")),
            start_type: Some(String::from("4")),
            ..InstallArgs::default()
        };
        let request = registration_request(&args, fixed_program).expect("valid request");
        assert_eq!(request.start_type, StartType::Disabled);
        let account = request.account.expect("account set");
        assert_eq!(account.name, "svc-user");
        assert_eq!(account.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn start_types_outside_two_to_four_are_rejected() {
        let args = InstallArgs {
            start_type: Some(String::from("1")),
            ..InstallArgs::default()
        };
        let error = registration_request(&args, fixed_program).expect_err("start type 1");
        assert_eq!(
            error.to_string(),
            "invalid registration request: service start type must be a number between 2 and 4"
        );
    }

    #[test]
    fn uninstall_summaries_name_the_stop_outcome() {
        let mut output = Vec::new();
        describe_uninstall(
            &UninstallReport {
                name: String::from(SERVICE_NAME),
                stop: StopOutcome::Stopped,
                log_source: LogSourceCleanup::Removed,
            },
            &mut output,
        );
        let text = String::from_utf8(output).expect("utf-8 output");
        assert_eq!(text, "\nsample-service is stopped.\nsample-service is removed.\n");
    }
}
