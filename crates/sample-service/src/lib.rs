//! Command-line front end of the sample service.
//!
//! One binary installs, uninstalls and hosts the service. Configuration
//! flags precede the verb and are handed to `ortho-config`; the verb and its
//! options are parsed by clap after legacy single-dash options have been
//! normalised. `serve` hands the process to the platform supervisor and
//! `run` hosts the same hooks as a foreground process.

use std::ffi::OsString;
use std::io::Write;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing::{error, info};

use service_base::{
    LaunchMode, NO_ERROR, ProcessRole, ServiceLifecycleController, Supervisor,
    initialise_telemetry, system_supervisor,
};

mod cli;
mod config;
mod errors;
mod install;
mod service;

use cli::{Cli, HostArgs, Verb, normalise_command_arguments};
use config::{ConfigArgumentSplit, split_config_arguments};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
use errors::AppError;
pub use errors::ExitStatus;
pub use service::{
    CATEGORY_SERVICE, DEFAULT_CONFIG_FILE, DESCRIPTION, DISPLAY_NAME, MSG_OPERATION,
    MSG_SHUTDOWN, MSG_STARTUP, MSG_SVC_FAILURE, RUN_VERB, SERVE_VERB, SERVICE_NAME,
    SampleService, sample_controller,
};

const FRONT_END_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cli");

struct CliRunner<'a, W: Write, E: Write, L: ConfigLoader> {
    stdout: &'a mut W,
    stderr: &'a mut E,
    loader: &'a L,
}

impl<W, E, L> CliRunner<'_, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    fn run(&mut self, args: Vec<OsString>) -> ExitStatus {
        let split = split_config_arguments(&args);
        let cli = match Cli::try_parse_from(prepare_cli_arguments(&split)) {
            Ok(cli) => cli,
            Err(error) => return self.report_usage(&error),
        };
        let Some(verb) = cli.command else {
            let _ = write!(self.stdout, "{}", Cli::command().render_help());
            return ExitStatus::SUCCESS;
        };

        match self.execute(verb, &split) {
            Ok(status) => status,
            Err(error) => {
                error!(target: FRONT_END_TARGET, error = %error, "command failed");
                let _ = writeln!(self.stderr, "{error}");
                error.exit_status()
            }
        }
    }

    fn report_usage(&mut self, error: &clap::Error) -> ExitStatus {
        let rendered = error.render();
        if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
            let _ = write!(self.stdout, "{rendered}");
            ExitStatus::SUCCESS
        } else {
            let _ = write!(self.stderr, "{rendered}");
            ExitStatus::INVALID_ARGUMENTS
        }
    }

    fn execute(&mut self, verb: Verb, split: &ConfigArgumentSplit) -> Result<ExitStatus, AppError> {
        let config = self.loader.load(&split.config_arguments)?;
        let telemetry = initialise_telemetry(&config, SERVICE_NAME, verb.role())?;
        let _root = telemetry.enter();

        match verb {
            Verb::Install(args) => {
                let registrar = install::platform_registrar(&config);
                install::install(&registrar, &args, &mut *self.stdout)?;
                Ok(ExitStatus::SUCCESS)
            }
            Verb::Uninstall => {
                let registrar = install::platform_registrar(&config);
                install::uninstall(&registrar, &mut *self.stdout)?;
                Ok(ExitStatus::SUCCESS)
            }
            Verb::Serve(args) => host_sample(&config, split, LaunchMode::Service, &args),
            Verb::Run(args) => host_sample(&config, split, LaunchMode::Process, &args),
        }
    }
}

fn host_sample(
    config: &service_base_config::Config,
    split: &ConfigArgumentSplit,
    mode: LaunchMode,
    args: &HostArgs,
) -> Result<ExitStatus, AppError> {
    info!(
        target: FRONT_END_TARGET,
        %mode,
        config = ?args.config,
        "hosting sample service"
    );
    let controller = sample_controller(
        split.command_arguments.clone(),
        Arc::new(SampleService::default()),
    )
    .map_err(AppError::run)?;
    let arguments = split.command_arguments.iter().skip(1).cloned().collect();
    host(controller, system_supervisor(config, mode, arguments))
}

/// Program name followed by the normalised verb and options.
fn prepare_cli_arguments(split: &ConfigArgumentSplit) -> Vec<OsString> {
    let Some((program, tokens)) = split.command_arguments.split_first() else {
        return Vec::new();
    };
    let mut arguments = vec![program.clone()];
    arguments.extend(normalise_command_arguments(tokens));
    arguments
}

/// Runs `controller` under `supervisor` until the supervisor releases the
/// process.
///
/// A service that stopped with a non-zero exit code makes the process exit
/// with that code too.
pub(crate) fn host(
    controller: ServiceLifecycleController,
    supervisor: Arc<dyn Supervisor>,
) -> Result<ExitStatus, AppError> {
    let controller = Arc::new(controller);
    Arc::clone(&controller)
        .run(supervisor)
        .map_err(AppError::run)?;
    let exit_code = controller.status().win32_exit_code;
    if exit_code == NO_ERROR {
        Ok(ExitStatus::SUCCESS)
    } else {
        Ok(ExitStatus::from_os_code(i32::try_from(exit_code).ok()))
    }
}

/// Runs the front end with the given arguments and output streams.
///
/// The streams must not be locked by the caller: service threads log to
/// standard error while `serve` and `run` block.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitStatus
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
) -> ExitStatus
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let mut runner = CliRunner {
        stdout,
        stderr,
        loader,
    };
    runner.run(args.into_iter().collect())
}

#[cfg(test)]
mod tests;
