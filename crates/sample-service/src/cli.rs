//! CLI argument definitions for the sample service.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use service_base::{LaunchMode, ProcessRole};

/// Options that take a value; their values are never normalised.
const VALUE_OPTIONS: &[&str] = &["--start-type", "--account", "--password", "--config"];

/// Command-line interface of the sample service.
#[derive(Parser, Debug)]
#[command(
    name = "sample-service",
    about = "Sample service hosted by the service-base lifecycle library",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    /// Verb to execute; prints usage when omitted.
    #[command(subcommand)]
    pub(crate) command: Option<Verb>,
}

/// Verbs understood by the sample service.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Verb {
    /// Registers the service with the supervisor.
    Install(InstallArgs),
    /// Stops and removes the service.
    Uninstall,
    /// Runs under the service supervisor.
    Serve(HostArgs),
    /// Runs as a regular foreground process.
    Run(HostArgs),
}

impl Verb {
    /// Role recorded on the telemetry root span.
    pub(crate) const fn role(&self) -> ProcessRole {
        match self {
            Self::Install(_) | Self::Uninstall => ProcessRole::Installer,
            Self::Serve(_) => ProcessRole::Host(LaunchMode::Service),
            Self::Run(_) => ProcessRole::Host(LaunchMode::Process),
        }
    }
}

/// Options of the `install` verb.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct InstallArgs {
    /// Start type: 2 automatic, 3 on demand, 4 disabled.
    #[arg(long = "start-type", value_name = "2..4")]
    pub(crate) start_type: Option<String>,
    /// Account the service runs as.
    #[arg(long, value_name = "NAME")]
    pub(crate) account: Option<String>,
    /// Password of the account.
    #[arg(long, value_name = "PASSWORD")]
    pub(crate) password: Option<String>,
    /// Configuration file the installed service reads.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,
}

/// Options of the `serve` and `run` verbs.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct HostArgs {
    /// Configuration file to read.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,
}

/// Rewrites command tokens into the form clap expects.
///
/// The verb and option names are matched case-insensitively and options may
/// be written with one dash (`-start-type`) or two. Option values are passed
/// through untouched.
pub(crate) fn normalise_command_arguments(tokens: &[OsString]) -> Vec<OsString> {
    let mut normalised = Vec::with_capacity(tokens.len());
    let mut expect_value = false;
    for (position, token) in tokens.iter().enumerate() {
        if expect_value {
            normalised.push(token.clone());
            expect_value = false;
            continue;
        }
        let Some(text) = token.to_str() else {
            normalised.push(token.clone());
            continue;
        };
        if position == 0 && !text.starts_with('-') {
            normalised.push(OsString::from(text.to_ascii_lowercase()));
            continue;
        }
        match normalise_option(text) {
            Some(option) => {
                expect_value = VALUE_OPTIONS.contains(&option.as_str()) && !text.contains('=');
                normalised.push(OsString::from(option));
            }
            None => normalised.push(token.clone()),
        }
    }
    normalised
}

fn normalise_option(text: &str) -> Option<String> {
    let name = text
        .strip_prefix("--")
        .or_else(|| text.strip_prefix('-'))
        .filter(|name| name.starts_with(|first: char| first.is_ascii_alphabetic()))?;
    Some(match name.split_once('=') {
        Some((flag, value)) => format!("--{}={value}", flag.to_ascii_lowercase()),
        None => format!("--{}", name.to_ascii_lowercase()),
    })
}
