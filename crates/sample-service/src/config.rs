//! Configuration loading helpers for the sample service.
//!
//! Configuration flags precede the verb. They are split off and handed to
//! `ortho-config`; everything from the verb onwards belongs to clap.

use std::ffi::{OsStr, OsString};

use ortho_config::OrthoConfig;
use service_base_config::Config;

use crate::errors::AppError;

/// Flags recognised by the configuration loader.
///
/// Kept in sync with the fields of [`Config`].
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--registry-dir",
    "--runtime-dir",
    "--stop-poll-interval-ms",
    "--stop-timeout-secs",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the split-off configuration arguments.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned())
            .map_err(|error| AppError::LoadConfiguration(error))
    }
}

fn process_config_flag(argument: &OsStr) -> FlagAction {
    let argument_text = argument.to_string_lossy();
    let (flag, inline_value) = match argument_text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (argument_text.as_ref(), false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Skip
    }
}

pub(crate) struct ConfigArgumentSplit {
    /// Program name followed by the configuration flags.
    pub(crate) config_arguments: Vec<OsString>,
    /// Program name followed by the verb and its options.
    pub(crate) command_arguments: Vec<OsString>,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let mut remaining = args.iter();
    let Some(program) = remaining.next() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_arguments: Vec::new(),
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut command_arguments = vec![program.clone()];
    let mut pending_value = false;
    for argument in remaining.by_ref() {
        if pending_value {
            config_arguments.push(argument.clone());
            pending_value = false;
            continue;
        }
        match process_config_flag(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push(argument.clone());
                pending_value = needs_value;
            }
            FlagAction::Skip => {
                command_arguments.push(argument.clone());
                break;
            }
        }
    }
    command_arguments.extend(remaining.cloned());

    ConfigArgumentSplit {
        config_arguments,
        command_arguments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    #[test]
    fn inline_value_flags_do_not_need_follow_up_value() {
        assert_eq!(
            process_config_flag(OsStr::new("--log-filter=debug")),
            FlagAction::Include { needs_value: false }
        );
    }

    #[test]
    fn separate_value_flags_consume_following_argument() {
        assert_eq!(
            process_config_flag(OsStr::new("--registry-dir")),
            FlagAction::Include { needs_value: true }
        );
    }

    #[test]
    fn verbs_and_unknown_flags_are_skipped() {
        assert_eq!(process_config_flag(OsStr::new("install")), FlagAction::Skip);
        assert_eq!(process_config_flag(OsStr::new("--config")), FlagAction::Skip);
    }

    #[test]
    fn configuration_flags_stop_at_the_verb() {
        let split = split_config_arguments(&os(&[
            "sample-service",
            "--registry-dir",
            "/srv/registry",
            "--log-format=compact",
            "install",
            "--log-filter",
            "debug",
        ]));
        assert_eq!(
            split.config_arguments,
            os(&[
                "sample-service",
                "--registry-dir",
                "/srv/registry",
                "--log-format=compact"
            ])
        );
        assert_eq!(
            split.command_arguments,
            os(&["sample-service", "install", "--log-filter", "debug"])
        );
    }

    #[test]
    fn empty_arguments_split_into_nothing() {
        let split = split_config_arguments(&[]);
        assert!(split.config_arguments.is_empty());
        assert!(split.command_arguments.is_empty());
    }
}
