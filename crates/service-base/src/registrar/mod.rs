//! Installs and removes service registrations.
//!
//! An install creates the supervisor entry and, when requested, a log source
//! for it. Either both exist afterwards or neither does: a failure after the
//! entry was created deletes it again. An uninstall stops the service if it
//! is running, deletes the entry whether or not the stop completed, and then
//! removes the log source.

mod database;
mod errors;
mod request;

#[cfg(unix)]
mod file_store;
#[cfg(windows)]
mod windows;

use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use service_base_config::Config;

pub use database::{
    CategoryRegistration, DatabaseAccess, DatabaseSession, LOG_TYPES_SUPPORTED, LogRegistrar,
    LogSource, RegisteredService, ServiceDatabase, StopRequest,
};
pub use errors::RegistrarError;
#[cfg(unix)]
pub use file_store::{FileLogRegistrar, FileServiceDatabase, ServiceRecord};
pub use request::{Account, CommandLine, LogRegistration, RegistrationRequest, StartType};
#[cfg(windows)]
pub use windows::{RegistryLogRegistrar, ScmServiceDatabase};

use crate::status::ServiceState;

pub(crate) const REGISTRAR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registrar");

/// How long uninstall waits for a running service to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Overall budget before the stop is reported as failed.
    pub timeout: Duration,
}

impl StopPolicy {
    /// Policy taken from the shared configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.stop_poll_interval(),
            timeout: config.stop_timeout(),
        }
    }
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Installed service.
    pub name: String,
    /// Whether a log source was registered.
    pub log_source_registered: bool,
}

/// What happened when uninstall asked the service to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The service was not running.
    NotRunning,
    /// The service reached `Stopped`.
    Stopped,
    /// The service left `StopPending` in another state or ran out of time.
    FailedToStop {
        /// Last state observed.
        last_state: ServiceState,
    },
    /// The stop control could not be delivered.
    Unreachable {
        /// Description of the failure.
        reason: String,
    },
}

/// What happened to the log source during uninstall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSourceCleanup {
    /// The source existed and was removed.
    Removed,
    /// No source was registered.
    Absent,
    /// Removing the source failed; the service entry is already gone.
    Failed {
        /// Description of the failure.
        reason: String,
    },
}

/// Result of a completed uninstall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallReport {
    /// Removed service.
    pub name: String,
    /// Outcome of the stop request.
    pub stop: StopOutcome,
    /// Outcome of the log source cleanup.
    pub log_source: LogSourceCleanup,
}

/// Progress notifications emitted while uninstall waits for a stop.
pub trait UninstallObserver {
    /// A stop control was delivered to `name`.
    fn stop_requested(&self, name: &str) {
        let _ = name;
    }

    /// `name` is still `StopPending` after another poll interval.
    fn still_stopping(&self, name: &str) {
        let _ = name;
    }
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl UninstallObserver for SilentObserver {}

/// Creates and removes registrations in a [`ServiceDatabase`] and a
/// [`LogRegistrar`].
#[derive(Debug)]
pub struct ServiceRegistrar<D, L> {
    database: D,
    log_registrar: L,
    stop_policy: StopPolicy,
}

impl<D, L> ServiceRegistrar<D, L>
where
    D: ServiceDatabase,
    L: LogRegistrar,
{
    /// Registrar over `database` and `log_registrar` with the default stop
    /// policy.
    pub fn new(database: D, log_registrar: L) -> Self {
        Self {
            database,
            log_registrar,
            stop_policy: StopPolicy::default(),
        }
    }

    /// Replaces the stop policy used by uninstall.
    #[must_use]
    pub const fn with_stop_policy(mut self, stop_policy: StopPolicy) -> Self {
        self.stop_policy = stop_policy;
        self
    }

    /// Registers the service described by `request`.
    ///
    /// # Errors
    ///
    /// Validation failures return before the database is opened. A duplicate
    /// name returns [`RegistrarError::DuplicateRegistration`] and leaves the
    /// existing entry alone. Any failure after the entry was created removes
    /// it before returning.
    pub fn install(&self, request: &RegistrationRequest) -> Result<InstallReport, RegistrarError> {
        request.validate()?;
        let session = self.database.open(DatabaseAccess::Create)?;
        let service = session.create_service(request)?;
        let rollback = Rollback::new(service.as_ref());
        info!(
            target: REGISTRAR_TARGET,
            service = %request.name,
            command_line = %request.command_line.render(),
            start_type = %request.start_type,
            "service entry created"
        );

        if !request.description.is_empty() {
            service.set_description(&request.description)?;
        }

        let log_source_registered = match LogSource::for_request(request) {
            Some(source) => {
                self.register_log_source(&source)?;
                true
            }
            None => false,
        };

        rollback.commit();
        info!(
            target: REGISTRAR_TARGET,
            service = %request.name,
            log_source = log_source_registered,
            "service installed"
        );
        Ok(InstallReport {
            name: request.name.clone(),
            log_source_registered,
        })
    }

    /// Removes the service named `name` without progress notifications.
    ///
    /// # Errors
    ///
    /// As for [`uninstall_observed`](Self::uninstall_observed).
    pub fn uninstall(&self, name: &str) -> Result<UninstallReport, RegistrarError> {
        self.uninstall_observed(name, &SilentObserver)
    }

    /// Removes the service named `name`, reporting stop progress to
    /// `observer`.
    ///
    /// # Errors
    ///
    /// Fails before any mutation when the database cannot be opened or the
    /// service is not registered. Deleting the entry is the only other fatal
    /// step; stop and log source problems are reported in the returned
    /// [`UninstallReport`].
    pub fn uninstall_observed(
        &self,
        name: &str,
        observer: &dyn UninstallObserver,
    ) -> Result<UninstallReport, RegistrarError> {
        let session = self.database.open(DatabaseAccess::Connect)?;
        let service = session.open_service(name)?;

        let stop = self.stop_service(service.as_ref(), observer);
        service.delete()?;
        info!(
            target: REGISTRAR_TARGET,
            service = name,
            stop = ?stop,
            "service entry deleted"
        );
        drop(service);
        drop(session);

        let log_source = self.remove_log_source(name);
        Ok(UninstallReport {
            name: name.to_owned(),
            stop,
            log_source,
        })
    }

    fn register_log_source(&self, source: &LogSource) -> Result<(), RegistrarError> {
        if let Err(error) = self.log_registrar.register_source(source) {
            match self.log_registrar.source_exists(&source.name) {
                Ok(true) => {
                    if let Err(cleanup) = self.log_registrar.unregister_source(&source.name) {
                        warn!(
                            target: REGISTRAR_TARGET,
                            source = %source.name,
                            error = %cleanup,
                            "failed to remove partially registered log source"
                        );
                    }
                }
                Ok(false) => {}
                Err(lookup) => warn!(
                    target: REGISTRAR_TARGET,
                    source = %source.name,
                    error = %lookup,
                    "failed to look up partially registered log source"
                ),
            }
            return Err(error);
        }
        info!(
            target: REGISTRAR_TARGET,
            source = %source.name,
            message_file = %source.message_file.display(),
            categories = source.categories.as_ref().map_or(0, |categories| categories.count),
            "log source registered"
        );
        Ok(())
    }

    fn stop_service(
        &self,
        service: &dyn RegisteredService,
        observer: &dyn UninstallObserver,
    ) -> StopOutcome {
        match service.request_stop() {
            Ok(StopRequest::NotRunning) => return StopOutcome::NotRunning,
            Ok(StopRequest::Accepted) => observer.stop_requested(service.name()),
            Err(error) => {
                warn!(
                    target: REGISTRAR_TARGET,
                    service = service.name(),
                    error = %error,
                    "failed to deliver stop control"
                );
                return StopOutcome::Unreachable {
                    reason: error.to_string(),
                };
            }
        }

        let started = Instant::now();
        loop {
            thread::sleep(self.stop_policy.poll_interval);
            let state = match service.query_state() {
                Ok(state) => state,
                Err(error) => {
                    warn!(
                        target: REGISTRAR_TARGET,
                        service = service.name(),
                        error = %error,
                        "failed to query service state while stopping"
                    );
                    return StopOutcome::FailedToStop {
                        last_state: ServiceState::StopPending,
                    };
                }
            };
            match state {
                ServiceState::Stopped => return StopOutcome::Stopped,
                ServiceState::StopPending if started.elapsed() < self.stop_policy.timeout => {
                    observer.still_stopping(service.name());
                }
                last_state => {
                    warn!(
                        target: REGISTRAR_TARGET,
                        service = service.name(),
                        state = %last_state,
                        "service failed to stop"
                    );
                    return StopOutcome::FailedToStop { last_state };
                }
            }
        }
    }

    fn remove_log_source(&self, name: &str) -> LogSourceCleanup {
        let removal = self
            .log_registrar
            .source_exists(name)
            .and_then(|exists| {
                if exists {
                    self.log_registrar.unregister_source(name).map(|()| true)
                } else {
                    Ok(false)
                }
            });
        match removal {
            Ok(true) => {
                info!(target: REGISTRAR_TARGET, source = name, "log source removed");
                LogSourceCleanup::Removed
            }
            Ok(false) => LogSourceCleanup::Absent,
            Err(error) => {
                warn!(
                    target: REGISTRAR_TARGET,
                    source = name,
                    error = %error,
                    "failed to remove log source"
                );
                LogSourceCleanup::Failed {
                    reason: error.to_string(),
                }
            }
        }
    }
}

/// Deletes a freshly created entry unless the install commits.
struct Rollback<'a> {
    service: Option<&'a dyn RegisteredService>,
}

impl<'a> Rollback<'a> {
    fn new(service: &'a dyn RegisteredService) -> Self {
        Self {
            service: Some(service),
        }
    }

    fn commit(mut self) {
        self.service = None;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        let Some(service) = self.service.take() else {
            return;
        };
        match service.delete() {
            Ok(()) => warn!(
                target: REGISTRAR_TARGET,
                service = service.name(),
                "install failed; service entry rolled back"
            ),
            Err(error) => warn!(
                target: REGISTRAR_TARGET,
                service = service.name(),
                error = %error,
                "install failed and the service entry could not be rolled back"
            ),
        }
    }
}
