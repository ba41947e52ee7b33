//! File-backed registration stores for hosts without a native service
//! database.
//!
//! Each service is one JSON record `<registry>/<name>.json`; log sources live
//! under `<registry>/eventlog/<name>.json`. A registered service that is
//! running under the in-process supervisor is found through its status
//! snapshot in the runtime directory and stopped with SIGTERM.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use service_base_config::{Config, RuntimePaths};

use super::REGISTRAR_TARGET;
use super::database::{
    DatabaseAccess, DatabaseSession, LogRegistrar, LogSource, RegisteredService, ServiceDatabase,
    StopRequest,
};
use super::errors::RegistrarError;
use super::request::{RegistrationRequest, StartType};
use crate::status::ServiceState;
use crate::supervisor::{StatusSnapshot, process_alive, read_snapshot};

const EVENT_LOG_DIR: &str = "eventlog";

/// Persisted registration entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Service name.
    pub name: String,
    /// Display name.
    pub display_name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Executable launched for the service.
    pub program: PathBuf,
    /// Arguments passed after the executable.
    pub arguments: Vec<String>,
    /// Rendered command line.
    pub command_line: String,
    /// Start type.
    pub start_type: StartType,
    /// Win32 value of `start_type`.
    pub start_type_code: u32,
    /// Services that must start first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Account the service runs as.
    #[serde(default)]
    pub account: Option<String>,
}

impl ServiceRecord {
    fn from_request(request: &RegistrationRequest) -> Self {
        Self {
            name: request.name.clone(),
            display_name: request.display_name.clone(),
            description: String::new(),
            program: request.command_line.program.clone(),
            arguments: request.command_line.arguments.clone(),
            command_line: request.command_line.render(),
            start_type: request.start_type,
            start_type_code: request.start_type.code(),
            dependencies: request.dependencies.clone(),
            account: request.account.as_ref().map(|account| account.name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LogSourceRecord {
    name: String,
    message_file: PathBuf,
    types_supported: u32,
    category_count: u32,
    category_message_file: Option<PathBuf>,
}

/// Registration database stored as JSON records in a directory.
#[derive(Debug, Clone)]
pub struct FileServiceDatabase {
    registry_dir: PathBuf,
    config: Config,
}

impl FileServiceDatabase {
    /// Database rooted at the configured registry directory.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            registry_dir: config.registry_dir().into_std_path_buf(),
            config: config.clone(),
        }
    }

    /// Directory holding the records.
    #[must_use]
    pub fn registry_dir(&self) -> &Path {
        &self.registry_dir
    }
}

impl ServiceDatabase for FileServiceDatabase {
    fn open(&self, access: DatabaseAccess) -> Result<Box<dyn DatabaseSession>, RegistrarError> {
        match access {
            DatabaseAccess::Create => create_private_dir(&self.registry_dir)
                .map_err(|source| RegistrarError::io("open service database", source))?,
            DatabaseAccess::Connect => match fs::metadata(&self.registry_dir) {
                Ok(_) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(RegistrarError::io("open service database", source)),
            },
        }
        Ok(Box::new(FileSession {
            registry_dir: self.registry_dir.clone(),
            config: self.config.clone(),
        }))
    }
}

struct FileSession {
    registry_dir: PathBuf,
    config: Config,
}

impl FileSession {
    fn record_path(&self, name: &str) -> Result<PathBuf, RegistrarError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(RegistrarError::Validation {
                reason: format!("service name '{name}' cannot name a registration record"),
            });
        }
        Ok(self.registry_dir.join(format!("{name}.json")))
    }

    fn handle(&self, name: &str, record_path: PathBuf) -> Box<dyn RegisteredService> {
        Box::new(FileService {
            name: name.to_owned(),
            record_path,
            config: self.config.clone(),
        })
    }
}

impl DatabaseSession for FileSession {
    fn create_service(
        &self,
        request: &RegistrationRequest,
    ) -> Result<Box<dyn RegisteredService>, RegistrarError> {
        let path = self.record_path(&request.name)?;
        let mut options = OpenOptions::new();
        options.write(true).create_new(true).mode(0o600);
        let mut file = match options.open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(RegistrarError::DuplicateRegistration {
                    name: request.name.clone(),
                });
            }
            Err(source) => return Err(RegistrarError::io("create service", source)),
        };
        if request
            .account
            .as_ref()
            .is_some_and(|account| account.password.is_some())
        {
            warn!(
                target: REGISTRAR_TARGET,
                service = %request.name,
                "account credentials are not persisted by the file registry"
            );
        }
        let record = ServiceRecord::from_request(request);
        let written = serde_json::to_vec_pretty(&record)
            .map_err(|source| RegistrarError::Record {
                path: path.clone(),
                source,
            })
            .and_then(|bytes| {
                file.write_all(&bytes)
                    .and_then(|()| file.sync_all())
                    .map_err(|source| RegistrarError::io("create service", source))
            });
        if let Err(error) = written {
            // Incomplete record created by this call; no other installer owns it.
            if let Err(cleanup) = fs::remove_file(&path) {
                warn!(
                    target: REGISTRAR_TARGET,
                    file = %path.display(),
                    error = %cleanup,
                    "failed to remove incomplete registration record"
                );
            }
            return Err(error);
        }
        Ok(self.handle(&request.name, path))
    }

    fn open_service(&self, name: &str) -> Result<Box<dyn RegisteredService>, RegistrarError> {
        let path = self.record_path(name)?;
        read_record(&path)?.ok_or_else(|| RegistrarError::NotFound {
            name: name.to_owned(),
        })?;
        Ok(self.handle(name, path))
    }
}

struct FileService {
    name: String,
    record_path: PathBuf,
    config: Config,
}

impl FileService {
    fn snapshot(&self) -> Result<Option<StatusSnapshot>, RegistrarError> {
        let paths = RuntimePaths::for_service(&self.config, &self.name).map_err(|error| {
            RegistrarError::Validation {
                reason: error.to_string(),
            }
        })?;
        read_snapshot(paths.status_path())
            .map_err(|error| RegistrarError::io("read service status", io::Error::other(error)))
    }

    fn live_snapshot(&self) -> Result<Option<StatusSnapshot>, RegistrarError> {
        let Some(snapshot) = self.snapshot()? else {
            return Ok(None);
        };
        let alive = process_alive(snapshot.pid)
            .map_err(|error| RegistrarError::io("check service process", io::Error::other(error)))?;
        Ok(alive.then_some(snapshot))
    }
}

impl RegisteredService for FileService {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_description(&self, description: &str) -> Result<(), RegistrarError> {
        let mut record = read_record(&self.record_path)?.ok_or_else(|| RegistrarError::NotFound {
            name: self.name.clone(),
        })?;
        record.description = description.to_owned();
        let bytes = serde_json::to_vec_pretty(&record).map_err(|source| RegistrarError::Record {
            path: self.record_path.clone(),
            source,
        })?;
        write_atomically(&self.record_path, &bytes)
            .map_err(|source| RegistrarError::io("set service description", source))
    }

    fn request_stop(&self) -> Result<StopRequest, RegistrarError> {
        let Some(snapshot) = self.live_snapshot()? else {
            return Ok(StopRequest::NotRunning);
        };
        if snapshot.state == ServiceState::Stopped {
            return Ok(StopRequest::NotRunning);
        }
        let Ok(raw) = i32::try_from(snapshot.pid) else {
            return Ok(StopRequest::NotRunning);
        };
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => {
                info!(
                    target: REGISTRAR_TARGET,
                    service = %self.name,
                    pid = snapshot.pid,
                    "stop signal delivered"
                );
                Ok(StopRequest::Accepted)
            }
            Err(Errno::ESRCH) => Ok(StopRequest::NotRunning),
            Err(errno) => Err(RegistrarError::io(
                "stop service",
                io::Error::from_raw_os_error(errno as i32),
            )),
        }
    }

    fn query_state(&self) -> Result<ServiceState, RegistrarError> {
        Ok(self
            .live_snapshot()?
            .map_or(ServiceState::Stopped, |snapshot| snapshot.state))
    }

    fn delete(&self) -> Result<(), RegistrarError> {
        match fs::remove_file(&self.record_path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Err(RegistrarError::NotFound {
                name: self.name.clone(),
            }),
            Err(source) => Err(RegistrarError::io("delete service", source)),
        }
    }
}

/// Log source registry stored as JSON records in `<registry>/eventlog`.
#[derive(Debug, Clone)]
pub struct FileLogRegistrar {
    event_log_dir: PathBuf,
}

impl FileLogRegistrar {
    /// Registrar rooted at the configured registry directory.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            event_log_dir: config.registry_dir().into_std_path_buf().join(EVENT_LOG_DIR),
        }
    }

    fn source_path(&self, name: &str) -> PathBuf {
        self.event_log_dir.join(format!("{name}.json"))
    }
}

impl LogRegistrar for FileLogRegistrar {
    fn register_source(&self, source: &LogSource) -> Result<(), RegistrarError> {
        create_private_dir(&self.event_log_dir)
            .map_err(|error| RegistrarError::io("create log source", error))?;
        let record = LogSourceRecord {
            name: source.name.clone(),
            message_file: source.message_file.clone(),
            types_supported: source.types_supported,
            category_count: source.categories.as_ref().map_or(0, |categories| categories.count),
            category_message_file: source
                .categories
                .as_ref()
                .map(|categories| categories.message_file.clone()),
        };
        let path = self.source_path(&source.name);
        let bytes = serde_json::to_vec_pretty(&record).map_err(|error| RegistrarError::Record {
            path: path.clone(),
            source: error,
        })?;
        write_atomically(&path, &bytes).map_err(|error| RegistrarError::io("create log source", error))
    }

    fn source_exists(&self, name: &str) -> Result<bool, RegistrarError> {
        match fs::metadata(self.source_path(name)) {
            Ok(_) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(RegistrarError::io("check log source", error)),
        }
    }

    fn unregister_source(&self, name: &str) -> Result<(), RegistrarError> {
        match fs::remove_file(self.source_path(name)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(RegistrarError::io("delete log source", error)),
        }
    }
}

fn create_private_dir(path: &Path) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(0o700).create(path)
}

fn read_record(path: &Path) -> Result<Option<ServiceRecord>, RegistrarError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| RegistrarError::Record {
                path: path.to_path_buf(),
                source,
            }),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RegistrarError::io("open service", source)),
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let staging = path.with_extension("json.tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&staging)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&staging, path)
}
