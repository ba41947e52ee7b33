//! Service Control Manager and event log registry backends.

use std::ffi::OsString;
use std::io;

use tracing::info;
use windows_service::service::{
    ServiceAccess, ServiceDependency, ServiceErrorControl, ServiceInfo, ServiceStartType,
    ServiceState as ScmState, ServiceType,
};
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};
use winreg::RegKey;
use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_READ};

use super::REGISTRAR_TARGET;
use super::database::{
    DatabaseAccess, DatabaseSession, LogRegistrar, LogSource, RegisteredService, ServiceDatabase,
    StopRequest,
};
use super::errors::RegistrarError;
use super::request::{RegistrationRequest, StartType};
use crate::status::ServiceState;

const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const ERROR_SERVICE_NOT_ACTIVE: i32 = 1062;
const ERROR_SERVICE_EXISTS: i32 = 1073;

const EVENT_LOG_KEY: &str = r"SYSTEM\CurrentControlSet\Services\EventLog\Application";

fn into_io(error: windows_service::Error) -> io::Error {
    match error {
        windows_service::Error::Winapi(source) => source,
        other => io::Error::other(other),
    }
}

/// Registration database backed by the Service Control Manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScmServiceDatabase;

impl ServiceDatabase for ScmServiceDatabase {
    fn open(&self, access: DatabaseAccess) -> Result<Box<dyn DatabaseSession>, RegistrarError> {
        let rights = match access {
            DatabaseAccess::Connect => ServiceManagerAccess::CONNECT,
            DatabaseAccess::Create => {
                ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE
            }
        };
        let manager = ServiceManager::local_computer(None::<&str>, rights)
            .map_err(|error| RegistrarError::io("open service control manager", into_io(error)))?;
        Ok(Box::new(ScmSession { manager }))
    }
}

struct ScmSession {
    manager: ServiceManager,
}

impl DatabaseSession for ScmSession {
    fn create_service(
        &self,
        request: &RegistrationRequest,
    ) -> Result<Box<dyn RegisteredService>, RegistrarError> {
        let info = ServiceInfo {
            name: OsString::from(&request.name),
            display_name: OsString::from(&request.display_name),
            service_type: ServiceType::OWN_PROCESS,
            start_type: start_type(request.start_type),
            error_control: ServiceErrorControl::Normal,
            executable_path: request.command_line.program.clone(),
            launch_arguments: request
                .command_line
                .arguments
                .iter()
                .map(OsString::from)
                .collect(),
            dependencies: request
                .dependencies
                .iter()
                .map(|name| ServiceDependency::Service(OsString::from(name)))
                .collect(),
            account_name: request
                .account
                .as_ref()
                .map(|account| OsString::from(&account.name)),
            account_password: request
                .account
                .as_ref()
                .and_then(|account| account.password.as_ref())
                .map(OsString::from),
        };
        let access = ServiceAccess::CHANGE_CONFIG
            | ServiceAccess::QUERY_STATUS
            | ServiceAccess::STOP
            | ServiceAccess::DELETE;
        match self.manager.create_service(&info, access) {
            Ok(service) => Ok(Box::new(ScmService {
                name: request.name.clone(),
                service,
            })),
            Err(error) => {
                let source = into_io(error);
                if source.raw_os_error() == Some(ERROR_SERVICE_EXISTS) {
                    Err(RegistrarError::DuplicateRegistration {
                        name: request.name.clone(),
                    })
                } else {
                    Err(RegistrarError::io("create service", source))
                }
            }
        }
    }

    fn open_service(&self, name: &str) -> Result<Box<dyn RegisteredService>, RegistrarError> {
        let access = ServiceAccess::QUERY_STATUS | ServiceAccess::STOP | ServiceAccess::DELETE;
        match self.manager.open_service(name, access) {
            Ok(service) => Ok(Box::new(ScmService {
                name: name.to_owned(),
                service,
            })),
            Err(error) => {
                let source = into_io(error);
                if source.raw_os_error() == Some(ERROR_SERVICE_DOES_NOT_EXIST) {
                    Err(RegistrarError::NotFound {
                        name: name.to_owned(),
                    })
                } else {
                    Err(RegistrarError::io("open service", source))
                }
            }
        }
    }
}

struct ScmService {
    name: String,
    service: windows_service::service::Service,
}

impl RegisteredService for ScmService {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_description(&self, description: &str) -> Result<(), RegistrarError> {
        self.service
            .set_description(description)
            .map_err(|error| RegistrarError::io("set service description", into_io(error)))
    }

    fn request_stop(&self) -> Result<StopRequest, RegistrarError> {
        match self.service.stop() {
            Ok(_) => Ok(StopRequest::Accepted),
            Err(error) => {
                let source = into_io(error);
                if source.raw_os_error() == Some(ERROR_SERVICE_NOT_ACTIVE) {
                    Ok(StopRequest::NotRunning)
                } else {
                    Err(RegistrarError::io("stop service", source))
                }
            }
        }
    }

    fn query_state(&self) -> Result<ServiceState, RegistrarError> {
        let status = self
            .service
            .query_status()
            .map_err(|error| RegistrarError::io("query service status", into_io(error)))?;
        Ok(match status.current_state {
            ScmState::Stopped => ServiceState::Stopped,
            ScmState::StartPending => ServiceState::StartPending,
            ScmState::StopPending => ServiceState::StopPending,
            ScmState::Running => ServiceState::Running,
            ScmState::ContinuePending => ServiceState::ContinuePending,
            ScmState::PausePending => ServiceState::PausePending,
            ScmState::Paused => ServiceState::Paused,
        })
    }

    fn delete(&self) -> Result<(), RegistrarError> {
        self.service
            .delete()
            .map_err(|error| RegistrarError::io("delete service", into_io(error)))
    }
}

fn start_type(start_type: StartType) -> ServiceStartType {
    match start_type {
        StartType::Boot => ServiceStartType::BootStart,
        StartType::System => ServiceStartType::SystemStart,
        StartType::Auto => ServiceStartType::AutoStart,
        StartType::Demand => ServiceStartType::OnDemand,
        StartType::Disabled => ServiceStartType::Disabled,
    }
}

/// Event log sources registered under the Application log.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryLogRegistrar;

impl RegistryLogRegistrar {
    fn key_path(name: &str) -> String {
        format!(r"{EVENT_LOG_KEY}\{name}")
    }
}

impl LogRegistrar for RegistryLogRegistrar {
    fn register_source(&self, source: &LogSource) -> Result<(), RegistrarError> {
        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        let (key, _) = hklm
            .create_subkey(Self::key_path(&source.name))
            .map_err(|error| RegistrarError::io("create log source", error))?;
        let write = |result: io::Result<()>| {
            result.map_err(|error| RegistrarError::io("create log source", error))
        };
        write(key.set_value(
            "EventMessageFile",
            &source.message_file.display().to_string(),
        ))?;
        write(key.set_value("TypesSupported", &source.types_supported))?;
        if let Some(categories) = &source.categories {
            write(key.set_value("CategoryCount", &categories.count))?;
            write(key.set_value(
                "CategoryMessageFile",
                &categories.message_file.display().to_string(),
            ))?;
        }
        info!(
            target: REGISTRAR_TARGET,
            source = %source.name,
            "event log source key written"
        );
        Ok(())
    }

    fn source_exists(&self, name: &str) -> Result<bool, RegistrarError> {
        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        match hklm.open_subkey_with_flags(Self::key_path(name), KEY_READ) {
            Ok(_) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(RegistrarError::io("open log source", error)),
        }
    }

    fn unregister_source(&self, name: &str) -> Result<(), RegistrarError> {
        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        hklm.delete_subkey_all(Self::key_path(name))
            .map_err(|error| RegistrarError::io("delete log source", error))
    }
}
