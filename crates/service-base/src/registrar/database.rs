//! Seams between the registrar and the platform's registration stores.

use std::path::PathBuf;

use super::errors::RegistrarError;
use super::request::RegistrationRequest;
use crate::status::ServiceState;

/// Severity mask registered for a log source: error, warning and
/// information.
pub const LOG_TYPES_SUPPORTED: u32 = 0x0001 | 0x0002 | 0x0004;

/// Rights requested when opening the registration database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseAccess {
    /// Read and modify existing entries.
    Connect,
    /// Also create new entries.
    Create,
}

/// Outcome of asking a registered service to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopRequest {
    /// The stop control was delivered.
    Accepted,
    /// The service was not running.
    NotRunning,
}

/// Entry point to a registration database.
pub trait ServiceDatabase {
    /// Opens a session with `access` rights.
    fn open(&self, access: DatabaseAccess) -> Result<Box<dyn DatabaseSession>, RegistrarError>;
}

/// Open session against the registration database; closed on drop.
pub trait DatabaseSession {
    /// Creates the entry described by `request`.
    ///
    /// Fails with [`RegistrarError::DuplicateRegistration`] when the name is
    /// taken, leaving the existing entry untouched.
    fn create_service(
        &self,
        request: &RegistrationRequest,
    ) -> Result<Box<dyn RegisteredService>, RegistrarError>;

    /// Opens the entry named `name`, or [`RegistrarError::NotFound`].
    fn open_service(&self, name: &str) -> Result<Box<dyn RegisteredService>, RegistrarError>;
}

/// Handle to one registration entry; released on drop.
pub trait RegisteredService {
    /// Service name.
    fn name(&self) -> &str;

    /// Replaces the description.
    fn set_description(&self, description: &str) -> Result<(), RegistrarError>;

    /// Delivers a stop control to the running service.
    fn request_stop(&self) -> Result<StopRequest, RegistrarError>;

    /// Reads the current state of the service.
    fn query_state(&self) -> Result<ServiceState, RegistrarError>;

    /// Marks the entry for deletion.
    fn delete(&self) -> Result<(), RegistrarError>;
}

/// Category table registered with a log source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRegistration {
    /// Number of categories.
    pub count: u32,
    /// Resource holding the category names.
    pub message_file: PathBuf,
}

/// Log source registered alongside a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    /// Source name; equal to the service name.
    pub name: String,
    /// Resource holding the message table.
    pub message_file: PathBuf,
    /// Severity mask the source emits.
    pub types_supported: u32,
    /// Category table; `None` when the service declares no categories.
    pub categories: Option<CategoryRegistration>,
}

impl LogSource {
    /// Describes the log source `request` asks for, if any.
    #[must_use]
    pub fn for_request(request: &RegistrationRequest) -> Option<Self> {
        let registration = request.log_registration.as_ref()?;
        let message_file = request.log_resource_path()?;
        let categories = (registration.category_count > 0).then(|| CategoryRegistration {
            count: registration.category_count,
            message_file: message_file.clone(),
        });
        Some(Self {
            name: request.name.clone(),
            message_file,
            types_supported: LOG_TYPES_SUPPORTED,
            categories,
        })
    }
}

/// Store of log source registrations.
pub trait LogRegistrar {
    /// Registers `source`, replacing any previous registration.
    fn register_source(&self, source: &LogSource) -> Result<(), RegistrarError>;

    /// Reports whether a source named `name` is registered.
    fn source_exists(&self, name: &str) -> Result<bool, RegistrarError>;

    /// Removes the source named `name`.
    fn unregister_source(&self, name: &str) -> Result<(), RegistrarError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::request::{CommandLine, LogRegistration};

    #[test]
    fn log_source_carries_categories_only_when_declared() {
        let mut request =
            RegistrationRequest::new("svcA", CommandLine::new("/opt/svc/bin/svc", ["serve"]));
        assert_eq!(LogSource::for_request(&request), None);

        request.log_registration = Some(LogRegistration::default());
        let source = LogSource::for_request(&request).expect("source requested");
        assert_eq!(source.types_supported, 7);
        assert_eq!(source.categories, None);

        request.log_registration = Some(LogRegistration {
            category_count: 1,
            resource_path: Some(PathBuf::from("/opt/svc/share/messages")),
        });
        let source = LogSource::for_request(&request).expect("source requested");
        assert_eq!(source.message_file, PathBuf::from("/opt/svc/share/messages"));
        assert_eq!(
            source.categories,
            Some(CategoryRegistration {
                count: 1,
                message_file: PathBuf::from("/opt/svc/share/messages"),
            })
        );
    }
}
