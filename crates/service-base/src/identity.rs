//! Identity and capability declarations fixed when a controller is built.

use crate::error::ServiceError;
use crate::status::AcceptedControls;

/// Event id used by [`ServiceContext::write_error_log_entry`] when the
/// identity does not override it.
///
/// [`ServiceContext::write_error_log_entry`]: crate::ServiceContext::write_error_log_entry
pub const DEFAULT_ERROR_EVENT_ID: u32 = 0;

/// Immutable description of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    name: String,
    display_name: String,
    description: String,
    error_event_id: u32,
    error_category_id: u16,
}

impl ServiceIdentity {
    /// Builds an identity whose display name equals its name.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] when `name` is empty.
    pub fn new(name: impl Into<String>) -> Result<Self, ServiceError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ServiceError::Validation {
                reason: String::from("service name must not be empty"),
            });
        }
        Ok(Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            error_event_id: DEFAULT_ERROR_EVENT_ID,
            error_category_id: 0,
        })
    }

    /// Sets the human-readable display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Sets the free-form description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the event id and category used for error log entries.
    #[must_use]
    pub const fn with_error_event(mut self, event_id: u32, category_id: u16) -> Self {
        self.error_event_id = event_id;
        self.error_category_id = category_id;
        self
    }

    /// Service name used for registration and dispatch.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display name shown to operators.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Free-form description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Event id attached to error log entries.
    #[must_use]
    pub const fn error_event_id(&self) -> u32 {
        self.error_event_id
    }

    /// Category attached to error log entries.
    #[must_use]
    pub const fn error_category_id(&self) -> u16 {
        self.error_category_id
    }
}

/// Controls a service is prepared to honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capabilities {
    /// Accepts `Stop`.
    pub can_stop: bool,
    /// Accepts `Shutdown`.
    pub can_shutdown: bool,
    /// Accepts `Pause` and `Continue`.
    pub can_pause_continue: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            can_stop: true,
            can_shutdown: true,
            can_pause_continue: false,
        }
    }
}

impl Capabilities {
    /// Accepted-controls mask implied by the flags.
    #[must_use]
    pub fn accepted_controls(self) -> AcceptedControls {
        let mut controls = AcceptedControls::empty();
        controls.set(AcceptedControls::STOP, self.can_stop);
        controls.set(AcceptedControls::SHUTDOWN, self.can_shutdown);
        controls.set(AcceptedControls::PAUSE_CONTINUE, self.can_pause_continue);
        controls
    }
}
