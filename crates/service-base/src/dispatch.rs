//! Process-wide dispatch slot.
//!
//! Supervisors deliver callbacks through free functions that carry no
//! context, so the active controller lives in a module-scoped slot. The slot
//! is claimed by [`ServiceLifecycleController::run`] and released when the
//! claim is dropped. Callers clone the entry and release the slot's lock
//! before invoking the controller, so hooks never run under it.

use std::ffi::OsString;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, warn};

use crate::controller::{CONTROLLER_TARGET, ServiceLifecycleController};
use crate::error::ServiceError;
use crate::status::ControlCode;
use crate::supervisor::Supervisor;

/// Outcome of delivering a control code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlDisposition {
    /// The controller acted on the control.
    Handled,
    /// The control is accepted but the current state does not permit it.
    Ignored,
    /// The service's capabilities exclude the control.
    NotAccepted,
    /// The code is not one the controller understands.
    NotImplemented,
    /// No controller is active in this process.
    NoActiveService,
}

#[derive(Clone)]
struct ActiveService {
    controller: Arc<ServiceLifecycleController>,
    supervisor: Arc<dyn Supervisor>,
}

static ACTIVE: Mutex<Option<ActiveService>> = Mutex::new(None);

/// Ownership of the dispatch slot; dropping it clears the slot.
#[derive(Debug)]
pub(crate) struct ActiveClaim {
    _private: (),
}

impl Drop for ActiveClaim {
    fn drop(&mut self) {
        ACTIVE.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

pub(crate) fn claim(
    controller: Arc<ServiceLifecycleController>,
    supervisor: Arc<dyn Supervisor>,
) -> Result<ActiveClaim, ServiceError> {
    let mut slot = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(active) = slot.as_ref() {
        return Err(ServiceError::DuplicateRegistration {
            active: active.controller.identity().name().to_owned(),
        });
    }
    *slot = Some(ActiveService {
        controller,
        supervisor,
    });
    Ok(ActiveClaim { _private: () })
}

fn active() -> Option<ActiveService> {
    ACTIVE.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Name of the service holding the slot, if any.
#[must_use]
pub fn active_service_name() -> Option<String> {
    active().map(|active| active.controller.identity().name().to_owned())
}

/// Entry point the supervisor calls once to start the active service.
pub fn service_main(arguments: Vec<OsString>) {
    let Some(active) = active() else {
        warn!(
            target: CONTROLLER_TARGET,
            "service main invoked without an active service"
        );
        return;
    };
    active
        .controller
        .service_main(active.supervisor.as_ref(), &arguments);
}

/// Entry point the supervisor calls for every inbound control code.
pub fn handle_control(code: ControlCode) -> ControlDisposition {
    let Some(active) = active() else {
        debug!(
            target: CONTROLLER_TARGET,
            control = ?code,
            "control received without an active service"
        );
        return ControlDisposition::NoActiveService;
    };
    active.controller.handle_control(code)
}

/// Runs a self-initiated stop of the active service on a new thread.
///
/// A stop requested while the service is still starting is held until the
/// start hook returns.
pub(crate) fn request_stop() -> io::Result<()> {
    let Some(active) = active() else {
        debug!(
            target: CONTROLLER_TARGET,
            "stop requested without an active service"
        );
        return Ok(());
    };
    if active.controller.defer_stop_while_starting() {
        debug!(
            target: CONTROLLER_TARGET,
            "stop deferred until the service is running"
        );
        return Ok(());
    }
    thread::Builder::new()
        .name(String::from("service-stop"))
        .spawn(move || {
            active.controller.stop();
        })
        .map(|_| ())
}
