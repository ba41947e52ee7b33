//! Shared doubles for the lifecycle and registrar suites.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ffi::OsString;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mockall::mock;

use crate::controller::{HookError, ServiceContext, ServiceHooks};
use crate::log_sink::{LogRecord, LogSink, LogSinkError, Severity};
use crate::registrar::{
    DatabaseAccess, DatabaseSession, LogRegistrar, LogSource, RegisteredService, RegistrarError,
    RegistrationRequest, ServiceDatabase, StopRequest,
};
use crate::status::ServiceState;
use crate::supervisor::RecordingStatusReporter;

static RUN_LOCK: Mutex<()> = Mutex::new(());

/// Serialises tests that claim the process-wide dispatch slot.
pub fn serialise_runs() -> MutexGuard<'static, ()> {
    RUN_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owned copy of a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    pub source: String,
    pub severity: Severity,
    pub category: u16,
    pub event_id: u32,
    pub message: String,
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingLogSink {
    records: Mutex<Vec<CapturedRecord>>,
}

impl RecordingLogSink {
    pub fn records(&self) -> Vec<CapturedRecord> {
        lock(&self.records).clone()
    }

    pub fn errors(&self) -> Vec<CapturedRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.severity == Severity::Error)
            .collect()
    }
}

impl LogSink for RecordingLogSink {
    fn write(&self, record: &LogRecord<'_>) -> Result<(), LogSinkError> {
        lock(&self.records).push(CapturedRecord {
            source: record.source.to_owned(),
            severity: record.severity,
            category: record.category,
            event_id: record.event_id,
            message: record.message.to_owned(),
        });
        Ok(())
    }
}

/// Hook invocation observed by [`RecordingHooks`], with the state last
/// reported to the supervisor when the hook ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCall {
    pub hook: &'static str,
    pub reported_state: Option<ServiceState>,
}

/// Hooks that record their calls and fail on request.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<HookCall>>,
    failing: Mutex<BTreeSet<&'static str>>,
    panicking: Mutex<BTreeSet<&'static str>>,
    start_arguments: Mutex<Vec<OsString>>,
    reporter: Mutex<Option<Arc<RecordingStatusReporter>>>,
    stop_from_start: AtomicBool,
}

impl RecordingHooks {
    /// Records the reporter so each call captures the last reported state.
    pub fn observe(&self, reporter: Arc<RecordingStatusReporter>) {
        *lock(&self.reporter) = Some(reporter);
    }

    pub fn fail(&self, hook: &'static str) {
        lock(&self.failing).insert(hook);
    }

    /// Makes `on_start` ask for a stop before it returns.
    pub fn request_stop_on_start(&self) {
        self.stop_from_start.store(true, Ordering::SeqCst);
    }

    pub fn panic_in(&self, hook: &'static str) {
        lock(&self.panicking).insert(hook);
    }

    pub fn calls(&self) -> Vec<HookCall> {
        lock(&self.calls).clone()
    }

    pub fn hook_names(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|call| call.hook).collect()
    }

    pub fn start_arguments(&self) -> Vec<OsString> {
        lock(&self.start_arguments).clone()
    }

    fn record(&self, hook: &'static str) -> Result<(), HookError> {
        let reported_state = lock(&self.reporter)
            .as_ref()
            .and_then(|reporter| reporter.last())
            .map(|status| status.state);
        lock(&self.calls).push(HookCall {
            hook,
            reported_state,
        });
        assert!(
            !lock(&self.panicking).contains(hook),
            "{hook} hook panicked on request"
        );
        if lock(&self.failing).contains(hook) {
            return Err(HookError::failed(format!("{hook} refused")));
        }
        Ok(())
    }
}

impl ServiceHooks for RecordingHooks {
    fn on_start(
        &self,
        context: &ServiceContext<'_>,
        arguments: &[OsString],
    ) -> Result<(), HookError> {
        lock(&self.start_arguments).extend(arguments.iter().cloned());
        self.record("start")?;
        if self.stop_from_start.load(Ordering::SeqCst) {
            context.request_stop()?;
        }
        Ok(())
    }

    fn on_stop(&self, _context: &ServiceContext<'_>) -> Result<(), HookError> {
        self.record("stop")
    }

    fn on_pause(&self, _context: &ServiceContext<'_>) -> Result<(), HookError> {
        self.record("pause")
    }

    fn on_continue(&self, _context: &ServiceContext<'_>) -> Result<(), HookError> {
        self.record("continue")
    }

    fn on_shutdown(&self, _context: &ServiceContext<'_>) -> Result<(), HookError> {
        self.record("shutdown")
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    request: RegistrationRequest,
    description: String,
    running: bool,
    states_after_stop: VecDeque<ServiceState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, MemoryEntry>,
    opened: Vec<DatabaseAccess>,
    fail_description: bool,
    deletions: Vec<String>,
}

/// Registration database held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.state).entries.contains_key(name)
    }

    pub fn request(&self, name: &str) -> Option<RegistrationRequest> {
        lock(&self.state)
            .entries
            .get(name)
            .map(|entry| entry.request.clone())
    }

    pub fn description(&self, name: &str) -> Option<String> {
        lock(&self.state)
            .entries
            .get(name)
            .map(|entry| entry.description.clone())
    }

    pub fn opened(&self) -> Vec<DatabaseAccess> {
        lock(&self.state).opened.clone()
    }

    pub fn deletions(&self) -> Vec<String> {
        lock(&self.state).deletions.clone()
    }

    /// Marks `name` as running; a stop then walks through `states`.
    pub fn set_running(&self, name: &str, states: impl IntoIterator<Item = ServiceState>) {
        if let Some(entry) = lock(&self.state).entries.get_mut(name) {
            entry.running = true;
            entry.states_after_stop = states.into_iter().collect();
        }
    }

    pub fn fail_descriptions(&self) {
        lock(&self.state).fail_description = true;
    }
}

impl ServiceDatabase for MemoryDatabase {
    fn open(&self, access: DatabaseAccess) -> Result<Box<dyn DatabaseSession>, RegistrarError> {
        lock(&self.state).opened.push(access);
        Ok(Box::new(self.clone()))
    }
}

impl DatabaseSession for MemoryDatabase {
    fn create_service(
        &self,
        request: &RegistrationRequest,
    ) -> Result<Box<dyn RegisteredService>, RegistrarError> {
        let mut state = lock(&self.state);
        if state.entries.contains_key(&request.name) {
            return Err(RegistrarError::DuplicateRegistration {
                name: request.name.clone(),
            });
        }
        state.entries.insert(
            request.name.clone(),
            MemoryEntry {
                request: request.clone(),
                description: String::new(),
                running: false,
                states_after_stop: VecDeque::new(),
            },
        );
        Ok(Box::new(MemoryService {
            name: request.name.clone(),
            database: self.clone(),
        }))
    }

    fn open_service(&self, name: &str) -> Result<Box<dyn RegisteredService>, RegistrarError> {
        if !self.contains(name) {
            return Err(RegistrarError::NotFound {
                name: name.to_owned(),
            });
        }
        Ok(Box::new(MemoryService {
            name: name.to_owned(),
            database: self.clone(),
        }))
    }
}

struct MemoryService {
    name: String,
    database: MemoryDatabase,
}

impl MemoryService {
    fn with_entry<T>(
        &self,
        apply: impl FnOnce(&mut MemoryEntry) -> T,
    ) -> Result<T, RegistrarError> {
        let mut state = lock(&self.database.state);
        state
            .entries
            .get_mut(&self.name)
            .map(apply)
            .ok_or_else(|| RegistrarError::NotFound {
                name: self.name.clone(),
            })
    }
}

impl RegisteredService for MemoryService {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_description(&self, description: &str) -> Result<(), RegistrarError> {
        if lock(&self.database.state).fail_description {
            return Err(RegistrarError::io(
                "set service description",
                io::Error::other("description rejected"),
            ));
        }
        self.with_entry(|entry| entry.description = description.to_owned())
    }

    fn request_stop(&self) -> Result<StopRequest, RegistrarError> {
        self.with_entry(|entry| {
            if entry.running {
                StopRequest::Accepted
            } else {
                StopRequest::NotRunning
            }
        })
    }

    fn query_state(&self) -> Result<ServiceState, RegistrarError> {
        self.with_entry(|entry| {
            let state = entry
                .states_after_stop
                .pop_front()
                .unwrap_or(ServiceState::Stopped);
            entry.running = state != ServiceState::Stopped;
            state
        })
    }

    fn delete(&self) -> Result<(), RegistrarError> {
        let mut state = lock(&self.database.state);
        state.entries.remove(&self.name);
        state.deletions.push(self.name.clone());
        Ok(())
    }
}

/// Log source store held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogRegistrar {
    sources: Arc<Mutex<BTreeMap<String, LogSource>>>,
    calls: Arc<Mutex<Vec<String>>>,
    fail_register: Arc<Mutex<bool>>,
}

impl MemoryLogRegistrar {
    pub fn source(&self, name: &str) -> Option<LogSource> {
        lock(&self.sources).get(name).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Makes registration write a partial source and then fail.
    pub fn fail_registration(&self) {
        *lock(&self.fail_register) = true;
    }

    fn note(&self, call: &str, name: &str) {
        lock(&self.calls).push(format!("{call}:{name}"));
    }
}

impl LogRegistrar for MemoryLogRegistrar {
    fn register_source(&self, source: &LogSource) -> Result<(), RegistrarError> {
        self.note("register", &source.name);
        lock(&self.sources).insert(source.name.clone(), source.clone());
        if *lock(&self.fail_register) {
            return Err(RegistrarError::io(
                "create log source",
                io::Error::from(io::ErrorKind::PermissionDenied),
            ));
        }
        Ok(())
    }

    fn source_exists(&self, name: &str) -> Result<bool, RegistrarError> {
        self.note("exists", name);
        Ok(lock(&self.sources).contains_key(name))
    }

    fn unregister_source(&self, name: &str) -> Result<(), RegistrarError> {
        self.note("unregister", name);
        lock(&self.sources).remove(name);
        Ok(())
    }
}

mock! {
    pub LogStore {}

    impl LogRegistrar for LogStore {
        fn register_source(&self, source: &LogSource) -> Result<(), RegistrarError>;
        fn source_exists(&self, name: &str) -> Result<bool, RegistrarError>;
        fn unregister_source(&self, name: &str) -> Result<(), RegistrarError>;
    }
}
