//! Unit tests for behaviour that spans modules.

use std::ffi::OsString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use mockall::predicate::eq;
use rstest::rstest;

use crate::controller::{HookError, ServiceContext, ServiceHooks, ServiceLifecycleController};
use crate::dispatch::{self, ControlDisposition};
use crate::identity::{Capabilities, ServiceIdentity};
use crate::log_sink::Severity;
use crate::registrar::{
    CommandLine, LogRegistration, LogSource, RegistrarError, RegistrationRequest,
    ServiceRegistrar,
};
use crate::status::{ControlCode, NO_ERROR, ServiceState};
use crate::supervisor::{RecordingStatusReporter, ScriptedSupervisor, Supervisor};
use crate::tests::support::{
    MemoryDatabase, MockLogStore, RecordingHooks, RecordingLogSink, serialise_runs,
};

fn controller(
    capabilities: Capabilities,
    hooks: Arc<RecordingHooks>,
    sink: Arc<RecordingLogSink>,
) -> Arc<ServiceLifecycleController> {
    let identity = ServiceIdentity::new("svcA")
        .expect("valid name")
        .with_display_name("Service A");
    Arc::new(ServiceLifecycleController::new(identity, capabilities, hooks).with_log_sink(sink))
}

#[test]
fn controls_without_an_active_service_are_rejected() {
    let _serial = serialise_runs();
    assert_eq!(dispatch::active_service_name(), None);
    assert_eq!(
        dispatch::handle_control(ControlCode::Stop),
        ControlDisposition::NoActiveService
    );
    assert!(dispatch::request_stop().is_ok());
}

#[test]
fn the_dispatch_slot_is_released_after_run() {
    let _serial = serialise_runs();
    let hooks = Arc::new(RecordingHooks::default());
    let sink = Arc::new(RecordingLogSink::default());
    let supervisor: Arc<dyn Supervisor> =
        Arc::new(ScriptedSupervisor::new(Vec::new(), vec![ControlCode::Stop]));

    let first = controller(Capabilities::default(), hooks.clone(), sink.clone());
    first.run(Arc::clone(&supervisor)).expect("first run");
    assert_eq!(dispatch::active_service_name(), None);

    let second = controller(Capabilities::default(), hooks, sink);
    second.run(supervisor).expect("second run");
}

#[test]
fn self_initiated_stop_ignores_the_stop_capability() {
    let _serial = serialise_runs();
    let hooks = Arc::new(RecordingHooks::default());
    let capabilities = Capabilities {
        can_stop: false,
        can_shutdown: false,
        can_pause_continue: false,
    };
    let supervisor = Arc::new(ScriptedSupervisor::new(Vec::new(), vec![ControlCode::Stop]));
    let service = controller(capabilities, hooks.clone(), Arc::default());

    Arc::clone(&service)
        .run(supervisor.clone() as Arc<dyn Supervisor>)
        .expect("run");
    assert_eq!(supervisor.dispositions(), vec![ControlDisposition::NotAccepted]);
    assert_eq!(service.status().state, ServiceState::Running);

    assert_eq!(service.stop(), ControlDisposition::Handled);
    assert_eq!(service.status().state, ServiceState::Stopped);
    assert_eq!(hooks.hook_names(), vec!["start", "stop"]);
}

#[rstest]
#[case(ControlCode::Other(128), ControlDisposition::NotImplemented)]
#[case(ControlCode::Interrogate, ControlDisposition::Handled)]
fn unusual_controls_are_classified(
    #[case] code: ControlCode,
    #[case] expected: ControlDisposition,
) {
    let _serial = serialise_runs();
    let supervisor = Arc::new(ScriptedSupervisor::new(Vec::new(), vec![code]));
    let service = controller(Capabilities::default(), Arc::default(), Arc::default());
    service
        .run(supervisor.clone() as Arc<dyn Supervisor>)
        .expect("run");
    assert_eq!(supervisor.dispositions(), vec![expected]);
}

#[test]
fn error_entries_name_the_operation() {
    let sink = Arc::new(RecordingLogSink::default());
    let service = controller(Capabilities::default(), Arc::default(), sink.clone());
    service.write_error_log_entry("flush queue", &"disk full");
    service.write_log_entry("heartbeat", Severity::Information, 101, 1);

    let records = sink.records();
    assert_eq!(records.len(), 2);
    let error = records.first().expect("error entry");
    assert_eq!(error.message, "flush queue failed: disk full");
    assert_eq!(error.severity, Severity::Error);
    assert_eq!(error.source, "svcA");
    let info = records.get(1).expect("information entry");
    assert_eq!((info.event_id, info.category), (101, 1));
}

#[test]
fn uninstalling_a_missing_service_never_touches_the_log_store() {
    let mut log_store = MockLogStore::new();
    log_store.expect_source_exists().never();
    log_store.expect_unregister_source().never();
    log_store.expect_register_source().never();

    let registrar = ServiceRegistrar::new(MemoryDatabase::default(), log_store);
    let error = registrar.uninstall("svcMissing").expect_err("service is absent");
    assert!(matches!(error, RegistrarError::NotFound { .. }));
}

#[test]
fn install_registers_the_derived_log_source() {
    let mut request =
        RegistrationRequest::new("svcA", CommandLine::new("/opt/svc/bin/svc", ["serve"]));
    request.log_registration = Some(LogRegistration {
        category_count: 2,
        resource_path: None,
    });
    let expected = LogSource::for_request(&request).expect("source requested");

    let mut log_store = MockLogStore::new();
    log_store
        .expect_register_source()
        .with(eq(expected))
        .times(1)
        .returning(|_| Ok(()));

    let database = MemoryDatabase::default();
    let registrar = ServiceRegistrar::new(database.clone(), log_store);
    let report = registrar.install(&request).expect("install succeeds");
    assert!(report.log_source_registered);
    assert!(database.contains("svcA"));
}

#[test]
fn failed_log_registration_cleans_up_partial_sources() {
    let mut request =
        RegistrationRequest::new("svcA", CommandLine::new("/opt/svc/bin/svc", ["serve"]));
    request.log_registration = Some(LogRegistration::default());

    let mut log_store = MockLogStore::new();
    log_store.expect_register_source().returning(|_| {
        Err(RegistrarError::io(
            "create log source",
            std::io::Error::other("registry unavailable"),
        ))
    });
    log_store
        .expect_source_exists()
        .with(eq("svcA"))
        .returning(|_| Ok(true));
    log_store
        .expect_unregister_source()
        .with(eq("svcA"))
        .times(1)
        .returning(|_| Ok(()));

    let database = MemoryDatabase::default();
    let registrar = ServiceRegistrar::new(database.clone(), log_store);
    let error = registrar.install(&request).expect_err("install fails");
    assert!(matches!(error, RegistrarError::RegistrationIo { .. }));
    assert!(!database.contains("svcA"));
    assert_eq!(database.deletions(), vec![String::from("svcA")]);
}

/// Hooks whose stop blocks until the test lets it finish.
#[derive(Debug)]
struct GatedStopHooks {
    gate: Barrier,
    stops: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl GatedStopHooks {
    fn new() -> Self {
        Self {
            gate: Barrier::new(2),
            stops: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }
}

impl ServiceHooks for GatedStopHooks {
    fn on_stop(&self, _context: &ServiceContext<'_>) -> Result<(), HookError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.gate.wait();
        self.gate.wait();
        Ok(())
    }

    fn on_shutdown(&self, _context: &ServiceContext<'_>) -> Result<(), HookError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hooks that report start progress a fixed number of times.
#[derive(Debug)]
struct SlowStartHooks {
    progress_reports: u32,
}

impl ServiceHooks for SlowStartHooks {
    fn on_start(
        &self,
        context: &ServiceContext<'_>,
        _arguments: &[OsString],
    ) -> Result<(), HookError> {
        for _ in 0..self.progress_reports {
            context.report_progress(Duration::from_secs(2));
        }
        Ok(())
    }
}

#[test]
fn a_stop_racing_an_in_flight_stop_is_ignored() {
    let hooks = Arc::new(GatedStopHooks::new());
    let identity = ServiceIdentity::new("svcA").expect("valid name");
    let service = Arc::new(ServiceLifecycleController::new(
        identity,
        Capabilities::default(),
        hooks.clone(),
    ));
    let supervisor = ScriptedSupervisor::new(Vec::new(), Vec::new());
    service.service_main(&supervisor, &[]);
    assert_eq!(service.status().state, ServiceState::Running);

    let first = thread::spawn({
        let service = Arc::clone(&service);
        move || service.handle_control(ControlCode::Stop)
    });
    hooks.gate.wait();
    assert_eq!(service.status().state, ServiceState::StopPending);
    assert_eq!(
        service.handle_control(ControlCode::Stop),
        ControlDisposition::Ignored
    );
    assert_eq!(
        service.handle_control(ControlCode::Shutdown),
        ControlDisposition::Ignored
    );
    hooks.gate.wait();

    assert_eq!(
        first.join().expect("stop thread completes"),
        ControlDisposition::Handled
    );
    assert_eq!(hooks.stops.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.shutdowns.load(Ordering::SeqCst), 0);
    let states = supervisor.reporter().states();
    let stop_pending = states
        .iter()
        .filter(|state| **state == ServiceState::StopPending)
        .count();
    assert_eq!(stop_pending, 1, "{states:?}");
    assert_eq!(states.last(), Some(&ServiceState::Stopped));
}

#[test]
fn handler_registration_failures_fail_the_run() {
    let _serial = serialise_runs();
    let sink = Arc::new(RecordingLogSink::default());
    let supervisor = Arc::new(
        ScriptedSupervisor::new(Vec::new(), vec![ControlCode::Stop]).failing_registration(5),
    );
    let service = controller(Capabilities::default(), Arc::default(), sink.clone());

    let error = Arc::clone(&service)
        .run(supervisor.clone() as Arc<dyn Supervisor>)
        .expect_err("registration fails");

    assert_eq!(error.os_code(), Some(5));
    assert_eq!(service.status().state, ServiceState::Stopped);
    assert!(supervisor.reporter().reports().is_empty());
    assert_eq!(dispatch::active_service_name(), None);
    assert!(
        sink.errors()
            .iter()
            .any(|record| record.message.starts_with("register_control_handler failed"))
    );
}

#[test]
fn stops_requested_during_start_run_after_the_start_hook() {
    let _serial = serialise_runs();
    let hooks = Arc::new(RecordingHooks::default());
    hooks.request_stop_on_start();
    let supervisor = Arc::new(ScriptedSupervisor::new(Vec::new(), Vec::new()));
    hooks.observe(supervisor.reporter());
    let service = controller(Capabilities::default(), hooks.clone(), Arc::default());

    Arc::clone(&service)
        .run(supervisor.clone() as Arc<dyn Supervisor>)
        .expect("run succeeds");

    let status = service.status();
    assert_eq!(status.state, ServiceState::Stopped);
    assert_eq!(status.win32_exit_code, NO_ERROR);
    assert_eq!(hooks.hook_names(), vec!["start", "stop"]);
    assert_eq!(
        supervisor.reporter().states(),
        vec![
            ServiceState::StartPending,
            ServiceState::Running,
            ServiceState::StopPending,
            ServiceState::Stopped,
        ]
    );
}

#[test]
fn rejected_status_reports_do_not_interrupt_the_lifecycle() {
    let _serial = serialise_runs();
    let reporter = Arc::new(RecordingStatusReporter::failing());
    let hooks = Arc::new(RecordingHooks::default());
    let supervisor = Arc::new(
        ScriptedSupervisor::new(Vec::new(), vec![ControlCode::Stop])
            .with_reporter(reporter.clone()),
    );
    let service = controller(Capabilities::default(), hooks.clone(), Arc::default());

    Arc::clone(&service)
        .run(supervisor.clone() as Arc<dyn Supervisor>)
        .expect("report failures are not fatal");

    assert_eq!(supervisor.dispositions(), vec![ControlDisposition::Handled]);
    assert_eq!(service.status().state, ServiceState::Stopped);
    assert_eq!(hooks.hook_names(), vec!["start", "stop"]);
    assert_eq!(
        reporter.states(),
        vec![
            ServiceState::StartPending,
            ServiceState::Running,
            ServiceState::StopPending,
            ServiceState::Stopped,
        ]
    );
}

#[test]
fn start_progress_advances_the_checkpoint() {
    let identity = ServiceIdentity::new("svcA").expect("valid name");
    let service = ServiceLifecycleController::new(
        identity,
        Capabilities::default(),
        Arc::new(SlowStartHooks {
            progress_reports: 2,
        }),
    );
    let supervisor = ScriptedSupervisor::new(Vec::new(), Vec::new());

    service.service_main(&supervisor, &[]);

    let reports = supervisor.reporter().reports();
    let pending: Vec<_> = reports
        .iter()
        .filter(|report| report.state == ServiceState::StartPending)
        .collect();
    let checkpoints: Vec<u32> = pending.iter().map(|report| report.checkpoint).collect();
    assert_eq!(checkpoints, vec![1, 2, 3]);
    assert_eq!(
        pending.last().map(|report| report.wait_hint),
        Some(Duration::from_secs(2))
    );
    let settled = reports.last().expect("running report");
    assert_eq!((settled.state, settled.checkpoint), (ServiceState::Running, 0));
}

#[test]
fn a_refused_pause_leaves_the_status_untouched() {
    let hooks = Arc::new(RecordingHooks::default());
    let service = controller(Capabilities::default(), hooks.clone(), Arc::default());
    let supervisor = ScriptedSupervisor::new(Vec::new(), Vec::new());
    service.service_main(&supervisor, &[]);
    let before = service.status();
    let reported = supervisor.reporter().reports().len();

    assert_eq!(
        service.handle_control(ControlCode::Pause),
        ControlDisposition::NotAccepted
    );

    assert_eq!(service.status(), before);
    assert_eq!(supervisor.reporter().reports().len(), reported);
    assert_eq!(hooks.hook_names(), vec!["start"]);
}
