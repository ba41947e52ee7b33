//! The sample service: lifecycle hooks plus a placeholder worker.
//!
//! `on_start` validates the run mode recorded on the process command line,
//! reports the configuration path and launches a worker thread. The worker
//! logs once and then idles until `on_stop` (or `on_shutdown`) raises the
//! stop flag, after which it signals that it has finished.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use service_base::{
    Capabilities, HookError, ServiceContext, ServiceError, ServiceHooks, ServiceIdentity,
    ServiceLifecycleController, ServiceLog, Severity,
};

pub(crate) const SAMPLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

/// Service name registered with the supervisor.
pub const SERVICE_NAME: &str = "sample-service";
/// Display name registered with the supervisor.
pub const DISPLAY_NAME: &str = "Sample service";
/// Description registered with the supervisor.
pub const DESCRIPTION: &str =
    "Sample service hosted by the service-base lifecycle library.";
/// Configuration file read when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.cfg";
/// Verb that runs the service under the supervisor.
pub const SERVE_VERB: &str = "serve";
/// Verb that runs the service as a regular process.
pub const RUN_VERB: &str = "run";

/// The single event category the service logs under.
pub const CATEGORY_SERVICE: u16 = 1;
/// Event id of lifecycle failures.
pub const MSG_SVC_FAILURE: u32 = 100;
/// Event id of start-up messages.
pub const MSG_STARTUP: u32 = 101;
/// Event id of messages from the worker.
pub const MSG_OPERATION: u32 = 102;
/// Event id of shutdown messages.
pub const MSG_SHUTDOWN: u32 = 103;

const WORK_INTERVAL: Duration = Duration::from_secs(5);
const STOP_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const STOP_WAIT_HINT: Duration = Duration::from_secs(3);

/// How the process was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunRequest {
    pub(crate) as_service: bool,
    pub(crate) config_path: PathBuf,
}

/// Reads the run mode and `-config` value from a process command line.
pub(crate) fn parse_run_request(command_line: &[OsString]) -> Result<RunRequest, HookError> {
    let mut tokens = command_line.iter().skip(1).map(OsString::as_os_str);
    let as_service = match tokens.next().and_then(OsStr::to_str) {
        Some(mode) if mode.eq_ignore_ascii_case(SERVE_VERB) => true,
        Some(mode) if mode.eq_ignore_ascii_case(RUN_VERB) => false,
        _ => {
            return Err(HookError::InvalidArguments {
                reason: String::from("no run mode specified"),
            });
        }
    };

    let mut config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
    if let Some(option) = tokens.next() {
        let text = option.to_string_lossy();
        let flag = text.trim_start_matches('-');
        if let Some((name, value)) = flag.split_once('=')
            && name.eq_ignore_ascii_case("config")
        {
            config_path = PathBuf::from(value);
        } else if flag.eq_ignore_ascii_case("config") {
            let value = tokens.next().ok_or_else(|| HookError::InvalidArguments {
                reason: String::from("no configuration file name"),
            })?;
            config_path = PathBuf::from(value);
        }
    }

    Ok(RunRequest {
        as_service,
        config_path,
    })
}

#[derive(Debug, Default)]
struct StopFlag {
    raised: Mutex<bool>,
    wake: Condvar,
}

impl StopFlag {
    fn raise(&self) {
        *self.raised.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wake.notify_all();
    }

    /// Waits up to `interval`; returns whether the flag is raised.
    fn wait(&self, interval: Duration) -> bool {
        let raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        let (raised, _) = self
            .wake
            .wait_timeout_while(raised, interval, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        *raised
    }
}

struct Worker {
    stop: Arc<StopFlag>,
    stopped: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Hooks of the sample service.
#[derive(Debug)]
pub struct SampleService {
    work_interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("thread", &self.handle.thread().name())
            .finish_non_exhaustive()
    }
}

impl Default for SampleService {
    fn default() -> Self {
        Self::new(WORK_INTERVAL)
    }
}

impl SampleService {
    /// Service whose worker wakes every `work_interval`.
    #[must_use]
    pub const fn new(work_interval: Duration) -> Self {
        Self {
            work_interval,
            worker: Mutex::new(None),
        }
    }

    fn spawn_worker(&self, log: ServiceLog) -> Result<(), HookError> {
        let stop = Arc::new(StopFlag::default());
        let (stopped_tx, stopped) = mpsc::channel();
        let worker_stop = Arc::clone(&stop);
        let interval = self.work_interval;
        let handle = thread::Builder::new()
            .name(String::from("sample-worker"))
            .spawn(move || work(&log, &worker_stop, interval, &stopped_tx))
            .map_err(|source| HookError::Io {
                operation: "spawn worker thread",
                source,
            })?;
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(Worker {
            stop,
            stopped,
            handle,
        });
        Ok(())
    }

    fn stop_worker(&self, context: &ServiceContext<'_>) -> Result<(), HookError> {
        let Some(worker) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            debug!(target: SAMPLE_TARGET, "no worker to stop");
            return Ok(());
        };
        worker.stop.raise();
        loop {
            match worker.stopped.recv_timeout(STOP_PROGRESS_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => context.report_progress(STOP_WAIT_HINT),
            }
        }
        worker
            .handle
            .join()
            .map_err(|_| HookError::failed("sample worker panicked"))
    }
}

fn work(log: &ServiceLog, stop: &StopFlag, interval: Duration, stopped: &Sender<()>) {
    log.write(
        Severity::Information,
        CATEGORY_SERVICE,
        MSG_STARTUP,
        "Sample Service has started.",
    );
    log.write(
        Severity::Information,
        CATEGORY_SERVICE,
        MSG_OPERATION,
        "Sample Service is pretending to be working:\n\
         Starting fake job 1...\n\
         Starting fake job 2...\n\
         Starting fake job 3...",
    );
    while !stop.wait(interval) {}
    if stopped.send(()).is_err() {
        warn!(target: SAMPLE_TARGET, "stop waiter went away before the worker finished");
    }
    log.write(
        Severity::Information,
        CATEGORY_SERVICE,
        MSG_SHUTDOWN,
        "Sample Service has stopped.",
    );
}

impl ServiceHooks for SampleService {
    fn on_start(
        &self,
        context: &ServiceContext<'_>,
        arguments: &[OsString],
    ) -> Result<(), HookError> {
        debug!(target: SAMPLE_TARGET, ?arguments, "start arguments received");
        context.write_log_entry(
            "Sample Service is starting...",
            Severity::Information,
            MSG_STARTUP,
            CATEGORY_SERVICE,
        );

        let request = match parse_run_request(context.command_line()) {
            Ok(request) => request,
            Err(error) => {
                context.write_log_entry(
                    &format!("Sample Service:\n{error}"),
                    Severity::Error,
                    MSG_STARTUP,
                    CATEGORY_SERVICE,
                );
                return Err(error);
            }
        };

        context.write_log_entry(
            &format!(
                "Sample Service\n The service is pretending to read configuration from {}",
                request.config_path.display()
            ),
            Severity::Information,
            MSG_STARTUP,
            CATEGORY_SERVICE,
        );
        let mode = if request.as_service {
            "Sample Service will run as a service."
        } else {
            "Sample Service is running as a regular process."
        };
        context.write_log_entry(mode, Severity::Information, MSG_STARTUP, CATEGORY_SERVICE);

        self.spawn_worker(context.log()).inspect_err(|_| {
            context.write_log_entry(
                "Sample Service couldn't create worker thread.",
                Severity::Error,
                MSG_STARTUP,
                CATEGORY_SERVICE,
            );
        })
    }

    fn on_stop(&self, context: &ServiceContext<'_>) -> Result<(), HookError> {
        context.write_log_entry(
            "Sample Service is stopping",
            Severity::Information,
            MSG_SHUTDOWN,
            CATEGORY_SERVICE,
        );
        self.stop_worker(context)
    }

    fn on_shutdown(&self, context: &ServiceContext<'_>) -> Result<(), HookError> {
        context.write_log_entry(
            "Sample Service is shutting down with the host",
            Severity::Information,
            MSG_SHUTDOWN,
            CATEGORY_SERVICE,
        );
        self.stop_worker(context)
    }
}

/// Builds the controller hosting [`SampleService`].
///
/// `command_line` is the program name followed by the verb and its options.
pub fn sample_controller(
    command_line: Vec<OsString>,
    hooks: Arc<SampleService>,
) -> Result<ServiceLifecycleController, ServiceError> {
    let identity = ServiceIdentity::new(SERVICE_NAME)?
        .with_display_name(DISPLAY_NAME)
        .with_description(DESCRIPTION)
        .with_error_event(MSG_SVC_FAILURE, CATEGORY_SERVICE);
    Ok(
        ServiceLifecycleController::new(identity, Capabilities::default(), hooks)
            .with_command_line(command_line),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn os(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case(&["sample-service", "serve"], true, "config.cfg")]
    #[case(&["sample-service", "RUN"], false, "config.cfg")]
    #[case(&["sample-service", "serve", "--config", "/etc/a.cfg"], true, "/etc/a.cfg")]
    #[case(&["sample-service", "run", "-config=/etc/b.cfg"], false, "/etc/b.cfg")]
    fn run_requests_are_parsed(
        #[case] command_line: &[&str],
        #[case] as_service: bool,
        #[case] config: &str,
    ) {
        let request = parse_run_request(&os(command_line)).expect("valid command line");
        assert_eq!(request.as_service, as_service);
        assert_eq!(request.config_path, PathBuf::from(config));
    }

    #[rstest]
    #[case(&["sample-service"], "no run mode specified")]
    #[case(&["sample-service", "install"], "no run mode specified")]
    #[case(&["sample-service", "serve", "--config"], "no configuration file name")]
    fn malformed_command_lines_are_rejected(#[case] command_line: &[&str], #[case] reason: &str) {
        let error = parse_run_request(&os(command_line)).expect_err("command line is invalid");
        assert!(error.to_string().contains(reason), "{error}");
    }

    #[test]
    fn stop_flag_wakes_waiters() {
        let flag = StopFlag::default();
        assert!(!flag.wait(Duration::from_millis(1)));
        flag.raise();
        assert!(flag.wait(Duration::from_secs(5)));
    }
}
