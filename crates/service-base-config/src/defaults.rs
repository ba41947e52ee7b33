use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::{data_local_dir, runtime_dir};

use crate::logging::LogFormat;

/// Directory component appended to every derived default path.
pub const APPLICATION_DIR: &str = "service-base";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Interval between status polls while a stopping service is awaited.
pub const DEFAULT_STOP_POLL_INTERVAL_MS: u64 = 1_000;

/// Upper bound on how long uninstall waits for a service to leave
/// `StopPending`.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 60;

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Serde default for [`crate::Config::stop_poll_interval_ms`].
pub fn default_stop_poll_interval_ms() -> u64 {
    DEFAULT_STOP_POLL_INTERVAL_MS
}

/// Serde default for [`crate::Config::stop_timeout_secs`].
pub fn default_stop_timeout_secs() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}

/// Computes the directory holding registration records.
///
/// Privileged processes use the system-wide state directory so every operator
/// sees the same registrations; unprivileged processes fall back to their own
/// data directory.
pub fn default_registry_directory() -> Utf8PathBuf {
    default_registry_directory_inner()
}

/// Computes the directory holding lock, pid and status files of running
/// services.
pub fn default_runtime_directory() -> Utf8PathBuf {
    default_runtime_directory_inner()
}

#[cfg(unix)]
fn default_registry_directory_inner() -> Utf8PathBuf {
    if is_privileged() {
        return Utf8PathBuf::from("/var/lib")
            .join(APPLICATION_DIR)
            .join("registry");
    }
    let mut base = data_local_dir()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(|| fallback_base_directory().join(user_namespace()));
    base.push(APPLICATION_DIR);
    base.push("registry");
    base
}

#[cfg(unix)]
fn default_runtime_directory_inner() -> Utf8PathBuf {
    if is_privileged() {
        return Utf8PathBuf::from("/run").join(APPLICATION_DIR);
    }
    let (mut base, apply_namespace) = match runtime_dir()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
    {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };
    base.push(APPLICATION_DIR);
    if apply_namespace {
        base.push(user_namespace());
    }
    base
}

#[cfg(unix)]
fn is_privileged() -> bool {
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    unsafe { geteuid() == 0 }
}

#[cfg(unix)]
fn user_namespace() -> String {
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(not(unix))]
fn default_registry_directory_inner() -> Utf8PathBuf {
    let mut base = fallback_base_directory();
    base.push(APPLICATION_DIR);
    base.push("registry");
    base
}

#[cfg(not(unix))]
fn default_runtime_directory_inner() -> Utf8PathBuf {
    let mut base = fallback_base_directory();
    base.push(APPLICATION_DIR);
    base.push("run");
    base
}
