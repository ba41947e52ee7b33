//! Severity-tagged log records written under a named source.
//!
//! Hooks and the controller write through [`ServiceLog`], which pairs the
//! service's source name with a shared [`LogSink`]. The default sink emits
//! `tracing` events; hosts with a native event log can supply their own.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{error, info, warn};

pub(crate) const LOG_SINK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::event_log");

/// Severity attached to a log record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    /// A failure.
    Error,
    /// Something unexpected that did not fail.
    Warning,
    /// Routine information.
    Information,
    /// A successful audited access.
    AuditSuccess,
    /// A failed audited access.
    AuditFailure,
}

/// One record handed to a [`LogSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord<'a> {
    /// Source name the record is filed under.
    pub source: &'a str,
    /// Record severity.
    pub severity: Severity,
    /// Category id; zero when uncategorised.
    pub category: u16,
    /// Event id.
    pub event_id: u32,
    /// Message body; may span several lines.
    pub message: &'a str,
}

/// Errors raised by log sinks.
#[derive(Debug, Error)]
pub enum LogSinkError {
    /// The sink rejected the record.
    #[error("failed to write log record for '{source_name}': {message}")]
    Write {
        /// Source the record was written under.
        source_name: String,
        /// Sink-specific description.
        message: String,
    },
}

/// Destination for service log records.
pub trait LogSink: Send + Sync {
    /// Appends one record.
    fn write(&self, record: &LogRecord<'_>) -> Result<(), LogSinkError>;
}

/// Sink that forwards records to `tracing`, one event per message line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write(&self, record: &LogRecord<'_>) -> Result<(), LogSinkError> {
        for line in record.message.lines() {
            match record.severity {
                Severity::Error | Severity::AuditFailure => error!(
                    target: LOG_SINK_TARGET,
                    source = record.source,
                    severity = %record.severity,
                    category = record.category,
                    event_id = record.event_id,
                    "{line}"
                ),
                Severity::Warning => warn!(
                    target: LOG_SINK_TARGET,
                    source = record.source,
                    severity = %record.severity,
                    category = record.category,
                    event_id = record.event_id,
                    "{line}"
                ),
                Severity::Information | Severity::AuditSuccess => info!(
                    target: LOG_SINK_TARGET,
                    source = record.source,
                    severity = %record.severity,
                    category = record.category,
                    event_id = record.event_id,
                    "{line}"
                ),
            }
        }
        Ok(())
    }
}

/// Cloneable handle that writes under a fixed source name.
#[derive(Clone)]
pub struct ServiceLog {
    source: Arc<str>,
    sink: Arc<dyn LogSink>,
}

impl ServiceLog {
    /// Binds `sink` to `source`.
    pub fn new(source: impl Into<Arc<str>>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            source: source.into(),
            sink,
        }
    }

    /// Source name records are filed under.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Writes a record. Sink failures are reported through `tracing` and
    /// otherwise ignored so logging never aborts a lifecycle transition.
    pub fn write(&self, severity: Severity, category: u16, event_id: u32, message: &str) {
        let record = LogRecord {
            source: &self.source,
            severity,
            category,
            event_id,
            message,
        };
        if let Err(error) = self.sink.write(&record) {
            warn!(
                target: LOG_SINK_TARGET,
                source = %self.source,
                error = %error,
                "log sink rejected record"
            );
        }
    }
}

impl fmt::Debug for ServiceLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceLog")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
