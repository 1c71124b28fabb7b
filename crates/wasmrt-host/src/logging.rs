//! Guest logging.
//!
//! Messages logged by guest code through `env.log` are both captured in a
//! bounded [`GuestLogs`] buffer and emitted through `tracing` with
//! `guest_log = true`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use wasmrt_core::CallContext;

/// Log level of a guest message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// A captured guest log message.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// Module whose code emitted the message.
    pub module: String,

    /// Request id of the call chain.
    pub request_id: String,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Entries kept by [`GuestLogs::new`].
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Shared buffer of guest log messages.
///
/// Holds at most `capacity` entries; recording into a full buffer discards
/// the oldest one. Cloning shares the buffer.
#[derive(Debug, Clone)]
pub struct GuestLogs {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl Default for GuestLogs {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl GuestLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer keeping the latest `capacity` entries, at least one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of all captured entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Remove and return all captured entries.
    pub fn drain(&self) -> Vec<LogEntry> {
        self.entries.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}

/// Host implementation of guest logging.
pub struct LoggingHost;

impl LoggingHost {
    /// Record `message` for the call running under `ctx`.
    pub fn log(logs: &GuestLogs, ctx: &CallContext, level: LogLevel, message: &str) {
        let module = ctx.module().name();
        let request_id = ctx.request_id().to_string();

        match level {
            LogLevel::Debug => debug!(%request_id, module, guest_log = true, "{}", message),
            LogLevel::Info => info!(%request_id, module, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(%request_id, module, guest_log = true, "{}", message),
            LogLevel::Error => error!(%request_id, module, guest_log = true, "{}", message),
        }

        logs.push(LogEntry {
            level,
            message: message.to_string(),
            module: module.to_string(),
            request_id,
            timestamp: Instant::now(),
        });
    }
}

/// Convert a numeric log level to [`LogLevel`].
///
/// `0=debug, 1=info, 2=warn, 3=error`; unknown values map to `Info`.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}
