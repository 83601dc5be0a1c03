//! Event sink
//!
//! Connections and everything built on them report through an [`EventSink`]
//! handed in at construction instead of a global logger. [`LogSink`] forwards
//! to the `log` facade; [`MemorySink`] keeps records for inspection.

use log::{Level, LevelFilter};
use std::fmt;
use std::sync::Mutex;

/// Receiver of structured log events
pub trait EventSink: Send + Sync {
    /// Record one event
    fn record(&self, level: Level, target: &str, args: fmt::Arguments<'_>);

    /// Whether events at `level` are kept at all
    fn enabled(&self, _level: Level) -> bool {
        true
    }

    fn error(&self, target: &str, args: fmt::Arguments<'_>) {
        if self.enabled(Level::Error) {
            self.record(Level::Error, target, args);
        }
    }

    fn warn(&self, target: &str, args: fmt::Arguments<'_>) {
        if self.enabled(Level::Warn) {
            self.record(Level::Warn, target, args);
        }
    }

    fn info(&self, target: &str, args: fmt::Arguments<'_>) {
        if self.enabled(Level::Info) {
            self.record(Level::Info, target, args);
        }
    }

    fn debug(&self, target: &str, args: fmt::Arguments<'_>) {
        if self.enabled(Level::Debug) {
            self.record(Level::Debug, target, args);
        }
    }

    fn trace(&self, target: &str, args: fmt::Arguments<'_>) {
        if self.enabled(Level::Trace) {
            self.record(Level::Trace, target, args);
        }
    }
}

/// Forwards events to the `log` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, level: Level, target: &str, args: fmt::Arguments<'_>) {
        log::log!(target: target, level, "{}", args);
    }

    fn enabled(&self, level: Level) -> bool {
        level <= log::max_level()
    }
}

/// One event kept by [`MemorySink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// Keeps events in memory, every level unless told otherwise
#[derive(Debug)]
pub struct MemorySink {
    records: Mutex<Vec<EventRecord>>,
    level: LevelFilter,
}

impl Default for MemorySink {
    fn default() -> Self {
        MemorySink::with_level(LevelFilter::Trace)
    }
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    /// Keep only events at `level` or more severe
    pub fn with_level(level: LevelFilter) -> Self {
        MemorySink {
            records: Mutex::new(Vec::new()),
            level,
        }
    }

    /// Snapshot of the recorded events
    pub fn records(&self) -> Vec<EventRecord> {
        self.lock().clone()
    }

    /// Messages of the recorded events, in order
    pub fn messages(&self) -> Vec<String> {
        self.lock().iter().map(|r| r.message.clone()).collect()
    }

    /// Whether any message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lock().iter().any(|r| r.message.contains(needle))
    }

    /// Number of events at exactly `level`
    pub fn count_at(&self, level: Level) -> usize {
        self.lock().iter().filter(|r| r.level == level).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<EventRecord>> {
        // A panic while holding the lock cannot leave the Vec half-written
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for MemorySink {
    fn record(&self, level: Level, target: &str, args: fmt::Arguments<'_>) {
        self.lock().push(EventRecord {
            level,
            target: target.to_string(),
            message: args.to_string(),
        });
    }

    fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }
}
