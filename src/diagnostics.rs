//! Engine diagnostics
//!
//! Counters the audio thread bumps without blocking, plus a small ring of
//! human-readable engine events (device fallback, overloads, finished takes)
//! for a UI to show.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Maximum number of entries to keep in the log
const MAX_LOG_SIZE: usize = 100;

/// Counters shared with the audio thread
#[derive(Debug, Default)]
pub struct Counters {
    /// Callbacks that missed their deadline or could not take the graph
    pub overloads: AtomicU64,
    /// Scheduled MIDI events that did not fit in a block's event buffer
    pub dropped_events: AtomicU64,
    /// Buffers rendered since the graph was created
    pub buffers_rendered: AtomicU64,
}

impl Counters {
    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsReport {
    pub overloads: u64,
    pub capture_overruns: u64,
    pub dropped_events: u64,
    pub buffers_rendered: u64,
}

impl DiagnosticsReport {
    pub fn collect(counters: &Counters, capture_overruns: u64) -> Self {
        Self {
            overloads: counters.overloads.load(Ordering::Relaxed),
            capture_overruns,
            dropped_events: counters.dropped_events.load(Ordering::Relaxed),
            buffers_rendered: counters.buffers_rendered.load(Ordering::Relaxed),
        }
    }
}

/// Severity of an event log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warning,
}

/// A single event log entry
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: EventLevel,
    pub message: String,
    /// Timestamp when the event occurred
    pub timestamp: Instant,
}

/// Ring buffer of engine events (newest at back)
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create a new event log with default capacity
    pub fn new() -> Self {
        Self::with_capacity(MAX_LOG_SIZE)
    }

    /// Create a new event log with custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(EventLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(EventLevel::Warning, message.into());
    }

    fn push(&mut self, level: EventLevel, message: String) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }

    /// Get entries in reverse chronological order (newest first)
    pub fn entries_recent_first(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_log_is_empty() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn test_entries_in_reverse_order() {
        let mut log = EventLog::new();
        log.info("first");
        log.warn("second");
        log.info("third");

        let entries: Vec<_> = log.entries_recent_first().collect();
        assert_eq!(entries[0].message, "third");
        assert_eq!(entries[1].level, EventLevel::Warning);
        assert_eq!(entries[2].message, "first");
    }

    #[test]
    fn test_capacity_limit() {
        let mut log = EventLog::with_capacity(3);
        for msg in ["a", "b", "c", "d"] {
            log.info(msg);
        }
        assert_eq!(log.len(), 3);
        let newest: Vec<_> = log.entries_recent_first().map(|e| e.message.as_str()).collect();
        assert_eq!(newest, vec!["d", "c", "b"]);

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_report_reads_counters() {
        let counters = Counters::default();
        Counters::add(&counters.overloads, 2);
        Counters::add(&counters.dropped_events, 0);
        let report = DiagnosticsReport::collect(&counters, 5);
        assert_eq!(report.overloads, 2);
        assert_eq!(report.capture_overruns, 5);
        assert_eq!(report.dropped_events, 0);
    }
}
