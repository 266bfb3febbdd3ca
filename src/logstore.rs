//! # Diagnostic Log Store
//!
//! A bounded, process-wide ring buffer of structured events. Every component
//! of the bridge appends to it; the dashboard reads it back through the
//! `/api/v1/logs` endpoint. This exists alongside `tracing` because the
//! tracing output goes to the console, while this buffer is what the log
//! viewer displays for a live call.
//!
//! ## Guarantees:
//! - **Bounded**: never holds more than `LOG_CAPACITY` entries; the oldest
//!   entry is evicted when a new one arrives at capacity
//! - **Append-only**: entries are immutable after insertion
//! - **Snapshot reads**: `snapshot()` returns a point-in-time copy, newest
//!   first, safe to call while other connections are appending

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Maximum number of entries retained in the diagnostic window.
pub const LOG_CAPACITY: usize = 100;

/// Category of a diagnostic log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    /// General lifecycle information (connections, relay milestones)
    Info,
    /// Recoverable or fatal failures (malformed frames, transport errors)
    Error,
    /// AI session handshake and acknowledgment events
    Session,
    /// Completed assistant transcripts, kept for observability only
    Transcript,
}

/// One immutable diagnostic record.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// When the entry was appended
    pub timestamp: DateTime<Utc>,
    /// Coarse category used by the dashboard for filtering
    pub category: LogCategory,
    /// Human-readable message
    pub message: String,
    /// Optional structured payload (session parameters, error details, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Bounded, FIFO-evicting store of [`LogEntry`] records.
///
/// ## Thread Safety:
/// The buffer is written to from every connection's actor context, so it is
/// guarded by a `Mutex`. The lock is held only for the push or the copy,
/// never across I/O.
#[derive(Debug, Default)]
pub struct LogStore {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(LOG_CAPACITY)),
        }
    }

    /// Append one entry, evicting the oldest entry once the capacity is
    /// exceeded. This is a side effect only and never fails.
    pub fn append(
        &self,
        category: LogCategory,
        message: impl Into<String>,
        detail: Option<serde_json::Value>,
    ) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            category,
            message: message.into(),
            detail,
        };

        let mut entries = self.entries.lock().unwrap();
        // Newest first, so eviction pops from the back
        entries.push_front(entry);
        if entries.len() > LOG_CAPACITY {
            entries.pop_back();
        }
    }

    /// Point-in-time copy of the buffer, newest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// True when no entry has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
