//! Bounded in-memory record of orchestration events
//!
//! Entries are kept oldest-first internally. [`EventLog::snapshot`] returns
//! them newest-first for display, [`EventLog::chronological`] oldest-first
//! for audit. Once the capacity is reached the oldest entry is evicted.

use std::{
    collections::VecDeque,
    fmt::{Display, Formatter},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub recipient: Option<String>,
    pub relay_id: Option<String>,
}

impl LogEntry {
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            recipient: None,
            relay_id: None,
        }
    }

    #[must_use]
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    #[must_use]
    pub fn with_relay(mut self, relay_id: impl Into<String>) -> Self {
        self.relay_id = Some(relay_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl EventLog {
    /// A log holding at most `capacity` entries (at least one)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        }
    }

    /// Append an entry, mirroring it to `tracing` at the matching level
    pub fn append(&mut self, entry: LogEntry) {
        let recipient = entry.recipient.as_deref().unwrap_or("-");
        let relay = entry.relay_id.as_deref().unwrap_or("-");
        match entry.severity {
            Severity::Debug => tracing::debug!(recipient, relay, "{}", entry.message),
            Severity::Info | Severity::Success => {
                tracing::info!(recipient, relay, "{}", entry.message);
            }
            Severity::Warning => tracing::warn!(recipient, relay, "{}", entry.message),
            Severity::Error => tracing::error!(recipient, relay, "{}", entry.message),
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries newest-first
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().rev().cloned().collect()
    }

    /// Entries oldest-first
    #[must_use]
    pub fn chronological(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// The most recent entry at or above `severity`
    #[must_use]
    pub fn latest_at_least(&self, severity: Severity) -> Option<&LogEntry> {
        self.entries.iter().rev().find(|entry| entry.severity >= severity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
