//! Orchestrator phases and the snapshot types handed to readers

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    event_log::LogEntry,
    progress::{GlobalCounters, ListSnapshot},
    relay::RelaySnapshot,
};

/// Lifecycle of a send run
///
/// ```text
/// Idle ──start──> Running ──pause──> Paused
///                  │   ^               │
///                  │   └────resume─────┘
///                  │                   │
///                  ├──stop──> Stopped <┘ stop
///                  └──(all lists done)──> Completed
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
}

impl Phase {
    /// `Stopped` and `Completed` end a run; only `reset` leaves them
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed)
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        })
    }
}

/// What is being sent. Never modified once a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Campaign {
    pub subject: String,
    pub sender: String,
    pub body: Arc<[u8]>,
    /// Lists to send to, in order. Empty means every supplied list, as supplied.
    pub list_ids: Vec<String>,
}

impl Campaign {
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        sender: impl Into<String>,
        body: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            subject: subject.into(),
            sender: sender.into(),
            body: body.into(),
            list_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_lists<I, S>(mut self, list_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.list_ids = list_ids.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// A single send attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAttempt {
    pub recipient: String,
    pub list_id: String,
    pub relay_id: String,
    pub outcome: AttemptOutcome,
    pub error_detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SendAttempt {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing happened, the orchestrator is not running
    NotRunning(Phase),
    /// A message was handed to a relay
    Attempted(SendAttempt),
    /// No relay was eligible; the recipient stays pending
    NoRelayAvailable { recipient: String },
    /// An exhausted list was retired and the next one is current
    ListCompleted { list_id: String },
    /// The final list was retired
    Completed,
}

/// Consistent copy of the orchestrator state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorState {
    pub phase: Phase,
    pub current_list_index: usize,
    pub current_list_cursor: usize,
    pub completed_list_ids: Vec<String>,
    pub global_counters: GlobalCounters,
    /// Attempts per second of running time
    pub achieved_rate: f64,
    /// Seconds until every pending recipient has been attempted
    pub estimated_time_remaining: f64,
    pub current_list: Option<ListSnapshot>,
    pub relays: Vec<RelaySnapshot>,
    /// The latest ticks found no eligible relay
    pub stalled: bool,
    pub last_warning: Option<LogEntry>,
}

impl OrchestratorState {
    pub(crate) fn idle(last_warning: Option<LogEntry>) -> Self {
        Self {
            phase: Phase::Idle,
            current_list_index: 0,
            current_list_cursor: 0,
            completed_list_ids: Vec::new(),
            global_counters: GlobalCounters::default(),
            achieved_rate: 0.0,
            estimated_time_remaining: 0.0,
            current_list: None,
            relays: Vec::new(),
            stalled: false,
            last_warning,
        }
    }
}
