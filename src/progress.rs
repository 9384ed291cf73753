//! Per-list and campaign-wide progress
//!
//! Lists are consumed strictly in order and recipients within a list strictly
//! FIFO. Looking at the next recipient never consumes it: only a recorded
//! outcome moves the cursor, so a recipient that could not be attempted stays
//! pending for the next tick.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// An ordered batch of recipient addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientList {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl RecipientList {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            recipients,
        }
    }

    /// Read one address per line, skipping blank lines and `#` comments.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_file(
        id: impl Into<String>,
        name: impl Into<String>,
        path: &Path,
    ) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::new(id, name, parse_recipients(&contents)))
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.recipients.len()
    }
}

fn parse_recipients(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Result of asking for the next recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextRecipient {
    Recipient { address: String, list_id: String },
    /// The current list has nothing left, call [`ListProgressTracker::advance_list`]
    ListExhausted { list_id: String },
    AllListsCompleted,
}

/// Result of advancing past a completed list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// `completed` is done, `next` is now current
    Next { completed: String, next: String },
    /// `completed` was the last list
    AllListsCompleted { completed: String },
}

impl Advance {
    /// The list that was just completed
    #[must_use]
    pub fn completed(&self) -> &str {
        match self {
            Self::Next { completed, .. } | Self::AllListsCompleted { completed } => completed,
        }
    }
}

/// Campaign-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalCounters {
    pub sent: u64,
    pub failed: u64,
    pub total_recipients: u64,
    pub lists_completed: u64,
}

impl GlobalCounters {
    #[must_use]
    pub const fn attempted(&self) -> u64 {
        self.sent + self.failed
    }

    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.total_recipients.saturating_sub(self.attempted())
    }
}

/// Point-in-time view of the list being worked on
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshot {
    pub id: String,
    pub name: String,
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
    /// `(sent + failed) / total * 100`
    pub progress: f64,
    pub completed: bool,
    /// Recipients dropped by a stop
    pub discarded: u64,
}

#[derive(Debug)]
struct ListProgress {
    list: RecipientList,
    cursor: usize,
    sent: u64,
    failed: u64,
    completed: bool,
    discarded: u64,
}

impl ListProgress {
    fn attempted(&self) -> u64 {
        self.sent + self.failed
    }

    #[allow(clippy::cast_precision_loss, reason = "Percentages need no exactness")]
    fn progress(&self) -> f64 {
        let total = self.list.total();
        if total == 0 {
            100.0
        } else {
            self.attempted() as f64 / total as f64 * 100.0
        }
    }

    fn snapshot(&self) -> ListSnapshot {
        ListSnapshot {
            id: self.list.id.clone(),
            name: self.list.name.clone(),
            total: self.list.total() as u64,
            sent: self.sent,
            failed: self.failed,
            progress: self.progress(),
            completed: self.completed,
            discarded: self.discarded,
        }
    }
}

/// Tracks which recipient is next and how far every list has got
#[derive(Debug)]
pub struct ListProgressTracker {
    lists: Vec<ListProgress>,
    current: usize,
    completed_ids: Vec<String>,
    counters: GlobalCounters,
}

impl ListProgressTracker {
    /// Track `lists`, which are consumed in the given order
    #[must_use]
    pub fn new(lists: Vec<RecipientList>) -> Self {
        let total_recipients = lists.iter().map(|list| list.total() as u64).sum();

        Self {
            lists: lists
                .into_iter()
                .map(|list| ListProgress {
                    list,
                    cursor: 0,
                    sent: 0,
                    failed: 0,
                    completed: false,
                    discarded: 0,
                })
                .collect(),
            current: 0,
            completed_ids: Vec::new(),
            counters: GlobalCounters {
                total_recipients,
                ..GlobalCounters::default()
            },
        }
    }

    /// The next unattempted recipient of the current list
    #[must_use]
    pub fn next_recipient(&self) -> NextRecipient {
        let Some(progress) = self.lists.get(self.current) else {
            return NextRecipient::AllListsCompleted;
        };

        match progress.list.recipients.get(progress.cursor) {
            Some(address) if progress.discarded == 0 => NextRecipient::Recipient {
                address: address.clone(),
                list_id: progress.list.id.clone(),
            },
            _ => NextRecipient::ListExhausted {
                list_id: progress.list.id.clone(),
            },
        }
    }

    /// Returns `true` once every recipient of the current list was attempted
    #[must_use]
    pub fn current_exhausted(&self) -> bool {
        matches!(self.next_recipient(), NextRecipient::ListExhausted { .. })
    }

    /// Record the outcome for the recipient returned by [`Self::next_recipient`]
    pub fn record_outcome(&mut self, success: bool) {
        let Some(progress) = self.lists.get_mut(self.current) else {
            return;
        };
        if progress.cursor >= progress.list.total() {
            return;
        }

        progress.cursor += 1;
        if success {
            progress.sent += 1;
            self.counters.sent += 1;
        } else {
            progress.failed += 1;
            self.counters.failed += 1;
        }
    }

    /// Complete the current list and make the next one current.
    ///
    /// Returns `None` when every list was already completed.
    pub fn advance_list(&mut self) -> Option<Advance> {
        let progress = self.lists.get_mut(self.current)?;
        progress.completed = true;

        let completed = progress.list.id.clone();
        self.completed_ids.push(completed.clone());
        self.counters.lists_completed += 1;
        self.current += 1;

        Some(match self.lists.get(self.current) {
            Some(next) => Advance::Next {
                completed,
                next: next.list.id.clone(),
            },
            None => Advance::AllListsCompleted { completed },
        })
    }

    /// Drop whatever is left of the current list. Returns how many recipients were dropped.
    pub fn discard_remaining(&mut self) -> u64 {
        let Some(progress) = self.lists.get_mut(self.current) else {
            return 0;
        };

        let remaining = (progress.list.total() - progress.cursor) as u64;
        progress.discarded = remaining;
        remaining
    }

    #[must_use]
    pub const fn counters(&self) -> GlobalCounters {
        self.counters
    }

    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current
    }

    /// Position within the current list
    #[must_use]
    pub fn current_cursor(&self) -> usize {
        self.lists.get(self.current).map_or(0, |progress| progress.cursor)
    }

    #[must_use]
    pub fn completed_ids(&self) -> &[String] {
        &self.completed_ids
    }

    /// Snapshot of the current list, or the last list once all are done
    #[must_use]
    pub fn current_list(&self) -> Option<ListSnapshot> {
        self.lists
            .get(self.current)
            .or_else(|| self.lists.last())
            .map(ListProgress::snapshot)
    }

    #[must_use]
    pub fn lists(&self) -> Vec<ListSnapshot> {
        self.lists.iter().map(ListProgress::snapshot).collect()
    }
}
