//! Recording collaborators for orchestrator tests
//!
//! [`RecordingSender`] keeps every `(recipient, relay)` pair it was handed and
//! the highest number of sends it ever saw in flight at once.
//! [`RecordingRetirer`] keeps every retired list id.

#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use ahash::AHashSet;
use async_trait::async_trait;
use herald::{
    Campaign, ListRetirer, MessageSender, OrchestratorConfig, RecipientList, RetireError,
    SendError, SendOrchestrator,
};
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct RecordingSender {
    calls: Mutex<Vec<(String, String)>>,
    failing_relays: AHashSet<String>,
    failing_recipients: AHashSet<String>,
    /// Number of leading calls that fail regardless of relay
    fail_first: usize,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_relay(mut self, relay_id: &str) -> Self {
        self.failing_relays.insert(relay_id.to_string());
        self
    }

    #[must_use]
    pub fn failing_recipient(mut self, recipient: &str) -> Self {
        self.failing_recipients.insert(recipient.to_string());
        self
    }

    #[must_use]
    pub const fn fail_first(mut self, count: usize) -> Self {
        self.fail_first = count;
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn relays_used(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, relay)| relay.clone()).collect()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|(recipient, _)| recipient.clone())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(
        &self,
        recipient: &str,
        _subject: &str,
        _body: &[u8],
        relay_id: &str,
    ) -> Result<(), SendError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let call = {
            let mut calls = self.calls.lock();
            calls.push((recipient.to_string(), relay_id.to_string()));
            calls.len()
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if call <= self.fail_first
            || self.failing_relays.contains(relay_id)
            || self.failing_recipients.contains(recipient)
        {
            return Err(SendError::Rejected(format!("550 rejected by {relay_id}")));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingRetirer {
    retired: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingRetirer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn retired(&self) -> Vec<String> {
        self.retired.lock().clone()
    }
}

#[async_trait]
impl ListRetirer for RecordingRetirer {
    async fn retire(&self, list_id: &str) -> Result<(), RetireError> {
        self.retired.lock().push(list_id.to_string());

        if self.fail {
            return Err(RetireError {
                list_id: list_id.to_string(),
                reason: "retirement store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

pub fn recipients(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{prefix}{i}@example.com")).collect()
}

pub fn list(id: &str, count: usize) -> RecipientList {
    RecipientList::new(id, format!("List {id}"), recipients(id, count))
}

pub fn campaign() -> Campaign {
    Campaign::new("October update", "news@example.com", b"<p>Hello</p>".as_slice())
}

pub struct Harness {
    pub orchestrator: Arc<SendOrchestrator>,
    pub sender: Arc<RecordingSender>,
    pub retirer: Arc<RecordingRetirer>,
}

impl Harness {
    pub fn new(config: OrchestratorConfig, sender: RecordingSender) -> Self {
        Self::with_retirer(config, sender, RecordingRetirer::new())
    }

    pub fn with_retirer(
        config: OrchestratorConfig,
        sender: RecordingSender,
        retirer: RecordingRetirer,
    ) -> Self {
        let sender = Arc::new(sender);
        let retirer = Arc::new(retirer);
        let orchestrator = Arc::new(SendOrchestrator::new(
            config,
            Arc::clone(&sender) as Arc<dyn MessageSender>,
            Arc::clone(&retirer) as Arc<dyn ListRetirer>,
        ));

        Self {
            orchestrator,
            sender,
            retirer,
        }
    }
}
