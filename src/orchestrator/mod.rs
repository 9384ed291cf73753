//! The sequential send orchestrator
//!
//! A single scheduler drives every send: each tick takes the next pending
//! recipient, picks an eligible relay, hands the message to the sender and
//! records the outcome. At most one attempt is ever in flight.
//!
//! Two locks are involved:
//! - `tick_guard` (async) is held for a whole tick, including the external
//!   send. `pause` and `stop` take it too, so they wait for an in-flight
//!   attempt to settle and always land between two ticks.
//! - `inner` (sync) holds the state and is never held across an `.await`,
//!   so state reads are never blocked by a slow relay.

mod state;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, watch},
    time::Instant,
};

pub use state::{AttemptOutcome, Campaign, OrchestratorState, Phase, SendAttempt, TickOutcome};

use crate::{
    Signal,
    config::OrchestratorConfig,
    delivery::{ListRetirer, MessageSender},
    error::{ConfigurationError, OrchestratorError, SendError},
    event_log::{EventLog, LogEntry, Severity},
    internal, outgoing,
    pacer::{Pacer, observed_rate},
    progress::{
        Advance, GlobalCounters, ListProgressTracker, ListSnapshot, NextRecipient, RecipientList,
    },
    relay::{HealthTransition, Relay, RelayHealthTracker, RelaySelector},
};

/// Everything that only exists while a run does
#[derive(Debug)]
struct Run {
    campaign: Arc<Campaign>,
    relays: RelayHealthTracker,
    selector: RelaySelector,
    progress: ListProgressTracker,
    /// Running time accumulated before the current running stretch
    active_elapsed: Duration,
    running_since: Option<Instant>,
    no_relay_streak: u32,
}

impl Run {
    fn elapsed(&self, now: Instant) -> Duration {
        self.active_elapsed
            + self
                .running_since
                .map_or(Duration::ZERO, |since| now.saturating_duration_since(since))
    }

    fn halt_clock(&mut self, now: Instant) {
        self.active_elapsed = self.elapsed(now);
        self.running_since = None;
    }
}

#[derive(Debug, Default)]
struct Inner {
    phase: Phase,
    run: Option<Run>,
    log: EventLog,
}

/// What a tick decided while holding the state lock
enum Step {
    Send {
        recipient: String,
        list_id: String,
        relay_id: String,
        campaign: Arc<Campaign>,
    },
    FinishLists,
    Done(TickOutcome),
}

/// Drives a campaign across relays and recipient lists
pub struct SendOrchestrator {
    config: OrchestratorConfig,
    sender: Arc<dyn MessageSender>,
    retirer: Arc<dyn ListRetirer>,
    inner: Mutex<Inner>,
    tick_guard: tokio::sync::Mutex<()>,
    phase_tx: watch::Sender<Phase>,
}

impl std::fmt::Debug for SendOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendOrchestrator")
            .field("config", &self.config)
            .field("phase", &self.inner.lock().phase)
            .finish_non_exhaustive()
    }
}

impl SendOrchestrator {
    /// Create an idle orchestrator.
    ///
    /// The configuration is validated by [`Self::start`].
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        sender: Arc<dyn MessageSender>,
        retirer: Arc<dyn ListRetirer>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(Phase::Idle);

        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                run: None,
                log: EventLog::with_capacity(config.log_capacity),
            }),
            config,
            sender,
            retirer,
            tick_guard: tokio::sync::Mutex::new(()),
            phase_tx,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn set_phase(&self, inner: &mut Inner, phase: Phase) {
        internal!(level = DEBUG, from = %inner.phase, to = %phase, "Phase transition");
        inner.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    fn invalid(command: &'static str, phase: Phase) -> OrchestratorError {
        internal!(level = WARN, command, %phase, "Rejected command");
        OrchestratorError::InvalidTransition { command, phase }
    }

    /// Order `lists` by the campaign's targets, or keep them as supplied
    /// when the campaign names none.
    fn target_lists(
        campaign: &Campaign,
        mut lists: Vec<RecipientList>,
    ) -> Result<Vec<RecipientList>, ConfigurationError> {
        if campaign.list_ids.is_empty() {
            return Ok(lists);
        }

        campaign
            .list_ids
            .iter()
            .map(|id| {
                lists
                    .iter()
                    .position(|list| &list.id == id)
                    .map(|position| lists.swap_remove(position))
                    .ok_or_else(|| ConfigurationError::UnknownList(id.clone()))
            })
            .collect()
    }

    fn validate_relays(relays: &[Relay]) -> Result<(), ConfigurationError> {
        if relays.is_empty() {
            return Err(ConfigurationError::NoRelays);
        }

        let mut seen = ahash::AHashSet::with_capacity(relays.len());
        for relay in relays {
            if !seen.insert(relay.id.as_str()) {
                return Err(ConfigurationError::DuplicateRelay(relay.id.clone()));
            }
        }

        Ok(())
    }

    /// Begin sending `campaign` to `lists` through `relays`.
    ///
    /// # Errors
    ///
    /// Fails if the orchestrator is not idle, or if the configuration or
    /// inputs are unusable. The orchestrator stays idle in both cases.
    pub fn start(
        &self,
        campaign: Campaign,
        relays: Vec<Relay>,
        lists: Vec<RecipientList>,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Idle {
            return Err(Self::invalid("start", inner.phase));
        }

        self.config.validate()?;
        Self::validate_relays(&relays)?;

        let lists = Self::target_lists(&campaign, lists)?;
        if lists.is_empty() {
            return Err(ConfigurationError::NoRecipientLists.into());
        }

        let progress = ListProgressTracker::new(lists);
        let counters = progress.counters();
        if counters.total_recipients == 0 {
            return Err(ConfigurationError::NoRecipients.into());
        }

        let list_count = progress.lists().len();
        let relay_count = relays.len();
        inner.run = Some(Run {
            campaign: Arc::new(campaign),
            relays: RelayHealthTracker::new(self.config.health.clone(), &relays),
            selector: RelaySelector::new(self.config.random_seed),
            progress,
            active_elapsed: Duration::ZERO,
            running_since: Some(Instant::now()),
            no_relay_streak: 0,
        });
        inner.log.append(LogEntry::new(
            Severity::Info,
            format!(
                "Campaign started: {} recipients across {list_count} lists, {relay_count} relays, {} rotation at {}/s",
                counters.total_recipients, self.config.rotation, self.config.messages_per_second
            ),
        ));
        self.set_phase(&mut inner, Phase::Running);

        Ok(())
    }

    /// Halt after the in-flight attempt, if any, has settled.
    ///
    /// # Errors
    ///
    /// Fails unless the orchestrator is running.
    pub async fn pause(&self) -> Result<(), OrchestratorError> {
        let _guard = self.tick_guard.lock().await;
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Running {
            return Err(Self::invalid("pause", inner.phase));
        }

        if let Some(run) = inner.run.as_mut() {
            run.halt_clock(Instant::now());
        }
        inner.log.append(LogEntry::new(Severity::Info, "Sending paused"));
        self.set_phase(&mut inner, Phase::Paused);

        Ok(())
    }

    /// # Errors
    ///
    /// Fails unless the orchestrator is paused.
    pub async fn resume(&self) -> Result<(), OrchestratorError> {
        let _guard = self.tick_guard.lock().await;
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Paused {
            return Err(Self::invalid("resume", inner.phase));
        }

        if let Some(run) = inner.run.as_mut() {
            run.running_since = Some(Instant::now());
        }
        inner.log.append(LogEntry::new(Severity::Info, "Sending resumed"));
        self.set_phase(&mut inner, Phase::Running);

        Ok(())
    }

    /// End the run, discarding whatever is left of the current list.
    ///
    /// An attempt already in flight is allowed to settle first.
    ///
    /// # Errors
    ///
    /// Fails unless the orchestrator is running or paused.
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        let _guard = self.tick_guard.lock().await;
        let mut inner = self.inner.lock();
        if !matches!(inner.phase, Phase::Running | Phase::Paused) {
            return Err(Self::invalid("stop", inner.phase));
        }

        let Inner { run, log, .. } = &mut *inner;
        if let Some(run) = run.as_mut() {
            run.halt_clock(Instant::now());
            let discarded = run.progress.discard_remaining();
            log.append(LogEntry::new(
                Severity::Info,
                format!(
                    "Campaign stopped: {discarded} recipients of the current list discarded, {} not attempted",
                    run.progress.counters().remaining()
                ),
            ));
        }
        self.set_phase(&mut inner, Phase::Stopped);

        Ok(())
    }

    /// Return a stopped or completed orchestrator to idle so it can start again.
    ///
    /// The event log is kept.
    ///
    /// # Errors
    ///
    /// Fails unless the current run has ended.
    pub async fn reset(&self) -> Result<(), OrchestratorError> {
        let _guard = self.tick_guard.lock().await;
        let mut inner = self.inner.lock();
        if !inner.phase.is_terminal() {
            return Err(Self::invalid("reset", inner.phase));
        }

        inner.run = None;
        inner.log.append(LogEntry::new(Severity::Debug, "Orchestrator reset"));
        self.set_phase(&mut inner, Phase::Idle);

        Ok(())
    }

    /// Enable or disable a relay for the rest of the run.
    ///
    /// # Errors
    ///
    /// Fails if there is no run or the relay is unknown.
    pub fn set_relay_active(&self, relay_id: &str, active: bool) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock();
        let phase = inner.phase;
        let Inner { run, log, .. } = &mut *inner;
        let Some(run) = run.as_mut() else {
            return Err(Self::invalid("set relay state", phase));
        };

        run.relays.set_active(relay_id, active)?;
        log.append(
            LogEntry::new(
                Severity::Info,
                if active { "Relay enabled" } else { "Relay disabled" },
            )
            .with_relay(relay_id),
        );

        Ok(())
    }

    /// Perform one scheduling step. A no-op unless running.
    pub async fn tick(&self) -> TickOutcome {
        let _guard = self.tick_guard.lock().await;

        match self.plan_tick(Instant::now()) {
            Step::Done(outcome) => outcome,
            Step::FinishLists => {
                let advances = {
                    let mut inner = self.inner.lock();
                    self.complete_exhausted_lists(&mut inner, Instant::now())
                };
                self.retire_lists(&advances).await;

                advances
                    .last()
                    .map_or(TickOutcome::Completed, |advance| match advance {
                        Advance::Next { completed, .. } => TickOutcome::ListCompleted {
                            list_id: completed.clone(),
                        },
                        Advance::AllListsCompleted { .. } => TickOutcome::Completed,
                    })
            }
            Step::Send {
                recipient,
                list_id,
                relay_id,
                campaign,
            } => {
                outgoing!(recipient = %recipient, relay = %relay_id, list = %list_id, "Sending");
                let result = self
                    .sender
                    .send(&recipient, &campaign.subject, &campaign.body, &relay_id)
                    .await;

                let (attempt, advances) = self.record_attempt(recipient, list_id, relay_id, result);
                self.retire_lists(&advances).await;

                TickOutcome::Attempted(attempt)
            }
        }
    }

    fn plan_tick(&self, now: Instant) -> Step {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Running {
            return Step::Done(TickOutcome::NotRunning(inner.phase));
        }

        let Inner { run, log, .. } = &mut *inner;
        let Some(run) = run.as_mut() else {
            return Step::Done(TickOutcome::NotRunning(Phase::Running));
        };

        let (recipient, list_id) = match run.progress.next_recipient() {
            NextRecipient::Recipient { address, list_id } => (address, list_id),
            NextRecipient::ListExhausted { .. } | NextRecipient::AllListsCompleted => {
                return Step::FinishLists;
            }
        };

        let eligible = run.relays.list_eligible(now);
        for candidate in eligible.iter().filter(|candidate| candidate.promoted) {
            log.append(
                LogEntry::new(Severity::Info, "Relay back from standby").with_relay(&candidate.id),
            );
        }

        let Some(relay) = run.selector.next(self.config.rotation, &eligible) else {
            run.no_relay_streak = run.no_relay_streak.saturating_add(1);

            let message = run.relays.next_standby_expiry().map_or_else(
                || "No relay available, recipient remains pending".to_string(),
                |until| {
                    format!(
                        "No relay available, recipient remains pending (next relay in {}s)",
                        until.saturating_duration_since(now).as_secs()
                    )
                },
            );
            log.append(LogEntry::new(Severity::Warning, message).with_recipient(&recipient));

            if self.config.stall_warning_ticks > 0
                && run.no_relay_streak == self.config.stall_warning_ticks
            {
                log.append(LogEntry::new(
                    Severity::Error,
                    format!(
                        "Relay pool exhausted for {} consecutive ticks, sending is blocked until a relay becomes eligible",
                        run.no_relay_streak
                    ),
                ));
            }

            return Step::Done(TickOutcome::NoRelayAvailable { recipient });
        };

        run.no_relay_streak = 0;
        Step::Send {
            recipient,
            list_id,
            relay_id: relay.id.clone(),
            campaign: Arc::clone(&run.campaign),
        }
    }

    /// Fold a settled attempt into the trackers. Lists exhausted by it are
    /// completed under the same lock and returned for retirement.
    fn record_attempt(
        &self,
        recipient: String,
        list_id: String,
        relay_id: String,
        result: Result<(), SendError>,
    ) -> (SendAttempt, Vec<Advance>) {
        let now = Instant::now();
        let attempt = SendAttempt {
            recipient,
            list_id,
            relay_id,
            outcome: if result.is_ok() {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Failure
            },
            error_detail: result.as_ref().err().map(|error| error.detail().to_string()),
            timestamp: Utc::now(),
        };

        let mut inner = self.inner.lock();
        let Inner { run, log, .. } = &mut *inner;
        let Some(run) = run.as_mut() else {
            return (attempt, Vec::new());
        };

        run.progress.record_outcome(attempt.succeeded());

        let health = match &result {
            Ok(()) => run.relays.record_success(&attempt.relay_id, now).map(|()| None),
            Err(error) => run
                .relays
                .record_failure(&attempt.relay_id, error.detail(), now)
                .map(Some),
        };

        match &result {
            Ok(()) => log.append(
                LogEntry::new(Severity::Success, "Sent")
                    .with_recipient(&attempt.recipient)
                    .with_relay(&attempt.relay_id),
            ),
            Err(error) => log.append(
                LogEntry::new(Severity::Error, format!("Send failed: {error}"))
                    .with_recipient(&attempt.recipient)
                    .with_relay(&attempt.relay_id),
            ),
        }

        match health {
            Ok(Some(HealthTransition::Standby { backoff })) => log.append(
                LogEntry::new(
                    Severity::Warning,
                    format!("Relay on standby for {}s", backoff.as_secs()),
                )
                .with_relay(&attempt.relay_id),
            ),
            Ok(Some(HealthTransition::Failed)) => log.append(
                LogEntry::new(Severity::Error, "Relay failed, excluded for the rest of the run")
                    .with_relay(&attempt.relay_id),
            ),
            Ok(Some(HealthTransition::Unchanged) | None) => {}
            Err(error) => log.append(
                LogEntry::new(Severity::Error, error.to_string()).with_relay(&attempt.relay_id),
            ),
        }

        let advances = self.complete_exhausted_lists(&mut inner, now);
        (attempt, advances)
    }

    /// Complete every exhausted list at the head of the queue, entering
    /// `Completed` after the last one. Must run under the same lock as the
    /// outcome that exhausted the list.
    fn complete_exhausted_lists(&self, inner: &mut Inner, now: Instant) -> Vec<Advance> {
        let Inner { run, log, .. } = &mut *inner;
        let Some(run) = run.as_mut() else {
            return Vec::new();
        };

        let mut advances = Vec::new();
        while run.progress.current_exhausted() {
            let Some(advance) = run.progress.advance_list() else {
                break;
            };

            let finished = run
                .progress
                .lists()
                .into_iter()
                .find(|list| list.id == advance.completed());
            if let Some(list) = finished {
                log.append(LogEntry::new(
                    Severity::Success,
                    format!(
                        "List {} completed: {} sent, {} failed",
                        list.name, list.sent, list.failed
                    ),
                ));
            }

            let done = matches!(advance, Advance::AllListsCompleted { .. });
            advances.push(advance);
            if done {
                break;
            }
        }

        if advances
            .last()
            .is_some_and(|advance| matches!(advance, Advance::AllListsCompleted { .. }))
        {
            run.halt_clock(now);
            let counters = run.progress.counters();
            log.append(LogEntry::new(
                Severity::Success,
                format!(
                    "Campaign completed: {} sent, {} failed",
                    counters.sent, counters.failed
                ),
            ));
            self.set_phase(inner, Phase::Completed);
        }

        advances
    }

    /// Hand completed lists to the retirer, in completion order
    async fn retire_lists(&self, advances: &[Advance]) {
        for advance in advances {
            if let Err(error) = self.retirer.retire(advance.completed()).await {
                self.inner
                    .lock()
                    .log
                    .append(LogEntry::new(Severity::Warning, error.to_string()));
            }
        }
    }

    /// Consistent copy of the current state
    #[must_use]
    pub fn get_state(&self) -> OrchestratorState {
        let inner = self.inner.lock();
        let last_warning = inner.log.latest_at_least(Severity::Warning).cloned();
        let Some(run) = inner.run.as_ref() else {
            return OrchestratorState::idle(last_warning);
        };

        let now = Instant::now();
        let counters = run.progress.counters();
        let achieved_rate = observed_rate(counters.attempted(), run.elapsed(now).as_secs_f64());
        let pacing_rate = if achieved_rate > 0.0 {
            achieved_rate.min(self.config.messages_per_second)
        } else {
            self.config.messages_per_second
        };
        #[allow(clippy::cast_precision_loss, reason = "Counts are far below 2^52")]
        let estimated_time_remaining = if matches!(inner.phase, Phase::Running | Phase::Paused) {
            counters.remaining() as f64 / pacing_rate
        } else {
            0.0
        };

        OrchestratorState {
            phase: inner.phase,
            current_list_index: run.progress.current_index(),
            current_list_cursor: run.progress.current_cursor(),
            completed_list_ids: run.progress.completed_ids().to_vec(),
            global_counters: counters,
            achieved_rate,
            estimated_time_remaining,
            current_list: run.progress.current_list(),
            relays: run.relays.snapshot(now),
            stalled: run.no_relay_streak > 0,
            last_warning,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    #[must_use]
    pub fn global_stats(&self) -> GlobalCounters {
        self.inner
            .lock()
            .run
            .as_ref()
            .map(|run| run.progress.counters())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn current_list(&self) -> Option<ListSnapshot> {
        self.inner
            .lock()
            .run
            .as_ref()
            .and_then(|run| run.progress.current_list())
    }

    /// Event log, newest first
    #[must_use]
    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.lock().log.snapshot()
    }

    /// Event log, oldest first
    #[must_use]
    pub fn chronological_logs(&self) -> Vec<LogEntry> {
        self.inner.lock().log.chronological()
    }

    /// Receive every phase change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    /// The scheduler: tick once per pacing slot while running.
    ///
    /// Returns once the run is stopped or completed. A shutdown signal stops
    /// an active run after its in-flight attempt settles.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured rate is invalid.
    pub async fn run(
        &self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), OrchestratorError> {
        let mut pacer = Pacer::new(self.config.messages_per_second)?;
        let mut phase_rx = self.phase_tx.subscribe();

        internal!(level = DEBUG, interval = ?pacer.interval(), "Scheduler starting");

        loop {
            let phase = *phase_rx.borrow_and_update();
            match phase {
                Phase::Stopped | Phase::Completed => break,
                Phase::Running => {
                    tokio::select! {
                        () = pacer.wait_for_slot() => {
                            let outcome = self.tick().await;
                            internal!(?outcome, "Tick");
                        }
                        changed = phase_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        sig = shutdown.recv() => {
                            self.handle_shutdown(sig).await;
                            break;
                        }
                    }
                }
                Phase::Idle | Phase::Paused => {
                    tokio::select! {
                        changed = phase_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        sig = shutdown.recv() => {
                            self.handle_shutdown(sig).await;
                            break;
                        }
                    }
                }
            }
        }

        internal!(level = DEBUG, phase = %self.phase(), "Scheduler finished");
        Ok(())
    }

    async fn handle_shutdown(&self, sig: Result<Signal, broadcast::error::RecvError>) {
        match sig {
            Ok(Signal::Shutdown | Signal::Finalised) => {
                internal!(level = INFO, "Scheduler received shutdown signal");
            }
            Err(error) => {
                internal!(level = ERROR, %error, "Scheduler shutdown channel error");
            }
        }

        if matches!(self.phase(), Phase::Running | Phase::Paused)
            && let Err(error) = self.stop().await
        {
            internal!(level = WARN, %error, "Stop on shutdown was rejected");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        delivery::{DryRunSender, LoggingRetirer},
        error::RetireError,
    };

    struct FailingRetirer;

    #[async_trait]
    impl ListRetirer for FailingRetirer {
        async fn retire(&self, list_id: &str) -> Result<(), RetireError> {
            Err(RetireError {
                list_id: list_id.to_string(),
                reason: "storage offline".to_string(),
            })
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl MessageSender for AlwaysFails {
        async fn send(&self, _: &str, _: &str, _: &[u8], _: &str) -> Result<(), SendError> {
            Err(SendError::Rejected("554 denied".to_string()))
        }
    }

    fn orchestrator(config: OrchestratorConfig) -> SendOrchestrator {
        SendOrchestrator::new(
            config,
            Arc::new(DryRunSender::default()),
            Arc::new(LoggingRetirer),
        )
    }

    fn list(id: &str, count: usize) -> RecipientList {
        RecipientList::new(
            id,
            id.to_uppercase(),
            (0..count).map(|i| format!("{id}{i}@example.com")).collect(),
        )
    }

    fn campaign() -> Campaign {
        Campaign::new("Subject", "from@example.com", b"body".as_slice())
    }

    #[test]
    fn test_start_validates_inputs() {
        let orchestrator = orchestrator(OrchestratorConfig::default());

        assert_eq!(
            orchestrator.start(campaign(), vec![], vec![list("a", 1)]),
            Err(ConfigurationError::NoRelays.into())
        );
        assert_eq!(
            orchestrator.start(campaign(), vec![Relay::new("r")], vec![]),
            Err(ConfigurationError::NoRecipientLists.into())
        );
        assert_eq!(
            orchestrator.start(campaign(), vec![Relay::new("r")], vec![list("a", 0)]),
            Err(ConfigurationError::NoRecipients.into())
        );
        assert_eq!(
            orchestrator.start(
                campaign(),
                vec![Relay::new("r"), Relay::new("r")],
                vec![list("a", 1)]
            ),
            Err(ConfigurationError::DuplicateRelay("r".to_string()).into())
        );
        assert_eq!(
            orchestrator.start(
                campaign().with_lists(["missing"]),
                vec![Relay::new("r")],
                vec![list("a", 1)]
            ),
            Err(ConfigurationError::UnknownList("missing".to_string()).into())
        );
        assert_eq!(orchestrator.phase(), Phase::Idle);
    }

    #[test]
    fn test_start_rejects_invalid_rate() {
        let orchestrator = orchestrator(OrchestratorConfig {
            messages_per_second: 0.0,
            ..Default::default()
        });

        let err = orchestrator
            .start(campaign(), vec![Relay::new("r")], vec![list("a", 1)])
            .unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::Configuration(ConfigurationError::InvalidRate(0.0))
        );
        assert_eq!(orchestrator.phase(), Phase::Idle);
    }

    #[test]
    fn test_campaign_targets_order_lists() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator
            .start(
                campaign().with_lists(["b", "a"]),
                vec![Relay::new("r")],
                vec![list("a", 1), list("b", 2), list("c", 3)],
            )
            .unwrap();

        let state = orchestrator.get_state();
        assert_eq!(state.current_list.unwrap().id, "b");
        assert_eq!(state.global_counters.total_recipients, 3);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let orchestrator = orchestrator(OrchestratorConfig::default());

        assert!(orchestrator.pause().await.unwrap_err().is_invalid_transition());
        assert!(orchestrator.resume().await.unwrap_err().is_invalid_transition());
        assert!(orchestrator.stop().await.unwrap_err().is_invalid_transition());
        assert!(orchestrator.reset().await.unwrap_err().is_invalid_transition());

        orchestrator
            .start(campaign(), vec![Relay::new("r")], vec![list("a", 2)])
            .unwrap();
        assert_eq!(
            orchestrator.start(campaign(), vec![Relay::new("r")], vec![list("a", 2)]),
            Err(OrchestratorError::InvalidTransition {
                command: "start",
                phase: Phase::Running
            })
        );
        assert!(orchestrator.resume().await.is_err());

        orchestrator.pause().await.unwrap();
        assert!(orchestrator.pause().await.is_err());
        orchestrator.stop().await.unwrap();

        assert!(orchestrator.resume().await.is_err());
        assert!(orchestrator.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_reset_allows_a_new_run() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator
            .start(campaign(), vec![Relay::new("r")], vec![list("a", 1)])
            .unwrap();

        assert!(matches!(orchestrator.tick().await, TickOutcome::Attempted(_)));
        assert_eq!(orchestrator.phase(), Phase::Completed);

        orchestrator.reset().await.unwrap();
        assert_eq!(orchestrator.get_state().phase, Phase::Idle);
        assert_eq!(orchestrator.global_stats(), GlobalCounters::default());

        orchestrator
            .start(campaign(), vec![Relay::new("r")], vec![list("b", 2)])
            .unwrap();
        assert_eq!(orchestrator.global_stats().total_recipients, 2);
    }

    #[test]
    fn test_recording_the_last_attempt_completes_the_run() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator
            .start(
                campaign(),
                vec![Relay::new("r")],
                vec![list("a", 1), list("empty", 0)],
            )
            .unwrap();

        let (attempt, advances) = orchestrator.record_attempt(
            "a0@example.com".to_string(),
            "a".to_string(),
            "r".to_string(),
            Ok(()),
        );

        // Retirement is left to the caller, completion is not
        assert!(attempt.succeeded());
        assert_eq!(
            advances.iter().map(Advance::completed).collect::<Vec<_>>(),
            ["a", "empty"]
        );
        let state = orchestrator.get_state();
        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.global_counters.attempted(), 1);
        assert_eq!(state.global_counters.lists_completed, 2);
    }

    #[tokio::test]
    async fn test_retire_failure_is_logged_not_fatal() {
        let orchestrator = SendOrchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(DryRunSender::default()),
            Arc::new(FailingRetirer),
        );
        orchestrator
            .start(
                campaign(),
                vec![Relay::new("r")],
                vec![list("a", 1), list("b", 1)],
            )
            .unwrap();

        orchestrator.tick().await;
        orchestrator.tick().await;

        assert_eq!(orchestrator.phase(), Phase::Completed);
        let warnings: Vec<String> = orchestrator
            .chronological_logs()
            .into_iter()
            .filter(|entry| entry.severity == Severity::Warning)
            .map(|entry| entry.message)
            .collect();
        assert_eq!(
            warnings,
            [
                "Failed to retire list a: storage offline",
                "Failed to retire list b: storage offline"
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_lists_are_skipped() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator
            .start(
                campaign(),
                vec![Relay::new("r")],
                vec![list("empty", 0), list("a", 1), list("tail", 0)],
            )
            .unwrap();

        assert_eq!(
            orchestrator.tick().await,
            TickOutcome::ListCompleted {
                list_id: "empty".to_string()
            }
        );
        assert!(matches!(orchestrator.tick().await, TickOutcome::Attempted(_)));

        // The trailing empty list is completed in the same tick
        let state = orchestrator.get_state();
        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.completed_list_ids, ["empty", "a", "tail"]);
        assert_eq!(state.global_counters.lists_completed, 3);
    }

    #[tokio::test]
    async fn test_relay_failure_progression_is_logged() {
        let orchestrator = SendOrchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(AlwaysFails),
            Arc::new(LoggingRetirer),
        );
        orchestrator
            .start(campaign(), vec![Relay::new("r")], vec![list("a", 5)])
            .unwrap();

        for _ in 0..3 {
            orchestrator.tick().await;
        }

        let state = orchestrator.get_state();
        assert_eq!(state.global_counters.failed, 3);
        assert_eq!(state.relays[0].failure_count, 3);
        assert_eq!(
            state.relays[0].last_error.as_deref(),
            Some("554 denied")
        );
        let warning = state.last_warning.unwrap();
        assert_eq!(warning.message, "Relay on standby for 30s");
        assert_eq!(warning.relay_id.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_set_relay_active() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        assert!(orchestrator.set_relay_active("r", false).is_err());

        orchestrator
            .start(campaign(), vec![Relay::new("r")], vec![list("a", 2)])
            .unwrap();
        assert_eq!(
            orchestrator.set_relay_active("nope", false),
            Err(OrchestratorError::UnknownRelay("nope".to_string()))
        );

        orchestrator.set_relay_active("r", false).unwrap();
        assert!(matches!(
            orchestrator.tick().await,
            TickOutcome::NoRelayAvailable { .. }
        ));
        assert!(orchestrator.get_state().stalled);

        orchestrator.set_relay_active("r", true).unwrap();
        assert!(matches!(orchestrator.tick().await, TickOutcome::Attempted(_)));
        assert!(!orchestrator.get_state().stalled);
    }

    #[tokio::test]
    async fn test_sustained_stall_raises_one_blocking_warning() {
        let orchestrator = orchestrator(OrchestratorConfig {
            stall_warning_ticks: 3,
            ..Default::default()
        });
        orchestrator
            .start(campaign(), vec![Relay::new("r")], vec![list("a", 1)])
            .unwrap();
        orchestrator.set_relay_active("r", false).unwrap();

        for _ in 0..6 {
            orchestrator.tick().await;
        }

        let errors = orchestrator
            .logs()
            .into_iter()
            .filter(|entry| entry.severity == Severity::Error)
            .count();
        assert_eq!(errors, 1);
        assert_eq!(orchestrator.phase(), Phase::Running);
    }
}
