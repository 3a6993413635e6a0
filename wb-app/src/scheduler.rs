//! Per-conversation response scheduler.
//!
//! Every accepted submission mints a new [`Generation`] and replaces the
//! conversation's pending slot. Work started for an older generation is not
//! interrupted; it notices at its next currency check that it is no longer
//! the current one and stops without sending anything.

use crate::escalation::EscalationRegistry;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::settings::OrchestrationSettings;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use wb_channels::ConversationKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(Generation),
    Escalated,
    Disabled,
    ShuttingDown,
}

/// Inclusive range a delay is drawn from uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    pub fn draw(&self) -> Duration {
        if self.max == self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

impl From<(Duration, Duration)> for DelayRange {
    fn from((min, max): (Duration, Duration)) -> Self {
        Self::new(min, max)
    }
}

#[derive(Debug)]
struct PendingSubmission {
    generation: Generation,
    scheduled_at: DateTime<Utc>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct ConversationScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    pending: DashMap<ConversationKey, PendingSubmission>,
    next_generation: AtomicU64,
    debounce: DelayRange,
    pipeline: Pipeline,
    escalations: Arc<EscalationRegistry>,
    settings: Arc<OrchestrationSettings>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl ConversationScheduler {
    pub fn new(
        pipeline: Pipeline,
        debounce: DelayRange,
        escalations: Arc<EscalationRegistry>,
        settings: Arc<OrchestrationSettings>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                pending: DashMap::new(),
                next_generation: AtomicU64::new(0),
                debounce,
                pipeline,
                escalations,
                settings,
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Schedules a response cycle for `key`, superseding any earlier one.
    ///
    /// Never fails: gating and supersession are reported through the
    /// returned outcome and have no side effects when not accepted.
    pub fn submit(&self, key: ConversationKey) -> SubmitOutcome {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return SubmitOutcome::ShuttingDown;
        }
        if inner.escalations.is_escalated(&key) {
            tracing::debug!(conversation = %key, "submission ignored: conversation escalated");
            return SubmitOutcome::Escalated;
        }
        if !inner.settings.enabled(&key) {
            tracing::debug!(conversation = %key, "submission ignored: orchestration disabled");
            return SubmitOutcome::Disabled;
        }

        let cancel = inner.shutdown.child_token();
        let delay = inner.debounce.draw();
        // Mint under the shard lock so the highest generation is always the one stored.
        let slot = inner.pending.entry(key.clone());
        let generation = inner.mint();
        let submission = PendingSubmission {
            generation,
            scheduled_at: Utc::now(),
            cancel: cancel.clone(),
        };
        let previous = match slot {
            Entry::Occupied(mut slot) => Some(slot.insert(submission)),
            Entry::Vacant(slot) => {
                slot.insert(submission);
                None
            }
        };
        // Escalation may have landed after the gate above; its cancel_all ran before our insert.
        if inner.escalations.is_escalated(&key) {
            inner
                .pending
                .remove_if(&key, |_, pending| pending.generation == generation);
            cancel.cancel();
            if let Some(previous) = previous {
                previous.cancel.cancel();
            }
            tracing::debug!(conversation = %key, %generation, "submission rolled back: conversation escalated");
            return SubmitOutcome::Escalated;
        }
        if let Some(previous) = previous {
            previous.cancel.cancel();
            tracing::debug!(
                conversation = %key,
                superseded = %previous.generation,
                superseded_scheduled_at = %previous.scheduled_at,
                %generation,
                "pending response superseded"
            );
        }

        tracing::debug!(
            conversation = %key,
            %generation,
            delay_ms = delay.as_millis() as u64,
            "response scheduled"
        );
        let task_inner = inner.clone();
        inner.tasks.spawn(async move {
            task_inner.fire(key, generation, cancel, delay).await;
        });
        SubmitOutcome::Accepted(generation)
    }

    /// Drops the pending slot for `key`; in-flight work aborts at its next check.
    pub fn cancel_all(&self, key: &ConversationKey) {
        self.inner.cancel_all(key);
    }

    /// Hands the conversation to a human and cancels automated work.
    pub fn escalate(&self, key: &ConversationKey) {
        self.inner.escalate(key);
    }

    /// Clears escalation. Nothing is replayed; the next inbound message starts a fresh cycle.
    pub fn resume(&self, key: &ConversationKey) -> bool {
        self.inner.escalations.set_escalated(key, false)
    }

    pub fn current_generation(&self, key: &ConversationKey) -> Option<Generation> {
        self.inner.pending.get(key).map(|p| p.generation)
    }

    /// Conversations with a scheduled or running response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Cancels pending delays and waits briefly for running pipelines.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        if tokio::time::timeout(grace, self.inner.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                running = self.inner.tasks.len(),
                "timed out waiting for response pipelines to stop"
            );
        }
    }
}

impl SchedulerInner {
    fn mint(&self) -> Generation {
        Generation(self.next_generation.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn is_current(&self, key: &ConversationKey, generation: Generation) -> bool {
        if self.shutdown.is_cancelled() || self.escalations.is_escalated(key) {
            return false;
        }
        self.pending
            .get(key)
            .is_some_and(|pending| pending.generation == generation)
    }

    fn cancel_all(&self, key: &ConversationKey) {
        if let Some((_, pending)) = self.pending.remove(key) {
            pending.cancel.cancel();
            tracing::debug!(conversation = %key, generation = %pending.generation, "pending response cancelled");
        }
    }

    /// Frees the slot only if `generation` still owns it.
    fn release(&self, key: &ConversationKey, generation: Generation) {
        self.pending
            .remove_if(key, |_, pending| pending.generation == generation);
    }

    fn escalate(&self, key: &ConversationKey) {
        self.escalations.set_escalated(key, true);
        self.cancel_all(key);
    }

    async fn fire(
        &self,
        key: ConversationKey,
        generation: Generation,
        cancel: CancellationToken,
        delay: Duration,
    ) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(conversation = %key, %generation, "debounce timer cancelled");
                self.release(&key, generation);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        // A timer can fire in the same instant it is superseded.
        if !self.is_current(&key, generation) {
            tracing::debug!(conversation = %key, %generation, "stale at fire time");
            self.release(&key, generation);
            return;
        }

        let ticket = Ticket {
            inner: self,
            key,
            generation,
            cancel,
        };
        let outcome = self.pipeline.run(&ticket).await;
        self.release(&ticket.key, generation);
        match outcome {
            PipelineOutcome::Superseded(stage) => tracing::debug!(
                conversation = %ticket.key,
                %generation,
                stage = stage.as_str(),
                "response pipeline superseded"
            ),
            other => tracing::info!(
                conversation = %ticket.key,
                %generation,
                outcome = ?other,
                "response pipeline finished"
            ),
        }
    }
}

/// A pipeline run's claim on its conversation.
pub(crate) struct Ticket<'a> {
    inner: &'a SchedulerInner,
    key: ConversationKey,
    generation: Generation,
    cancel: CancellationToken,
}

impl Ticket<'_> {
    pub(crate) fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub(crate) fn is_current(&self) -> bool {
        self.inner.is_current(&self.key, self.generation)
    }

    /// Sleeps for `delay`, waking early if this generation's handle is cancelled.
    pub(crate) async fn wait(&self, delay: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    pub(crate) fn escalate(&self) {
        self.inner.escalate(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, Harness, key};
    use wb_channels::PresenceState::{Seen, TypingStart, TypingStop};
    use wb_llm::GeneratedReply;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    async fn advance(n: u64) {
        tokio::time::sleep(secs(n)).await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn burst_collapses_into_one_reply_for_last_submission() {
        let h = Harness::builder()
            .with_history()
            .debounce(DelayRange::new(secs(10), secs(20)))
            .typing(DelayRange::new(secs(5), secs(15)))
            .build()
            .await;
        let k = key("111");

        assert!(matches!(h.scheduler.submit(k.clone()), SubmitOutcome::Accepted(_)));
        advance(3).await;
        assert!(matches!(h.scheduler.submit(k.clone()), SubmitOutcome::Accepted(_)));
        advance(5).await;
        let SubmitOutcome::Accepted(last) = h.scheduler.submit(k.clone()) else {
            panic!("third submission should be accepted");
        };
        advance(60).await;

        assert_eq!(
            h.recorder.events(),
            vec![
                Event::Presence(k.clone(), Seen),
                Event::Presence(k.clone(), TypingStart),
                Event::Presence(k.clone(), TypingStop),
                Event::Sent(k.clone(), "ok".to_string()),
            ]
        );
        assert_eq!(h.generator.calls(), 1);
        assert_eq!(last, Generation(3));
        assert_eq!(h.scheduler.current_generation(&k), None);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn escalated_conversation_submit_is_a_no_op() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");
        h.escalations.set_escalated(&k, true);

        assert_eq!(h.scheduler.submit(k.clone()), SubmitOutcome::Escalated);
        advance(60).await;

        assert!(h.recorder.events().is_empty());
        assert_eq!(h.scheduler.current_generation(&k), None);
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn disabled_orchestration_submit_is_a_no_op() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");
        h.settings.set_override(&k, Some(false));
        assert_eq!(h.scheduler.submit(k.clone()), SubmitOutcome::Disabled);

        h.settings.set_override(&k, None);
        h.settings.set_global(false);
        assert_eq!(h.scheduler.submit(k.clone()), SubmitOutcome::Disabled);
        advance(60).await;

        assert!(h.recorder.events().is_empty());
        assert_eq!(h.scheduler.pending_count(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn new_message_during_typing_stops_typing_and_restarts() {
        let h = Harness::builder()
            .with_history()
            .debounce(DelayRange::fixed(secs(10)))
            .typing(DelayRange::fixed(secs(5)))
            .build()
            .await;
        let k = key("111");

        h.scheduler.submit(k.clone());
        advance(12).await;
        assert_eq!(
            h.recorder.events(),
            vec![
                Event::Presence(k.clone(), Seen),
                Event::Presence(k.clone(), TypingStart),
            ]
        );

        h.scheduler.submit(k.clone());
        advance(1).await;
        assert_eq!(
            h.recorder.events().last(),
            Some(&Event::Presence(k.clone(), TypingStop))
        );
        assert_eq!(h.generator.calls(), 0);

        advance(60).await;
        assert_eq!(
            h.recorder.events(),
            vec![
                Event::Presence(k.clone(), Seen),
                Event::Presence(k.clone(), TypingStart),
                Event::Presence(k.clone(), TypingStop),
                Event::Presence(k.clone(), Seen),
                Event::Presence(k.clone(), TypingStart),
                Event::Presence(k.clone(), TypingStop),
                Event::Sent(k.clone(), "ok".to_string()),
            ]
        );
        assert_eq!(h.generator.calls(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn superseded_during_generation_sends_nothing() {
        let h = Harness::builder()
            .with_history()
            .debounce(DelayRange::fixed(secs(10)))
            .typing(DelayRange::fixed(secs(5)))
            .generation_delay(secs(30))
            .build()
            .await;
        let k = key("111");

        h.scheduler.submit(k.clone());
        // Fires at 10, types until 15, generates until 45.
        advance(20).await;
        assert_eq!(h.generator.calls(), 1);
        h.scheduler.submit(k.clone());
        advance(120).await;

        let sends: Vec<Event> = h
            .recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Sent(..)))
            .collect();
        assert_eq!(sends, vec![Event::Sent(k.clone(), "ok".to_string())]);
        assert_eq!(h.generator.calls(), 2);
        h.recorder.assert_typing_balanced(&k);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn escalation_suppresses_reply_and_notifies_once() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");
        h.generator.push(Ok(GeneratedReply {
            text: "let me get someone".to_string(),
            escalate: true,
        }));

        h.scheduler.submit(k.clone());
        advance(60).await;

        let events = h.recorder.events();
        assert!(!events.iter().any(|e| matches!(e, Event::Sent(..))));
        let notices: Vec<&Event> = events
            .iter()
            .filter(|e| matches!(e, Event::Notified(..)))
            .collect();
        assert_eq!(notices.len(), 1);
        assert!(h.escalations.is_escalated(&k));
        h.recorder.assert_typing_balanced(&k);

        h.recorder.clear();
        assert_eq!(h.scheduler.submit(k.clone()), SubmitOutcome::Escalated);
        advance(60).await;
        assert!(h.recorder.events().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn resume_allows_a_fresh_cycle() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");
        h.scheduler.escalate(&k);
        assert_eq!(h.scheduler.submit(k.clone()), SubmitOutcome::Escalated);

        assert!(h.scheduler.resume(&k));
        advance(60).await;
        assert!(h.recorder.events().is_empty());

        assert!(matches!(h.scheduler.submit(k.clone()), SubmitOutcome::Accepted(_)));
        advance(60).await;
        assert_eq!(
            h.recorder.events().last(),
            Some(&Event::Sent(k.clone(), "ok".to_string()))
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn external_escalation_mid_typing_aborts_without_reply() {
        let h = Harness::builder()
            .with_history()
            .debounce(DelayRange::fixed(secs(10)))
            .typing(DelayRange::fixed(secs(5)))
            .build()
            .await;
        let k = key("111");

        h.scheduler.submit(k.clone());
        advance(12).await;
        h.scheduler.escalate(&k);
        advance(60).await;

        assert_eq!(
            h.recorder.events(),
            vec![
                Event::Presence(k.clone(), Seen),
                Event::Presence(k.clone(), TypingStart),
                Event::Presence(k.clone(), TypingStop),
            ]
        );
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cancel_all_before_fire_prevents_any_signal() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");
        h.scheduler.submit(k.clone());
        advance(2).await;
        h.scheduler.cancel_all(&k);
        advance(60).await;

        assert!(h.recorder.events().is_empty());
        assert_eq!(h.scheduler.current_generation(&k), None);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn empty_history_sends_greeting_without_generation() {
        let h = Harness::builder().build().await;
        let k = key("111");
        h.scheduler.submit(k.clone());
        advance(60).await;

        assert_eq!(
            h.recorder.events(),
            vec![
                Event::Presence(k.clone(), Seen),
                Event::Presence(k.clone(), TypingStart),
                Event::Presence(k.clone(), TypingStop),
                Event::Sent(k.clone(), crate::testing::GREETING.to_string()),
            ]
        );
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn generator_failure_sends_one_apology() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");
        h.generator.push(Err("model overloaded".to_string()));

        h.scheduler.submit(k.clone());
        advance(60).await;

        assert_eq!(
            h.recorder.events(),
            vec![
                Event::Presence(k.clone(), Seen),
                Event::Presence(k.clone(), TypingStart),
                Event::Presence(k.clone(), TypingStop),
                Event::Sent(k.clone(), crate::testing::APOLOGY.to_string()),
            ]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn send_failure_falls_back_to_apology_once() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");
        h.recorder.fail_next_sends(1);

        h.scheduler.submit(k.clone());
        advance(60).await;

        let sends: Vec<Event> = h
            .recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Sent(..)))
            .collect();
        assert_eq!(
            sends,
            vec![Event::Sent(k.clone(), crate::testing::APOLOGY.to_string())]
        );
        h.recorder.assert_typing_balanced(&k);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn presence_failures_do_not_abort_the_reply() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");
        h.recorder.fail_presence(true);

        h.scheduler.submit(k.clone());
        advance(60).await;

        assert_eq!(
            h.recorder.events(),
            vec![Event::Sent(k.clone(), "ok".to_string())]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn conversations_run_independently() {
        let h = Harness::builder()
            .with_history_for(&["111", "222"])
            .build()
            .await;
        let a = key("111");
        let b = key("222");
        h.scheduler.submit(a.clone());
        h.scheduler.submit(b.clone());
        advance(1).await;
        h.scheduler.submit(a.clone());
        advance(60).await;

        let events = h.recorder.events();
        assert!(events.contains(&Event::Sent(a.clone(), "ok".to_string())));
        assert!(events.contains(&Event::Sent(b.clone(), "ok".to_string())));
        assert_eq!(h.generator.calls(), 2);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn superseded_while_seen_in_flight_skips_typing() {
        let h = Harness::builder()
            .with_history()
            .presence_delay(secs(2))
            .build()
            .await;
        let k = key("111");

        h.scheduler.submit(k.clone());
        advance(11).await;
        // g1 is inside its "seen" call until t=12.
        let SubmitOutcome::Accepted(second) = h.scheduler.submit(k.clone()) else {
            panic!("second submission should be accepted");
        };
        advance(2).await;
        assert_eq!(h.recorder.events(), vec![Event::Presence(k.clone(), Seen)]);
        assert_eq!(h.scheduler.current_generation(&k), Some(second));

        advance(60).await;
        assert_eq!(
            h.recorder.events(),
            vec![
                Event::Presence(k.clone(), Seen),
                Event::Presence(k.clone(), Seen),
                Event::Presence(k.clone(), TypingStart),
                Event::Presence(k.clone(), TypingStop),
                Event::Sent(k.clone(), "ok".to_string()),
            ]
        );
        assert_eq!(h.generator.calls(), 1);
        assert_eq!(h.scheduler.current_generation(&k), None);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn escalation_racing_a_submission_frees_the_slot() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");

        h.scheduler.submit(k.clone());
        // Flag set without going through the scheduler, so nothing cancels the slot.
        h.escalations.set_escalated(&k, true);
        advance(60).await;

        assert!(h.recorder.events().is_empty());
        assert_eq!(h.scheduler.pending_count(), 0);
        assert_eq!(h.scheduler.current_generation(&k), None);

        assert!(h.scheduler.resume(&k));
        assert_eq!(h.scheduler.pending_count(), 0);
        assert!(matches!(h.scheduler.submit(k.clone()), SubmitOutcome::Accepted(_)));
        advance(60).await;
        assert_eq!(h.recorder.sent(), vec![(k.clone(), "ok".to_string())]);
        assert_eq!(h.scheduler.pending_count(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cancelled_timer_leaves_no_slot_behind() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");

        h.scheduler.submit(k.clone());
        advance(3).await;
        let SubmitOutcome::Accepted(second) = h.scheduler.submit(k.clone()) else {
            panic!("second submission should be accepted");
        };
        advance(1).await;
        // The first timer's cancellation must not free the slot the second owns.
        assert_eq!(h.scheduler.current_generation(&k), Some(second));
        assert_eq!(h.scheduler.pending_count(), 1);

        advance(60).await;
        assert_eq!(h.scheduler.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_leave_the_highest_generation_current() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let scheduler = h.scheduler.clone();
                let k = k.clone();
                tokio::spawn(async move { scheduler.submit(k) })
            })
            .collect();
        let mut highest = None;
        for handle in handles {
            if let SubmitOutcome::Accepted(generation) = handle.await.expect("join") {
                highest = highest.max(Some(generation));
            }
        }

        assert_eq!(highest, Some(Generation(64)));
        assert_eq!(h.scheduler.current_generation(&k), highest);
        h.scheduler.shutdown(secs(1)).await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn reply_is_recorded_in_history() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");
        h.scheduler.submit(k.clone());
        advance(60).await;

        let history = crate::history::HistoryStore::history(h.history.as_ref(), &k)
            .await
            .expect("history");
        let last = history.last().expect("entries");
        assert!(last.from_bot);
        assert_eq!(last.text, "ok");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn shutdown_cancels_pending_and_rejects_new_work() {
        let h = Harness::builder().with_history().build().await;
        let k = key("111");
        h.scheduler.submit(k.clone());
        h.scheduler.shutdown(secs(5)).await;
        assert_eq!(h.scheduler.submit(k.clone()), SubmitOutcome::ShuttingDown);
        advance(60).await;
        assert!(h.recorder.events().is_empty());
    }

    #[test]
    fn delay_range_draws_within_bounds() {
        let range = DelayRange::new(secs(10), secs(20));
        for _ in 0..100 {
            let d = range.draw();
            assert!(d >= secs(10) && d <= secs(20));
        }
        assert_eq!(DelayRange::fixed(secs(3)).draw(), secs(3));
        assert_eq!(DelayRange::new(secs(9), secs(4)).draw(), secs(9));
    }
}
