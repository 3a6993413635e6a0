//! Recording fakes shared by the scheduler, gateway and command tests.

use crate::config::RepliesConfig;
use crate::escalation::EscalationRegistry;
use crate::generator::ResponseGenerator;
use crate::history::{HistoryEntry, HistoryStore, InMemoryHistoryStore};
use crate::notifier::HumanNotifier;
use crate::pipeline::Pipeline;
use crate::presence::BestEffortPresence;
use crate::scheduler::{ConversationScheduler, DelayRange};
use crate::server::AppState;
use crate::settings::OrchestrationSettings;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wb_channels::{
    ConversationKey, InboundMessage, MessageSender, PhoneNumber, PresenceSignaler, PresenceState,
    SessionId,
};
use wb_llm::GeneratedReply;

pub const SESSION: &str = "main";
pub const GREETING: &str = "hello there";
pub const APOLOGY: &str = "sorry, try again";

pub fn key(phone: &str) -> ConversationKey {
    ConversationKey::new(SESSION, PhoneNumber::normalize(phone).expect("valid phone"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Presence(ConversationKey, PresenceState),
    Sent(ConversationKey, String),
    Notified(ConversationKey, String),
}

/// Captures every outbound side effect in order.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    tracked: Mutex<Vec<InboundMessage>>,
    failing_sends: AtomicUsize,
    failing_presence: AtomicBool,
    presence_delay: Mutex<Option<Duration>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("lock").clone()
    }

    pub fn sent(&self) -> Vec<(ConversationKey, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Sent(key, text) => Some((key, text)),
                _ => None,
            })
            .collect()
    }

    pub fn tracked(&self) -> Vec<InboundMessage> {
        self.tracked.lock().expect("lock").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("lock").clear();
    }

    pub fn fail_next_sends(&self, count: usize) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    pub fn fail_presence(&self, fail: bool) {
        self.failing_presence.store(fail, Ordering::SeqCst);
    }

    pub fn assert_typing_balanced(&self, key: &ConversationKey) {
        let count = |wanted: PresenceState| {
            self.events()
                .iter()
                .filter(|e| matches!(e, Event::Presence(k, s) if k == key && *s == wanted))
                .count()
        };
        assert_eq!(
            count(PresenceState::TypingStart),
            count(PresenceState::TypingStop),
            "every typing start needs a stop"
        );
    }

    fn push(&self, event: Event) {
        self.events.lock().expect("lock").push(event);
    }
}

#[async_trait]
impl MessageSender for Recorder {
    async fn send_text(&self, key: &ConversationKey, text: &str) -> Result<()> {
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("send rejected"));
        }
        self.push(Event::Sent(key.clone(), text.to_string()));
        Ok(())
    }
}

#[async_trait]
impl PresenceSignaler for Recorder {
    async fn set_presence(&self, key: &ConversationKey, state: PresenceState) -> Result<()> {
        let delay = *self.presence_delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_presence.load(Ordering::SeqCst) {
            return Err(anyhow!("presence rejected"));
        }
        self.push(Event::Presence(key.clone(), state));
        Ok(())
    }

    fn track_inbound(&self, message: &InboundMessage) {
        self.tracked.lock().expect("lock").push(message.clone());
    }
}

#[async_trait]
impl HumanNotifier for Recorder {
    async fn notify(&self, key: &ConversationKey, summary: &str) -> Result<()> {
        self.push(Event::Notified(key.clone(), summary.to_string()));
        Ok(())
    }
}

/// Replays scripted results, then answers "ok".
#[derive(Default)]
pub struct FakeGenerator {
    script: Mutex<VecDeque<std::result::Result<GeneratedReply, String>>>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeGenerator {
    pub fn push(&self, result: std::result::Result<GeneratedReply, String>) {
        self.script.lock().expect("lock").push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponseGenerator for FakeGenerator {
    async fn generate(&self, _history: &[HistoryEntry]) -> Result<GeneratedReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().expect("lock").pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(GeneratedReply {
                text: "ok".to_string(),
                escalate: false,
            }),
        }
    }
}

pub struct Harness {
    pub scheduler: ConversationScheduler,
    pub recorder: Arc<Recorder>,
    pub generator: Arc<FakeGenerator>,
    pub history: Arc<InMemoryHistoryStore>,
    pub escalations: Arc<EscalationRegistry>,
    pub settings: Arc<OrchestrationSettings>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            seeded: Vec::new(),
            debounce: DelayRange::fixed(Duration::from_secs(10)),
            typing: DelayRange::fixed(Duration::from_secs(5)),
            generation_delay: None,
            presence_delay: None,
        }
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            scheduler: self.scheduler.clone(),
            escalations: self.escalations.clone(),
            settings: self.settings.clone(),
            session: SessionId::new(SESSION),
            model: "test-model".to_string(),
            started_at: Instant::now(),
        })
    }
}

pub struct HarnessBuilder {
    seeded: Vec<String>,
    debounce: DelayRange,
    typing: DelayRange,
    generation_delay: Option<Duration>,
    presence_delay: Option<Duration>,
}

impl HarnessBuilder {
    /// Gives conversation "111" one prior customer message.
    pub fn with_history(self) -> Self {
        self.with_history_for(&["111"])
    }

    pub fn with_history_for(mut self, phones: &[&str]) -> Self {
        self.seeded.extend(phones.iter().map(|p| p.to_string()));
        self
    }

    pub fn debounce(mut self, range: DelayRange) -> Self {
        self.debounce = range;
        self
    }

    pub fn typing(mut self, range: DelayRange) -> Self {
        self.typing = range;
        self
    }

    pub fn generation_delay(mut self, delay: Duration) -> Self {
        self.generation_delay = Some(delay);
        self
    }

    /// Every presence call completes (and is recorded) only after `delay`.
    pub fn presence_delay(mut self, delay: Duration) -> Self {
        self.presence_delay = Some(delay);
        self
    }

    pub async fn build(self) -> Harness {
        let recorder = Arc::new(Recorder::default());
        *recorder.presence_delay.lock().expect("lock") = self.presence_delay;
        let generator = Arc::new(FakeGenerator::default());
        *generator.delay.lock().expect("lock") = self.generation_delay;
        let history = Arc::new(InMemoryHistoryStore::new());
        for phone in &self.seeded {
            history
                .append(&key(phone), HistoryEntry::customer("hi, is this open?"))
                .await
                .expect("seed history");
        }
        let escalations = Arc::new(EscalationRegistry::new());
        let settings = Arc::new(OrchestrationSettings::new(true));
        let pipeline = Pipeline::new(
            BestEffortPresence::new(recorder.clone()),
            recorder.clone(),
            history.clone(),
            generator.clone(),
            recorder.clone(),
            RepliesConfig {
                default_greeting: GREETING.to_string(),
                fallback_apology: APOLOGY.to_string(),
            },
            self.typing,
        );
        let scheduler = ConversationScheduler::new(
            pipeline,
            self.debounce,
            escalations.clone(),
            settings.clone(),
        );
        Harness {
            scheduler,
            recorder,
            generator,
            history,
            escalations,
            settings,
        }
    }
}
