//! Inbound queue consumer: every webhook message passes through here.

use crate::commands::{self, CommandContext};
use crate::escalation::EscalationRegistry;
use crate::history::{HistoryEntry, HistoryStore};
use crate::scheduler::{ConversationScheduler, SubmitOutcome};
use crate::settings::OrchestrationSettings;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wb_channels::{
    InboundMessage, InboundMessageKind, MessageSender, PhoneNumber, PresenceSignaler,
};

pub struct Gateway {
    scheduler: ConversationScheduler,
    escalations: Arc<EscalationRegistry>,
    settings: Arc<OrchestrationSettings>,
    history: Arc<dyn HistoryStore>,
    sender: Arc<dyn MessageSender>,
    presence: Arc<dyn PresenceSignaler>,
    operators: HashSet<PhoneNumber>,
}

impl Gateway {
    pub fn new(
        scheduler: ConversationScheduler,
        escalations: Arc<EscalationRegistry>,
        settings: Arc<OrchestrationSettings>,
        history: Arc<dyn HistoryStore>,
        sender: Arc<dyn MessageSender>,
        presence: Arc<dyn PresenceSignaler>,
        operators: impl IntoIterator<Item = PhoneNumber>,
    ) -> Self {
        Self {
            scheduler,
            escalations,
            settings,
            history,
            sender,
            presence,
            operators: operators.into_iter().collect(),
        }
    }

    pub fn start(
        self,
        inbound_rx: mpsc::Receiver<InboundMessage>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop(inbound_rx, shutdown).await })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_loop(
        &self,
        mut inbound_rx: mpsc::Receiver<InboundMessage>,
        shutdown: CancellationToken,
    ) {
        loop {
            let inbound = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("gateway stopping");
                    return;
                }
                msg = inbound_rx.recv() => msg,
            };
            let Some(inbound) = inbound else {
                tracing::info!("inbound queue closed");
                return;
            };
            if let Err(e) = self.handle_inbound(inbound).await {
                tracing::warn!(error = %e, "handle_inbound failed");
            }
        }
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(conversation = %inbound.key, message_id = %inbound.message_id, kind = ?inbound.kind)
    )]
    pub(crate) async fn handle_inbound(&self, inbound: InboundMessage) -> Result<()> {
        if inbound.kind == InboundMessageKind::Text && self.operators.contains(&inbound.key.phone) {
            let ctx = CommandContext {
                scheduler: &self.scheduler,
                escalations: &self.escalations,
                settings: &self.settings,
                session: &inbound.key.session,
            };
            if let Some(reply) = commands::handle_command(&ctx, &inbound.text) {
                self.sender.send_text(&inbound.key, &reply).await?;
                return Ok(());
            }
        }

        if inbound.kind == InboundMessageKind::Reaction {
            tracing::debug!(emoji = %inbound.text, "reaction ignored");
            return Ok(());
        }

        self.presence.track_inbound(&inbound);
        if let Err(e) = self
            .history
            .append(&inbound.key, HistoryEntry::from_inbound(&inbound))
            .await
        {
            tracing::warn!(error = %e, "failed to record inbound message");
        }

        match self.scheduler.submit(inbound.key.clone()) {
            SubmitOutcome::Accepted(generation) => {
                tracing::debug!(%generation, "inbound message scheduled");
            }
            other => tracing::debug!(outcome = ?other, "inbound message not scheduled"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, Harness, key};
    use chrono::Utc;
    use std::time::Duration;
    use wb_channels::MessageId;

    fn inbound(phone: &str, kind: InboundMessageKind, text: &str) -> InboundMessage {
        InboundMessage {
            kind,
            message_id: MessageId::new(format!("wamid.{phone}.{text}")),
            key: key(phone),
            text: text.to_string(),
            media_kind: None,
            received_at: Utc::now(),
        }
    }

    fn gateway(h: &Harness, operators: &[&str]) -> Gateway {
        Gateway::new(
            h.scheduler.clone(),
            h.escalations.clone(),
            h.settings.clone(),
            h.history.clone(),
            h.recorder.clone(),
            h.recorder.clone(),
            operators.iter().filter_map(|p| PhoneNumber::normalize(p)),
        )
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn customer_text_is_recorded_tracked_and_scheduled() {
        let h = Harness::builder().build().await;
        let gw = gateway(&h, &[]);
        gw.handle_inbound(inbound("111", InboundMessageKind::Text, "hi"))
            .await
            .expect("handled");

        let history = h.history.history(&key("111")).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "hi");
        assert_eq!(h.recorder.tracked().len(), 1);
        assert!(h.scheduler.current_generation(&key("111")).is_some());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn reactions_are_dropped() {
        let h = Harness::builder().build().await;
        let gw = gateway(&h, &[]);
        gw.handle_inbound(inbound("111", InboundMessageKind::Reaction, "👍"))
            .await
            .expect("handled");

        assert!(h.history.history(&key("111")).await.expect("history").is_empty());
        assert!(h.recorder.tracked().is_empty());
        assert_eq!(h.scheduler.current_generation(&key("111")), None);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn media_supersedes_pending_reply() {
        let h = Harness::builder().build().await;
        let gw = gateway(&h, &[]);
        gw.handle_inbound(inbound("111", InboundMessageKind::Text, "hi"))
            .await
            .expect("handled");
        let first = h.scheduler.current_generation(&key("111"));
        let mut photo = inbound("111", InboundMessageKind::Media, "");
        photo.media_kind = Some("image".to_string());
        gw.handle_inbound(photo).await.expect("handled");

        assert_ne!(h.scheduler.current_generation(&key("111")), first);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.recorder.sent().len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn operator_commands_are_answered_not_scheduled() {
        let h = Harness::builder().build().await;
        let gw = gateway(&h, &["999"]);
        gw.handle_inbound(inbound("999", InboundMessageKind::Text, "/takeover 111"))
            .await
            .expect("handled");

        assert!(h.escalations.is_escalated(&key("111")));
        assert_eq!(h.scheduler.current_generation(&key("999")), None);
        assert!(h.history.history(&key("999")).await.expect("history").is_empty());
        let events = h.recorder.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Sent(k, _) if *k == key("999")));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn customer_slash_text_is_an_ordinary_message() {
        let h = Harness::builder().build().await;
        let gw = gateway(&h, &["999"]);
        gw.handle_inbound(inbound("111", InboundMessageKind::Text, "/resume 111"))
            .await
            .expect("handled");
        assert!(h.scheduler.current_generation(&key("111")).is_some());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn escalated_conversation_still_records_history() {
        let h = Harness::builder().build().await;
        h.escalations.set_escalated(&key("111"), true);
        let gw = gateway(&h, &[]);
        gw.handle_inbound(inbound("111", InboundMessageKind::Text, "still there?"))
            .await
            .expect("handled");

        assert_eq!(h.history.history(&key("111")).await.expect("history").len(), 1);
        assert_eq!(h.scheduler.current_generation(&key("111")), None);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn loop_exits_on_shutdown() {
        let h = Harness::builder().build().await;
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let handle = gateway(&h, &[]).start(rx, shutdown.clone());
        tx.send(inbound("111", InboundMessageKind::Text, "hi"))
            .await
            .expect("queue open");
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        handle.await.expect("gateway task");
        assert_eq!(h.history.history(&key("111")).await.expect("history").len(), 1);
    }
}
