//! One response cycle for a conversation: seen, typing, generate, send.

use crate::config::RepliesConfig;
use crate::generator::ResponseGenerator;
use crate::history::{HistoryEntry, HistoryStore};
use crate::notifier::{HumanNotifier, escalation_summary};
use crate::presence::{BestEffortPresence, TypingIndicator};
use crate::scheduler::{DelayRange, Ticket};
use std::sync::Arc;
use wb_channels::{ConversationKey, MessageSender, PresenceState};

/// Where a superseded run noticed it was stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Seen,
    Typing,
    Responding,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seen => "seen",
            Self::Typing => "typing",
            Self::Responding => "responding",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Replied,
    Greeted,
    Escalated { notified: bool },
    Superseded(Stage),
    FellBack { apology_sent: bool },
}

#[derive(Debug, thiserror::Error)]
enum PipelineFailure {
    #[error("history fetch failed: {0:#}")]
    History(anyhow::Error),
    #[error("reply generation failed: {0:#}")]
    Generate(anyhow::Error),
    #[error("message send failed: {0:#}")]
    Send(anyhow::Error),
}

pub struct Pipeline {
    presence: BestEffortPresence,
    sender: Arc<dyn MessageSender>,
    history: Arc<dyn HistoryStore>,
    generator: Arc<dyn ResponseGenerator>,
    notifier: Arc<dyn HumanNotifier>,
    replies: RepliesConfig,
    typing: DelayRange,
}

impl Pipeline {
    pub fn new(
        presence: BestEffortPresence,
        sender: Arc<dyn MessageSender>,
        history: Arc<dyn HistoryStore>,
        generator: Arc<dyn ResponseGenerator>,
        notifier: Arc<dyn HumanNotifier>,
        replies: RepliesConfig,
        typing: DelayRange,
    ) -> Self {
        Self {
            presence,
            sender,
            history,
            generator,
            notifier,
            replies,
            typing,
        }
    }

    pub(crate) async fn run(&self, ticket: &Ticket<'_>) -> PipelineOutcome {
        let key = ticket.key();
        self.presence.signal(key, PresenceState::Seen).await;
        if !ticket.is_current() {
            return PipelineOutcome::Superseded(Stage::Seen);
        }

        let mut typing = TypingIndicator::start(&self.presence, key).await;
        ticket.wait(self.typing.draw()).await;
        if !ticket.is_current() {
            typing.stop().await;
            return PipelineOutcome::Superseded(Stage::Typing);
        }

        let result = self.respond(ticket, &mut typing).await;
        typing.stop().await;
        match result {
            Ok(outcome) => outcome,
            Err(failure) => {
                tracing::warn!(conversation = %key, error = %failure, "response failed");
                self.fall_back(ticket).await
            }
        }
    }

    async fn respond(
        &self,
        ticket: &Ticket<'_>,
        typing: &mut TypingIndicator<'_>,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        let key = ticket.key();
        let history = self
            .history
            .history(key)
            .await
            .map_err(PipelineFailure::History)?;

        if history.is_empty() {
            typing.stop().await;
            if !ticket.is_current() {
                return Ok(PipelineOutcome::Superseded(Stage::Responding));
            }
            self.deliver(key, &self.replies.default_greeting).await?;
            return Ok(PipelineOutcome::Greeted);
        }

        let generated = self.generator.generate(&history).await;
        typing.stop().await;
        if !ticket.is_current() {
            return Ok(PipelineOutcome::Superseded(Stage::Responding));
        }
        let reply = generated.map_err(PipelineFailure::Generate)?;

        if reply.escalate {
            ticket.escalate();
            tracing::info!(conversation = %key, "conversation escalated to a human");
            let summary = escalation_summary(key, &history);
            let notified = match self.notifier.notify(key, &summary).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(conversation = %key, error = %e, "escalation notice failed");
                    false
                }
            };
            return Ok(PipelineOutcome::Escalated { notified });
        }

        self.deliver(key, &reply.text).await?;
        Ok(PipelineOutcome::Replied)
    }

    async fn deliver(&self, key: &ConversationKey, text: &str) -> Result<(), PipelineFailure> {
        self.sender
            .send_text(key, text)
            .await
            .map_err(PipelineFailure::Send)?;
        if let Err(e) = self.history.append(key, HistoryEntry::bot(text)).await {
            tracing::warn!(conversation = %key, error = %e, "failed to record bot reply");
        }
        Ok(())
    }

    async fn fall_back(&self, ticket: &Ticket<'_>) -> PipelineOutcome {
        let key = ticket.key();
        if !ticket.is_current() {
            return PipelineOutcome::Superseded(Stage::Responding);
        }
        match self
            .sender
            .send_text(key, &self.replies.fallback_apology)
            .await
        {
            Ok(()) => PipelineOutcome::FellBack { apology_sent: true },
            Err(e) => {
                tracing::error!(conversation = %key, error = %e, "fallback apology failed");
                PipelineOutcome::FellBack {
                    apology_sent: false,
                }
            }
        }
    }
}
