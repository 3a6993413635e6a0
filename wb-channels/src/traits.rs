use crate::types::{ConversationKey, InboundMessage, PresenceState};
use anyhow::Result;
use async_trait::async_trait;

/// Delivery of text to a WhatsApp user. Failures matter to the caller,
/// which decides on a fallback.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, key: &ConversationKey, text: &str) -> Result<()>;
}

/// Seen/typing indicators. Callers treat these as best-effort.
#[async_trait]
pub trait PresenceSignaler: Send + Sync {
    async fn set_presence(&self, key: &ConversationKey, state: PresenceState) -> Result<()>;

    /// Lets the signaler remember which inbound message presence refers to.
    fn track_inbound(&self, _message: &InboundMessage) {}
}
