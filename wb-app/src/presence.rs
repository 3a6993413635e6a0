//! Best-effort wrapper around presence signaling.
//!
//! Presence failures are logged here and never reach the caller, so the
//! response pipeline cannot accidentally abort on a failed "typing" call.

use std::sync::Arc;
use wb_channels::{ConversationKey, PresenceSignaler, PresenceState};

#[derive(Clone)]
pub struct BestEffortPresence {
    inner: Arc<dyn PresenceSignaler>,
}

impl BestEffortPresence {
    pub fn new(inner: Arc<dyn PresenceSignaler>) -> Self {
        Self { inner }
    }

    pub async fn signal(&self, key: &ConversationKey, state: PresenceState) {
        if let Err(e) = self.inner.set_presence(key, state).await {
            tracing::warn!(
                conversation = %key,
                state = state.as_str(),
                error = %e,
                "presence signal failed"
            );
        }
    }
}

/// Tracks whether this pipeline run owes a "typing stop".
pub(crate) struct TypingIndicator<'a> {
    presence: &'a BestEffortPresence,
    key: &'a ConversationKey,
    active: bool,
}

impl<'a> TypingIndicator<'a> {
    pub(crate) async fn start(presence: &'a BestEffortPresence, key: &'a ConversationKey) -> Self {
        presence.signal(key, PresenceState::TypingStart).await;
        Self {
            presence,
            key,
            active: true,
        }
    }

    /// Emits "typing stop" once; later calls are no-ops.
    pub(crate) async fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.presence
            .signal(self.key, PresenceState::TypingStop)
            .await;
    }
}

impl Drop for TypingIndicator<'_> {
    fn drop(&mut self) {
        if self.active {
            tracing::warn!(conversation = %self.key, "typing indicator dropped while active");
        }
    }
}
