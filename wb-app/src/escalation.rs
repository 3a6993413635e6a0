//! Per-conversation human-handoff gate.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use wb_channels::ConversationKey;

#[derive(Debug, Clone, Serialize)]
pub struct EscalationSummary {
    pub session: String,
    pub phone: String,
    pub escalated_at: DateTime<Utc>,
}

/// Conversations currently handed to a human. Absence means "not escalated".
#[derive(Debug, Default)]
pub struct EscalationRegistry {
    escalated: DashMap<ConversationKey, DateTime<Utc>>,
}

impl EscalationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_escalated(&self, key: &ConversationKey) -> bool {
        self.escalated.contains_key(key)
    }

    /// Returns the previous state.
    pub fn set_escalated(&self, key: &ConversationKey, escalated: bool) -> bool {
        if escalated {
            let previous = self.escalated.insert(key.clone(), Utc::now());
            if previous.is_none() {
                tracing::info!(conversation = %key, "conversation escalated to human");
            }
            previous.is_some()
        } else {
            let previous = self.escalated.remove(key);
            if previous.is_some() {
                tracing::info!(conversation = %key, "conversation resumed for automation");
            }
            previous.is_some()
        }
    }

    pub fn len(&self) -> usize {
        self.escalated.len()
    }

    pub fn list(&self) -> Vec<EscalationSummary> {
        let mut out: Vec<EscalationSummary> = self
            .escalated
            .iter()
            .map(|entry| EscalationSummary {
                session: entry.key().session.to_string(),
                phone: entry.key().phone.to_string(),
                escalated_at: *entry.value(),
            })
            .collect();
        out.sort_by_key(|s| s.escalated_at);
        out
    }
}
