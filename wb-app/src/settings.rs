//! Global and per-conversation switch for automated replies.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use wb_channels::ConversationKey;

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationSnapshot {
    pub enabled: bool,
    pub overrides: Vec<ConversationOverride>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationOverride {
    pub session: String,
    pub phone: String,
    pub enabled: bool,
}

#[derive(Debug)]
pub struct OrchestrationSettings {
    global: AtomicBool,
    overrides: DashMap<ConversationKey, bool>,
}

impl OrchestrationSettings {
    pub fn new(global: bool) -> Self {
        Self {
            global: AtomicBool::new(global),
            overrides: DashMap::new(),
        }
    }

    /// A per-conversation override wins; otherwise the global switch decides.
    pub fn enabled(&self, key: &ConversationKey) -> bool {
        match self.overrides.get(key) {
            Some(value) => *value,
            None => self.global.load(Ordering::Acquire),
        }
    }

    pub fn global_enabled(&self) -> bool {
        self.global.load(Ordering::Acquire)
    }

    pub fn set_global(&self, enabled: bool) {
        self.global.store(enabled, Ordering::Release);
        tracing::info!(enabled, "orchestration global switch updated");
    }

    /// `None` drops the override so the global switch applies again.
    pub fn set_override(&self, key: &ConversationKey, enabled: Option<bool>) {
        match enabled {
            Some(enabled) => {
                self.overrides.insert(key.clone(), enabled);
            }
            None => {
                self.overrides.remove(key);
            }
        }
        tracing::info!(conversation = %key, ?enabled, "orchestration override updated");
    }

    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    pub fn snapshot(&self) -> OrchestrationSnapshot {
        let mut overrides: Vec<ConversationOverride> = self
            .overrides
            .iter()
            .map(|entry| ConversationOverride {
                session: entry.key().session.to_string(),
                phone: entry.key().phone.to_string(),
                enabled: *entry.value(),
            })
            .collect();
        overrides.sort_by(|a, b| (&a.session, &a.phone).cmp(&(&b.session, &b.phone)));
        OrchestrationSnapshot {
            enabled: self.global_enabled(),
            overrides,
        }
    }
}
