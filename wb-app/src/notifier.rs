//! Escalation notices for human operators.

use crate::generator::render_entry;
use crate::history::HistoryEntry;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use wb_channels::{ConversationKey, MessageSender, PhoneNumber};

const SUMMARY_QUOTE_MAX_CHARS: usize = 280;

#[async_trait]
pub trait HumanNotifier: Send + Sync {
    async fn notify(&self, key: &ConversationKey, summary: &str) -> Result<()>;
}

/// Sends escalation notices over WhatsApp to every configured operator.
pub struct OperatorNotifier {
    sender: Arc<dyn MessageSender>,
    operators: Vec<PhoneNumber>,
}

impl OperatorNotifier {
    pub fn new(sender: Arc<dyn MessageSender>, operators: Vec<PhoneNumber>) -> Self {
        Self { sender, operators }
    }
}

#[async_trait]
impl HumanNotifier for OperatorNotifier {
    #[tracing::instrument(level = "info", skip_all, fields(conversation = %key))]
    async fn notify(&self, key: &ConversationKey, summary: &str) -> Result<()> {
        if self.operators.is_empty() {
            return Err(anyhow!("no operator phones configured"));
        }
        let sends = self.operators.iter().map(|operator| {
            let target = ConversationKey::new(key.session.clone(), operator.clone());
            async move {
                let result = self.sender.send_text(&target, summary).await;
                (target, result)
            }
        });
        let mut delivered = 0usize;
        for (target, result) in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(operator = %target.phone, error = %e, "operator notification failed")
                }
            }
        }
        if delivered == 0 {
            return Err(anyhow!("escalation notice reached no operator"));
        }
        Ok(())
    }
}

/// Names the customer and quotes their latest message.
pub fn escalation_summary(key: &ConversationKey, history: &[HistoryEntry]) -> String {
    let latest = history
        .iter()
        .rev()
        .find(|entry| !entry.from_bot)
        .map(render_entry)
        .unwrap_or_default();
    let mut quote: String = latest.chars().take(SUMMARY_QUOTE_MAX_CHARS).collect();
    if latest.chars().count() > SUMMARY_QUOTE_MAX_CHARS {
        quote.push('…');
    }
    if quote.is_empty() {
        return format!(
            "Customer +{} needs a human. Reply /resume {} when done.",
            key.phone, key.phone
        );
    }
    format!(
        "Customer +{} needs a human.\nLast message: \"{}\"\nReply /resume {} when done.",
        key.phone, quote, key.phone
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FlakySender {
        fail_for: Option<String>,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessageSender for FlakySender {
        async fn send_text(&self, key: &ConversationKey, text: &str) -> Result<()> {
            if self.fail_for.as_deref() == Some(key.phone.as_str()) {
                return Err(anyhow!("unreachable"));
            }
            self.sent
                .lock()
                .expect("sent lock")
                .push((key.phone.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn phone(raw: &str) -> PhoneNumber {
        PhoneNumber::normalize(raw).expect("phone")
    }

    fn customer() -> ConversationKey {
        ConversationKey::new("1001", phone("15551234567"))
    }

    #[tokio::test]
    async fn notifies_every_operator_and_tolerates_partial_failure() {
        let sender = Arc::new(FlakySender {
            fail_for: Some("222".to_string()),
            sent: Mutex::new(Vec::new()),
        });
        let notifier = OperatorNotifier::new(sender.clone(), vec![phone("111"), phone("222")]);
        notifier.notify(&customer(), "help").await.expect("one delivery is enough");
        let sent = sender.sent.lock().expect("sent lock").clone();
        assert_eq!(sent, vec![("111".to_string(), "help".to_string())]);
    }

    #[tokio::test]
    async fn fails_without_any_delivery() {
        let sender = Arc::new(FlakySender {
            fail_for: Some("111".to_string()),
            sent: Mutex::new(Vec::new()),
        });
        let notifier = OperatorNotifier::new(sender.clone(), vec![phone("111")]);
        assert!(notifier.notify(&customer(), "help").await.is_err());
        let empty = OperatorNotifier::new(sender, Vec::new());
        assert!(empty.notify(&customer(), "help").await.is_err());
    }

    #[test]
    fn summary_quotes_latest_customer_message() {
        let history = vec![
            HistoryEntry::customer("first"),
            HistoryEntry::customer("I want to talk to a person"),
            HistoryEntry::bot("One moment"),
        ];
        let summary = escalation_summary(&customer(), &history);
        assert!(summary.contains("+15551234567"));
        assert!(summary.contains("\"I want to talk to a person\""));
        assert!(summary.contains("/resume 15551234567"));
    }

    #[test]
    fn summary_truncates_long_messages() {
        let history = vec![HistoryEntry::customer("x".repeat(400))];
        let summary = escalation_summary(&customer(), &history);
        assert!(summary.contains(&format!("{}…", "x".repeat(280))));
        assert!(!summary.contains(&"x".repeat(281)));
    }
}
