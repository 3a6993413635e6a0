//! Reply generation through the configured language model.

use crate::history::HistoryEntry;
use anyhow::Result;
use async_trait::async_trait;
use wb_llm::{ChatMessage, GeneratedReply, LlmClient, REPLY_FORMAT_INSTRUCTIONS};

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, history: &[HistoryEntry]) -> Result<GeneratedReply>;
}

pub struct LlmResponseGenerator {
    llm: LlmClient,
    system_prompt: String,
}

impl LlmResponseGenerator {
    pub fn new(llm: LlmClient, system_prompt: &str) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.trim().to_string(),
        }
    }
}

#[async_trait]
impl ResponseGenerator for LlmResponseGenerator {
    #[tracing::instrument(level = "info", skip_all, fields(history_len = history.len()))]
    async fn generate(&self, history: &[HistoryEntry]) -> Result<GeneratedReply> {
        let transcript = build_transcript(&self.system_prompt, history);
        let response = self.llm.chat(&transcript).await?;
        tracing::debug!(
            model = %self.llm.model(),
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            finish_reason = %response.finish_reason,
            "reply generated"
        );
        Ok(wb_llm::parse_generated_reply(&response.message.content)?)
    }
}

fn build_transcript(system_prompt: &str, history: &[HistoryEntry]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(history.len() + 1);
    let system = if system_prompt.is_empty() {
        REPLY_FORMAT_INSTRUCTIONS.to_string()
    } else {
        format!("{system_prompt}\n\n{REPLY_FORMAT_INSTRUCTIONS}")
    };
    out.push(ChatMessage::system(system));

    // Providers expect the first non-system turn to come from the user.
    let first_customer = history
        .iter()
        .position(|entry| !entry.from_bot)
        .unwrap_or(history.len());
    for entry in &history[first_customer..] {
        let content = render_entry(entry);
        if entry.from_bot {
            out.push(ChatMessage::assistant(content));
        } else {
            out.push(ChatMessage::user(content));
        }
    }
    out
}

pub(crate) fn render_entry(entry: &HistoryEntry) -> String {
    let text = entry.text.trim();
    match entry.media_kind.as_deref() {
        Some(kind) if text.is_empty() => format!("[{kind}]"),
        Some(kind) => format!("[{kind}] {text}"),
        None => text.to_string(),
    }
}
