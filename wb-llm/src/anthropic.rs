use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, Role, Usage};
use serde::{Deserialize, Serialize};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

pub(crate) struct AnthropicClient<'a> {
    http: reqwest::Client,
    api_key: &'a str,
    model: &'a str,
    base_url: &'a str,
}

impl<'a> AnthropicClient<'a> {
    pub(crate) fn new(
        http: reqwest::Client,
        api_key: &'a str,
        model: &'a str,
        base_url: Option<&'a str>,
    ) -> Self {
        Self {
            http,
            api_key,
            model,
            base_url: base_url.unwrap_or(ANTHROPIC_BASE_URL),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub(crate) async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let req = AnthropicRequest::new(self.model, messages)?;

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Http(format!(
                "anthropic chat status={status} body={body}"
            )));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&body)?;
        Ok(parsed.into())
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> AnthropicRequest<'a> {
    fn new(model: &'a str, messages: &'a [ChatMessage]) -> Result<Self> {
        let mut system = String::new();
        let mut out_messages = Vec::new();

        for m in messages {
            match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(m.content.trim());
                }
                Role::User => out_messages.push(AnthropicMessage {
                    role: "user",
                    content: &m.content,
                }),
                Role::Assistant => out_messages.push(AnthropicMessage {
                    role: "assistant",
                    content: &m.content,
                }),
            }
        }

        // The messages API rejects transcripts that open with an assistant turn.
        if out_messages.first().is_none_or(|m| m.role != "user") {
            return Err(LlmError::InvalidInput(
                "anthropic transcript must start with a user message".to_string(),
            ));
        }

        Ok(Self {
            model,
            max_tokens: MAX_TOKENS,
            system,
            messages: out_messages,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl From<AnthropicResponse> for ChatResponse {
    fn from(v: AnthropicResponse) -> Self {
        let mut content = String::new();
        for block in v.content {
            if let AnthropicContentBlock::Text { text } = block {
                content.push_str(&text);
            }
        }
        ChatResponse {
            message: ChatMessage::assistant(content),
            usage: Usage {
                prompt_tokens: v.usage.input_tokens as u32,
                completion_tokens: v.usage.output_tokens as u32,
            },
            finish_reason: v.stop_reason.unwrap_or_default(),
        }
    }
}
