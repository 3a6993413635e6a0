use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, Role, Usage};
use serde::{Deserialize, Serialize};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub(crate) struct OpenAiClient<'a> {
    http: reqwest::Client,
    api_key: &'a str,
    model: &'a str,
    base_url: &'a str,
}

impl<'a> OpenAiClient<'a> {
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
            base_url: base_url.unwrap_or(OPENAI_BASE_URL),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub(crate) async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let req = OpenAiChatRequest {
            model: self.model,
            messages: messages.iter().map(to_openai_message).collect(),
            response_format: OpenAiResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Http(format!(
                "openai chat status={status} body={body}"
            )));
        }

        let parsed: OpenAiChatResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    response_format: OpenAiResponseFormat,
}

#[derive(Debug, Serialize)]
struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: Role,
    content: &'a str,
}

fn to_openai_message(m: &ChatMessage) -> OpenAiMessage<'_> {
    OpenAiMessage {
        role: m.role,
        content: &m.content,
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl TryFrom<OpenAiChatResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: OpenAiChatResponse) -> Result<Self> {
        let choice = v
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ResponseFormat("openai response has no choices".into()))?;
        let usage = v.usage.map_or_else(Usage::default, |u| Usage {
            prompt_tokens: u.prompt_tokens as u32,
            completion_tokens: u.completion_tokens as u32,
        });
        Ok(ChatResponse {
            message: ChatMessage::assistant(choice.message.content.unwrap_or_default()),
            usage,
            finish_reason: choice.finish_reason.unwrap_or_default(),
        })
    }
}
