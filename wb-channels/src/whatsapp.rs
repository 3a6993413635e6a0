use crate::traits::{MessageSender, PresenceSignaler};
use crate::types::{ConversationKey, InboundMessage, InboundMessageKind, MessageId, PresenceState};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Url;

const GRAPH_BASE_URL: &str = "https://graph.facebook.com";
const DEFAULT_GRAPH_API_VERSION: &str = "v20.0";

pub struct WhatsAppCloudAdapter {
    http: reqwest::Client,
    access_token: String,
    phone_number_id: String,
    graph_api_version: String,
    graph_base_url: String,
    last_inbound: DashMap<ConversationKey, MessageId>,
}

impl WhatsAppCloudAdapter {
    pub fn new(access_token: &str, phone_number_id: &str) -> Result<Self> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(anyhow!("whatsapp access token is required"));
        }
        let phone_number_id = phone_number_id.trim();
        if phone_number_id.is_empty() {
            return Err(anyhow!("whatsapp phone number id is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            access_token: access_token.to_string(),
            phone_number_id: phone_number_id.to_string(),
            graph_api_version: DEFAULT_GRAPH_API_VERSION.to_string(),
            graph_base_url: GRAPH_BASE_URL.to_string(),
            last_inbound: DashMap::new(),
        })
    }

    pub fn with_graph_api_version(mut self, version: Option<String>) -> Self {
        if let Some(version) = version.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            self.graph_api_version = version;
        }
        self
    }

    pub fn phone_number_id(&self) -> &str {
        &self.phone_number_id
    }

    fn messages_url(&self) -> Result<Url> {
        Url::parse(&format!(
            "{}/{}/{}/messages",
            self.graph_base_url, self.graph_api_version, self.phone_number_id
        ))
        .map_err(|e| anyhow!("invalid whatsapp graph API URL: {e}"))
    }

    async fn post_messages(&self, payload: &serde_json::Value, what: &str) -> Result<()> {
        let url = self.messages_url()?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "whatsapp {what} failed: status={} body={}",
                status,
                body
            ));
        }
        Ok(())
    }
}

fn text_payload(to: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": {
            "preview_url": false,
            "body": text,
        }
    })
}

fn read_payload(message_id: &MessageId, typing: bool) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "messaging_product": "whatsapp",
        "status": "read",
        "message_id": message_id.as_str(),
    });
    if typing {
        payload["typing_indicator"] = serde_json::json!({ "type": "text" });
    }
    payload
}

#[async_trait]
impl MessageSender for WhatsAppCloudAdapter {
    #[tracing::instrument(level = "info", skip_all, fields(conversation = %key))]
    async fn send_text(&self, key: &ConversationKey, text: &str) -> Result<()> {
        let to = key.phone.as_str();
        if to.is_empty() {
            return Err(anyhow!("recipient phone number is required"));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("message content is empty"));
        }
        self.post_messages(&text_payload(to, text), "send").await
    }
}

#[async_trait]
impl PresenceSignaler for WhatsAppCloudAdapter {
    #[tracing::instrument(level = "debug", skip_all, fields(conversation = %key, state = state.as_str()))]
    async fn set_presence(&self, key: &ConversationKey, state: PresenceState) -> Result<()> {
        // The platform clears typing on the next outbound message or after ~25s.
        if state == PresenceState::TypingStop {
            return Ok(());
        }
        let Some(message_id) = self.last_inbound.get(key).map(|id| id.value().clone()) else {
            tracing::debug!("no inbound message tracked; skipping presence signal");
            return Ok(());
        };
        let payload = read_payload(&message_id, state == PresenceState::TypingStart);
        self.post_messages(&payload, state.as_str()).await
    }

    fn track_inbound(&self, message: &InboundMessage) {
        if message.kind == InboundMessageKind::Reaction {
            return;
        }
        self.last_inbound
            .insert(message.key.clone(), message.message_id.clone());
    }
}
