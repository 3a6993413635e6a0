//! WhatsBot configuration loader.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wb_channels::PhoneNumber;

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub replies: RepliesConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub model: String,
    pub system_prompt: String,
    /// OpenAI/Anthropic-compatible endpoint, e.g. a local gateway.
    #[serde(default)]
    pub api_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
    #[serde(default)]
    pub verify_token: String,
    /// Enables `x-hub-signature-256` checks on inbound webhooks.
    #[serde(default)]
    pub app_secret: Option<String>,
    #[serde(default)]
    pub graph_api_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
    #[serde(default)]
    pub control_token: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
            control_token: None,
        }
    }
}

/// Human-like delays, in seconds. Each delay is drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_debounce_min_seconds")]
    pub debounce_min_seconds: u64,
    #[serde(default = "default_debounce_max_seconds")]
    pub debounce_max_seconds: u64,
    #[serde(default = "default_typing_min_seconds")]
    pub typing_min_seconds: u64,
    #[serde(default = "default_typing_max_seconds")]
    pub typing_max_seconds: u64,
}

fn default_debounce_min_seconds() -> u64 {
    10
}

fn default_debounce_max_seconds() -> u64 {
    20
}

fn default_typing_min_seconds() -> u64 {
    5
}

fn default_typing_max_seconds() -> u64 {
    15
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_min_seconds: default_debounce_min_seconds(),
            debounce_max_seconds: default_debounce_max_seconds(),
            typing_min_seconds: default_typing_min_seconds(),
            typing_max_seconds: default_typing_max_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepliesConfig {
    #[serde(default = "default_greeting")]
    pub default_greeting: String,
    #[serde(default = "default_fallback_apology")]
    pub fallback_apology: String,
}

fn default_greeting() -> String {
    "Hi! Thanks for reaching out. How can we help you today?".to_string()
}

fn default_fallback_apology() -> String {
    "Sorry, we're having trouble replying right now. Please try again in a few minutes."
        .to_string()
}

impl Default for RepliesConfig {
    fn default() -> Self {
        Self {
            default_greeting: default_greeting(),
            fallback_apology: default_fallback_apology(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EscalationConfig {
    /// Phones that receive escalation notices and may issue operator commands.
    #[serde(default)]
    pub operator_phones: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default = "default_orchestration_enabled")]
    pub enabled: bool,
    /// Conversations whose override starts as "off".
    #[serde(default)]
    pub disabled_conversations: Vec<String>,
}

fn default_orchestration_enabled() -> bool {
    true
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            enabled: default_orchestration_enabled(),
            disabled_conversations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.whatsbot/data/history.sqlite3".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_path: default_db_path(),
        }
    }
}

impl TimingConfig {
    pub fn debounce_range(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.debounce_min_seconds),
            Duration::from_secs(self.debounce_max_seconds),
        )
    }

    pub fn typing_range(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.typing_min_seconds),
            Duration::from_secs(self.typing_max_seconds),
        )
    }
}

impl BotConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;
        let mut cfg = Self::from_toml(&contents)
            .map_err(|e| anyhow::anyhow!("config {}: {e}", path.display()))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).map_err(|e| anyhow::anyhow!("parse config: {e}"))
    }

    fn apply_env_overrides(&mut self) {
        override_string(&mut self.general.model, "WHATSBOT_MODEL");
        override_option(&mut self.keys.openai_api_key, "OPENAI_API_KEY");
        override_option(&mut self.keys.anthropic_api_key, "ANTHROPIC_API_KEY");
        override_string(&mut self.whatsapp.access_token, "WHATSAPP_ACCESS_TOKEN");
        override_string(&mut self.whatsapp.phone_number_id, "WHATSAPP_PHONE_NUMBER_ID");
        override_string(&mut self.whatsapp.verify_token, "WHATSAPP_VERIFY_TOKEN");
        override_option(&mut self.whatsapp.app_secret, "WHATSAPP_APP_SECRET");
        override_string(&mut self.server.bind_addr, "WHATSBOT_BIND_ADDR");
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        let t = &self.timing;
        if t.debounce_max_seconds == 0 {
            return Err(anyhow::anyhow!("timing.debounce_max_seconds must be > 0"));
        }
        if t.debounce_min_seconds > t.debounce_max_seconds {
            return Err(anyhow::anyhow!(
                "timing.debounce_min_seconds must be <= timing.debounce_max_seconds"
            ));
        }
        if t.typing_min_seconds > t.typing_max_seconds {
            return Err(anyhow::anyhow!(
                "timing.typing_min_seconds must be <= timing.typing_max_seconds"
            ));
        }
        if self.replies.default_greeting.trim().is_empty()
            || self.replies.fallback_apology.trim().is_empty()
        {
            return Err(anyhow::anyhow!(
                "replies.default_greeting and replies.fallback_apology must be non-empty"
            ));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        self.bind_addr()?;
        self.operator_phones()?;
        self.disabled_conversation_phones()?;
        Ok(())
    }

    /// Extra checks for running the webhook server.
    pub fn validate_for_serve(&self) -> anyhow::Result<()> {
        if self.whatsapp.access_token.trim().is_empty() {
            return Err(anyhow::anyhow!("whatsapp.access_token is required"));
        }
        if self.whatsapp.phone_number_id.trim().is_empty() {
            return Err(anyhow::anyhow!("whatsapp.phone_number_id is required"));
        }
        if self.whatsapp.verify_token.trim().is_empty() {
            return Err(anyhow::anyhow!("whatsapp.verify_token is required"));
        }
        if self.api_key_for_model().is_none() {
            return Err(anyhow::anyhow!(
                "no api key configured for model {}",
                self.general.model
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .bind_addr
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("server.bind_addr {:?}: {e}", self.server.bind_addr))
    }

    pub fn operator_phones(&self) -> anyhow::Result<Vec<PhoneNumber>> {
        parse_phones("escalation.operator_phones", &self.escalation.operator_phones)
    }

    pub fn disabled_conversation_phones(&self) -> anyhow::Result<Vec<PhoneNumber>> {
        parse_phones(
            "orchestration.disabled_conversations",
            &self.orchestration.disabled_conversations,
        )
    }

    pub fn api_key_for_model(&self) -> Option<String> {
        let model = self.general.model.to_ascii_lowercase();
        if model.starts_with("claude-") {
            return self
                .keys
                .anthropic_api_key
                .clone()
                .filter(|s| !s.is_empty());
        }
        self.keys.openai_api_key.clone().filter(|s| !s.is_empty())
    }
}

fn parse_phones(field: &str, raw: &[String]) -> anyhow::Result<Vec<PhoneNumber>> {
    raw.iter()
        .map(|value| {
            PhoneNumber::normalize(value)
                .ok_or_else(|| anyhow::anyhow!("{field}: {value:?} is not a phone number"))
        })
        .collect()
}

fn override_string(target: &mut String, var: &str) {
    if let Ok(v) = std::env::var(var) {
        if !v.trim().is_empty() {
            *target = v;
        }
    }
}

fn override_option(target: &mut Option<String>, var: &str) {
    if let Ok(v) = std::env::var(var) {
        if !v.trim().is_empty() {
            *target = Some(v);
        }
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".whatsbot").join("config.toml")
}

pub fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    let trimmed = path.trim().to_string();
    if !trimmed.starts_with("~/") {
        return Ok(PathBuf::from(trimmed));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(trimmed.replacen("~", &home, 1)))
}
