//! WhatsApp Cloud API webhook decoding and signature checks.

use crate::types::{ConversationKey, InboundMessage, InboundMessageKind, MessageId, PhoneNumber};
use anyhow::Result;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

const MEDIA_KINDS: [&str; 6] = ["image", "audio", "video", "document", "sticker", "location"];

/// Checks `x-hub-signature-256` (`sha256=<hex>`) against the raw body.
pub fn verify_signature(signature_header: Option<&str>, body: &[u8], app_secret: &str) -> bool {
    let Some(signature) = signature_header.map(str::trim) else {
        return false;
    };
    constant_time_eq(&sign_payload(body, app_secret), signature)
}

/// The `x-hub-signature-256` value Meta would send for `body`.
pub fn sign_payload(body: &[u8], app_secret: &str) -> String {
    format!("sha256={}", hmac_sha256_hex(app_secret.as_bytes(), body))
}

/// Decodes a webhook body into inbound messages, skipping anything the bot
/// does not act on (status callbacks, unknown message types).
pub fn decode_webhook(body: &[u8]) -> Result<Vec<InboundMessage>> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;
    Ok(payload.into_inbound())
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    entry: Vec<WhatsAppEntry>,
}

impl WebhookPayload {
    pub fn into_inbound(self) -> Vec<InboundMessage> {
        let mut out = Vec::new();
        for entry in self.entry {
            for change in entry.changes {
                let phone_number_id = change
                    .value
                    .metadata
                    .as_ref()
                    .and_then(|metadata| metadata.phone_number_id.as_deref())
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string();
                for message in &change.value.messages {
                    if let Some(inbound) = convert_message(message, &phone_number_id) {
                        out.push(inbound);
                    }
                }
            }
        }
        out
    }
}

fn convert_message(message: &WhatsAppMessage, phone_number_id: &str) -> Option<InboundMessage> {
    let phone = PhoneNumber::normalize(&message.from)?;
    let message_id = if message.id.trim().is_empty() {
        MessageId::new(ulid::Ulid::new().to_string())
    } else {
        MessageId::new(message.id.trim())
    };
    let received_at = message
        .timestamp
        .as_deref()
        .and_then(|ts| ts.trim().parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now);

    let (kind, text, media_kind) = match message.message_type.as_str() {
        "text" => {
            let body = message
                .text
                .as_ref()
                .map(|text| text.body.trim())
                .filter(|value| !value.is_empty())?;
            (InboundMessageKind::Text, body.to_string(), None)
        }
        "reaction" => {
            let emoji = message
                .reaction
                .as_ref()
                .map(|reaction| reaction.emoji.trim())
                .filter(|value| !value.is_empty())?;
            (InboundMessageKind::Reaction, emoji.to_string(), None)
        }
        kind if MEDIA_KINDS.contains(&kind) => (
            InboundMessageKind::Media,
            media_caption(message, kind),
            Some(kind.to_string()),
        ),
        other => {
            tracing::debug!(message_type = %other, "skipping unsupported whatsapp message type");
            return None;
        }
    };

    Some(InboundMessage {
        kind,
        message_id,
        key: ConversationKey::new(phone_number_id, phone),
        text,
        media_kind,
        received_at,
    })
}

fn media_caption(message: &WhatsAppMessage, kind: &str) -> String {
    if kind == "location" {
        let Some(location) = message.location.as_ref() else {
            return String::new();
        };
        return [location.name.as_deref(), location.address.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
    }
    let media = match kind {
        "image" => message.image.as_ref(),
        "video" => message.video.as_ref(),
        "document" => message.document.as_ref(),
        "audio" => message.audio.as_ref(),
        "sticker" => message.sticker.as_ref(),
        _ => None,
    };
    media
        .and_then(|media| media.caption.as_deref())
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn hmac_sha256_hex(key: &[u8], payload: &[u8]) -> String {
    let mut key_block = [0_u8; 64];
    if key.len() > 64 {
        let digest = Sha256::digest(key);
        key_block[..32].copy_from_slice(&digest);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner_pad = [0_u8; 64];
    let mut outer_pad = [0_u8; 64];
    for index in 0..64 {
        inner_pad[index] = key_block[index] ^ 0x36;
        outer_pad[index] = key_block[index] ^ 0x5c;
    }

    let mut inner = Sha256::new();
    inner.update(inner_pad);
    inner.update(payload);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(outer_pad);
    outer.update(inner_digest);
    let digest = outer.finalize();

    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let mut diff = left_bytes.len() ^ right_bytes.len();
    let max_len = left_bytes.len().max(right_bytes.len());
    for index in 0..max_len {
        let l = left_bytes.get(index).copied().unwrap_or(0);
        let r = right_bytes.get(index).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}

#[derive(Debug, Deserialize)]
struct WhatsAppEntry {
    #[serde(default)]
    changes: Vec<WhatsAppChange>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppChange {
    #[serde(default)]
    value: WhatsAppChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppChangeValue {
    #[serde(default)]
    metadata: Option<WhatsAppMetadata>,
    #[serde(default)]
    messages: Vec<WhatsAppMessage>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppMetadata {
    #[serde(default)]
    phone_number_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppMessage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(rename = "type", default)]
    message_type: String,
    #[serde(default)]
    text: Option<WhatsAppText>,
    #[serde(default)]
    reaction: Option<WhatsAppReaction>,
    #[serde(default)]
    image: Option<WhatsAppMedia>,
    #[serde(default)]
    video: Option<WhatsAppMedia>,
    #[serde(default)]
    audio: Option<WhatsAppMedia>,
    #[serde(default)]
    document: Option<WhatsAppMedia>,
    #[serde(default)]
    sticker: Option<WhatsAppMedia>,
    #[serde(default)]
    location: Option<WhatsAppLocation>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppText {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct WhatsAppReaction {
    #[serde(default)]
    emoji: String,
}

#[derive(Debug, Deserialize)]
struct WhatsAppMedia {
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppLocation {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
}
