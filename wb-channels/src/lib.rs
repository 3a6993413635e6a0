//! WhatsApp channel plumbing for WhatsBot.
//!
//! Adapters are pure I/O: they turn Cloud API webhooks into `InboundMessage`
//! values and carry replies and presence signals back out.

mod traits;
mod types;
mod webhook;
mod whatsapp;

pub use traits::{MessageSender, PresenceSignaler};
pub use types::{
    ConversationKey, InboundMessage, InboundMessageKind, MessageId, PhoneNumber, PresenceState,
    SessionId,
};
pub use webhook::{WebhookPayload, decode_webhook, sign_payload, verify_signature};
pub use whatsapp::WhatsAppCloudAdapter;
