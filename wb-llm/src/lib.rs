//! LLM client for WhatsBot reply generation.
//!
//! Pure HTTP client: chat completions against OpenAI or Anthropic, plus
//! parsing of the structured `{reply, escalate}` answer the bot asks for.

mod anthropic;
mod client;
mod error;
mod openai;
mod reply;
mod types;

pub use client::{LlmClient, Provider};
pub use error::{LlmError, Result};
pub use reply::{GeneratedReply, REPLY_FORMAT_INSTRUCTIONS, parse_generated_reply};
pub use types::{ChatMessage, ChatResponse, Role, Usage};
