use crate::error::{LlmError, Result};
use serde::{Deserialize, Serialize};

/// Appended to the system prompt so the model answers in a shape
/// [`parse_generated_reply`] understands.
pub const REPLY_FORMAT_INSTRUCTIONS: &str = "Respond only with a JSON object of the form \
{\"reply\": string, \"escalate\": boolean}. Set \"escalate\" to true when the customer asks \
for a human, is upset, or needs something you cannot resolve; \"reply\" may then be empty.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedReply {
    pub text: String,
    pub escalate: bool,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default, alias = "text", alias = "message")]
    reply: Option<String>,
    #[serde(default, alias = "handoff", alias = "needs_human")]
    escalate: Option<bool>,
}

/// Parses model output into a reply.
///
/// Accepts a bare JSON object, a JSON object inside a markdown code fence,
/// or plain prose (taken as a non-escalating reply).
pub fn parse_generated_reply(raw: &str) -> Result<GeneratedReply> {
    let trimmed = strip_code_fence(raw.trim());
    if trimmed.is_empty() {
        return Err(LlmError::ResponseFormat("model returned empty output".into()));
    }

    let reply = if trimmed.starts_with('{') {
        let parsed: RawReply = serde_json::from_str(trimmed)?;
        GeneratedReply {
            text: parsed.reply.unwrap_or_default().trim().to_string(),
            escalate: parsed.escalate.unwrap_or(false),
        }
    } else {
        GeneratedReply {
            text: trimmed.to_string(),
            escalate: false,
        }
    };

    if reply.text.is_empty() && !reply.escalate {
        return Err(LlmError::ResponseFormat(
            "model returned an empty reply without escalating".into(),
        ));
    }
    Ok(reply)
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let reply = parse_generated_reply(r#"{"reply": " We open at 9. ", "escalate": false}"#)
            .expect("reply");
        assert_eq!(reply.text, "We open at 9.");
        assert!(!reply.escalate);
    }

    #[test]
    fn parses_fenced_json_with_escalation() {
        let raw = "```json\n{\"reply\": \"\", \"escalate\": true}\n```";
        let reply = parse_generated_reply(raw).expect("reply");
        assert!(reply.escalate);
        assert!(reply.text.is_empty());
    }

    #[test]
    fn accepts_field_aliases() {
        let reply =
            parse_generated_reply(r#"{"message": "Claro", "needs_human": false}"#).expect("reply");
        assert_eq!(reply.text, "Claro");
    }

    #[test]
    fn plain_text_is_a_reply() {
        let reply = parse_generated_reply("Sure, see you tomorrow!").expect("reply");
        assert_eq!(reply.text, "Sure, see you tomorrow!");
        assert!(!reply.escalate);
    }

    #[test]
    fn rejects_empty_output_and_empty_non_escalating_reply() {
        assert!(parse_generated_reply("   ").is_err());
        assert!(parse_generated_reply(r#"{"reply": "", "escalate": false}"#).is_err());
        assert!(parse_generated_reply("{not json").is_err());
    }
}
