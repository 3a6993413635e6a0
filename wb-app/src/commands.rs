//! Chat commands sent by operator phones.

use crate::escalation::EscalationRegistry;
use crate::scheduler::ConversationScheduler;
use crate::settings::OrchestrationSettings;
use wb_channels::{ConversationKey, PhoneNumber, SessionId};

const USAGE: &str = "Unknown command. Supported: /resume <phone> /takeover <phone> /bot on|off [phone] /bot default <phone> /status";

pub struct CommandContext<'a> {
    pub scheduler: &'a ConversationScheduler,
    pub escalations: &'a EscalationRegistry,
    pub settings: &'a OrchestrationSettings,
    /// Business number the operator wrote to; commands act on its conversations.
    pub session: &'a SessionId,
}

/// Returns the reply for `input`, or `None` when it is not a command.
pub fn handle_command(ctx: &CommandContext<'_>, input: &str) -> Option<String> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    let command = parts[0].to_ascii_lowercase();
    let reply = match (command.as_str(), &parts[1..]) {
        ("/resume", [phone]) => with_key(ctx, phone, |key| {
            if ctx.scheduler.resume(&key) {
                format!("Resumed automated replies for +{}.", key.phone)
            } else {
                format!("+{} was not escalated.", key.phone)
            }
        }),
        ("/takeover", [phone]) => with_key(ctx, phone, |key| {
            ctx.scheduler.escalate(&key);
            format!(
                "Took over +{}. Send /resume {} to hand it back.",
                key.phone, key.phone
            )
        }),
        ("/bot", [switch]) => match parse_switch(switch) {
            Some(enabled) => {
                ctx.settings.set_global(enabled);
                format!("Automated replies {} globally.", on_off(enabled))
            }
            None => usage("/bot on|off [phone]"),
        },
        ("/bot", [switch, phone]) if switch.eq_ignore_ascii_case("default") => {
            with_key(ctx, phone, |key| {
                ctx.settings.set_override(&key, None);
                format!(
                    "+{} follows the global switch ({}).",
                    key.phone,
                    on_off(ctx.settings.global_enabled())
                )
            })
        }
        ("/bot", [switch, phone]) => match parse_switch(switch) {
            Some(enabled) => with_key(ctx, phone, |key| {
                ctx.settings.set_override(&key, Some(enabled));
                if !enabled {
                    ctx.scheduler.cancel_all(&key);
                }
                format!("Automated replies {} for +{}.", on_off(enabled), key.phone)
            }),
            None => usage("/bot on|off [phone]"),
        },
        ("/status", []) => format!(
            "orchestration={}\nescalated={}\noverrides={}\npending={}",
            on_off(ctx.settings.global_enabled()),
            ctx.escalations.len(),
            ctx.settings.override_count(),
            ctx.scheduler.pending_count()
        ),
        ("/resume" | "/takeover", _) => usage(&format!("{command} <phone>")),
        _ => USAGE.to_string(),
    };
    Some(reply)
}

fn with_key(
    ctx: &CommandContext<'_>,
    raw_phone: &str,
    action: impl FnOnce(ConversationKey) -> String,
) -> String {
    match PhoneNumber::normalize(raw_phone) {
        Some(phone) => action(ConversationKey::new(ctx.session.clone(), phone)),
        None => format!("Not a phone number: {raw_phone:?}"),
    }
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "on" | "enable" => Some(true),
        "off" | "disable" => Some(false),
        _ => None,
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn usage(form: &str) -> String {
    format!("Usage: {form}")
}
