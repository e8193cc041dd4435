//! Webhook payload → normalized inbound messages.
//!
//! Payload shape (only the fields we read):
//!
//! ```text
//! {"object": "whatsapp_business_account",
//!  "entry": [{"changes": [{"value": {"messages": [
//!      {"id": "wamid...", "from": "9112...", "type": "text", "text": {"body": "..."}}
//!  ]}}]}]}
//! ```
//!
//! Status callbacks, other object kinds and non-text messages produce nothing.
//! Every lookup degrades to "absent"; extraction never fails.

use serde::Serialize;
use serde_json::Value;

pub const BUSINESS_ACCOUNT_OBJECT: &str = "whatsapp_business_account";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Other,
}

/// One inbound conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedMessage {
    pub message_id: String,
    /// WhatsApp id of the sender; doubles as the session key.
    pub sender_id: String,
    pub kind: MessageKind,
    pub text: Option<String>,
}

impl NormalizedMessage {
    /// Text messages with a non-empty body are the only ones we answer.
    pub fn is_actionable(&self) -> bool {
        self.kind == MessageKind::Text
            && self
                .text
                .as_deref()
                .map(|t| !t.is_empty())
                .unwrap_or(false)
    }
}

/// Extract actionable messages from a webhook payload.
///
/// Only the first message of each change's `messages` list is considered,
/// which is the shape Meta delivers.
pub fn extract_messages(payload: &Value) -> Vec<NormalizedMessage> {
    let mut out = Vec::new();
    if payload.get("object").and_then(Value::as_str) != Some(BUSINESS_ACCOUNT_OBJECT) {
        return out;
    }
    let Some(entries) = payload.get("entry").and_then(Value::as_array) else {
        return out;
    };

    for entry in entries {
        let Some(changes) = entry.get("changes").and_then(Value::as_array) else {
            continue;
        };
        for change in changes {
            let first = change
                .get("value")
                .and_then(|v| v.get("messages"))
                .and_then(Value::as_array)
                .and_then(|messages| messages.first());
            if let Some(message) = first.and_then(normalize) {
                if message.is_actionable() {
                    out.push(message);
                }
            }
        }
    }
    out
}

fn normalize(message: &Value) -> Option<NormalizedMessage> {
    let sender_id = message.get("from").and_then(Value::as_str)?.to_string();
    if sender_id.is_empty() {
        return None;
    }
    let message_id = message
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let kind = match message.get("type").and_then(Value::as_str) {
        Some("text") => MessageKind::Text,
        _ => MessageKind::Other,
    };
    let text = match kind {
        MessageKind::Text => message
            .get("text")
            .and_then(|t| t.get("body"))
            .and_then(Value::as_str)
            .map(str::to_string),
        MessageKind::Other => None,
    };
    Some(NormalizedMessage {
        message_id,
        sender_id,
        kind,
        text,
    })
}
