use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use relay_core::config::WhatsAppConfig;

use crate::error::WhatsAppError;
use crate::transport::ReplyTransport;

/// Graph API client for one sender phone number.
pub struct WhatsAppClient {
    http: reqwest::Client,
    access_token: String,
    /// `{api_base}/{version}/{phone_number_id}`
    base_url: String,
}

impl WhatsAppClient {
    pub fn new(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token: access_token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &WhatsAppConfig) -> Self {
        Self::new(cfg.access_token.clone(), cfg.base_url())
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    async fn post_message(&self, payload: &Value) -> Result<Value, WhatsAppError> {
        if self.access_token.is_empty() {
            return Err(WhatsAppError::NotConfigured("access token is empty"));
        }

        let resp = self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Graph API request failed");
            return Err(WhatsAppError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.json().await.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ReplyTransport for WhatsAppClient {
    async fn send_text(&self, recipient: &str, body: &str) -> Result<(), WhatsAppError> {
        let raw = self.post_message(&text_payload(recipient, body)).await?;
        let message_id = raw
            .get("messages")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("id"))
            .and_then(Value::as_str)
            .unwrap_or("");
        debug!(to = %recipient, message_id, "text message sent");
        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), WhatsAppError> {
        self.post_message(&read_payload(message_id)).await?;
        Ok(())
    }

    async fn send_reaction(
        &self,
        recipient: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), WhatsAppError> {
        self.post_message(&reaction_payload(recipient, message_id, emoji))
            .await?;
        Ok(())
    }
}

fn text_payload(recipient: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient,
        "type": "text",
        "text": {
            "preview_url": false,
            "body": body,
        },
    })
}

fn read_payload(message_id: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "status": "read",
        "message_id": message_id,
    })
}

fn reaction_payload(recipient: &str, message_id: &str, emoji: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient,
        "type": "reaction",
        "reaction": {
            "message_id": message_id,
            "emoji": emoji,
        },
    })
}
