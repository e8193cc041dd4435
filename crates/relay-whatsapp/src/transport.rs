use async_trait::async_trait;

use crate::error::WhatsAppError;

/// Outbound side of the messaging platform.
///
/// `WhatsAppClient` is the production implementation; tests substitute a
/// recording mock.
#[async_trait]
pub trait ReplyTransport: Send + Sync {
    async fn send_text(&self, recipient: &str, body: &str) -> Result<(), WhatsAppError>;

    async fn mark_read(&self, message_id: &str) -> Result<(), WhatsAppError>;

    /// React to `message_id`, which was sent by `recipient`.
    async fn send_reaction(
        &self,
        recipient: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), WhatsAppError>;
}
