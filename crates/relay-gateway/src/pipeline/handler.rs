use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use relay_agent::AnswerGenerator;
use relay_core::config::{RelayConfig, DEFAULT_FALLBACK_REPLY};
use relay_whatsapp::{DispatchResult, NormalizedMessage, OutboundReply, ReplyDispatcher};

use super::ordering::SenderLocks;

/// One conversation turn: mark read, answer, reply.
///
/// Runs off the request path. Nothing here returns an error to the caller;
/// generator failures become the fallback reply and dispatch failures are
/// logged by the dispatcher.
pub struct ConversationHandler {
    generator: Arc<dyn AnswerGenerator>,
    dispatcher: ReplyDispatcher,
    generation_timeout: Duration,
    fallback_reply: String,
    ack_reaction: Option<String>,
    sender_locks: Option<SenderLocks>,
}

impl ConversationHandler {
    pub fn new(generator: Arc<dyn AnswerGenerator>, dispatcher: ReplyDispatcher) -> Self {
        Self {
            generator,
            dispatcher,
            generation_timeout: Duration::from_secs(60),
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            ack_reaction: None,
            sender_locks: None,
        }
    }

    pub fn from_config(
        generator: Arc<dyn AnswerGenerator>,
        dispatcher: ReplyDispatcher,
        config: &RelayConfig,
    ) -> Self {
        Self::new(generator, dispatcher)
            .with_timeout(Duration::from_secs(config.agent.generation_timeout_secs))
            .with_fallback_reply(config.agent.fallback_reply.clone())
            .with_ack_reaction(config.whatsapp.ack_reaction.clone())
            .with_per_sender_ordering(config.pipeline.serialize_per_sender)
    }

    /// Deadline for one generator call. Zero is raised to one second.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout.max(Duration::from_secs(1));
        self
    }

    pub fn with_fallback_reply(mut self, reply: String) -> Self {
        self.fallback_reply = reply;
        self
    }

    pub fn with_ack_reaction(mut self, emoji: Option<String>) -> Self {
        self.ack_reaction = emoji.filter(|e| !e.is_empty());
        self
    }

    pub fn with_per_sender_ordering(mut self, enabled: bool) -> Self {
        self.sender_locks = enabled.then(SenderLocks::new);
        self
    }

    /// Process one inbound message. Returns `None` when the message is not
    /// actionable, otherwise the outcome of the reply send.
    pub async fn handle(&self, message: NormalizedMessage) -> Option<DispatchResult> {
        let question = match message.text.as_deref() {
            Some(text) if message.is_actionable() => text.to_string(),
            _ => {
                debug!(message_id = %message.message_id, "ignoring non-actionable message");
                return None;
            }
        };
        let sender = message.sender_id;

        let _turn = match &self.sender_locks {
            Some(locks) => Some(locks.lock(&sender).await),
            None => None,
        };

        info!(from = %sender, message_id = %message.message_id, "processing message");

        self.dispatcher.mark_read(&message.message_id).await;
        if let Some(emoji) = &self.ack_reaction {
            self.dispatcher
                .send_reaction(&sender, &message.message_id, emoji)
                .await;
        }

        let answer = self.answer(&question, &sender).await;
        let result = self
            .dispatcher
            .send(OutboundReply {
                recipient_id: sender.clone(),
                body: answer,
            })
            .await;

        if result.success {
            info!(to = %sender, attempts = result.attempts, "response sent");
        } else {
            warn!(
                to = %sender,
                attempts = result.attempts,
                error = result.error.as_deref().unwrap_or("unknown"),
                "response not delivered"
            );
        }
        Some(result)
    }

    async fn answer(&self, question: &str, sender: &str) -> String {
        let call = self.generator.query(question, Some(sender));
        match tokio::time::timeout(self.generation_timeout, call).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!(from = %sender, error = %e, "answer generation failed, sending fallback");
                self.fallback_reply.clone()
            }
            Err(_) => {
                warn!(
                    from = %sender,
                    timeout_secs = self.generation_timeout.as_secs(),
                    "answer generation timed out, sending fallback"
                );
                self.fallback_reply.clone()
            }
        }
    }
}
