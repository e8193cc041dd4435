use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::transport::ReplyTransport;

/// Appended to replies cut at the length cap.
pub const TRUNCATION_MARKER: &str = "...\n\n(Message truncated due to length)";

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub recipient_id: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Cut `body` to `max_chars` characters plus [`TRUNCATION_MARKER`]. Bodies
/// within the cap are returned unchanged.
pub fn truncate_reply(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let mut out: String = body.chars().take(max_chars).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Delivers replies through a [`ReplyTransport`], enforcing the length cap
/// and the retry policy. Never returns an error: failures are reported in
/// the [`DispatchResult`] and, once retries are exhausted, on the
/// `dead_letter` log target.
#[derive(Clone)]
pub struct ReplyDispatcher {
    transport: Arc<dyn ReplyTransport>,
    max_length: usize,
    max_attempts: u32,
    backoff: Duration,
}

impl ReplyDispatcher {
    /// Single attempt, no retry.
    pub fn new(transport: Arc<dyn ReplyTransport>, max_length: usize) -> Self {
        Self {
            transport,
            max_length,
            max_attempts: 1,
            backoff: Duration::from_millis(500),
        }
    }

    /// Retry transient failures up to `max_attempts` total tries, sleeping
    /// `backoff`, `2 * backoff`, `4 * backoff`... in between. 0 is read as 1.
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub async fn send(&self, reply: OutboundReply) -> DispatchResult {
        let body = truncate_reply(&reply.body, self.max_length);
        if body.len() != reply.body.len() {
            debug!(to = %reply.recipient_id, cap = self.max_length, "reply truncated");
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.transport.send_text(&reply.recipient_id, &body).await {
                Ok(()) => {
                    info!(to = %reply.recipient_id, attempt, "reply delivered");
                    return DispatchResult {
                        success: true,
                        error: None,
                        attempts: attempt,
                    };
                }
                Err(e) if attempt < self.max_attempts && e.is_transient() => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        to = %reply.recipient_id,
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "reply send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let reason = e.to_string();
                    error!(
                        target: "dead_letter",
                        to = %reply.recipient_id,
                        attempts = attempt,
                        error = %reason,
                        body = %body,
                        "reply dropped"
                    );
                    return DispatchResult {
                        success: false,
                        error: Some(reason),
                        attempts: attempt,
                    };
                }
            }
        }
    }

    /// Best effort; failures are logged and swallowed.
    pub async fn mark_read(&self, message_id: &str) {
        if let Err(e) = self.transport.mark_read(message_id).await {
            debug!(message_id, error = %e, "mark-read failed");
        }
    }

    /// Best effort; failures are logged and swallowed.
    pub async fn send_reaction(&self, recipient: &str, message_id: &str, emoji: &str) {
        if let Err(e) = self
            .transport
            .send_reaction(recipient, message_id, emoji)
            .await
        {
            debug!(message_id, error = %e, "reaction failed");
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WhatsAppError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails the first `failures` sends with `status`, then succeeds.
    struct FlakyTransport {
        failures: Mutex<u32>,
        status: u16,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl FlakyTransport {
        fn new(failures: u32, status: u16) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                status,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReplyTransport for FlakyTransport {
        async fn send_text(&self, recipient: &str, body: &str) -> Result<(), WhatsAppError> {
            let mut left = self.failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(WhatsAppError::Api {
                    status: self.status,
                    body: "boom".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), body.to_string()));
            Ok(())
        }

        async fn mark_read(&self, _message_id: &str) -> Result<(), WhatsAppError> {
            Err(WhatsAppError::NotConfigured("mock"))
        }

        async fn send_reaction(&self, _: &str, _: &str, _: &str) -> Result<(), WhatsAppError> {
            Err(WhatsAppError::NotConfigured("mock"))
        }
    }

    fn reply(body: &str) -> OutboundReply {
        OutboundReply {
            recipient_id: "911234567890".into(),
            body: body.into(),
        }
    }

    #[test]
    fn short_bodies_are_untouched() {
        assert_eq!(truncate_reply("hello", 5), "hello");
        assert_eq!(truncate_reply("", 0), "");
    }

    #[test]
    fn long_bodies_get_cap_plus_marker() {
        let body = "a".repeat(4500);
        let out = truncate_reply(&body, 4000);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            out.chars().count(),
            4000 + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let body = "नमस्ते".repeat(10);
        let out = truncate_reply(&body, 7);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.chars().count(), 7 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let d = ReplyDispatcher::new(FlakyTransport::new(0, 500), 10)
            .with_retry(10, Duration::from_millis(100));
        assert_eq!(d.delay_for(1), Duration::from_millis(100));
        assert_eq!(d.delay_for(2), Duration::from_millis(200));
        assert_eq!(d.delay_for(3), Duration::from_millis(400));
        assert_eq!(d.delay_for(40), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn success_reports_one_attempt() {
        let transport = FlakyTransport::new(0, 500);
        let d = ReplyDispatcher::new(transport.clone(), 4000);
        let result = d.send(reply("hi")).await;
        assert_eq!(
            result,
            DispatchResult {
                success: true,
                error: None,
                attempts: 1
            }
        );
        assert_eq!(transport.sent.lock().unwrap()[0].1, "hi");
    }

    #[tokio::test]
    async fn dispatcher_applies_length_cap() {
        let transport = FlakyTransport::new(0, 500);
        let d = ReplyDispatcher::new(transport.clone(), 10);
        d.send(reply(&"z".repeat(50))).await;
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].1, format!("{}{}", "z".repeat(10), TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn single_attempt_by_default() {
        let transport = FlakyTransport::new(1, 503);
        let d = ReplyDispatcher::new(transport.clone(), 4000);
        let result = d.send(reply("hi")).await;
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert!(result.error.unwrap().contains("503"));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let transport = FlakyTransport::new(2, 503);
        let d = ReplyDispatcher::new(transport.clone(), 4000).with_retry(3, Duration::from_millis(1));
        let result = d.send(reply("hi")).await;
        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let transport = FlakyTransport::new(1, 400);
        let d = ReplyDispatcher::new(transport.clone(), 4000).with_retry(5, Duration::from_millis(1));
        let result = d.send(reply("hi")).await;
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn best_effort_calls_swallow_errors() {
        let d = ReplyDispatcher::new(FlakyTransport::new(0, 500), 4000);
        d.mark_read("wamid.X").await;
        d.send_reaction("911234567890", "wamid.X", "👍").await;
    }
}
