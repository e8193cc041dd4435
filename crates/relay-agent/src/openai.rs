use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, Role};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const COMPLETIONS_PATH: &str = "/v1/chat/completions";
/// Used when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_MS: u64 = 5_000;

/// Chat Completions client (OpenAI or any compatible endpoint).
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: format!("{}{}", base.trim_end_matches('/'), COMPLETIONS_PATH),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = CompletionRequest::from_chat(req);
        debug!(model = %req.model, turns = req.messages.len(), "chat completion request");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after_ms(resp.headers()),
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %message, "chat completion failed");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let completion: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(completion.into_chat_response())
    }
}

/// `retry-after` is whole seconds on this API.
fn retry_after_ms(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
        .unwrap_or(DEFAULT_RETRY_AFTER_MS)
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a Role,
    content: &'a str,
}

impl<'a> CompletionRequest<'a> {
    /// The system prompt travels as the first message.
    fn from_chat(req: &'a ChatRequest) -> Self {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);
        messages.push(WireMessage {
            role: &Role::System,
            content: &req.system,
        });
        messages.extend(req.messages.iter().map(|m| WireMessage {
            role: &m.role,
            content: &m.content,
        }));
        Self {
            model: &req.model,
            messages,
            max_tokens: req.max_tokens,
            stream: false,
        }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl CompletionResponse {
    fn into_chat_response(self) -> ChatResponse {
        let (content, stop_reason) = match self.choices.into_iter().next() {
            Some(choice) => (
                choice.message.content.unwrap_or_default(),
                choice.finish_reason.unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };
        let (tokens_in, tokens_out) = self
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        ChatResponse {
            content,
            model: self.model,
            tokens_in,
            tokens_out,
            stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;
    use reqwest::header::HeaderValue;

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let p = OpenAiProvider::new("k".into(), Some("http://localhost:8080/".into()));
        assert_eq!(p.endpoint, "http://localhost:8080/v1/chat/completions");
        let p = OpenAiProvider::new("k".into(), None);
        assert_eq!(p.endpoint, "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn request_body_prepends_system_message() {
        let req = ChatRequest {
            model: "gpt-4o".to_string(),
            system: "You are an export advisor.".to_string(),
            messages: vec![
                Message {
                    role: Role::User,
                    content: "earlier".to_string(),
                },
                Message {
                    role: Role::Assistant,
                    content: "reply".to_string(),
                },
            ],
            max_tokens: 512,
        };
        let body = serde_json::to_value(CompletionRequest::from_chat(&req)).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are an export advisor.");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn response_takes_first_choice() {
        let raw = serde_json::json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [
                {"message": {"content": "Get an IEC first."}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8}
        });
        let resp: CompletionResponse = serde_json::from_value(raw).unwrap();
        let resp = resp.into_chat_response();
        assert_eq!(resp.content, "Get an IEC first.");
        assert_eq!(resp.stop_reason, "stop");
        assert_eq!(resp.tokens_in, 120);
        assert_eq!(resp.tokens_out, 8);
    }

    #[test]
    fn response_tolerates_null_content_and_no_choices() {
        let raw = serde_json::json!({
            "model": "gpt-4o",
            "choices": [{"message": {"content": null}, "finish_reason": null}]
        });
        let resp: CompletionResponse = serde_json::from_value(raw).unwrap();
        let resp = resp.into_chat_response();
        assert_eq!(resp.content, "");
        assert_eq!(resp.tokens_in, 0);

        let empty: CompletionResponse =
            serde_json::from_value(serde_json::json!({"model": "gpt-4o"})).unwrap();
        assert_eq!(empty.into_chat_response().content, "");
    }

    #[test]
    fn retry_after_is_read_in_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_ms(&headers), DEFAULT_RETRY_AFTER_MS);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after_ms(&headers), 7_000);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after_ms(&headers), DEFAULT_RETRY_AFTER_MS);
    }
}
