//! LLM client adapter.
//!
//! Shaped after the reference crate's `LlmClient` trait and `OllamaClient`
//! (`src/llm.rs`): an async trait plus a single reqwest-backed adapter, with
//! timeout and retry handled once at the boundary. Targets an
//! OpenAI-compatible chat completions endpoint, including SSE streaming,
//! per `original_source/src/rag/llm_manager.py`'s sync/async split.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::{with_retry, RetryConfig};
use crate::error::{LlmError, RagError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

pub fn system_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::System,
        content: content.into(),
    }
}

pub fn user_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::User,
        content: content.into(),
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens_used: Option<u32>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Upstream language-model operations: one-shot generation and chunked
/// streaming generation, both driven by the same message list.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse>;

    async fn generate_stream(
        &self,
        messages: &[Message],
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = Result<String>> + Send>>>;
}

/// Context budget enforced before a request leaves the process. Approximate character-to-token ratio, matching the
/// reference provider's rough heuristic.
const MAX_PROMPT_CHARS: usize = 48_000;

pub struct OpenAiChatClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    retry: RetryConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessageBody {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

impl OpenAiChatClient {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::Llm(LlmError::AuthFailed(
                "openai_api_key is not set".into(),
            )));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        })
    }

    fn total_chars(messages: &[Message]) -> usize {
        messages.iter().map(|m| m.content.chars().count()).sum()
    }

    fn map_status(status: reqwest::StatusCode, body: String) -> RagError {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                RagError::Llm(LlmError::AuthFailed(body))
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => RagError::Llm(LlmError::QuotaExceeded(body)),
            s if s.is_server_error() => RagError::Llm(LlmError::UpstreamUnavailable(body)),
            _ => RagError::Llm(LlmError::UpstreamUnavailable(body)),
        }
    }

    async fn call(&self, messages: &[Message]) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                stream: false,
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RagError::Llm(LlmError::Timeout)
                } else {
                    RagError::Llm(LlmError::UpstreamUnavailable(e.to_string()))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        resp.json()
            .await
            .map_err(|e| RagError::Llm(LlmError::UpstreamUnavailable(e.to_string())))
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse> {
        if Self::total_chars(messages) > MAX_PROMPT_CHARS {
            return Err(RagError::Llm(LlmError::ContextTooLong(Self::total_chars(messages))));
        }

        let response = with_retry(&self.retry, || self.call(messages)).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Llm(LlmError::UpstreamUnavailable("empty choices".into())))?;

        debug!(model = %response.model, "generated response");
        Ok(GenerationResponse {
            text: choice.message.content,
            tokens_used: response.usage.and_then(|u| u.total_tokens),
            model: response.model,
            finish_reason: choice.finish_reason,
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = Result<String>> + Send>>> {
        if Self::total_chars(messages) > MAX_PROMPT_CHARS {
            return Err(RagError::Llm(LlmError::ContextTooLong(Self::total_chars(messages))));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                stream: true,
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RagError::Llm(LlmError::Timeout)
                } else {
                    RagError::Llm(LlmError::UpstreamUnavailable(e.to_string()))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        let byte_stream = resp.bytes_stream();
        let chunk_stream = byte_stream
            .map(|chunk| chunk.map_err(|e| RagError::Llm(LlmError::UpstreamUnavailable(e.to_string()))))
            .map(|chunk| chunk.and_then(|bytes| parse_sse_chunk(&bytes)))
            .filter_map(|parsed| async move { parsed.transpose() });

        Ok(Box::pin(chunk_stream))
    }
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamEvent {
    choices: Vec<StreamChoice>,
}

/// Extracts text deltas from an SSE `data:` frame; `[DONE]` and
/// keep-alive lines yield nothing.
fn parse_sse_chunk(bytes: &[u8]) -> Result<Option<String>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| RagError::Llm(LlmError::UpstreamUnavailable(e.to_string())))?;

    for line in text.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data.trim() == "[DONE]" {
            return Ok(None);
        }
        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "unparsable stream frame, skipping");
                continue;
            }
        };
        if let Some(content) = event.choices.into_iter().next().and_then(|c| c.delta.content) {
            if !content.is_empty() {
                return Ok(Some(content));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_api_key() {
        assert!(OpenAiChatClient::new("".into(), "gpt-4o".into()).is_err());
    }

    #[test]
    fn message_constructors_set_role() {
        assert_eq!(system_message("a").role, Role::System);
        assert_eq!(user_message("b").role, Role::User);
    }

    #[test]
    fn sse_done_marker_yields_no_chunk() {
        assert!(parse_sse_chunk(b"data: [DONE]\n").unwrap().is_none());
    }

    #[test]
    fn sse_content_delta_is_extracted() {
        let frame = br#"data: {"choices":[{"delta":{"content":"hi"}}]}"#;
        assert_eq!(parse_sse_chunk(frame).unwrap(), Some("hi".to_string()));
    }

    #[test]
    fn sse_keepalive_line_yields_nothing() {
        assert!(parse_sse_chunk(b": keep-alive\n").unwrap().is_none());
    }

    #[test]
    fn context_over_budget_is_rejected_before_network_call() {
        let messages = vec![user_message("x".repeat(MAX_PROMPT_CHARS + 1))];
        assert_eq!(OpenAiChatClient::total_chars(&messages), MAX_PROMPT_CHARS + 1);
    }

    #[tokio::test]
    async fn mock_client_satisfies_the_trait_object_contract() {
        let mut mock = MockLlmClient::new();
        mock.expect_generate().returning(|_| {
            Ok(GenerationResponse {
                text: "mocked".to_string(),
                tokens_used: Some(3),
                model: "mock-model".to_string(),
                finish_reason: Some("stop".to_string()),
            })
        });
        let client: std::sync::Arc<dyn LlmClient> = std::sync::Arc::new(mock);
        let response = client.generate(&[user_message("hi")]).await.unwrap();
        assert_eq!(response.text, "mocked");
    }
}
