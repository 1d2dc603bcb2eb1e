//! Embedding client adapter.
//!
//! Shaped after the reference crate's `LlmClient` trait (`src/llm.rs`):
//! a thin reqwest-backed HTTP adapter behind an async trait, with retry
//! and timeout handled once at this boundary rather than by callers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EmbeddingError, Result};

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub backoff_factor: u32,
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            backoff_factor: 2,
            max_retries: 3,
        }
    }
}

/// Retries `op` with exponential backoff on transient failures only:
/// initial 1s delay, factor 2, up to 3 retries.
pub async fn with_retry<T, F, Fut>(retry: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut backoff = retry.initial_backoff;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                warn!(attempt, error = %e, "transient failure, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= retry.backoff_factor;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Derive embedding dimension from the model name, matching the reference
/// provider's `get_embedding_dimension` heuristic exactly.
pub fn dimension_for_model(model: &str) -> usize {
    if model.contains("3-large") {
        3072
    } else if model.contains("3-small") {
        1536
    } else {
        1536
    }
}

/// OpenAI-compatible embeddings endpoint adapter.
pub struct OpenAiEmbeddingClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryConfig,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponseItem {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedResponseItem>,
}

impl OpenAiEmbeddingClient {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(crate::error::RagError::Embedding(EmbeddingError::AuthFailed(
                "openai_api_key is not set".into(),
            )));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
            retry: RetryConfig::default(),
        })
    }

    async fn call(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    crate::error::RagError::Embedding(EmbeddingError::Timeout)
                } else {
                    crate::error::RagError::Embedding(EmbeddingError::Transient(e.to_string()))
                }
            })?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(crate::error::RagError::Embedding(EmbeddingError::AuthFailed(
                "invalid credentials".into(),
            )));
        }
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(crate::error::RagError::Embedding(EmbeddingError::UnknownModel(
                self.model.clone(),
            )));
        }
        if !resp.status().is_success() {
            return Err(crate::error::RagError::Embedding(EmbeddingError::Transient(
                format!("status {}", resp.status()),
            )));
        }

        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| crate::error::RagError::Embedding(EmbeddingError::Transient(e.to_string())))?;
        debug!(count = parsed.data.len(), "received embeddings");
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let result = with_retry(&self.retry, || self.call(&texts)).await?;
        result
            .into_iter()
            .next()
            .ok_or_else(|| crate::error::RagError::Embedding(EmbeddingError::Transient("empty response".into())))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let owned = texts.to_vec();
        with_retry(&self.retry, || self.call(&owned)).await
    }

    fn dimension(&self) -> usize {
        dimension_for_model(&self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_selection_matches_model_family() {
        assert_eq!(dimension_for_model("text-embedding-3-large"), 3072);
        assert_eq!(dimension_for_model("text-embedding-3-small"), 1536);
        assert_eq!(dimension_for_model("text-embedding-ada-002"), 1536);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let retry = RetryConfig {
            initial_backoff: Duration::from_millis(1),
            backoff_factor: 1,
            max_retries: 2,
        };
        let mut calls = 0;
        let result: Result<()> = with_retry(&retry, || {
            calls += 1;
            async { Err(crate::error::RagError::Embedding(EmbeddingError::Timeout)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_does_not_retry_permanent_failures() {
        let retry = RetryConfig::default();
        let mut calls = 0;
        let result: Result<()> = with_retry(&retry, || {
            calls += 1;
            async {
                Err(crate::error::RagError::Embedding(EmbeddingError::AuthFailed(
                    "bad key".into(),
                )))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn rejects_empty_api_key() {
        assert!(OpenAiEmbeddingClient::new("".into(), "text-embedding-3-small".into()).is_err());
    }
}
