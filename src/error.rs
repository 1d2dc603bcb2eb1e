//! Error taxonomy for the RAG service

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, RagError>;

/// Top-level error taxonomy. Every variant maps to an HTTP status and a
/// stable `code` string via [`RagError::code`] / [`RagError::status_code`].
#[derive(Error, Debug)]
pub enum RagError {
    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("search error: {0}")]
    Search(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors from the vector store adapter.
#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("backend unreachable: {0}")]
    ResourceUnavailable(String),

    #[error("id not found: {0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    StorageFailed(String),
}

/// Errors from the embedding client adapter.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("upstream unreachable: {0}")]
    Transient(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("request timed out")]
    Timeout,
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_) | EmbeddingError::Timeout)
    }
}

/// Errors from the LLM client adapter.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("context too long: {0} characters exceeds budget")]
    ContextTooLong(usize),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("request timed out")]
    Timeout,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::UpstreamUnavailable(_) | LlmError::Timeout)
    }
}

/// Errors from the session manager.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("remote backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Errors from document validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("empty content")]
    EmptyContent,

    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("incomplete metadata for kind {kind}: missing {field}")]
    IncompleteMetadata { kind: String, field: String },
}

/// The `{"error": {"code","message","details"}}` wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub details: Value,
}

impl RagError {
    /// Stable machine-readable code, mirrored from the original taxonomy's
    /// exception classes.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::VectorStore(_) => "VECTOR_STORE_ERROR",
            RagError::Embedding(_) => "EMBEDDING_ERROR",
            RagError::Search(_) => "SEARCH_ERROR",
            RagError::Llm(_) => "LLM_ERROR",
            RagError::Session(_) => "SESSION_ERROR",
            RagError::Validation(_) => "VALIDATION_ERROR",
            RagError::Configuration(_) => "CONFIGURATION_ERROR",
            RagError::Io(_) => "GENERAL_ERROR",
            RagError::Serialization(_) => "GENERAL_ERROR",
            RagError::Database(_) => "VECTOR_STORE_ERROR",
        }
    }

    /// HTTP status for the typed taxonomy: 400 for caller-caused taxonomy
    /// errors, 500 for anything uncaught-equivalent.
    pub fn status_code(&self) -> u16 {
        match self {
            RagError::Validation(_) => 400,
            RagError::Session(SessionError::NotFound(_)) => 404,
            RagError::VectorStore(VectorStoreError::NotFound(_)) => 404,
            _ => 500,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorPayload {
                code: self.code().to_string(),
                message: self.to_string(),
                details: json!({}),
            },
        }
    }

    /// Whether this error category is retried by the adapter layer before
    /// surfacing: upstream transient failures only.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::Embedding(e) => e.is_retryable(),
            RagError::Llm(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_400_and_not_retryable() {
        let err = RagError::Validation(ValidationError::EmptyContent);
        assert_eq!(err.status_code(), 400);
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn transient_embedding_errors_are_retryable() {
        let err = RagError::Embedding(EmbeddingError::Timeout);
        assert!(err.is_retryable());
    }

    #[test]
    fn auth_failures_are_not_retryable() {
        let err = RagError::Llm(LlmError::AuthFailed("bad key".into()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_body_shape_matches_wire_contract() {
        let err = RagError::Configuration("missing openai_api_key".into());
        let body = err.to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert!(json["error"]["code"].is_string());
        assert!(json["error"]["message"].is_string());
        assert!(json["error"]["details"].is_object());
    }
}
