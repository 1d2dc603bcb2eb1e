//! Retrieval-augmented answering over a legal-document corpus: type-aware
//! chunking, a SQLite-backed vector store, a five-stage retrieval workflow,
//! and a REST API layered on top.

pub mod api;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod incremental;
pub mod indexer;
pub mod llm;
pub mod monitoring;
pub mod prompts;
pub mod session;
pub mod vector_store;
pub mod workflow;

pub use cache::{CacheStats, QueryCache, QueryCacheConfig};
pub use chunker::{Chunk, Chunker, ChunkerConfig};
pub use config::RagConfig;
pub use document::{Content, Document, DocumentKind};
pub use embedding::{EmbeddingClient, OpenAiEmbeddingClient};
pub use error::{RagError, Result};
pub use incremental::IncrementalUpdater;
pub use indexer::DocumentIndexer;
pub use llm::{LlmClient, OpenAiChatClient};
pub use session::{Session, SessionManager};
pub use vector_store::{SqliteVectorStore, VectorStore, Where};
pub use workflow::{RetrievalOutcome, RetrievalWorkflow, WorkflowInput};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
