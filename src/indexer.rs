//! Document indexing pipeline: validate → chunk → embed → store.
//!
//! Grounded on `original_source/src/rag/indexer.py`'s `DocumentIndexer`:
//! the same validate/chunk/embed/store sequence, generalized from its
//! single-collection constructor to the injected-adapter shape the rest
//! of this crate uses (reference crate's `Agent` dependency-injection
//! idiom, `src/agent.rs`).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::chunker::{Chunk, Chunker};
use crate::document::Document;
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IndexOutcome {
    pub document_id: String,
    pub chunks_count: usize,
    pub indexed_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectoryIndexOutcome {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub details: Vec<FileIndexDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileIndexDetail {
    pub file: String,
    pub success: bool,
    pub document_id: Option<String>,
    pub chunks_count: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IndexStatus {
    pub collection_name: String,
    pub document_count: usize,
}

pub struct DocumentIndexer {
    vector_store: Arc<dyn VectorStore>,
    embedding_client: Arc<dyn EmbeddingClient>,
    chunker: Chunker,
    collection_name: String,
}

impl DocumentIndexer {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        embedding_client: Arc<dyn EmbeddingClient>,
        chunker: Chunker,
        collection_name: String,
    ) -> Self {
        Self {
            vector_store,
            embedding_client,
            chunker,
            collection_name,
        }
    }

    /// Validate, chunk, embed and store a single document. With
    /// `chunk=false`, the whole document body is stored as a single chunk
    /// rather than run through the type-aware chunker.
    pub async fn index_document(&self, document: &Document, chunk: bool) -> Result<IndexOutcome> {
        document.validate()?;

        let chunks = if chunk {
            self.chunker.chunk(document)
        } else {
            vec![Chunk {
                text: document.content.joined(),
                parent_id: document.id.clone(),
                chunk_index: 0,
                parent_kind: document.kind,
                article_number: None,
                article_num: None,
                sub_article: None,
                item_number: None,
                is_header: false,
                section_type: None,
            }]
        };
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedding_client.embed_batch(&texts).await?;

        let ids: Vec<String> = chunks.iter().map(|c| c.store_id()).collect();
        let metadatas: Vec<HashMap<String, Value>> = chunks
            .iter()
            .map(|c| {
                let mut metadata = document.metadata.clone();
                metadata.insert("document_id".to_string(), Value::String(document.id.clone()));
                metadata.insert("type".to_string(), Value::String(document.kind.as_str().to_string()));
                metadata.insert("title".to_string(), Value::String(document.title.clone()));
                metadata.insert("category".to_string(), Value::String(document.category.clone()));
                metadata.insert(
                    "sub_category".to_string(),
                    Value::String(document.sub_category.clone()),
                );
                metadata.insert("chunk_index".to_string(), Value::from(c.chunk_index));
                if let Some(article_number) = &c.article_number {
                    metadata.insert("article_number".to_string(), Value::String(article_number.clone()));
                }
                metadata
            })
            .collect();

        self.vector_store.add(&ids, &embeddings, &texts, &metadatas).await?;

        info!(document_id = %document.id, chunks = chunks.len(), "document indexed");
        Ok(IndexOutcome {
            document_id: document.id.clone(),
            chunks_count: chunks.len(),
            indexed_ids: ids,
        })
    }

    /// Read and index a single JSON document file.
    pub async fn index_file(&self, path: &Path, chunk: bool) -> Result<IndexOutcome> {
        let bytes = tokio::fs::read(path).await?;
        let document: Document = serde_json::from_slice(&bytes)?;
        self.index_document(&document, chunk).await
    }

    /// Index every `*.json` file under `directory`, recursing into
    /// subdirectories.
    pub async fn index_directory(&self, directory: &Path, chunk: bool) -> Result<DirectoryIndexOutcome> {
        let mut outcome = DirectoryIndexOutcome::default();
        let mut stack = vec![directory.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                outcome.total += 1;
                let relative = path
                    .strip_prefix(directory)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();

                match self.index_file(&path, chunk).await {
                    Ok(result) => {
                        outcome.success += 1;
                        outcome.details.push(FileIndexDetail {
                            file: relative,
                            success: true,
                            document_id: Some(result.document_id),
                            chunks_count: Some(result.chunks_count),
                            error: None,
                        });
                    }
                    Err(e) => {
                        error!(file = %relative, error = %e, "file indexing failed");
                        outcome.failed += 1;
                        outcome.details.push(FileIndexDetail {
                            file: relative,
                            success: false,
                            document_id: None,
                            chunks_count: None,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
        }

        info!(
            total = outcome.total,
            success = outcome.success,
            failed = outcome.failed,
            "directory indexing completed"
        );
        Ok(outcome)
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        Ok(IndexStatus {
            collection_name: self.collection_name.clone(),
            document_count: self.vector_store.count().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkerConfig;
    use crate::document::{Content, DocumentKind};
    use crate::embedding::EmbeddingClient;
    use crate::vector_store::SqliteVectorStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedEmbeddingClient;

    #[async_trait]
    impl EmbeddingClient for FixedEmbeddingClient {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn dimension(&self) -> usize {
            2
        }
    }

    async fn indexer() -> DocumentIndexer {
        let store = Arc::new(SqliteVectorStore::new(":memory:", "legal_documents").await.unwrap());
        DocumentIndexer::new(
            store,
            Arc::new(FixedEmbeddingClient),
            Chunker::new(ChunkerConfig::default()),
            "legal_documents".to_string(),
        )
    }

    fn statute() -> Document {
        Document {
            id: "statute-347".into(),
            category: "형사".into(),
            sub_category: "사기".into(),
            kind: DocumentKind::Statute,
            title: "형법 제347조(사기)".into(),
            content: Content::Text("제347조(사기) 사람을 기망하여 재물을 취득한 자는 처벌한다.".into()),
            metadata: HashMap::from([("law_name".into(), json!("형법")), ("article_number".into(), json!("347"))]),
        }
    }

    #[tokio::test]
    async fn index_document_produces_at_least_one_chunk() {
        let indexer = indexer().await;
        let outcome = indexer.index_document(&statute(), true).await.unwrap();
        assert!(outcome.chunks_count >= 1);
        assert_eq!(outcome.indexed_ids.len(), outcome.chunks_count);
    }

    #[tokio::test]
    async fn index_document_without_chunking_wraps_as_a_single_chunk() {
        let indexer = indexer().await;
        let outcome = indexer.index_document(&statute(), false).await.unwrap();
        assert_eq!(outcome.chunks_count, 1);
        assert_eq!(outcome.indexed_ids, vec!["statute-347_chunk_0".to_string()]);
    }

    #[tokio::test]
    async fn index_document_rejects_invalid_document() {
        let indexer = indexer().await;
        let mut doc = statute();
        doc.metadata.remove("article_number");
        assert!(indexer.index_document(&doc, true).await.is_err());
    }

    #[tokio::test]
    async fn status_reflects_stored_chunk_count() {
        let indexer = indexer().await;
        let outcome = indexer.index_document(&statute(), true).await.unwrap();
        let status = indexer.status().await.unwrap();
        assert_eq!(status.document_count, outcome.chunks_count);
    }

    #[tokio::test]
    async fn index_file_reads_and_indexes_document() {
        let indexer = indexer().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statute-347.json");
        tokio::fs::write(&path, serde_json::to_vec(&statute()).unwrap()).await.unwrap();
        let outcome = indexer.index_file(&path, true).await.unwrap();
        assert_eq!(outcome.document_id, "statute-347");
    }

    #[tokio::test]
    async fn index_directory_counts_json_files_only() {
        let indexer = indexer().await;
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.json"), serde_json::to_vec(&statute()).unwrap())
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"ignored").await.unwrap();
        let outcome = indexer.index_directory(dir.path(), true).await.unwrap();
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.success, 1);
    }
}
