//! Incremental indexing state.
//!
//! Grounded on `original_source/src/rag/incremental_updater.py`'s
//! `IncrementalUpdater`: a small persisted `{indexed_ids, last_updated}`
//! record tracks what has already been indexed so re-running over a
//! directory skips unchanged documents. Persistence follows the reference
//! crate's atomic-write idiom (`src/unified_storage.rs`: write to a temp
//! path, then rename).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::Result;
use crate::indexer::{DocumentIndexer, FileIndexDetail};
use crate::vector_store::{VectorStore, Where};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct IndexState {
    indexed_ids: HashSet<String>,
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IncrementalOutcome {
    pub total: usize,
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub details: Vec<FileIndexDetail>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IncrementalStatus {
    pub indexed_count: usize,
    pub indexed_ids: Vec<String>,
    pub vector_db_count: usize,
}

pub struct IncrementalUpdater {
    indexer: Arc<DocumentIndexer>,
    vector_store: Arc<dyn VectorStore>,
    state_file: PathBuf,
    state: RwLock<IndexState>,
}

impl IncrementalUpdater {
    pub async fn new(
        indexer: Arc<DocumentIndexer>,
        vector_store: Arc<dyn VectorStore>,
        state_file: impl Into<PathBuf>,
    ) -> Self {
        let state_file = state_file.into();
        let state = load_state(&state_file).await;
        Self {
            indexer,
            vector_store,
            state_file,
            state: RwLock::new(state),
        }
    }

    pub async fn is_indexed(&self, document_id: &str) -> bool {
        self.state.read().await.indexed_ids.contains(document_id)
    }

    /// Index every `*.json` file under `directory` not already recorded,
    /// unless `force_update` is set.
    pub async fn update_incremental(&self, directory: &Path, force_update: bool) -> Result<IncrementalOutcome> {
        let mut outcome = IncrementalOutcome::default();
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

                let document_id = match tokio::fs::read(&path).await {
                    Ok(bytes) => serde_json::from_slice::<serde_json::Value>(&bytes)
                        .ok()
                        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
                        .unwrap_or_else(|| path.file_stem().unwrap_or_default().to_string_lossy().to_string()),
                    Err(e) => {
                        outcome.failed += 1;
                        outcome.details.push(FileIndexDetail {
                            file: relative,
                            success: false,
                            document_id: None,
                            chunks_count: None,
                            error: Some(e.to_string()),
                        });
                        continue;
                    }
                };

                let already_indexed = self.is_indexed(&document_id).await;
                if already_indexed && !force_update {
                    outcome.skipped += 1;
                    outcome.details.push(FileIndexDetail {
                        file: relative,
                        success: true,
                        document_id: Some(document_id),
                        chunks_count: None,
                        error: None,
                    });
                    continue;
                }

                match self.indexer.index_file(&path, true).await {
                    Ok(result) => {
                        if already_indexed {
                            outcome.updated += 1;
                        } else {
                            outcome.new += 1;
                        }
                        self.state.write().await.indexed_ids.insert(document_id.clone());
                        outcome.details.push(FileIndexDetail {
                            file: relative,
                            success: true,
                            document_id: Some(document_id),
                            chunks_count: Some(result.chunks_count),
                            error: None,
                        });
                    }
                    Err(e) => {
                        outcome.failed += 1;
                        outcome.details.push(FileIndexDetail {
                            file: relative,
                            success: false,
                            document_id: Some(document_id),
                            chunks_count: None,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
        }

        self.save_state().await?;
        info!(
            total = outcome.total,
            new = outcome.new,
            updated = outcome.updated,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "incremental update completed"
        );
        Ok(outcome)
    }

    pub async fn remove_document(&self, document_id: &str) -> Result<()> {
        let where_ = Where::Eq("document_id".to_string(), document_id.to_string());
        self.vector_store.delete(None, Some(&where_)).await?;
        self.state.write().await.indexed_ids.remove(document_id);
        self.save_state().await?;
        info!(document_id, "document removed from index");
        Ok(())
    }

    pub async fn get_status(&self) -> Result<IncrementalStatus> {
        let state = self.state.read().await;
        Ok(IncrementalStatus {
            indexed_count: state.indexed_ids.len(),
            indexed_ids: state.indexed_ids.iter().cloned().collect(),
            vector_db_count: self.vector_store.count().await?,
        })
    }

    /// Atomic write-temp-then-rename.
    async fn save_state(&self) -> Result<()> {
        let state = self.state.read().await;
        let mut record = state.clone();
        record.last_updated = Some(Utc::now());
        drop(state);

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&record)?;
        let tmp_path = self.state_file.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.state_file).await?;
        Ok(())
    }
}

/// Missing or corrupt state files are tolerated: the index simply starts
/// believing nothing has been indexed yet.
async fn load_state(path: &Path) -> IndexState {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(error = %e, "index state file unparsable, starting fresh");
            IndexState::default()
        }),
        Err(_) => IndexState::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{Chunker, ChunkerConfig};
    use crate::document::{Content, Document, DocumentKind};
    use crate::embedding::EmbeddingClient;
    use crate::vector_store::SqliteVectorStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

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

    fn statute(id: &str) -> Document {
        Document {
            id: id.into(),
            category: "형사".into(),
            sub_category: "사기".into(),
            kind: DocumentKind::Statute,
            title: "형법 제347조(사기)".into(),
            content: Content::Text("제347조(사기) 사람을 기망하여 재물을 취득한 자는 처벌한다.".into()),
            metadata: HashMap::from([("law_name".into(), json!("형법")), ("article_number".into(), json!("347"))]),
        }
    }

    async fn updater(state_file: PathBuf) -> (IncrementalUpdater, Arc<dyn VectorStore>) {
        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::new(":memory:", "legal_documents").await.unwrap());
        let indexer = Arc::new(DocumentIndexer::new(
            store.clone(),
            Arc::new(FixedEmbeddingClient),
            Chunker::new(ChunkerConfig::default()),
            "legal_documents".to_string(),
        ));
        (
            IncrementalUpdater::new(indexer, store.clone(), state_file).await,
            store,
        )
    }

    #[tokio::test]
    async fn missing_state_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (updater, _store) = updater(dir.path().join("state.json")).await;
        let status = updater.get_status().await.unwrap();
        assert_eq!(status.indexed_count, 0);
    }

    #[tokio::test]
    async fn new_document_is_indexed_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let docs_dir = dir.path().join("docs");
        tokio::fs::create_dir_all(&docs_dir).await.unwrap();
        tokio::fs::write(docs_dir.join("a.json"), serde_json::to_vec(&statute("a")).unwrap())
            .await
            .unwrap();

        let (updater, _store) = updater(dir.path().join("state.json")).await;
        let outcome = updater.update_incremental(&docs_dir, false).await.unwrap();
        assert_eq!(outcome.new, 1);
        assert!(updater.is_indexed("a").await);
    }

    #[tokio::test]
    async fn already_indexed_document_is_skipped_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let docs_dir = dir.path().join("docs");
        tokio::fs::create_dir_all(&docs_dir).await.unwrap();
        tokio::fs::write(docs_dir.join("a.json"), serde_json::to_vec(&statute("a")).unwrap())
            .await
            .unwrap();

        let (updater, _store) = updater(dir.path().join("state.json")).await;
        updater.update_incremental(&docs_dir, false).await.unwrap();
        let second = updater.update_incremental(&docs_dir, false).await.unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.new, 0);
    }

    #[tokio::test]
    async fn force_update_reindexes_known_documents() {
        let dir = tempfile::tempdir().unwrap();
        let docs_dir = dir.path().join("docs");
        tokio::fs::create_dir_all(&docs_dir).await.unwrap();
        tokio::fs::write(docs_dir.join("a.json"), serde_json::to_vec(&statute("a")).unwrap())
            .await
            .unwrap();

        let (updater, _store) = updater(dir.path().join("state.json")).await;
        updater.update_incremental(&docs_dir, false).await.unwrap();
        let second = updater.update_incremental(&docs_dir, true).await.unwrap();
        assert_eq!(second.updated, 1);
    }

    #[tokio::test]
    async fn remove_document_clears_state_and_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let docs_dir = dir.path().join("docs");
        tokio::fs::create_dir_all(&docs_dir).await.unwrap();
        tokio::fs::write(docs_dir.join("a.json"), serde_json::to_vec(&statute("a")).unwrap())
            .await
            .unwrap();

        let (updater, store) = updater(dir.path().join("state.json")).await;
        updater.update_incremental(&docs_dir, false).await.unwrap();
        updater.remove_document("a").await.unwrap();
        assert!(!updater.is_indexed("a").await);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn state_persists_across_updater_instances() {
        let dir = tempfile::tempdir().unwrap();
        let docs_dir = dir.path().join("docs");
        tokio::fs::create_dir_all(&docs_dir).await.unwrap();
        tokio::fs::write(docs_dir.join("a.json"), serde_json::to_vec(&statute("a")).unwrap())
            .await
            .unwrap();
        let state_file = dir.path().join("state.json");

        let (updater, _store) = updater(state_file.clone()).await;
        updater.update_incremental(&docs_dir, false).await.unwrap();
        drop(updater);

        let loaded = load_state(&state_file).await;
        assert!(loaded.indexed_ids.contains("a"));
    }
}
