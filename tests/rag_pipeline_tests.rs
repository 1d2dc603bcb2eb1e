//! End-to-end coverage of indexing followed by retrieval, against a
//! real (file-backed) vector store and fake embedding/LLM adapters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use legal_rag::*;
use tempfile::tempdir;

/// Deterministic fake embedding client: the vector is derived from which
/// keyword the text contains, so unrelated chunks land far apart.
struct KeywordEmbeddingClient;

#[async_trait]
impl EmbeddingClient for KeywordEmbeddingClient {
    async fn embed(&self, text: &str) -> legal_rag::error::Result<Vec<f32>> {
        let lower = text.to_lowercase();
        let mut vec = vec![0.0_f32; 4];
        if lower.contains("계약") {
            vec[0] = 1.0;
        }
        if lower.contains("불법행위") {
            vec[1] = 1.0;
        }
        if lower.contains("손해배상") {
            vec[2] = 1.0;
        }
        vec[3] = 0.01;
        Ok(vec)
    }

    async fn embed_batch(&self, texts: &[String]) -> legal_rag::error::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        4
    }
}

fn statute_document(id: &str, law_name: &str, article: &str, body: &str) -> Document {
    let mut metadata = HashMap::new();
    metadata.insert("law_name".to_string(), serde_json::json!(law_name));
    metadata.insert("article_number".to_string(), serde_json::json!(article));
    Document {
        id: id.to_string(),
        category: "civil".to_string(),
        sub_category: "contract".to_string(),
        kind: DocumentKind::Statute,
        title: format!("{law_name} {article}"),
        content: Content::Text(body.to_string()),
        metadata,
    }
}

#[tokio::test]
async fn indexing_then_retrieval_surfaces_the_matching_statute() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("vectors.db");
    let vector_store: Arc<dyn VectorStore> =
        Arc::new(SqliteVectorStore::new(db_path.to_str().unwrap(), "legal_documents").await.unwrap());
    let embedding_client: Arc<dyn EmbeddingClient> = Arc::new(KeywordEmbeddingClient);

    let indexer = DocumentIndexer::new(
        vector_store.clone(),
        embedding_client.clone(),
        Chunker::new(ChunkerConfig::default()),
        "legal_documents".to_string(),
    );

    let contract_doc = statute_document(
        "civil-390",
        "민법",
        "제390조",
        "제390조(채무불이행과 손해배상) 채무자가 채무의 내용에 좇은 이행을 하지 아니한 때에는 채권자는 손해배상을 청구할 수 있다.",
    );
    let tort_doc = statute_document(
        "civil-750",
        "민법",
        "제750조",
        "제750조(불법행위의 내용) 고의 또는 과실로 인한 위법행위로 타인에게 손해를 가한 자는 그 손해를 배상할 책임이 있다.",
    );

    indexer.index_document(&contract_doc, true).await.unwrap();
    indexer.index_document(&tort_doc, true).await.unwrap();
    assert_eq!(vector_store.count().await.unwrap(), 2);

    let workflow = RetrievalWorkflow::new(vector_store.clone(), embedding_client.clone(), 5, 2);
    let outcome = workflow
        .run(WorkflowInput {
            query: "계약 불이행으로 인한 손해배상 청구는 어떻게 하나요?".to_string(),
            n_results: None,
            document_types: None,
            metadata_filters: None,
        })
        .await
        .unwrap();

    assert!(!outcome.reranked_results.is_empty());
    assert!(outcome.context.contains("[문서 1]"));
    let top = &outcome.reranked_results[0];
    assert_eq!(top.metadata.get("article_number").and_then(|v| v.as_str()), Some("제390조"));
}

#[tokio::test]
async fn incremental_update_skips_already_indexed_documents() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("vectors.db");
    let vector_store: Arc<dyn VectorStore> =
        Arc::new(SqliteVectorStore::new(db_path.to_str().unwrap(), "legal_documents").await.unwrap());
    let embedding_client: Arc<dyn EmbeddingClient> = Arc::new(KeywordEmbeddingClient);
    let indexer = Arc::new(DocumentIndexer::new(
        vector_store.clone(),
        embedding_client,
        Chunker::new(ChunkerConfig::default()),
        "legal_documents".to_string(),
    ));

    let docs_dir = dir.path().join("docs");
    tokio::fs::create_dir_all(&docs_dir).await.unwrap();
    let doc = statute_document("civil-390", "민법", "제390조", "채무불이행 손해배상 조항");
    tokio::fs::write(docs_dir.join("civil-390.json"), serde_json::to_vec(&doc).unwrap())
        .await
        .unwrap();

    let state_path = dir.path().join("index_state.json");
    let updater = IncrementalUpdater::new(indexer.clone(), vector_store.clone(), state_path.to_str().unwrap().to_string()).await;

    let first = updater.update_incremental(&docs_dir, false).await.unwrap();
    assert_eq!(first.new, 1);
    assert_eq!(first.skipped, 0);

    let second = updater.update_incremental(&docs_dir, false).await.unwrap();
    assert_eq!(second.new, 0);
    assert_eq!(second.skipped, 1);
}
