//! Vector store adapter: an embedded SQLite-backed nearest-neighbor
//! collection, generalized from the reference crate's `SqliteMemoryStore`
//! (`src/memory.rs`) to a CRUD + `where`-filter contract, keyed to a
//! single collection named `legal_documents`.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::error::{Result, VectorStoreError};

/// The `where` filter language: a single equality, or a conjunction.
/// Disjunctions are intentionally unsupported, matching the core contract.
#[derive(Debug, Clone, PartialEq)]
pub enum Where {
    Eq(String, String),
    And(Vec<Where>),
}

impl Where {
    /// Build a `where` clause from metadata filters the way the retrieval
    /// workflow's Stage 2 does: single-key form if one constraint, `$and`
    /// form if several. The sentinel `"string"` value is dropped first.
    pub fn from_filters(filters: &HashMap<String, String>) -> Option<Where> {
        let mut clauses: Vec<Where> = filters
            .iter()
            .filter(|(_, v)| v.as_str() != "string")
            .map(|(k, v)| Where::Eq(k.clone(), v.clone()))
            .collect();
        clauses.sort_by(|a, b| key_of(a).cmp(key_of(b)));
        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(Where::And(clauses)),
        }
    }

    fn matches(&self, metadata: &HashMap<String, Value>) -> bool {
        match self {
            Where::Eq(k, v) => metadata.get(k).and_then(|val| val.as_str()) == Some(v.as_str())
                || metadata.get(k).map(|val| val.to_string().trim_matches('"') == v) == Some(true),
            Where::And(clauses) => clauses.iter().all(|c| c.matches(metadata)),
        }
    }
}

fn key_of(w: &Where) -> &str {
    match w {
        Where::Eq(k, _) => k,
        Where::And(_) => "",
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub ids: Vec<String>,
    pub texts: Vec<String>,
    pub metadatas: Vec<HashMap<String, Value>>,
    pub distances: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct Update {
    pub embedding: Option<Vec<f32>>,
    pub text: Option<String>,
    pub metadata: Option<HashMap<String, Value>>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        texts: &[String],
        metadatas: &[HashMap<String, Value>],
    ) -> Result<()>;

    async fn search(&self, query_vec: &[f32], k: usize, where_: Option<&Where>) -> Result<SearchResults>;

    async fn delete(&self, ids: Option<&[String]>, where_: Option<&Where>) -> Result<()>;

    async fn update(&self, id: &str, update: Update) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    async fn reset(&self) -> Result<()>;
}

pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteVectorStore {
    pub async fn new(db_path: &str, collection: &str) -> Result<Self> {
        info!(db_path, collection, "initializing vector store");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| VectorStoreError::ResourceUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vector_entries (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
        })
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            1.0
        } else {
            1.0 - (dot / (norm_a * norm_b))
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        texts: &[String],
        metadatas: &[HashMap<String, Value>],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VectorStoreError::ResourceUnavailable(e.to_string()))?;

        for i in 0..ids.len() {
            let metadata_json = serde_json::to_string(&metadatas[i])?;
            sqlx::query(
                r#"
                INSERT INTO vector_entries (collection, id, embedding, text, metadata)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    embedding = excluded.embedding,
                    text = excluded.text,
                    metadata = excluded.metadata
                "#,
            )
            .bind(&self.collection)
            .bind(&ids[i])
            .bind(Self::serialize_embedding(&embeddings[i]))
            .bind(&texts[i])
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;
        debug!(count = ids.len(), "added vector entries");
        Ok(())
    }

    async fn search(&self, query_vec: &[f32], k: usize, where_: Option<&Where>) -> Result<SearchResults> {
        let rows = sqlx::query("SELECT id, embedding, text, metadata FROM vector_entries WHERE collection = ?")
            .bind(&self.collection)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::ResourceUnavailable(e.to_string()))?;

        let mut scored: Vec<(String, String, HashMap<String, Value>, f32)> = Vec::new();
        for row in rows {
            let id: String = row.try_get("id").unwrap_or_default();
            let embedding_bytes: Vec<u8> = row.try_get("embedding").unwrap_or_default();
            let text: String = row.try_get("text").unwrap_or_default();
            let metadata_json: String = row.try_get("metadata").unwrap_or_default();
            let metadata: HashMap<String, Value> = serde_json::from_str(&metadata_json).unwrap_or_default();

            if let Some(w) = where_ {
                if !w.matches(&metadata) {
                    continue;
                }
            }

            let embedding = Self::deserialize_embedding(&embedding_bytes);
            let distance = Self::cosine_distance(query_vec, &embedding);
            scored.push((id, text, metadata, distance));
        }

        scored.sort_by(|a, b| a.3.partial_cmp(&b.3).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut results = SearchResults::default();
        for (id, text, metadata, distance) in scored {
            results.ids.push(id);
            results.texts.push(text);
            results.metadatas.push(metadata);
            results.distances.push(distance);
        }
        Ok(results)
    }

    async fn delete(&self, ids: Option<&[String]>, where_: Option<&Where>) -> Result<()> {
        if let Some(ids) = ids {
            for id in ids {
                sqlx::query("DELETE FROM vector_entries WHERE collection = ? AND id = ?")
                    .bind(&self.collection)
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;
            }
            return Ok(());
        }

        if let Some(w) = where_ {
            let rows = sqlx::query("SELECT id, metadata FROM vector_entries WHERE collection = ?")
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| VectorStoreError::ResourceUnavailable(e.to_string()))?;
            for row in rows {
                let id: String = row.try_get("id").unwrap_or_default();
                let metadata_json: String = row.try_get("metadata").unwrap_or_default();
                let metadata: HashMap<String, Value> = serde_json::from_str(&metadata_json).unwrap_or_default();
                if w.matches(&metadata) {
                    sqlx::query("DELETE FROM vector_entries WHERE collection = ? AND id = ?")
                        .bind(&self.collection)
                        .bind(&id)
                        .execute(&self.pool)
                        .await
                        .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;
                }
            }
        }
        Ok(())
    }

    async fn update(&self, id: &str, update: Update) -> Result<()> {
        let existing = sqlx::query("SELECT embedding, text, metadata FROM vector_entries WHERE collection = ? AND id = ?")
            .bind(&self.collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VectorStoreError::ResourceUnavailable(e.to_string()))?
            .ok_or_else(|| VectorStoreError::NotFound(id.to_string()))?;

        let embedding = update
            .embedding
            .unwrap_or_else(|| Self::deserialize_embedding(&existing.try_get::<Vec<u8>, _>("embedding").unwrap_or_default()));
        let text = update.text.unwrap_or_else(|| existing.try_get("text").unwrap_or_default());
        let metadata = match update.metadata {
            Some(m) => m,
            None => {
                let json: String = existing.try_get("metadata").unwrap_or_default();
                serde_json::from_str(&json).unwrap_or_default()
            }
        };

        sqlx::query(
            "UPDATE vector_entries SET embedding = ?, text = ?, metadata = ? WHERE collection = ? AND id = ?",
        )
        .bind(Self::serialize_embedding(&embedding))
        .bind(&text)
        .bind(serde_json::to_string(&metadata)?)
        .bind(&self.collection)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vector_entries WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VectorStoreError::ResourceUnavailable(e.to_string()))?;
        Ok(row.0 as usize)
    }

    async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM vector_entries WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;
        info!(collection = %self.collection, "vector store reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqliteVectorStore {
        SqliteVectorStore::new(":memory:", "legal_documents").await.unwrap()
    }

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), json!(v))).collect()
    }

    #[tokio::test]
    async fn add_and_count_round_trip() {
        let s = store().await;
        s.add(
            &["a".into()],
            &[vec![1.0, 0.0]],
            &["text a".into()],
            &[meta(&[("type", "statute")])],
        )
        .await
        .unwrap();
        assert_eq!(s.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn add_is_idempotent_on_ids() {
        let s = store().await;
        s.add(&["a".into()], &[vec![1.0, 0.0]], &["first".into()], &[meta(&[])])
            .await
            .unwrap();
        s.add(&["a".into()], &[vec![0.0, 1.0]], &["second".into()], &[meta(&[])])
            .await
            .unwrap();
        assert_eq!(s.count().await.unwrap(), 1);
        let r = s.search(&[0.0, 1.0], 5, None).await.unwrap();
        assert_eq!(r.texts[0], "second");
    }

    #[tokio::test]
    async fn search_respects_where_filter() {
        let s = store().await;
        s.add(
            &["a".into(), "b".into()],
            &[vec![1.0, 0.0], vec![1.0, 0.0]],
            &["statute text".into(), "case text".into()],
            &[meta(&[("type", "statute")]), meta(&[("type", "case")])],
        )
        .await
        .unwrap();

        let where_ = Where::Eq("type".into(), "case".into());
        let r = s.search(&[1.0, 0.0], 10, Some(&where_)).await.unwrap();
        assert_eq!(r.ids, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn search_orders_by_ascending_distance() {
        let s = store().await;
        s.add(
            &["near".into(), "far".into()],
            &[vec![1.0, 0.0], vec![-1.0, 0.0]],
            &["near".into(), "far".into()],
            &[meta(&[]), meta(&[])],
        )
        .await
        .unwrap();
        let r = s.search(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(r.ids[0], "near");
        assert!(r.distances[0] <= r.distances[1]);
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let s = store().await;
        let err = s.update("missing", Update::default()).await.unwrap_err();
        assert!(matches!(err, crate::error::RagError::VectorStore(VectorStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_by_where_removes_matching_only() {
        let s = store().await;
        s.add(
            &["a".into(), "b".into()],
            &[vec![1.0, 0.0], vec![1.0, 0.0]],
            &["a".into(), "b".into()],
            &[meta(&[("document_id", "doc1")]), meta(&[("document_id", "doc2")])],
        )
        .await
        .unwrap();
        let where_ = Where::Eq("document_id".into(), "doc1".into());
        s.delete(None, Some(&where_)).await.unwrap();
        assert_eq!(s.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reset_clears_collection() {
        let s = store().await;
        s.add(&["a".into()], &[vec![1.0]], &["a".into()], &[meta(&[])])
            .await
            .unwrap();
        s.reset().await.unwrap();
        assert_eq!(s.count().await.unwrap(), 0);
    }

    #[test]
    fn where_from_filters_drops_sentinel_and_builds_and() {
        let mut filters = HashMap::new();
        filters.insert("category".to_string(), "형사".to_string());
        filters.insert("sub_category".to_string(), "string".to_string());
        let w = Where::from_filters(&filters).unwrap();
        assert_eq!(w, Where::Eq("category".into(), "형사".into()));

        filters.insert("sub_category".to_string(), "사기".to_string());
        let w = Where::from_filters(&filters).unwrap();
        assert!(matches!(w, Where::And(_)));
    }
}
