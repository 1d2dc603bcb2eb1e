//! Retrieval workflow: analyze → search → filter → rerank → assemble.
//!
//! Grounded on `original_source/src/rag/workflow.py`'s `RAGWorkflow`: a
//! five-node state graph. Each node there mutates a shared `GraphState`
//! and never raises past the node boundary (errors are folded into the
//! state's `error` field); this module keeps that shape as a state struct
//! threaded explicitly through stage functions rather than hidden behind
//! a graph-execution engine, since the pipeline here is always linear.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::embedding::EmbeddingClient;
use crate::vector_store::{VectorStore, Where};

const VALID_DOCUMENT_TYPES: [&str; 4] = ["case", "statute", "procedure", "template"];

static CASE_NUMBER_NO_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}[가-힣]+\d+)").unwrap());
static CASE_NUMBER_SPACED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})\s*([가-힣]+)\s*(\d+)").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetrievedChunk {
    pub id: String,
    pub document: String,
    pub metadata: HashMap<String, Value>,
    pub distance: f32,
    /// `1 / (1 + distance)`, assigned at re-rank time so it reflects the
    /// final ordering rather than the raw search result.
    pub score: f32,
}

/// Inputs that may come from the caller and override what the query text
/// alone would imply.
#[derive(Debug, Clone, Default)]
pub struct WorkflowInput {
    pub query: String,
    pub n_results: Option<usize>,
    pub document_types: Option<Vec<String>>,
    pub metadata_filters: Option<HashMap<String, String>>,
}

struct WorkflowState {
    query: String,
    query_embedding: Vec<f32>,
    metadata_filters: HashMap<String, String>,
    document_types: Option<Vec<String>>,
    search_results: Vec<RetrievedChunk>,
    filtered_results: Vec<RetrievedChunk>,
    reranked_results: Vec<RetrievedChunk>,
    context: String,
}

pub struct RetrievalWorkflow {
    vector_store: Arc<dyn VectorStore>,
    embedding_client: Arc<dyn EmbeddingClient>,
    default_top_k: usize,
    rerank_top_k: usize,
}

#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub reranked_results: Vec<RetrievedChunk>,
    pub context: String,
}

impl RetrievalWorkflow {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        embedding_client: Arc<dyn EmbeddingClient>,
        default_top_k: usize,
        rerank_top_k: usize,
    ) -> Self {
        Self {
            vector_store,
            embedding_client,
            default_top_k,
            rerank_top_k,
        }
    }

    pub async fn run(&self, input: WorkflowInput) -> crate::error::Result<RetrievalOutcome> {
        let mut state = self.analyze_query(input).await?;
        self.vector_search(&mut state).await?;
        self.filter_metadata(&mut state);
        self.rerank_results(&mut state);
        self.build_context(&mut state);

        Ok(RetrievalOutcome {
            reranked_results: state.reranked_results,
            context: state.context,
        })
    }

    /// Stage 1: embed the query, extract implicit filters and document
    /// types, merge with anything the caller already specified.
    async fn analyze_query(&self, input: WorkflowInput) -> crate::error::Result<WorkflowState> {
        let query_embedding = self.embedding_client.embed(&input.query).await?;

        let mut metadata_filters = extract_filters(&input.query);
        if let Some(external) = &input.metadata_filters {
            for (k, v) in external {
                metadata_filters.insert(k.clone(), v.clone());
            }
        }

        let document_types = resolve_document_types(&input.query, input.document_types.as_deref());

        debug!(query = %input.query, "query analyzed");
        Ok(WorkflowState {
            query: input.query,
            query_embedding,
            metadata_filters,
            document_types,
            search_results: Vec::new(),
            filtered_results: Vec::new(),
            reranked_results: Vec::new(),
            context: String::new(),
        })
    }

    /// Stage 2: vector search, scoped by a `where` clause built from the
    /// merged filters (single-key form or `$and`).
    async fn vector_search(&self, state: &mut WorkflowState) -> crate::error::Result<()> {
        let where_ = Where::from_filters(&state.metadata_filters);
        let results = self
            .vector_store
            .search(&state.query_embedding, self.default_top_k, where_.as_ref())
            .await?;

        state.search_results = (0..results.ids.len())
            .map(|i| RetrievedChunk {
                id: results.ids[i].clone(),
                document: results.texts[i].clone(),
                metadata: results.metadatas[i].clone(),
                distance: results.distances[i],
                score: 0.0,
            })
            .collect();

        info!(count = state.search_results.len(), "vector search completed");
        Ok(())
    }

    /// Stage 3: post-filter by document type and any remaining metadata
    /// keys the `where` clause didn't already cover exactly.
    fn filter_metadata(&self, state: &mut WorkflowState) {
        let mut filtered = state.search_results.clone();

        if let Some(types) = &state.document_types {
            if !types.iter().any(|t| t == "string") {
                let valid: Vec<&String> = types
                    .iter()
                    .filter(|t| VALID_DOCUMENT_TYPES.contains(&t.as_str()))
                    .collect();
                if !valid.is_empty() {
                    filtered.retain(|r| {
                        r.metadata
                            .get("type")
                            .and_then(|v| v.as_str())
                            .map(|t| valid.iter().any(|v| v.as_str() == t))
                            .unwrap_or(false)
                    });
                }
            }
        }

        for (key, value) in &state.metadata_filters {
            if key == "type" {
                continue;
            }
            filtered.retain(|r| {
                r.metadata.get(key).and_then(|v| v.as_str()) == Some(value.as_str())
            });
        }

        debug!(count = filtered.len(), "metadata filter applied");
        state.filtered_results = filtered;
    }

    /// Stage 4: sort by ascending distance, keep only the top-K, and assign
    /// each surviving chunk its external-facing relevance score.
    fn rerank_results(&self, state: &mut WorkflowState) {
        let mut reranked = state.filtered_results.clone();
        reranked.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        reranked.truncate(self.rerank_top_k);
        for chunk in &mut reranked {
            chunk.score = 1.0 / (1.0 + chunk.distance);
        }
        state.reranked_results = reranked;
    }

    /// Stage 5: assemble the numbered `[문서 N]` context blocks the prompt
    /// builder and `ContextOptimizer` expect.
    fn build_context(&self, state: &mut WorkflowState) {
        let mut parts = Vec::new();
        for (i, chunk) in state.reranked_results.iter().enumerate() {
            let title = chunk
                .metadata
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("N/A");
            let kind = chunk
                .metadata
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("N/A");
            parts.push(format!(
                "[문서 {}]\n제목: {}\n타입: {}\n내용: {}\n",
                i + 1,
                title,
                kind,
                chunk.document
            ));
        }
        state.context = parts.join("\n");
    }
}

/// Keyword and case-number filter extraction from the raw query text.
fn extract_filters(query: &str) -> HashMap<String, String> {
    let mut filters = HashMap::new();

    if query.contains("형사") {
        filters.insert("category".to_string(), "형사".to_string());
    } else if query.contains("민사") {
        filters.insert("category".to_string(), "민사".to_string());
    }
    if query.contains("사기") {
        filters.insert("sub_category".to_string(), "사기".to_string());
    }

    let no_spaces: String = query.chars().filter(|c| !c.is_whitespace()).collect();
    if let Some(caps) = CASE_NUMBER_NO_SPACE.captures(&no_spaces) {
        let case_number = caps[1].to_string();
        debug!(case_number = %case_number, "case number extracted from query");
        filters.insert("case_number".to_string(), case_number);
    } else if let Some(caps) = CASE_NUMBER_SPACED.captures(query) {
        let case_number = format!("{}{}{}", &caps[1], &caps[2], &caps[3]);
        debug!(case_number = %case_number, "case number extracted from spaced query");
        filters.insert("case_number".to_string(), case_number);
    }

    filters
}

/// Keyword-based document-type inference, overridable by an explicit
/// caller-supplied list. The `"string"` sentinel means "all types"
///.
fn resolve_document_types(query: &str, external: Option<&[String]>) -> Option<Vec<String>> {
    if let Some(external) = external {
        if !external.is_empty() {
            if external.iter().any(|t| t == "string") {
                return None;
            }
            let valid: Vec<String> = external
                .iter()
                .filter(|t| VALID_DOCUMENT_TYPES.contains(&t.as_str()))
                .cloned()
                .collect();
            if !valid.is_empty() {
                return Some(valid);
            }
        }
    }
    extract_document_types(query)
}

fn extract_document_types(query: &str) -> Option<Vec<String>> {
    let mut types = Vec::new();
    if query.contains("법령") || query.contains("조문") {
        types.push("statute".to_string());
    }
    if query.contains("판례") || query.contains("판결") {
        types.push("case".to_string());
    }
    if query.contains("절차") {
        types.push("procedure".to_string());
    }
    if query.contains("템플릿") {
        types.push("template".to_string());
    }
    if types.is_empty() {
        None
    } else {
        Some(types)
    }
}
