//! REST API server: search, ask, streaming ask, generate, admin indexing
//! and monitoring endpoints.
//!
//! Shaped after the reference crate's `AppState`/`create_router` pattern
//! (`src/api.rs`): a single `Clone`-able state struct threaded through
//! axum handlers via `State`, one `IntoResponse` impl bridging the error
//! taxonomy to the wire contract, and a `utoipa` `ApiDoc` collecting the
//! handler set. The rate limiter and observer are new middleware this
//! service needs that the reference crate doesn't: both are implemented
//! with the same `Mutex<HashMap<..>>` bookkeeping style `cache.rs` and
//! `session.rs` already use.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::cache::{CacheStats, QueryCache, QueryCacheConfig};
use crate::config::RagConfig;
use crate::document::Document;
use crate::error::{RagError, Result, ValidationError};
use crate::incremental::{IncrementalOutcome, IncrementalStatus, IncrementalUpdater};
use crate::indexer::{DirectoryIndexOutcome, DocumentIndexer, IndexOutcome, IndexStatus};
use crate::llm::{system_message, user_message, LlmClient};
use crate::monitoring::{vector_db_stats, ErrorSeverity, HealthStatus, IndexMonitor, OperationalLogger, RequestMetrics, RequestStats, VectorDbStats};
use crate::prompts::{
    build_generation_system_prompt, build_generation_user_prompt, optimize_context, parse_generated_content, system_prompt, user_prompt,
    ContentType,
};
use crate::session::SessionManager;
use crate::vector_store::VectorStore;
use crate::workflow::{RetrievalWorkflow, RetrievedChunk, WorkflowInput};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RagConfig>,
    pub workflow: Arc<RetrievalWorkflow>,
    pub cache: Arc<QueryCache>,
    pub sessions: Arc<SessionManager>,
    pub llm: Arc<dyn LlmClient>,
    pub vector_store: Arc<dyn VectorStore>,
    pub indexer: Arc<DocumentIndexer>,
    pub incremental: Arc<IncrementalUpdater>,
    pub index_monitor: Arc<IndexMonitor>,
    pub metrics: Arc<RequestMetrics>,
    pub logger: Arc<OperationalLogger>,
    rate_limits: Arc<Mutex<HashMap<(String, String), VecDeque<Instant>>>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<RagConfig>,
        workflow: Arc<RetrievalWorkflow>,
        sessions: Arc<SessionManager>,
        llm: Arc<dyn LlmClient>,
        vector_store: Arc<dyn VectorStore>,
        indexer: Arc<DocumentIndexer>,
        incremental: Arc<IncrementalUpdater>,
        index_monitor: Arc<IndexMonitor>,
        logger: Arc<OperationalLogger>,
    ) -> Self {
        let cache = Arc::new(QueryCache::new(QueryCacheConfig {
            max_size: config.cache_max_size,
            ttl_seconds: config.cache_ttl,
        }));
        Self {
            config,
            workflow,
            cache,
            sessions,
            llm,
            vector_store,
            indexer,
            incremental,
            index_monitor,
            metrics: Arc::new(RequestMetrics::new()),
            logger,
            rate_limits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn rate_limit_for(&self, path: &str) -> u32 {
        match path {
            p if p.starts_with("/api/v1/ask") => self.config.rate_limit_ask,
            p if p.starts_with("/api/v1/search") => self.config.rate_limit_search,
            p if p.starts_with("/api/v1/generate") => self.config.rate_limit_generate,
            p if p.starts_with("/api/v1/admin") => self.config.rate_limit_admin,
            _ => self.config.rate_limit_default,
        }
    }

    /// Sliding 60-second window, one bucket per `(ip, path)`. Returns the
    /// remaining quota and whether this request is admitted.
    async fn check_rate_limit(&self, ip: &str, path: &str) -> (bool, u32, u32) {
        let limit = self.rate_limit_for(path);
        let key = (ip.to_string(), path.to_string());
        let mut limits = self.rate_limits.lock().await;
        let window = limits.entry(key).or_default();
        let now = Instant::now();
        while window.front().is_some_and(|t| now.duration_since(*t) > Duration::from_secs(60)) {
            window.pop_front();
        }
        if window.len() as u32 >= limit {
            return (false, 0, limit);
        }
        window.push_back(now);
        (true, limit - window.len() as u32, limit)
    }
}

#[derive(Debug)]
struct ApiError(RagError);

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_body())).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub n_results: Option<usize>,
    #[serde(default)]
    pub document_types: Option<Vec<String>>,
    #[serde(default)]
    pub filters: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub n_results: Option<usize>,
    #[serde(default)]
    pub document_types: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sub_category: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<RetrievedChunk>,
    pub total: usize,
    pub timestamp: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AskRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub document_types: Option<Vec<String>>,
    #[serde(default)]
    pub filters: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SourceRef {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AskResponse {
    pub query: String,
    pub response: String,
    pub session_id: String,
    pub sources: Vec<SourceRef>,
    pub timestamp: String,
}

fn source_ref(chunk: &RetrievedChunk) -> SourceRef {
    SourceRef {
        id: chunk.id.clone(),
        title: chunk
            .metadata
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("N/A")
            .to_string(),
        kind: chunk
            .metadata
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("N/A")
            .to_string(),
    }
}

fn default_n_references() -> usize {
    5
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateRequest {
    pub topic: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub target_length: Option<usize>,
    #[serde(default)]
    pub include_sections: Option<Vec<String>>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub document_types: Option<Vec<String>>,
    #[serde(default = "default_n_references")]
    pub n_references: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GenerateReference {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub relevance: Option<f32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GenerateMetadata {
    pub content_type: ContentType,
    pub topic: String,
    pub word_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GenerateResponse {
    pub success: bool,
    pub content: String,
    pub title: Option<String>,
    pub sections: Option<HashMap<String, String>>,
    pub references: Vec<GenerateReference>,
    pub metadata: GenerateMetadata,
    pub timestamp: String,
}

fn default_true_field() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IndexDirectoryRequest {
    pub directory: String,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub force_update: bool,
    #[serde(default = "default_true_field")]
    pub chunk: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CacheStatsResponse(CacheStats);

async fn retrieve(state: &AppState, query: &str, n_results: Option<usize>, document_types: Option<Vec<String>>, filters: Option<HashMap<String, String>>) -> Result<(Vec<RetrievedChunk>, String, bool)> {
    let cache_filters: Option<HashMap<String, serde_json::Value>> = filters
        .as_ref()
        .map(|f| f.iter().map(|(k, v)| (k.clone(), json!(v))).collect());

    if state.config.cache_enabled {
        if let Some(cached) = state.cache.get(query, cache_filters.as_ref()).await {
            if let Ok(outcome) = serde_json::from_value::<(Vec<RetrievedChunk>, String)>(cached) {
                return Ok((outcome.0, outcome.1, true));
            }
        }
    }

    let outcome = state
        .workflow
        .run(WorkflowInput {
            query: query.to_string(),
            n_results,
            document_types,
            metadata_filters: filters,
        })
        .await?;

    if state.config.cache_enabled {
        let payload = serde_json::to_value((&outcome.reranked_results, &outcome.context)).unwrap_or(json!(null));
        state.cache.set(query, cache_filters.as_ref(), payload).await;
    }

    Ok((outcome.reranked_results, outcome.context, false))
}

#[utoipa::path(post, path = "/api/v1/search", request_body = SearchRequest, responses((status = 200, body = SearchResponse)))]
async fn search_handler(State(state): State<AppState>, Json(req): Json<SearchRequest>) -> ApiResult<Json<SearchResponse>> {
    let started = Instant::now();
    let (results, _context, _cached) = retrieve(&state, &req.query, req.n_results, req.document_types, req.filters).await?;
    state
        .logger
        .log_query(&req.query, results.len(), started.elapsed().as_millis() as u64, json!({"endpoint": "search"}))
        .await;
    Ok(Json(SearchResponse {
        query: req.query,
        total: results.len(),
        results,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

#[utoipa::path(get, path = "/api/v1/search", params(SearchQuery), responses((status = 200, body = SearchResponse)))]
async fn search_get_handler(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> ApiResult<Json<SearchResponse>> {
    let document_types = q.document_types.map(|types| types.split(',').map(|t| t.trim().to_string()).collect());
    let mut filters = HashMap::new();
    if let Some(category) = q.category.filter(|c| c != "string") {
        filters.insert("category".to_string(), category);
    }
    if let Some(sub_category) = q.sub_category.filter(|c| c != "string") {
        filters.insert("sub_category".to_string(), sub_category);
    }
    search_handler(
        State(state),
        Json(SearchRequest {
            query: q.query,
            n_results: q.n_results,
            document_types,
            filters: if filters.is_empty() { None } else { Some(filters) },
        }),
    )
    .await
}

#[utoipa::path(post, path = "/api/v1/ask", request_body = AskRequest, responses((status = 200, body = AskResponse)))]
async fn ask_handler(State(state): State<AppState>, Json(req): Json<AskRequest>) -> ApiResult<Json<AskResponse>> {
    let started = Instant::now();
    let mut session = state.sessions.get_or_create(req.session_id.clone()).await?;

    let (results, context, _cached) = retrieve(&state, &req.query, None, req.document_types.clone(), req.filters).await?;
    let context = optimize_context(&context, None);
    let prompt = user_prompt(&context, &req.query, req.document_types.as_deref());

    let messages = vec![system_message(system_prompt()), user_message(prompt)];
    let response = state.llm.generate(&messages).await.map_err(|e| {
        error!(error = %e, "generation failed");
        e
    })?;

    session.add_message("user", &req.query);
    session.add_message("assistant", &response.text);
    state.sessions.update(session.clone()).await?;

    state
        .logger
        .log_query(&req.query, results.len(), started.elapsed().as_millis() as u64, json!({"endpoint": "ask"}))
        .await;

    let sources = results.iter().take(state.config.search_max_sources).map(source_ref).collect();

    Ok(Json(AskResponse {
        query: req.query,
        response: response.text,
        session_id: session.session_id,
        sources,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// `{"chunk": "..."}` per delta, a terminal `{"done": true}` on a clean
/// finish, or a terminal `{"error": {...}}` if the upstream stream fails
/// partway through. Either way the accumulated assistant turn is only
/// persisted to the session once the stream is fully drained.
#[utoipa::path(post, path = "/api/v1/ask-stream", request_body = AskRequest, responses((status = 200, description = "text/event-stream of answer chunks")))]
async fn ask_stream_handler(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> ApiResult<Sse<impl futures::Stream<Item = std::result::Result<Event, std::convert::Infallible>>>> {
    let mut session = state.sessions.get_or_create(req.session_id.clone()).await?;
    let (_results, context, _cached) = retrieve(&state, &req.query, None, req.document_types.clone(), req.filters).await?;
    let context = optimize_context(&context, None);
    let prompt = user_prompt(&context, &req.query, req.document_types.as_deref());
    let messages = vec![system_message(system_prompt()), user_message(prompt)];

    let inner = state.llm.generate_stream(&messages).await?;
    session.add_message("user", &req.query);

    let accumulated = Arc::new(SyncMutex::new(String::new()));
    let errored = Arc::new(SyncMutex::new(false));
    let acc_for_chunks = accumulated.clone();
    let errored_for_chunks = errored.clone();

    let chunk_events = inner.scan(false, move |stopped, chunk| {
        if *stopped {
            return futures::future::ready(None);
        }
        match chunk {
            Ok(text) => {
                acc_for_chunks.lock().unwrap().push_str(&text);
                futures::future::ready(Some(Event::default().data(json!({"chunk": text}).to_string())))
            }
            Err(e) => {
                *stopped = true;
                *errored_for_chunks.lock().unwrap() = true;
                error!(error = %e, "ask-stream generation failed mid-stream");
                futures::future::ready(Some(Event::default().data(serde_json::to_string(&e.to_body()).unwrap_or_default())))
            }
        }
    });

    let sessions = state.sessions.clone();
    let finalize = futures::stream::once(async move {
        let had_error = *errored.lock().unwrap();
        let text = accumulated.lock().unwrap().clone();
        session.add_message("assistant", &text);
        let _ = sessions.update(session).await;
        had_error
    })
    .filter_map(|had_error| {
        futures::future::ready(if had_error { None } else { Some(Event::default().data(json!({"done": true}).to_string())) })
    });

    let stream = chunk_events.chain(finalize).map(Ok::<_, std::convert::Infallible>);
    Ok(Sse::new(stream))
}

/// Long-form content generation: retrieves reference documents for the
/// topic, builds a content-type-specialized prompt pair, and post-processes
/// the model's output into a title/section/reference-list shape.
#[utoipa::path(post, path = "/api/v1/generate", request_body = GenerateRequest, responses((status = 200, body = GenerateResponse)))]
async fn generate_handler(State(state): State<AppState>, Json(req): Json<GenerateRequest>) -> ApiResult<Json<GenerateResponse>> {
    let (results, context, _cached) = retrieve(&state, &req.topic, Some(req.n_references), req.document_types.clone(), None).await?;

    let system = build_generation_system_prompt(
        req.content_type,
        req.style.as_deref(),
        req.target_length,
        req.include_sections.as_deref(),
        req.keywords.as_deref(),
    );
    let user = build_generation_user_prompt(&req.topic, &context, req.content_type);
    let messages = vec![system_message(system), user_message(user)];

    let response = state.llm.generate(&messages).await?;
    info!(topic = %req.topic, content_type = req.content_type.as_str(), "generated long-form content");
    let parsed = parse_generated_content(&response.text, req.content_type);

    let references = results
        .iter()
        .take(req.n_references)
        .map(|chunk| GenerateReference {
            title: chunk.metadata.get("title").and_then(|v| v.as_str()).unwrap_or("N/A").to_string(),
            kind: chunk.metadata.get("type").and_then(|v| v.as_str()).unwrap_or("N/A").to_string(),
            id: chunk.id.clone(),
            relevance: Some(chunk.score),
        })
        .collect();

    let word_count = response.text.chars().filter(|c| !c.is_whitespace()).count();

    Ok(Json(GenerateResponse {
        success: true,
        content: response.text,
        title: parsed.title,
        sections: parsed.sections,
        references,
        metadata: GenerateMetadata {
            content_type: req.content_type,
            topic: req.topic,
            word_count,
        },
        timestamp: Utc::now().to_rfc3339(),
    }))
}

#[utoipa::path(post, path = "/api/v1/admin/index/document", request_body = Document, responses((status = 200, body = IndexOutcome)))]
async fn index_document_handler(State(state): State<AppState>, Json(doc): Json<Document>) -> ApiResult<Json<IndexOutcome>> {
    Ok(Json(state.indexer.index_document(&doc, true).await?))
}

#[utoipa::path(post, path = "/api/v1/admin/index/directory", request_body = IndexDirectoryRequest, responses((status = 200, body = serde_json::Value)))]
async fn index_directory_handler(
    State(state): State<AppState>,
    Json(req): Json<IndexDirectoryRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let directory = std::path::Path::new(&req.directory);
    if req.incremental {
        let outcome: IncrementalOutcome = state.incremental.update_incremental(directory, req.force_update).await?;
        Ok(Json(serde_json::to_value(outcome).unwrap_or(json!(null))))
    } else {
        let outcome: DirectoryIndexOutcome = state.indexer.index_directory(directory, req.chunk).await?;
        Ok(Json(serde_json::to_value(outcome).unwrap_or(json!(null))))
    }
}

#[utoipa::path(post, path = "/api/v1/admin/index/reset", responses((status = 200, body = serde_json::Value)))]
async fn index_reset_handler(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.vector_store.reset().await?;
    Ok(Json(json!({"success": true, "message": "인덱스가 초기화되었습니다."})))
}

/// Accepts a single uploaded JSON document file, validates it parses, and
/// indexes it immediately.
#[utoipa::path(post, path = "/api/v1/admin/upload", responses((status = 200, body = serde_json::Value)))]
async fn upload_document_handler(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<serde_json::Value>> {
    let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RagError::Validation(ValidationError::MissingField(e.to_string())))?
    else {
        return Err(RagError::Validation(ValidationError::MissingField("file".into())).into());
    };
    let bytes = field
        .bytes()
        .await
        .map_err(|e| RagError::Validation(ValidationError::MissingField(e.to_string())))?;

    let document: Document = match serde_json::from_slice(&bytes) {
        Ok(doc) => doc,
        Err(_) => return Ok(Json(json!({"success": false, "error": "유효하지 않은 JSON 파일입니다."}))),
    };

    match state.indexer.index_document(&document, true).await {
        Ok(outcome) => Ok(Json(json!({
            "success": true,
            "message": "문서가 성공적으로 인덱싱되었습니다.",
            "document_id": outcome.document_id,
            "chunks_count": outcome.chunks_count,
        }))),
        Err(e) => Ok(Json(json!({"success": false, "error": e.to_string()}))),
    }
}

#[utoipa::path(get, path = "/api/v1/admin/index/status", responses((status = 200, body = IndexStatus)))]
async fn index_status_handler(State(state): State<AppState>) -> ApiResult<Json<IndexStatus>> {
    Ok(Json(state.indexer.status().await?))
}

#[utoipa::path(get, path = "/api/v1/admin/index/incremental-status", responses((status = 200, body = IncrementalStatus)))]
async fn incremental_status_handler(State(state): State<AppState>) -> ApiResult<Json<IncrementalStatus>> {
    Ok(Json(state.incremental.get_status().await?))
}

#[derive(Debug, Deserialize)]
struct DocumentIdQuery {
    document_id: String,
}

#[utoipa::path(delete, path = "/api/v1/admin/index/document", responses((status = 204)))]
async fn remove_document_handler(State(state): State<AppState>, Query(q): Query<DocumentIdQuery>) -> ApiResult<StatusCode> {
    state.incremental.remove_document(&q.document_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(delete, path = "/api/v1/admin/session/{id}", responses((status = 204)))]
async fn delete_session_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.sessions.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(get, path = "/api/v1/admin/cache/stats", responses((status = 200, body = CacheStatsResponse)))]
async fn cache_stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

#[utoipa::path(post, path = "/api/v1/admin/cache/clear", responses((status = 204)))]
async fn cache_clear_handler(State(state): State<AppState>) -> StatusCode {
    state.cache.clear().await;
    StatusCode::NO_CONTENT
}

#[utoipa::path(get, path = "/api/v1/monitoring/health", responses((status = 200, body = HealthStatus)))]
async fn index_health_handler(State(state): State<AppState>) -> ApiResult<Json<HealthStatus>> {
    Ok(Json(state.index_monitor.get_health_status().await?))
}

#[utoipa::path(get, path = "/api/v1/monitoring/requests", responses((status = 200, body = RequestStats)))]
async fn request_stats_handler(State(state): State<AppState>) -> Json<RequestStats> {
    Json(state.metrics.stats().await)
}

#[utoipa::path(get, path = "/api/v1/monitoring/vector-db", responses((status = 200, body = VectorDbStats)))]
async fn vector_db_stats_handler(State(state): State<AppState>) -> ApiResult<Json<VectorDbStats>> {
    Ok(Json(vector_db_stats(state.vector_store.as_ref(), "legal_documents").await?))
}

#[utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)))]
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Per-component health: the vector store's document count and the
/// configured embedding model. Either component failing degrades the
/// overall status without failing the request.
#[utoipa::path(get, path = "/health/detailed", responses((status = 200, body = serde_json::Value)))]
async fn health_detailed_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut status = "healthy";
    let mut components = serde_json::Map::new();

    match state.vector_store.count().await {
        Ok(count) => {
            components.insert("vector_db".to_string(), json!({"status": "healthy", "document_count": count}));
        }
        Err(e) => {
            components.insert("vector_db".to_string(), json!({"status": "unhealthy", "error": e.to_string()}));
            status = "degraded";
        }
    }

    components.insert(
        "embedding".to_string(),
        json!({"status": "healthy", "model": state.config.embedding_model}),
    );

    Json(json!({
        "status": status,
        "version": crate::VERSION,
        "timestamp": Utc::now().to_rfc3339(),
        "components": components,
    }))
}

/// Tracks request counters/histograms and emits `X-Process-Time`.
async fn observe(State(state): State<AppState>, req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let started = Instant::now();
    let mut response = next.run(req).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    state.metrics.record(&method, &path, response.status().as_u16(), elapsed_ms).await;
    if let Ok(value) = elapsed_ms.to_string().parse() {
        let _: u64 = value;
    }
    response
        .headers_mut()
        .insert("x-process-time-ms", elapsed_ms.to_string().parse().unwrap());
    response
}

/// Per-`(ip, path)` sliding-60s-window limiter; emits `X-RateLimit-*`
/// headers and a 429 once the endpoint-specific quota is exhausted.
async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let (allowed, remaining, limit) = state.check_rate_limit(&addr.ip().to_string(), &path).await;
    if !allowed {
        state
            .logger
            .log_error(ErrorSeverity::Warning, "RATE_LIMIT_EXCEEDED", &format!("rate limit exceeded for {path}"), json!({"ip": addr.ip().to_string()}))
            .await;
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("x-ratelimit-limit", limit.to_string()), ("x-ratelimit-remaining", "0".to_string())],
            Json(RagError::Configuration("rate limit exceeded".into()).to_body()),
        )
            .into_response();
    }

    let mut response = next.run(req).await;
    response.headers_mut().insert("x-ratelimit-limit", limit.to_string().parse().unwrap());
    response.headers_mut().insert("x-ratelimit-remaining", remaining.to_string().parse().unwrap());
    response
}

/// Gates the admin route group behind a shared `X-API-Key` credential.
/// An empty `admin_api_key` disables the check entirely.
async fn require_admin_key(State(state): State<AppState>, headers: HeaderMap, req: Request<axum::body::Body>, next: Next) -> Response {
    if !state.config.auth_enabled() {
        return next.run(req).await;
    }

    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided != Some(state.config.admin_api_key.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "ApiKey")],
            Json(RagError::Configuration("invalid or missing API key".into()).to_body()),
        )
            .into_response();
    }

    next.run(req).await
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        health_detailed_handler,
        search_handler,
        search_get_handler,
        ask_handler,
        generate_handler,
        index_document_handler,
        index_directory_handler,
        index_status_handler,
        incremental_status_handler,
        remove_document_handler,
        index_reset_handler,
        upload_document_handler,
        delete_session_handler,
        cache_stats_handler,
        cache_clear_handler,
        index_health_handler,
        request_stats_handler,
        vector_db_stats_handler,
    ),
    components(schemas(
        HealthResponse,
        SearchQuery,
        SearchRequest,
        SearchResponse,
        SourceRef,
        AskRequest,
        AskResponse,
        GenerateRequest,
        GenerateResponse,
        GenerateReference,
        GenerateMetadata,
        IndexDirectoryRequest,
        CacheStatsResponse,
    )),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "retrieval", description = "Search, ask and generate endpoints"),
        (name = "admin", description = "Indexing and cache administration"),
        (name = "monitoring", description = "Operational metrics")
    ),
    info(
        title = "Legal RAG API",
        version = "0.1.0",
        description = "Retrieval-augmented answering over a legal-document corpus"
    )
)]
struct ApiDoc;

async fn openapi_spec_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins_list();
    let cors = if cors_origins == vec!["*".to_string()] {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    // Mutating admin operations are gated behind `require_admin_key`; the
    // read-only status endpoints stay open, matching `admin.py`'s `/index/status`
    // (which carries no `Security(verify_api_key)` dependency either).
    let gated_admin = Router::new()
        .route("/api/v1/admin/index/document", post(index_document_handler).delete(remove_document_handler))
        .route("/api/v1/admin/index/directory", post(index_directory_handler))
        .route("/api/v1/admin/index/reset", post(index_reset_handler))
        .route("/api/v1/admin/upload", post(upload_document_handler))
        .route("/api/v1/admin/session/{id}", delete(delete_session_handler))
        .route("/api/v1/admin/cache/clear", post(cache_clear_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin_key));

    let open_admin = Router::new()
        .route("/api/v1/admin/index/status", get(index_status_handler))
        .route("/api/v1/admin/index/incremental-status", get(incremental_status_handler))
        .route("/api/v1/admin/cache/stats", get(cache_stats_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/detailed", get(health_detailed_handler))
        .route("/api-docs/openapi.json", get(openapi_spec_handler))
        .route("/api/v1/search", post(search_handler).get(search_get_handler))
        .route("/api/v1/ask", post(ask_handler))
        .route("/api/v1/ask-stream", post(ask_stream_handler))
        .route("/api/v1/generate", post(generate_handler))
        .merge(gated_admin)
        .merge(open_admin)
        .route("/api/v1/monitoring/health", get(index_health_handler))
        .route("/api/v1/monitoring/requests", get(request_stats_handler))
        .route("/api/v1/monitoring/vector-db", get(vector_db_stats_handler))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn_with_state(state.clone(), observe))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{Chunker, ChunkerConfig};
    use crate::embedding::EmbeddingClient;
    use crate::llm::{GenerationResponse, Message as LlmMessage};
    use crate::vector_store::SqliteVectorStore;
    use async_trait::async_trait;
    use std::pin::Pin;

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

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn generate(&self, messages: &[LlmMessage]) -> Result<GenerationResponse> {
            Ok(GenerationResponse {
                text: messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                tokens_used: Some(1),
                model: "echo".to_string(),
                finish_reason: Some("stop".to_string()),
            })
        }
        async fn generate_stream(
            &self,
            _messages: &[LlmMessage],
        ) -> Result<Pin<Box<dyn futures::Stream<Item = Result<String>> + Send>>> {
            Ok(Box::pin(futures::stream::iter(vec![Ok("a".to_string())])))
        }
    }

    async fn test_state() -> AppState {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(":memory:", "legal_documents").await.unwrap());
        let embedding: Arc<dyn EmbeddingClient> = Arc::new(FixedEmbeddingClient);
        let workflow = Arc::new(RetrievalWorkflow::new(store.clone(), embedding.clone(), 10, 5));
        let indexer = Arc::new(DocumentIndexer::new(
            store.clone(),
            embedding,
            Chunker::new(ChunkerConfig::default()),
            "legal_documents".to_string(),
        ));
        let dir = tempfile::tempdir().unwrap();
        let incremental = Arc::new(IncrementalUpdater::new(indexer.clone(), store.clone(), dir.path().join("state.json")).await);
        let index_monitor = Arc::new(IndexMonitor::new(store.clone(), incremental.clone()));
        let logger = Arc::new(OperationalLogger::new(dir.path().join("query.jsonl"), dir.path().join("error.jsonl")));
        let sessions = Arc::new(SessionManager::in_process(100, 30));
        let llm: Arc<dyn LlmClient> = Arc::new(EchoLlm);

        AppState::new(
            Arc::new(RagConfig::default()),
            workflow,
            sessions,
            llm,
            store,
            indexer,
            incremental,
            index_monitor,
            logger,
        )
    }

    #[tokio::test]
    async fn rate_limit_admits_until_quota_exhausted() {
        let state = test_state().await;
        for _ in 0..state.config.rate_limit_search {
            let (allowed, _, _) = state.check_rate_limit("1.2.3.4", "/api/v1/search").await;
            assert!(allowed);
        }
        let (allowed, remaining, _) = state.check_rate_limit("1.2.3.4", "/api/v1/search").await;
        assert!(!allowed);
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn rate_limit_is_scoped_per_ip() {
        let state = test_state().await;
        for _ in 0..state.config.rate_limit_search {
            state.check_rate_limit("1.1.1.1", "/api/v1/search").await;
        }
        let (allowed, _, _) = state.check_rate_limit("2.2.2.2", "/api/v1/search").await;
        assert!(allowed);
    }

    #[tokio::test]
    async fn search_handler_returns_empty_results_on_empty_store() {
        let state = test_state().await;
        let result = search_handler(
            State(state),
            Json(SearchRequest {
                query: "형사 사기".to_string(),
                n_results: None,
                document_types: None,
                filters: None,
            }),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn ask_handler_echoes_through_stub_llm_and_creates_session() {
        let state = test_state().await;
        let result = ask_handler(
            State(state),
            Json(AskRequest {
                query: "형사 사기 사건 질문".to_string(),
                session_id: None,
                document_types: None,
                filters: None,
            }),
        )
        .await
        .unwrap();
        assert!(!result.session_id.is_empty());
    }
}
