//! Index health, request metrics and JSONL logging.
//!
//! Grounded on `original_source/src/rag/monitor.py`'s `IndexMonitor` and
//! `src/utils/monitoring.py`'s `APIMonitor`/`VectorDBMonitor`: in-memory
//! counters and histograms plus two append-only log streams, shaped after
//! the reference crate's `tracing`-appender idiom for file-backed output.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::incremental::IncrementalUpdater;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: &'static str,
    pub vector_db_count: usize,
    pub indexed_documents: usize,
    pub timestamp: DateTime<Utc>,
}

/// Index health and consistency checks.
pub struct IndexMonitor {
    vector_store: Arc<dyn VectorStore>,
    updater: Arc<IncrementalUpdater>,
}

impl IndexMonitor {
    pub fn new(vector_store: Arc<dyn VectorStore>, updater: Arc<IncrementalUpdater>) -> Self {
        Self { vector_store, updater }
    }

    pub async fn get_health_status(&self) -> Result<HealthStatus> {
        let count = self.vector_store.count().await?;
        let status = self.updater.get_status().await?;
        Ok(HealthStatus {
            status: if count > 0 { "healthy" } else { "empty" },
            vector_db_count: count,
            indexed_documents: status.indexed_count,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
struct EndpointCounters {
    request_count: u64,
    error_count: u64,
    total_latency_ms: u64,
    max_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RequestStats {
    pub uptime_seconds: i64,
    pub total_requests: u64,
    pub endpoints: HashMap<String, EndpointStats>,
}

/// Request counters/histograms fed by the Observer middleware.
pub struct RequestMetrics {
    start_time: DateTime<Utc>,
    counters: Mutex<HashMap<String, EndpointCounters>>,
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub async fn record(&self, method: &str, path: &str, status: u16, latency_ms: u64) {
        let key = format!("{method} {path}");
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(key).or_default();
        entry.request_count += 1;
        entry.total_latency_ms += latency_ms;
        entry.max_latency_ms = entry.max_latency_ms.max(latency_ms);
        if status >= 400 {
            entry.error_count += 1;
        }
    }

    pub async fn stats(&self) -> RequestStats {
        let counters = self.counters.lock().await;
        let total_requests = counters.values().map(|c| c.request_count).sum();
        let endpoints = counters
            .iter()
            .map(|(k, c)| {
                let avg = if c.request_count > 0 {
                    c.total_latency_ms as f64 / c.request_count as f64
                } else {
                    0.0
                };
                (
                    k.clone(),
                    EndpointStats {
                        request_count: c.request_count,
                        error_count: c.error_count,
                        avg_latency_ms: avg,
                        max_latency_ms: c.max_latency_ms,
                    },
                )
            })
            .collect();
        RequestStats {
            uptime_seconds: (Utc::now() - self.start_time).num_seconds(),
            total_requests,
            endpoints,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VectorDbStats {
    pub collection_name: String,
    pub document_count: usize,
}

pub async fn vector_db_stats(vector_store: &dyn VectorStore, collection_name: &str) -> Result<VectorDbStats> {
    Ok(VectorDbStats {
        collection_name: collection_name.to_string(),
        document_count: vector_store.count().await?,
    })
}

#[derive(Debug, Clone, Serialize)]
struct QueryLogEntry {
    timestamp: DateTime<Utc>,
    query: String,
    results_count: usize,
    response_time_ms: u64,
    metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub enum ErrorSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorLogEntry {
    timestamp: DateTime<Utc>,
    severity: String,
    error_type: String,
    error_message: String,
    context: Value,
}

/// Append-only JSONL writers for the query and error logs. Neither
/// stream is read back by the running process.
pub struct OperationalLogger {
    query_log_path: PathBuf,
    error_log_path: PathBuf,
    lock: Mutex<()>,
}

impl OperationalLogger {
    pub fn new(query_log_path: impl Into<PathBuf>, error_log_path: impl Into<PathBuf>) -> Self {
        Self {
            query_log_path: query_log_path.into(),
            error_log_path: error_log_path.into(),
            lock: Mutex::new(()),
        }
    }

    pub async fn log_query(&self, query: &str, results_count: usize, response_time_ms: u64, metadata: Value) {
        let entry = QueryLogEntry {
            timestamp: Utc::now(),
            query: query.to_string(),
            results_count,
            response_time_ms,
            metadata,
        };
        self.append(&self.query_log_path, &entry).await;
    }

    pub async fn log_error(&self, severity: ErrorSeverity, error_type: &str, error_message: &str, context: Value) {
        let severity = match severity {
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Error => "error",
        };
        let entry = ErrorLogEntry {
            timestamp: Utc::now(),
            severity: severity.to_string(),
            error_type: error_type.to_string(),
            error_message: error_message.to_string(),
            context,
        };
        self.append(&self.error_log_path, &entry).await;
    }

    async fn append<T: Serialize>(&self, path: &PathBuf, entry: &T) {
        let _guard = self.lock.lock().await;
        let Ok(line) = serde_json::to_string(entry) else {
            warn!("failed to serialize log entry");
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match OpenOptions::new().create(true).append(true).open(path).await {
            Ok(mut file) => {
                if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                    warn!(error = %e, path = %path.display(), "failed to append log line");
                }
            }
            Err(e) => warn!(error = %e, path = %path.display(), "failed to open log file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_metrics_accumulate_counts_and_max_latency() {
        let metrics = RequestMetrics::new();
        metrics.record("GET", "/search", 200, 10).await;
        metrics.record("GET", "/search", 500, 30).await;
        let stats = metrics.stats().await;
        let endpoint = &stats.endpoints["GET /search"];
        assert_eq!(endpoint.request_count, 2);
        assert_eq!(endpoint.error_count, 1);
        assert_eq!(endpoint.max_latency_ms, 30);
    }

    #[tokio::test]
    async fn query_log_appends_jsonl_line() {
        let dir = tempfile::tempdir().unwrap();
        let logger = OperationalLogger::new(dir.path().join("query.jsonl"), dir.path().join("error.jsonl"));
        logger.log_query("테스트", 3, 42, serde_json::json!({})).await;
        let content = tokio::fs::read_to_string(dir.path().join("query.jsonl")).await.unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"results_count\":3"));
    }

    #[tokio::test]
    async fn error_log_appends_distinct_stream() {
        let dir = tempfile::tempdir().unwrap();
        let logger = OperationalLogger::new(dir.path().join("query.jsonl"), dir.path().join("error.jsonl"));
        logger
            .log_error(ErrorSeverity::Error, "VALIDATION_ERROR", "bad input", serde_json::json!({}))
            .await;
        let content = tokio::fs::read_to_string(dir.path().join("error.jsonl")).await.unwrap();
        assert!(content.contains("VALIDATION_ERROR"));
    }
}
