//! Query cache: fixed-capacity LRU with per-entry TTL.
//!
//! The reference crate's `LlmCache` (`src/cache.rs`) is a SQLite-backed
//! response cache; the retrieval-workflow's query cache is a different
//! shape (in-memory, LRU, TTL-evicting, keyed on query+filters) that
//! matches the original `utils/cache.py` `QueryCache` one-for-one. Method
//! names and the `CacheStats` shape follow the reference crate's cache
//! idiom; the storage structure follows the original's `OrderedDict` LRU.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCacheConfig {
    pub max_size: usize,
    pub ttl_seconds: i64,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    result: Value,
    timestamp: i64,
}

struct Inner {
    entries: HashMap<String, Entry>,
    /// Recency order, least-recently-used at the front.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.entries.remove(key)
    }
}

/// In-memory LRU+TTL cache for retrieval results, keyed on
/// `sha256(canonical_json({query, filters}))`.
pub struct QueryCache {
    config: QueryCacheConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub ttl: i64,
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Canonical key: filters are serialized with sorted keys so that
    /// `{a,b}` and `{b,a}` hash identically.
    pub fn compute_key(query: &str, filters: Option<&HashMap<String, Value>>) -> String {
        let filters_value = match filters {
            Some(f) => {
                let mut keys: Vec<&String> = f.keys().collect();
                keys.sort();
                let mut map = serde_json::Map::new();
                for k in keys {
                    map.insert(k.clone(), f[k].clone());
                }
                Value::Object(map)
            }
            None => Value::Object(serde_json::Map::new()),
        };
        let canonical = serde_json::json!({ "query": query, "filters": filters_value });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, query: &str, filters: Option<&HashMap<String, Value>>) -> Option<Value> {
        let key = Self::compute_key(query, filters);
        let mut inner = self.inner.lock().await;
        let now = now_secs();

        let expired = match inner.entries.get(&key) {
            Some(entry) => now - entry.timestamp > self.config.ttl_seconds,
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if expired {
            inner.remove(&key);
            inner.misses += 1;
            debug!(%key, "cache entry expired");
            return None;
        }

        inner.touch(&key);
        inner.hits += 1;
        Some(inner.entries[&key].result.clone())
    }

    pub async fn set(&self, query: &str, filters: Option<&HashMap<String, Value>>, result: Value) {
        let key = Self::compute_key(query, filters);
        let mut inner = self.inner.lock().await;

        if inner.entries.len() >= self.config.max_size && !inner.entries.contains_key(&key) {
            if let Some(oldest_key) = inner.order.pop_front() {
                inner.entries.remove(&oldest_key);
                debug!(key = %oldest_key, "evicted LRU cache entry");
            }
        }

        inner.remove(&key);
        inner.entries.insert(
            key.clone(),
            Entry {
                result,
                timestamp: now_secs(),
            },
        );
        inner.order.push_back(key);
    }

    pub async fn invalidate(&self, query: &str, filters: Option<&HashMap<String, Value>>) {
        let key = Self::compute_key(query, filters);
        self.inner.lock().await.remove(&key);
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub async fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = now_secs();
        let ttl = self.config.ttl_seconds;
        let expired_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now - entry.timestamp > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired_keys.len();
        for key in expired_keys {
            inner.remove(&key);
        }
        count
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        let total = inner.hits + inner.misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            (inner.hits as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
        };
        CacheStats {
            size: inner.entries.len(),
            max_size: self.config.max_size,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
            ttl: self.config.ttl_seconds,
        }
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = QueryCache::new(QueryCacheConfig::default());
        assert!(cache.get("q", None).await.is_none());
        cache.set("q", None, json!({"results": []})).await;
        assert_eq!(cache.get("q", None).await, Some(json!({"results": []})));
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn key_is_stable_under_filter_key_order() {
        let mut f1 = HashMap::new();
        f1.insert("a".to_string(), json!(1));
        f1.insert("b".to_string(), json!(2));
        let mut f2 = HashMap::new();
        f2.insert("b".to_string(), json!(2));
        f2.insert("a".to_string(), json!(1));
        assert_eq!(
            QueryCache::compute_key("q", Some(&f1)),
            QueryCache::compute_key("q", Some(&f2))
        );
    }

    #[tokio::test]
    async fn size_never_exceeds_max_size() {
        let cache = QueryCache::new(QueryCacheConfig {
            max_size: 2,
            ttl_seconds: 3600,
        });
        cache.set("a", None, json!(1)).await;
        cache.set("b", None, json!(2)).await;
        cache.set("c", None, json!(3)).await;
        let stats = cache.stats().await;
        assert!(stats.size <= 2);
    }

    #[tokio::test]
    async fn lru_eviction_drops_least_recently_used() {
        let cache = QueryCache::new(QueryCacheConfig {
            max_size: 2,
            ttl_seconds: 3600,
        });
        cache.set("a", None, json!(1)).await;
        cache.set("b", None, json!(2)).await;
        cache.get("a", None).await; // touch a, making b the LRU entry
        cache.set("c", None, json!(3)).await;
        assert!(cache.get("b", None).await.is_none());
        assert!(cache.get("a", None).await.is_some());
    }

    #[tokio::test]
    async fn expired_entries_never_satisfy_get() {
        let cache = QueryCache::new(QueryCacheConfig {
            max_size: 10,
            ttl_seconds: -1,
        });
        cache.set("a", None, json!(1)).await;
        assert!(cache.get("a", None).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_specific_entry() {
        let cache = QueryCache::new(QueryCacheConfig::default());
        cache.set("a", None, json!(1)).await;
        cache.invalidate("a", None).await;
        assert!(cache.get("a", None).await.is_none());
    }

    #[tokio::test]
    async fn hit_rate_is_zero_with_no_requests() {
        let cache = QueryCache::new(QueryCacheConfig::default());
        assert_eq!(cache.stats().await.hit_rate, 0.0);
    }
}
