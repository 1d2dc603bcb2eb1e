//! Conversation session manager.
//!
//! Grounded on `original_source/src/rag/session_manager.py`: an in-process
//! map is the primary backend, with an optional remote key-value backend
//! selected at construction and a fallback to in-process if that selection
//! fails. Shaped after the reference crate's adapter-trait-plus-struct
//! pattern (`src/memory.rs`'s `MemoryStore` trait).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SessionError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<Message>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn new(session_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn add_message(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.history.push(Message {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    pub fn get_history(&self, max_turns: Option<usize>) -> Vec<Message> {
        match max_turns {
            Some(n) if n < self.history.len() => self.history[self.history.len() - n..].to_vec(),
            _ => self.history.clone(),
        }
    }

    /// `role: content` lines, newest last, per the context-string contract.
    pub fn context_string(&self, max_turns: usize) -> String {
        self.get_history(Some(max_turns))
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Optional remote key-value backend for session persistence. No concrete
/// implementation ships in this crate; a deployment wires one in (e.g. a
/// managed cache) and the manager falls back to in-process storage if
/// construction or the initial health check fails.
#[async_trait]
pub trait RemoteSessionBackend: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn set(&self, session_id: &str, session: &Session, ttl: Duration) -> Result<()>;
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;
    async fn delete(&self, session_id: &str) -> Result<()>;
    async fn list_ids(&self) -> Result<Vec<String>>;
}

struct InProcessStore {
    sessions: HashMap<String, Session>,
}

/// Session manager over either backend, selected once at construction.
pub struct SessionManager {
    max_sessions: usize,
    timeout: Duration,
    remote: Option<Arc<dyn RemoteSessionBackend>>,
    in_process: RwLock<InProcessStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn in_process(max_sessions: usize, timeout_minutes: u64) -> Self {
        Self {
            max_sessions,
            timeout: Duration::from_secs(timeout_minutes * 60),
            remote: None,
            in_process: RwLock::new(InProcessStore {
                sessions: HashMap::new(),
            }),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to bring up a remote-backed manager; falls back to
    /// in-process only when the remote backend's init `ping` fails
    ///.
    pub async fn with_remote(
        max_sessions: usize,
        timeout_minutes: u64,
        backend: Arc<dyn RemoteSessionBackend>,
    ) -> Self {
        match backend.ping().await {
            Ok(()) => {
                info!("remote session backend connected");
                Self {
                    max_sessions,
                    timeout: Duration::from_secs(timeout_minutes * 60),
                    remote: Some(backend),
                    in_process: RwLock::new(InProcessStore {
                        sessions: HashMap::new(),
                    }),
                    locks: Mutex::new(HashMap::new()),
                }
            }
            Err(e) => {
                warn!(error = %e, "remote session backend unavailable, falling back to in-process");
                Self::in_process(max_sessions, timeout_minutes)
            }
        }
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn create(&self, session_id: Option<String>) -> Result<Session> {
        let session = Session::new(session_id);
        if let Some(remote) = &self.remote {
            remote.set(&session.session_id, &session, self.timeout).await?;
        } else {
            let mut store = self.in_process.write().await;
            store.sessions.insert(session.session_id.clone(), session.clone());
            if store.sessions.len() > self.max_sessions {
                evict_oldest_half(&mut store.sessions);
            }
        }
        debug!(session_id = %session.session_id, "session created");
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        if let Some(remote) = &self.remote {
            return remote.get(session_id).await;
        }
        let store = self.in_process.read().await;
        match store.sessions.get(session_id) {
            Some(session) => {
                let elapsed = Utc::now().signed_duration_since(session.updated_at);
                if elapsed.num_seconds() as u64 > self.timeout.as_secs() {
                    drop(store);
                    self.delete(session_id).await?;
                    return Ok(None);
                }
                Ok(Some(session.clone()))
            }
            None => Ok(None),
        }
    }

    /// Serializes concurrent mutations to the same session.
    pub async fn update(&self, session: Session) -> Result<()> {
        let guard = self.lock_for(&session.session_id).await;
        let _permit = guard.lock().await;
        if let Some(remote) = &self.remote {
            remote.set(&session.session_id, &session, self.timeout).await?;
        } else {
            self.in_process
                .write()
                .await
                .sessions
                .insert(session.session_id.clone(), session);
        }
        Ok(())
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        if let Some(remote) = &self.remote {
            remote.delete(session_id).await?;
        } else {
            self.in_process.write().await.sessions.remove(session_id);
        }
        Ok(())
    }

    pub async fn list_ids(&self) -> Result<Vec<String>> {
        if let Some(remote) = &self.remote {
            return remote.list_ids().await;
        }
        Ok(self.in_process.read().await.sessions.keys().cloned().collect())
    }

    pub async fn get_or_create(&self, session_id: Option<String>) -> Result<Session> {
        if let Some(id) = &session_id {
            if let Some(session) = self.get(id).await? {
                return Ok(session);
            }
        }
        self.create(session_id).await
    }

    pub async fn require(&self, session_id: &str) -> Result<Session> {
        self.get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()).into())
    }
}

fn evict_oldest_half(sessions: &mut HashMap<String, Session>) {
    let mut ordered: Vec<(String, DateTime<Utc>)> = sessions
        .iter()
        .map(|(id, s)| (id.clone(), s.updated_at))
        .collect();
    ordered.sort_by_key(|(_, updated_at)| *updated_at);
    let to_remove = ordered.len() / 2;
    for (id, _) in ordered.into_iter().take(to_remove) {
        sessions.remove(&id);
    }
}
