//! Configuration: environment-sourced, layered env > file > default,
//! in the reference crate's `config`-crate-plus-validate idiom
//! (`AgentConfig::from_file` / `AgentConfig::validate` in the source's
//! `config.rs`), generalized to the full settings table this service needs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

fn default_llm_model() -> String {
    "gpt-4-turbo-preview".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_vector_db_type() -> String {
    "chroma".to_string()
}
fn default_persist_directory() -> String {
    "./data/vector_db".to_string()
}
fn default_search_default_top_k() -> usize {
    10
}
fn default_search_rerank_top_k() -> usize {
    5
}
fn default_search_max_results() -> usize {
    20
}
fn default_search_default_results() -> usize {
    5
}
fn default_search_max_sources() -> usize {
    3
}
fn default_session_max_turns() -> usize {
    3
}
fn default_cors_origins() -> String {
    "*".to_string()
}
fn default_rate_limit_default() -> u32 {
    60
}
fn default_rate_limit_ask() -> u32 {
    30
}
fn default_rate_limit_search() -> u32 {
    100
}
fn default_rate_limit_generate() -> u32 {
    20
}
fn default_rate_limit_admin() -> u32 {
    10
}
fn default_cache_max_size() -> usize {
    1000
}
fn default_cache_ttl() -> i64 {
    3600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_file() -> String {
    "./logs/app.log".to_string()
}
fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8000
}
fn default_index_state_file() -> String {
    "./data/index_state.json".to_string()
}

fn default_true() -> bool {
    true
}

/// Recognized environment/config keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub openai_api_key: String,

    #[serde(default = "default_vector_db_type")]
    pub vector_db_type: String,
    #[serde(default = "default_persist_directory")]
    pub chroma_persist_directory: String,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_search_default_top_k")]
    pub search_default_top_k: usize,
    #[serde(default = "default_search_rerank_top_k")]
    pub search_rerank_top_k: usize,
    #[serde(default = "default_search_max_results")]
    pub search_max_results: usize,
    #[serde(default = "default_search_default_results")]
    pub search_default_results: usize,
    #[serde(default = "default_search_max_sources")]
    pub search_max_sources: usize,

    #[serde(default = "default_session_max_turns")]
    pub session_max_turns: usize,
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,

    #[serde(default = "default_rate_limit_default")]
    pub rate_limit_default: u32,
    #[serde(default = "default_rate_limit_ask")]
    pub rate_limit_ask: u32,
    #[serde(default = "default_rate_limit_search")]
    pub rate_limit_search: u32,
    #[serde(default = "default_rate_limit_generate")]
    pub rate_limit_generate: u32,
    #[serde(default = "default_rate_limit_admin")]
    pub rate_limit_admin: u32,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: i64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub admin_api_key: String,

    #[serde(default = "default_index_state_file")]
    pub index_state_file: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            vector_db_type: default_vector_db_type(),
            chroma_persist_directory: default_persist_directory(),
            llm_model: default_llm_model(),
            embedding_model: default_embedding_model(),
            search_default_top_k: default_search_default_top_k(),
            search_rerank_top_k: default_search_rerank_top_k(),
            search_max_results: default_search_max_results(),
            search_default_results: default_search_default_results(),
            search_max_sources: default_search_max_sources(),
            session_max_turns: default_session_max_turns(),
            redis_url: None,
            cors_origins: default_cors_origins(),
            rate_limit_default: default_rate_limit_default(),
            rate_limit_ask: default_rate_limit_ask(),
            rate_limit_search: default_rate_limit_search(),
            rate_limit_generate: default_rate_limit_generate(),
            rate_limit_admin: default_rate_limit_admin(),
            cache_enabled: true,
            cache_max_size: default_cache_max_size(),
            cache_ttl: default_cache_ttl(),
            log_level: default_log_level(),
            log_file: default_log_file(),
            api_host: default_api_host(),
            api_port: default_api_port(),
            admin_api_key: String::new(),
            index_state_file: default_index_state_file(),
        }
    }
}

impl RagConfig {
    /// Load layered configuration: defaults, then an optional config file,
    /// then environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&RagConfig::default()).map_err(config_err)?);

        if let Some(path) = config_path {
            if path.exists() {
                builder = builder.add_source(config::File::from(path));
            }
        }

        builder = builder.add_source(
            config::Environment::default()
                .try_parsing(true)
                .separator("__"),
        );

        let settings = builder.build().map_err(config_err)?;
        let config: RagConfig = settings.try_deserialize().map_err(config_err)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.search_rerank_top_k > self.search_default_top_k {
            return Err(RagError::Configuration(
                "search_rerank_top_k must not exceed search_default_top_k".into(),
            ));
        }
        if self.search_default_results > self.search_max_results {
            return Err(RagError::Configuration(
                "search_default_results must not exceed search_max_results".into(),
            ));
        }
        Ok(())
    }

    /// CORS origins list, `*` meaning permissive (matches the source's
    /// `cors_origins_list` property).
    pub fn cors_origins_list(&self) -> Vec<String> {
        if self.cors_origins == "*" {
            vec!["*".to_string()]
        } else {
            self.cors_origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }
    }

    pub fn auth_enabled(&self) -> bool {
        !self.admin_api_key.trim().is_empty()
    }
}

fn config_err(e: config::ConfigError) -> RagError {
    RagError::Configuration(e.to_string())
}
