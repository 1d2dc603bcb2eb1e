//! REST API server entry point.
//!
//! Usage:
//!   legal-rag-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Path to configuration file (default: config.toml)
//!   --host <HOST>     Override the configured API host
//!   --port <PORT>     Override the configured API port
//!   --help, -h        Print this help message

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use legal_rag::api::{create_router, AppState};
use legal_rag::chunker::{Chunker, ChunkerConfig};
use legal_rag::config::RagConfig;
use legal_rag::embedding::{EmbeddingClient, OpenAiEmbeddingClient};
use legal_rag::incremental::IncrementalUpdater;
use legal_rag::indexer::DocumentIndexer;
use legal_rag::llm::{LlmClient, OpenAiChatClient};
use legal_rag::monitoring::{IndexMonitor, OperationalLogger};
use legal_rag::session::SessionManager;
use legal_rag::vector_store::{SqliteVectorStore, VectorStore};
use legal_rag::workflow::RetrievalWorkflow;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

struct Args {
    config_path: PathBuf,
    host: Option<String>,
    port: Option<u16>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config.toml"),
            host: None,
            port: None,
        }
    }
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(path) = iter.next() {
                    args.config_path = PathBuf::from(path);
                }
            }
            "--host" => args.host = iter.next(),
            "--port" => {
                if let Some(p) = iter.next() {
                    args.port = p.parse().ok();
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("unknown argument: {other}");
                print_help();
                std::process::exit(1);
            }
        }
    }
    args
}

fn print_help() {
    println!("legal-rag-server [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>   Path to configuration file (default: config.toml)");
    println!("    --host <HOST>     Override the configured API host");
    println!("    --port <PORT>     Override the configured API port");
    println!("    --help, -h        Print this help message");
}

fn setup_logging(log_file: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,legal_rag=debug"));
    match std::fs::File::create(log_file) {
        Ok(file) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_writer(file).with_ansi(false))
                .init();
        }
        Err(_) => {
            tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
        }
    }
}

async fn build_state(config: RagConfig) -> anyhow::Result<AppState> {
    let vector_store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(&config.chroma_persist_directory, "legal_documents").await?);
    let embedding_client: Arc<dyn EmbeddingClient> = Arc::new(OpenAiEmbeddingClient::new(config.openai_api_key.clone(), config.embedding_model.clone())?);
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiChatClient::new(config.openai_api_key.clone(), config.llm_model.clone())?);

    let workflow = Arc::new(RetrievalWorkflow::new(
        vector_store.clone(),
        embedding_client.clone(),
        config.search_default_top_k,
        config.search_rerank_top_k,
    ));
    let chunker = Chunker::new(ChunkerConfig::default());
    let indexer = Arc::new(DocumentIndexer::new(
        vector_store.clone(),
        embedding_client,
        chunker,
        "legal_documents".to_string(),
    ));
    let incremental = Arc::new(IncrementalUpdater::new(indexer.clone(), vector_store.clone(), config.index_state_file.clone()).await);
    let index_monitor = Arc::new(IndexMonitor::new(vector_store.clone(), incremental.clone()));
    let sessions = Arc::new(SessionManager::in_process(1000, config.session_max_turns as u64 * 10));
    let logger = Arc::new(OperationalLogger::new("./logs/query.jsonl", "./logs/error.jsonl"));

    Ok(AppState::new(
        Arc::new(config),
        workflow,
        sessions,
        llm,
        vector_store,
        indexer,
        incremental,
        index_monitor,
        logger,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();

    let config = if args.config_path.exists() {
        RagConfig::load(Some(&args.config_path))?
    } else {
        RagConfig::load(None)?
    };
    setup_logging(&config.log_file);

    let host = args.host.unwrap_or_else(|| config.api_host.clone());
    let port = args.port.unwrap_or(config.api_port);

    info!(version = %legal_rag::VERSION, "legal-rag-server starting");

    let state = build_state(config).await?;
    let router = create_router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        tx.send(()).ok();
    });

    tokio::select! {
        result = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                return Err(e.into());
            }
        }
        _ = &mut rx => {
            info!("graceful shutdown initiated");
        }
    }

    Ok(())
}
