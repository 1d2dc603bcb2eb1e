//! CLI indexer: runs a full or incremental index over a directory of
//! document JSON files without starting the REST API.
//!
//! Usage:
//!   legal-rag-index <DIRECTORY> [OPTIONS]
//!
//! Options:
//!   --config <PATH>     Path to configuration file (default: config.toml)
//!   --incremental       Skip documents already recorded in the index state
//!   --force             With --incremental, reindex already-recorded documents
//!   --no-chunk          Store each document as a single chunk instead of
//!                       running it through the type-aware chunker
//!
//! Exit codes: 0 success, 1 failure, 130 on interrupt.

use std::path::PathBuf;
use std::sync::Arc;

use legal_rag::chunker::{Chunker, ChunkerConfig};
use legal_rag::config::RagConfig;
use legal_rag::embedding::OpenAiEmbeddingClient;
use legal_rag::incremental::IncrementalUpdater;
use legal_rag::indexer::DocumentIndexer;
use legal_rag::vector_store::{SqliteVectorStore, VectorStore};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct Args {
    directory: PathBuf,
    config_path: PathBuf,
    incremental: bool,
    force: bool,
    no_chunk: bool,
}

fn parse_args() -> Option<Args> {
    let mut iter = std::env::args().skip(1);
    let directory = PathBuf::from(iter.next()?);
    let mut config_path = PathBuf::from("config.toml");
    let mut incremental = false;
    let mut force = false;
    let mut no_chunk = false;

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(path) = iter.next() {
                    config_path = PathBuf::from(path);
                }
            }
            "--incremental" => incremental = true,
            "--force" => force = true,
            "--no-chunk" => no_chunk = true,
            other => {
                eprintln!("unknown argument: {other}");
                return None;
            }
        }
    }

    Some(Args {
        directory,
        config_path,
        incremental,
        force,
        no_chunk,
    })
}

fn print_usage() {
    eprintln!("legal-rag-index <DIRECTORY> [--config <PATH>] [--incremental] [--force] [--no-chunk]");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Some(args) = parse_args() else {
        print_usage();
        std::process::exit(1);
    };

    let exit_code = tokio::select! {
        result = run(args) => match result {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "indexing failed");
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            error!("interrupted");
            130
        }
    };
    std::process::exit(exit_code);
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = if args.config_path.exists() {
        RagConfig::load(Some(&args.config_path))?
    } else {
        RagConfig::load(None)?
    };

    let vector_store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(&config.chroma_persist_directory, "legal_documents").await?);
    let embedding_client = Arc::new(OpenAiEmbeddingClient::new(config.openai_api_key.clone(), config.embedding_model.clone())?);
    let indexer = Arc::new(DocumentIndexer::new(
        vector_store.clone(),
        embedding_client,
        Chunker::new(ChunkerConfig::default()),
        "legal_documents".to_string(),
    ));

    if args.incremental {
        let updater = IncrementalUpdater::new(indexer, vector_store, config.index_state_file.clone()).await;
        let outcome = updater.update_incremental(&args.directory, args.force).await?;
        info!(
            total = outcome.total,
            new = outcome.new,
            updated = outcome.updated,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "incremental indexing finished"
        );
        if outcome.failed > 0 {
            anyhow::bail!("{} file(s) failed to index", outcome.failed);
        }
    } else {
        let outcome = indexer.index_directory(&args.directory, !args.no_chunk).await?;
        info!(total = outcome.total, success = outcome.success, failed = outcome.failed, "indexing finished");
        if outcome.failed > 0 {
            anyhow::bail!("{} file(s) failed to index", outcome.failed);
        }
    }

    Ok(())
}
