use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use policy_qa::{
    config::{self, Config},
    embedding::{self, EmbeddingProvider},
    index::{self, Chunk, VectorIndex},
    logging,
    metrics::PipelineMetrics,
    processing::{ChunkingSettings, IndexingService},
    validation::{self, Summaries, ValidationSettings},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "policy-qa",
    about = "Index policy documents and check generated summaries against them"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed, and index a plain-text document.
    Ingest {
        #[arg(long)]
        document_id: Option<String>,
        #[arg(long)]
        input: PathBuf,
    },
    /// Embed and index chunks produced elsewhere.
    Embed {
        #[arg(long)]
        document_id: String,
        #[arg(long)]
        chunks: PathBuf,
    },
    /// Nearest chunks for a query.
    Search {
        #[arg(long)]
        document_id: Option<String>,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 5)]
        k: usize,
    },
    /// Stored chunks of a document in index order.
    Chunks {
        #[arg(long)]
        document_id: String,
    },
    /// Validate generated summaries against the indexed document.
    QaCheck {
        #[arg(long)]
        document_id: String,
        #[arg(long)]
        summaries: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChunkFile {
    Wrapped { chunks: Vec<Chunk> },
    Bare(Vec<Chunk>),
}

struct Runtime {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    metrics: Arc<PipelineMetrics>,
}

#[tokio::main]
async fn main() {
    logging::init_tracing();
    if let Err(err) = run().await {
        tracing::error!(error = %format!("{err:#}"), "Command failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("Failed to load configuration")?;
    let runtime = connect(config).await?;

    match cli.command {
        Command::Ingest { document_id, input } => {
            let document_id =
                document_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let outcome = indexing_service(config, &runtime)
                .ingest_text(&document_id, &text)
                .await
                .with_context(|| format!("Failed to ingest document {document_id}"))?;
            print_json(&outcome)?;
        }
        Command::Embed {
            document_id,
            chunks,
        } => {
            let raw = std::fs::read_to_string(&chunks)
                .with_context(|| format!("Failed to read {}", chunks.display()))?;
            let file: ChunkFile = serde_json::from_str(&raw).context("Invalid chunk file")?;
            let chunks = match file {
                ChunkFile::Wrapped { chunks } | ChunkFile::Bare(chunks) => chunks,
            };
            let outcome = indexing_service(config, &runtime)
                .embed_chunks(&document_id, chunks)
                .await
                .with_context(|| format!("Failed to embed chunks for {document_id}"))?;
            print_json(&outcome)?;
        }
        Command::Search {
            document_id,
            query,
            k,
        } => {
            let budget = config.external_call_timeout;
            let vector = tokio::time::timeout(budget, runtime.embedder.embed(&query))
                .await
                .with_context(|| format!("Query embedding timed out after {budget:?}"))?
                .context("Failed to embed query")?;
            let hits = tokio::time::timeout(
                budget,
                runtime.index.search(&vector, k, document_id.as_deref()),
            )
            .await
            .with_context(|| format!("Search timed out after {budget:?}"))?
            .context("Search failed")?;
            print_json(&hits)?;
        }
        Command::Chunks { document_id } => {
            let chunks = runtime
                .index
                .chunks_for_document(&document_id)
                .await
                .with_context(|| format!("Failed to list chunks for {document_id}"))?;
            print_json(&chunks)?;
        }
        Command::QaCheck {
            document_id,
            summaries,
            output,
        } => {
            let raw = std::fs::read_to_string(&summaries)
                .with_context(|| format!("Failed to read {}", summaries.display()))?;
            let summaries: Summaries =
                serde_json::from_str(&raw).context("Invalid summaries file")?;
            let orchestrator = validation::build_orchestrator(
                Arc::clone(&runtime.embedder),
                Arc::clone(&runtime.index),
                ValidationSettings::from_config(config),
            )
            .with_metrics(Arc::clone(&runtime.metrics));
            let report = orchestrator.validate_all(&document_id, &summaries).await;
            if let Some(path) = output {
                write_json(&path, &report)?;
                tracing::info!(path = %path.display(), "Validation report saved");
            }
            print_json(&report)?;
        }
    }

    tracing::info!(metrics = ?runtime.metrics.snapshot(), "Command finished");
    Ok(())
}

async fn connect(config: &Config) -> Result<Runtime> {
    let embedder = embedding::build_embedding_provider(config)
        .context("Failed to initialize embedding provider")?;
    let index = index::open_vector_index(config, embedder.dimension())
        .await
        .context("Failed to open vector index")?;
    Ok(Runtime {
        embedder,
        index,
        metrics: Arc::new(PipelineMetrics::new()),
    })
}

fn indexing_service(config: &Config, runtime: &Runtime) -> IndexingService {
    IndexingService::new(
        Arc::clone(&runtime.embedder),
        Arc::clone(&runtime.index),
        ChunkingSettings::from_config(config),
        Arc::clone(&runtime.metrics),
    )
    .with_call_timeout(config.external_call_timeout)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))
}
