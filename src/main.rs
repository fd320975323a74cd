//! # Quest RAG CLI (`quest-rag`)
//!
//! Builds (or loads) the retrieval index for a corpus of quests and lore,
//! then answers prompts through a language model, either over HTTP or
//! one-shot from the command line.
//!
//! ## Usage
//!
//! ```bash
//! quest-rag --config ./config/quest-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quest-rag serve` | Build or load the index, then serve `/query` and `/reset` |
//! | `quest-rag index` | Build or load the index and print its header |
//! | `quest-rag retrieve "<query>"` | Show the chunks a prompt would receive |
//! | `quest-rag ask "<prompt>"` | Answer a single prompt |
//!
//! ## Examples
//!
//! ```bash
//! # Serve on port 8000 with 4 chunks of at most 2000 characters
//! quest-rag --kchunk 4 --sizechunk 2000 --modelembedding bge-m3 serve
//!
//! # Inspect retrieval for a prompt
//! quest-rag retrieve "a healing quest in a cyberpunk city"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quest_rag::config::{self, Overrides};
use quest_rag::embedding;
use quest_rag::pipeline;
use quest_rag::progress::ProgressMode;
use quest_rag::retriever::{RetrievalParams, Retriever};
use quest_rag::server;

/// Quest RAG: retrieval-augmented quest generation over CSV, TXT and PDF corpora.
#[derive(Parser)]
#[command(name = "quest-rag", version)]
struct Cli {
    /// Path to configuration file (TOML). Missing file: built-in defaults.
    #[arg(long, global = true, default_value = "./config/quest-rag.toml")]
    config: PathBuf,

    /// Number of chunks handed to the model (overrides `K_CHUNK`).
    #[arg(long, global = true)]
    kchunk: Option<usize>,

    /// Maximum chunk size in characters (overrides `SIZE_CHUNK`).
    #[arg(long, global = true)]
    sizechunk: Option<usize>,

    /// Embedding model name (overrides `MODEL_EMBEDDING`).
    #[arg(long, global = true)]
    modelembedding: Option<String>,

    /// Port for `serve`; the host part of `[server].bind` is kept.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Index build progress on stderr. Defaults to `human` on a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or load the index, then start the HTTP server.
    Serve,

    /// Build or load the index and print its header.
    Index,

    /// Print the chunks retrieved for a query, in prompt order.
    Retrieve {
        query: String,
    },

    /// Answer one prompt and print the answer.
    Ask {
        prompt: String,

        /// Session whose history is used and extended.
        #[arg(long, default_value = "default")]
        session: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quest_rag=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let overrides = Overrides {
        k_chunk: cli.kchunk,
        size_chunk: cli.sizechunk,
        model_embedding: cli.modelembedding.clone(),
        port: cli.port,
    };
    let cfg = config::load_config(&cli.config, &overrides)?;
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    tracing::info!(
        data_dir = %cfg.corpus.data_dir.display(),
        embedding_model = %cfg.embedding.model,
        llm_model = %cfg.llm.model,
        k_chunk = cfg.retrieval.k_chunk,
        size_chunk = cfg.chunking.size_chunk,
        "configuration loaded"
    );

    match cli.command {
        Commands::Serve => {
            let orchestrator = pipeline::init_engine(&cfg, progress.as_ref()).await?;
            server::run_server(Arc::new(orchestrator), &cfg.server.bind).await?;
        }
        Commands::Index => {
            let provider = embedding::create_provider(&cfg.embedding)?;
            let index =
                pipeline::build_or_load_index(&cfg, provider.as_ref(), progress.as_ref()).await?;
            let h = index.header();
            println!("path:            {}", index.path().display());
            println!("format_version:  {}", h.format_version);
            println!("embedding_model: {}", h.embedding_model);
            println!("size_chunk:      {}", h.size_chunk);
            println!("dims:            {}", h.dims);
            println!("chunks:          {}", h.chunk_count);
            println!(
                "created_at:      {}",
                chrono::DateTime::from_timestamp(h.created_at, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| h.created_at.to_string())
            );
        }
        Commands::Retrieve { query } => {
            let provider: Arc<dyn embedding::EmbeddingProvider> =
                Arc::from(embedding::create_provider(&cfg.embedding)?);
            let index =
                pipeline::build_or_load_index(&cfg, provider.as_ref(), progress.as_ref()).await?;
            let retriever = Retriever::new(
                Arc::new(index),
                provider,
                RetrievalParams::from(&cfg.retrieval),
            );
            let results = retriever.retrieve(&query).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, rc) in results.iter().enumerate() {
                let meta = &rc.chunk.meta;
                let location = meta
                    .kind
                    .position()
                    .map(|p| format!(" {} {}", meta.kind.label(), p))
                    .unwrap_or_default();
                println!(
                    "{}. [relevance {:.3}, mmr {:.3}, pick #{}] {}{}",
                    i + 1,
                    rc.relevance,
                    rc.mmr_score,
                    rc.selection_rank + 1,
                    meta.source.display(),
                    location
                );
                let preview: String = rc.chunk.text.chars().take(200).collect();
                println!("    {}", preview.replace('\n', " "));
            }
        }
        Commands::Ask { prompt, session } => {
            let orchestrator = pipeline::init_engine(&cfg, progress.as_ref()).await?;
            let response = orchestrator.answer(&prompt, &session).await?;
            println!("{}", response.answer.trim());
            eprintln!(
                "\n[{:.2}s total, {:.2}s retrieval, {:.2}s generation, {} sources]",
                response.timings.total.as_secs_f64(),
                response.timings.retrieval.as_secs_f64(),
                response.timings.generation.as_secs_f64(),
                response.sources.len()
            );
        }
    }

    Ok(())
}
