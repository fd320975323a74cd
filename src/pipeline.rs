//! Startup wiring: corpus → chunks → index → orchestrator.
//!
//! ```text
//! Loader ──▶ Chunker ──▶ IndexStore::get_or_build ──▶ Retriever ──┐
//!   (only on a cache miss)                                        ├──▶ Orchestrator
//!                          SessionStore, PromptTemplate, LLM ─────┘
//! ```
//!
//! Loading and chunking run only when the index for the configured
//! `(embedding model, size_chunk)` is not cached yet. An empty corpus or an
//! empty split aborts startup before anything is written to the cache.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audit::AuditLog;
use crate::chunk;
use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::index::{Index, IndexStore};
use crate::llm::{self, LanguageModel};
use crate::loader;
use crate::models::Chunk;
use crate::orchestrator::Orchestrator;
use crate::progress::{BuildProgressEvent, BuildProgressReporter};
use crate::prompt::PromptTemplate;
use crate::retriever::{RetrievalParams, Retriever};
use crate::session::SessionStore;

/// Load the corpus and split it into chunks.
pub fn load_chunks(config: &Config, progress: &dyn BuildProgressReporter) -> Result<Vec<Chunk>> {
    let report = loader::load_corpus(&config.corpus)?;
    progress.report(BuildProgressEvent::Loaded {
        files: report.files_loaded as u64,
        failed: report.failures.len() as u64,
        documents: report.documents.len() as u64,
    });
    chunk::split_documents(
        &report.documents,
        config.chunking.size_chunk,
        config.chunking.overlap,
    )
}

/// Load the cached index for this configuration, or build and persist it.
pub async fn build_or_load_index(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    progress: &dyn BuildProgressReporter,
) -> Result<Index> {
    let store = IndexStore::new(&config.cache.root);
    store
        .get_or_build(
            provider,
            config.chunking.size_chunk,
            config.embedding.batch_size,
            progress,
            || load_chunks(config, progress),
        )
        .await
}

/// Assemble an orchestrator from explicit capabilities.
///
/// Production code goes through [`init_engine`]; tests pass in deterministic
/// embedding and language-model implementations.
pub async fn init_engine_with(
    config: &Config,
    provider: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    progress: &dyn BuildProgressReporter,
) -> Result<Orchestrator> {
    let started = Instant::now();

    let template = PromptTemplate::from_config(&config.prompt)?;
    let index = build_or_load_index(config, provider.as_ref(), progress).await?;

    tracing::info!(
        embedding_model = %index.header().embedding_model,
        size_chunk = index.header().size_chunk,
        chunks = index.len(),
        k_chunk = config.retrieval.k_chunk,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "engine ready"
    );

    let retriever = Retriever::new(
        Arc::new(index),
        provider,
        RetrievalParams::from(&config.retrieval),
    );
    let sessions = Arc::new(SessionStore::new(&config.session));

    let mut orchestrator = Orchestrator::new(
        retriever,
        llm,
        template,
        sessions,
        Duration::from_secs(config.llm.timeout_secs),
    );
    if config.audit.enabled {
        orchestrator = orchestrator.with_audit(AuditLog::new(&config.audit.log_dir));
    }
    Ok(orchestrator)
}

/// Assemble an orchestrator using the configured providers.
pub async fn init_engine(config: &Config, progress: &dyn BuildProgressReporter) -> Result<Orchestrator> {
    let provider: Arc<dyn EmbeddingProvider> = Arc::from(embedding::create_provider(&config.embedding)?);
    let llm: Arc<dyn LanguageModel> = Arc::from(llm::create_llm(&config.llm)?);
    init_engine_with(config, provider, llm, progress).await
}
