//! Diversified retrieval over an [`Index`].
//!
//! A query is embedded, the `fetch_k` nearest chunks are taken as
//! candidates, and `k` of them are picked greedily by maximal marginal
//! relevance:
//!
//! ```text
//! MMR = λ × sim(query, c) − (1 − λ) × max sim(c, selected)
//! ```
//!
//! λ = 1.0 is pure relevance; lower values push near-duplicates out.
//!
//! The result is returned in **reverse** selection order: the first pick
//! (most relevant, least redundant) comes last, so it ends up closest to
//! the question once the chunks are concatenated into a prompt.

use anyhow::Result;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::RagError;
use crate::index::Index;
use crate::models::RetrievedChunk;

/// Query-time parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    pub k: usize,
    pub fetch_k: usize,
    pub diversity_weight: f32,
}

impl From<&RetrievalConfig> for RetrievalParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            k: config.k_chunk,
            fetch_k: config.fetch_k,
            diversity_weight: config.diversity_weight,
        }
    }
}

/// Embeds queries and runs MMR selection against a shared index.
pub struct Retriever {
    index: Arc<Index>,
    provider: Arc<dyn EmbeddingProvider>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        index: Arc<Index>,
        provider: Arc<dyn EmbeddingProvider>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            index,
            provider,
            params,
        }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn params(&self) -> RetrievalParams {
        self.params
    }

    /// Retrieve up to `k` chunks for `query`, most salient last.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        if self.index.is_empty() {
            return Err(RagError::EmptyIndex.into());
        }
        let query_vec = embedding::embed_query(self.provider.as_ref(), query).await?;
        select_mmr(&self.index, &query_vec, self.params)
    }
}

/// Run MMR selection for an already-embedded query.
///
/// Fails with [`RagError::EmptyIndex`] on an empty index and with
/// [`RagError::IndexFormat`] if the query's dimensionality differs from
/// the index's.
pub fn select_mmr(
    index: &Index,
    query: &[f32],
    params: RetrievalParams,
) -> Result<Vec<RetrievedChunk>> {
    if index.is_empty() {
        return Err(RagError::EmptyIndex.into());
    }
    if query.len() != index.header().dims {
        return Err(RagError::IndexFormat {
            path: index.path().to_path_buf(),
            reason: format!(
                "query has {} dimensions, index has {}",
                query.len(),
                index.header().dims
            ),
        }
        .into());
    }

    let lambda = params.diversity_weight.clamp(0.0, 1.0);
    let fetch_k = params.fetch_k.max(params.k);
    let mut remaining = index.nearest(query, fetch_k);
    let k = params.k.min(remaining.len());

    let entries = index.entries();
    let mut selected: Vec<RetrievedChunk> = Vec::with_capacity(k);
    let mut selected_ids: Vec<usize> = Vec::with_capacity(k);

    for rank in 0..k {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &(id, relevance)) in remaining.iter().enumerate() {
            let max_similarity = selected_ids
                .iter()
                .map(|&s| embedding::cosine_similarity(&entries[id].vector, &entries[s].vector))
                .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))))
                .unwrap_or(0.0);

            let score = lambda * relevance - (1.0 - lambda) * max_similarity;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        let (id, relevance) = remaining.remove(best_pos);
        selected_ids.push(id);
        selected.push(RetrievedChunk {
            chunk: entries[id].chunk.clone(),
            relevance,
            mmr_score: best_score,
            selection_rank: rank,
        });
    }

    selected.reverse();
    Ok(selected)
}
