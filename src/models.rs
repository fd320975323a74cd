//! Core data models that flow through the loading, indexing and answering
//! pipeline.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which kind of source unit a document was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// One row of a CSV file (0-based, header excluded).
    CsvRow { row: u64 },
    /// A whole plain-text file.
    TextFile,
    /// One page of a PDF (1-based).
    PdfPage { page: u32 },
}

impl SourceKind {
    /// Short label stored in the index (`csv`, `text`, `pdf`).
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::CsvRow { .. } => "csv",
            SourceKind::TextFile => "text",
            SourceKind::PdfPage { .. } => "pdf",
        }
    }

    /// Row or page number, if the kind has one.
    pub fn position(&self) -> Option<u64> {
        match self {
            SourceKind::CsvRow { row } => Some(*row),
            SourceKind::TextFile => None,
            SourceKind::PdfPage { page } => Some(u64::from(*page)),
        }
    }

    /// Inverse of [`label`](Self::label) + [`position`](Self::position).
    pub fn from_parts(label: &str, position: Option<u64>) -> Option<Self> {
        match (label, position) {
            ("csv", Some(row)) => Some(SourceKind::CsvRow { row }),
            ("text", None) => Some(SourceKind::TextFile),
            ("pdf", Some(page)) => u32::try_from(page)
                .ok()
                .map(|page| SourceKind::PdfPage { page }),
            _ => None,
        }
    }
}

/// Provenance carried from a document into every chunk cut from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceMeta {
    pub source: PathBuf,
    #[serde(flatten)]
    pub kind: SourceKind,
}

/// A loaded source unit. Immutable once produced by the loader.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub meta: SourceMeta,
}

/// A bounded span of document text, the unit of retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub meta: SourceMeta,
    /// Position of this chunk among the chunks of its document.
    pub chunk_index: u32,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk selected by the retriever, with its ranking diagnostics.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Cosine similarity between query and chunk.
    pub relevance: f32,
    /// Marginal-relevance score at the moment the chunk was selected.
    pub mmr_score: f32,
    /// 0 for the first chunk picked by the diversification loop.
    pub selection_rank: usize,
}

/// One exchange in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

/// Where an answer spent its time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    pub total: Duration,
    pub retrieval: Duration,
    pub formatting: Duration,
    pub generation: Duration,
}

/// Provenance of one retrieved chunk, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkProvenance {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub relevance: f32,
    pub excerpt: String,
}

impl ChunkProvenance {
    pub fn from_retrieved(rc: &RetrievedChunk, excerpt_chars: usize) -> Self {
        let (row, page) = match rc.chunk.meta.kind {
            SourceKind::CsvRow { row } => (Some(row), None),
            SourceKind::TextFile => (None, None),
            SourceKind::PdfPage { page } => (None, Some(page)),
        };
        Self {
            source: rc.chunk.meta.source.display().to_string(),
            row,
            page,
            relevance: rc.relevance,
            excerpt: rc.chunk.text.trim().chars().take(excerpt_chars).collect(),
        }
    }
}

/// Result of one answered prompt.
#[derive(Debug, Clone)]
pub struct AnswerResponse {
    pub answer: String,
    pub session_id: String,
    /// Turns held for the session after this answer was recorded.
    pub history_depth: usize,
    pub timings: Timings,
    /// Retrieved chunks in context order (most salient last).
    pub sources: Vec<ChunkProvenance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parts_roundtrip() {
        for kind in [
            SourceKind::CsvRow { row: 3 },
            SourceKind::TextFile,
            SourceKind::PdfPage { page: 12 },
        ] {
            let back = SourceKind::from_parts(kind.label(), kind.position());
            assert_eq!(back, Some(kind));
        }
    }

    #[test]
    fn kind_rejects_inconsistent_parts() {
        assert_eq!(SourceKind::from_parts("csv", None), None);
        assert_eq!(SourceKind::from_parts("text", Some(1)), None);
        assert_eq!(SourceKind::from_parts("docx", None), None);
    }
}
