//! Error taxonomy for the retrieval and answering pipeline.
//!
//! Fallible functions in this crate return [`anyhow::Result`]. The variants
//! of [`RagError`] travel inside `anyhow::Error` whenever the caller may
//! need to react to the *kind* of failure (the HTTP layer maps them to
//! status codes, startup treats corpus and index emptiness as fatal).
//! Recover them with `err.downcast_ref::<RagError>()`.

use std::path::PathBuf;

/// Named failure kinds of the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// A single source file could not be read or parsed. Recovered by the
    /// loader: the file is skipped and counted.
    #[error("failed to load {path}: {reason}")]
    LoadFailure { path: PathBuf, reason: String },

    /// No document could be loaded from the corpus root.
    #[error("no usable documents found under {root}")]
    EmptyCorpus { root: PathBuf },

    /// Chunking a non-empty document set produced nothing.
    #[error("chunking produced no chunks (size_chunk={size_chunk})")]
    EmptySplit { size_chunk: usize },

    /// The index holds no vectors, so nothing can be retrieved.
    #[error("index contains no chunks")]
    EmptyIndex,

    /// A persisted index failed header or schema validation.
    #[error("rejected index file {path}: {reason}")]
    IndexFormat { path: PathBuf, reason: String },

    /// The embedding capability failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The language-model capability failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Answering a request (retrieval plus generation) exceeded its deadline.
    #[error("answer timed out after {secs}s")]
    GenerationTimeout { secs: u64 },

    /// A prompt template is malformed or could not be filled.
    #[error("prompt template error: {0}")]
    Template(String),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Returns the [`RagError`] carried by an `anyhow::Error`, if any.
pub fn kind_of(err: &anyhow::Error) -> Option<&RagError> {
    err.chain().find_map(|e| e.downcast_ref::<RagError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_survives_context_layers() {
        let err: anyhow::Result<()> = Err(RagError::EmptyIndex.into());
        let err = err.context("answering query").unwrap_err();
        assert!(matches!(kind_of(&err), Some(RagError::EmptyIndex)));
    }

    #[test]
    fn plain_errors_have_no_kind() {
        let err = anyhow::anyhow!("something else");
        assert!(kind_of(&err).is_none());
    }
}
