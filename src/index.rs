//! Persistent similarity index, cached per `(embedding model, size_chunk)`.
//!
//! # Storage Layout
//!
//! ```text
//! <cache root>/<model, sanitized>/SIZECHUNK/<size_chunk>/index.sqlite
//! ```
//!
//! The file is a small SQLite database with two tables:
//!
//! - `index_meta`: a single header row (format version, embedding model,
//!   size_chunk, dimensionality, chunk count, creation time).
//! - `chunks`: one row per chunk with its text, provenance, SHA-256 content
//!   hash and embedding (little-endian f32 BLOB).
//!
//! Loading is pure data decoding. Every header field, the row count, each
//! vector length and each content hash are checked, and any mismatch is
//! rejected with [`RagError::IndexFormat`] instead of being served.
//!
//! An index is immutable once written. A changed corpus needs the cache
//! directory removed; a different model or chunk size is simply a
//! different directory.

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunk::content_hash;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::RagError;
use crate::models::{Chunk, SourceKind, SourceMeta};
use crate::progress::{BuildProgressEvent, BuildProgressReporter};

/// Bumped whenever the table layout changes. Older files are rejected.
pub const INDEX_FORMAT_VERSION: i64 = 1;

pub const INDEX_FILE: &str = "index.sqlite";

/// Identity and shape of a persisted index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHeader {
    pub format_version: i64,
    pub embedding_model: String,
    pub size_chunk: usize,
    pub dims: usize,
    pub chunk_count: usize,
    /// Unix seconds.
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// An in-memory index, loaded from or just written to its cache file.
#[derive(Debug, Clone)]
pub struct Index {
    header: IndexHeader,
    entries: Vec<IndexEntry>,
    path: PathBuf,
}

impl Index {
    /// Assemble an index from entries that already share one dimensionality.
    pub(crate) fn from_parts(header: IndexHeader, entries: Vec<IndexEntry>, path: PathBuf) -> Self {
        Self {
            header,
            entries,
            path,
        }
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `fetch_k` entries most similar to `query`, as `(entry index,
    /// cosine similarity)` pairs sorted by similarity descending. Ties keep
    /// index order.
    pub fn nearest(&self, query: &[f32], fetch_k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, embedding::cosine_similarity(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(fetch_k);
        scored
    }
}

/// Replace anything that is not safe inside a single path component.
pub fn sanitize_model_name(model: &str) -> String {
    let cleaned: String = model
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.starts_with('.') {
        format!("_{}", cleaned)
    } else {
        cleaned
    }
}

/// Owns the cache root and serialises first-time builds per cache key.
pub struct IndexStore {
    root: PathBuf,
    build_locks: parking_lot::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            build_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the index for a cache key.
    pub fn cache_dir(&self, model: &str, size_chunk: usize) -> PathBuf {
        self.root
            .join(sanitize_model_name(model))
            .join("SIZECHUNK")
            .join(size_chunk.to_string())
    }

    pub fn cache_path(&self, model: &str, size_chunk: usize) -> PathBuf {
        self.cache_dir(model, size_chunk).join(INDEX_FILE)
    }

    fn lock_for(&self, dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.build_locks
            .lock()
            .entry(dir.to_path_buf())
            .or_default()
            .clone()
    }

    /// Load the index for `(provider model, size_chunk)`, or build it.
    ///
    /// On a cache hit `supplier` is never called. On a miss the supplier
    /// produces the chunks, every chunk is embedded in batches of
    /// `batch_size`, and the result is persisted atomically before it is
    /// returned. A corrupt or mismatched cache file is an error, never a
    /// silent rebuild.
    pub async fn get_or_build<F>(
        &self,
        provider: &dyn EmbeddingProvider,
        size_chunk: usize,
        batch_size: usize,
        progress: &dyn BuildProgressReporter,
        supplier: F,
    ) -> Result<Index>
    where
        F: FnOnce() -> Result<Vec<Chunk>>,
    {
        let model = provider.model_name();
        let dir = self.cache_dir(model, size_chunk);
        let path = dir.join(INDEX_FILE);

        let lock = self.lock_for(&dir);
        let _guard = lock.lock().await;

        if path.is_file() {
            tracing::info!(path = %path.display(), "index cache hit");
            return load_index(&path, model, size_chunk).await;
        }

        tracing::info!(path = %path.display(), "index cache miss, building");
        let started = std::time::Instant::now();

        let chunks = supplier()?;
        if chunks.is_empty() {
            return Err(RagError::EmptySplit { size_chunk }.into());
        }
        progress.report(BuildProgressEvent::Chunked {
            chunks: chunks.len() as u64,
        });

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedding::embed_in_batches(provider, &texts, batch_size, progress).await?;
        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);

        let header = IndexHeader {
            format_version: INDEX_FORMAT_VERSION,
            embedding_model: model.to_string(),
            size_chunk,
            dims,
            chunk_count: chunks.len(),
            created_at: chrono::Utc::now().timestamp(),
        };
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();

        write_index(&dir, &header, &entries).await?;

        tracing::info!(
            path = %path.display(),
            chunks = header.chunk_count,
            dims,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index built"
        );

        Ok(Index::from_parts(header, entries, path))
    }
}

async fn open_pool(path: &Path, create: bool) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .read_only(!create)
        .journal_mode(SqliteJournalMode::Delete);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

/// Write the index to a temporary file in `dir`, then rename it into place.
async fn write_index(dir: &Path, header: &IndexHeader, entries: &[IndexEntry]) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;

    let tmp = dir.join(format!(".{}.{}.tmp", INDEX_FILE, uuid::Uuid::new_v4()));
    let result = write_tables(&tmp, header, entries).await;
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    let target = dir.join(INDEX_FILE);
    std::fs::rename(&tmp, &target).with_context(|| {
        format!("Failed to move index into place: {}", target.display())
    })?;
    Ok(())
}

async fn write_tables(path: &Path, header: &IndexHeader, entries: &[IndexEntry]) -> Result<()> {
    let pool = open_pool(path, true).await?;

    sqlx::query(
        r#"
        CREATE TABLE index_meta (
            format_version INTEGER NOT NULL,
            embedding_model TEXT NOT NULL,
            size_chunk INTEGER NOT NULL,
            dims INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE chunks (
            id INTEGER PRIMARY KEY,
            text TEXT NOT NULL,
            source TEXT NOT NULL,
            kind TEXT NOT NULL,
            position INTEGER,
            chunk_index INTEGER NOT NULL,
            hash TEXT NOT NULL,
            vector BLOB NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO index_meta (format_version, embedding_model, size_chunk, dims, chunk_count, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(header.format_version)
    .bind(&header.embedding_model)
    .bind(header.size_chunk as i64)
    .bind(header.dims as i64)
    .bind(header.chunk_count as i64)
    .bind(header.created_at)
    .execute(&mut *tx)
    .await?;

    for (id, entry) in entries.iter().enumerate() {
        let meta = &entry.chunk.meta;
        sqlx::query(
            "INSERT INTO chunks (id, text, source, kind, position, chunk_index, hash, vector) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id as i64)
        .bind(&entry.chunk.text)
        .bind(meta.source.to_string_lossy().to_string())
        .bind(meta.kind.label())
        .bind(meta.kind.position().map(|p| p as i64))
        .bind(i64::from(entry.chunk.chunk_index))
        .bind(&entry.chunk.hash)
        .bind(embedding::vec_to_blob(&entry.vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    pool.close().await;
    Ok(())
}

/// Load and validate a persisted index.
///
/// `model` and `size_chunk` are the cache key the caller expects; a file
/// written for any other key is rejected.
pub async fn load_index(path: &Path, model: &str, size_chunk: usize) -> Result<Index> {
    let pool = open_pool(path, false)
        .await
        .map_err(|e| rejected(path, format!("cannot open: {}", e)))?;

    let result = read_tables(&pool, path, model, size_chunk).await;
    pool.close().await;
    let (header, entries) = result?;

    tracing::debug!(
        path = %path.display(),
        chunks = header.chunk_count,
        dims = header.dims,
        "index loaded"
    );

    Ok(Index::from_parts(header, entries, path.to_path_buf()))
}

fn rejected(path: &Path, reason: String) -> anyhow::Error {
    RagError::IndexFormat {
        path: path.to_path_buf(),
        reason,
    }
    .into()
}

async fn read_tables(
    pool: &SqlitePool,
    path: &Path,
    model: &str,
    size_chunk: usize,
) -> Result<(IndexHeader, Vec<IndexEntry>)> {
    let meta_rows = sqlx::query(
        "SELECT format_version, embedding_model, size_chunk, dims, chunk_count, created_at FROM index_meta",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| rejected(path, format!("unreadable header: {}", e)))?;
    let header = parse_header(path, &meta_rows, model, size_chunk)?;

    let rows = sqlx::query(
        "SELECT text, source, kind, position, chunk_index, hash, vector FROM chunks ORDER BY id",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| rejected(path, format!("unreadable chunks: {}", e)))?;
    let entries = parse_entries(path, &header, &rows)?;

    Ok((header, entries))
}

fn parse_header(
    path: &Path,
    meta_rows: &[SqliteRow],
    model: &str,
    size_chunk: usize,
) -> Result<IndexHeader> {
    let row = match meta_rows {
        [row] => row,
        rows => {
            return Err(rejected(
                path,
                format!("expected 1 header row, found {}", rows.len()),
            ))
        }
    };

    let int = |name: &str| -> Result<i64> {
        row.try_get::<i64, _>(name)
            .map_err(|e| rejected(path, format!("bad header field {}: {}", name, e)))
    };
    let non_negative = |name: &str| -> Result<usize> {
        usize::try_from(int(name)?)
            .map_err(|_| rejected(path, format!("negative header field {}", name)))
    };

    let header = IndexHeader {
        format_version: int("format_version")?,
        embedding_model: row
            .try_get("embedding_model")
            .map_err(|e| rejected(path, format!("bad header field embedding_model: {}", e)))?,
        size_chunk: non_negative("size_chunk")?,
        dims: non_negative("dims")?,
        chunk_count: non_negative("chunk_count")?,
        created_at: int("created_at")?,
    };

    if header.format_version != INDEX_FORMAT_VERSION {
        return Err(rejected(
            path,
            format!(
                "format version {} (supported: {})",
                header.format_version, INDEX_FORMAT_VERSION
            ),
        ));
    }
    if header.embedding_model != model {
        return Err(rejected(
            path,
            format!(
                "built for embedding model '{}', expected '{}'",
                header.embedding_model, model
            ),
        ));
    }
    if header.size_chunk != size_chunk {
        return Err(rejected(
            path,
            format!(
                "built for size_chunk {}, expected {}",
                header.size_chunk, size_chunk
            ),
        ));
    }
    if header.dims == 0 && header.chunk_count > 0 {
        return Err(rejected(path, "zero-dimensional vectors".to_string()));
    }
    Ok(header)
}

fn parse_entries(path: &Path, header: &IndexHeader, rows: &[SqliteRow]) -> Result<Vec<IndexEntry>> {
    if rows.len() != header.chunk_count {
        return Err(rejected(
            path,
            format!(
                "header declares {} chunks, found {}",
                header.chunk_count,
                rows.len()
            ),
        ));
    }

    let mut entries = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let reject = |reason: String| rejected(path, format!("chunk {}: {}", i, reason));
        let field = |e: sqlx::Error| reject(e.to_string());

        let text: String = row.try_get("text").map_err(field)?;
        let source: String = row.try_get("source").map_err(field)?;
        let kind: String = row.try_get("kind").map_err(field)?;
        let position: Option<i64> = row.try_get("position").map_err(field)?;
        let chunk_index: i64 = row.try_get("chunk_index").map_err(field)?;
        let hash: String = row.try_get("hash").map_err(field)?;
        let blob: Vec<u8> = row.try_get("vector").map_err(field)?;

        let position = position
            .map(u64::try_from)
            .transpose()
            .map_err(|_| reject("negative position".to_string()))?;
        let kind = SourceKind::from_parts(&kind, position)
            .ok_or_else(|| reject(format!("unknown source kind '{}'", kind)))?;
        let chunk_index =
            u32::try_from(chunk_index).map_err(|_| reject("bad chunk_index".to_string()))?;

        if blob.len() != header.dims * 4 {
            return Err(reject(format!(
                "vector has {} bytes, expected {}",
                blob.len(),
                header.dims * 4
            )));
        }
        if content_hash(&text) != hash {
            return Err(reject("content hash mismatch".to_string()));
        }

        entries.push(IndexEntry {
            chunk: Chunk {
                text,
                meta: SourceMeta {
                    source: PathBuf::from(source),
                    kind,
                },
                chunk_index,
                hash,
            },
            vector: embedding::blob_to_vec(&blob),
        });
    }
    Ok(entries)
}
