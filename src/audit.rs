//! Per-request audit log.
//!
//! Every answered request is written to its own text file under the log
//! directory:
//!
//! ```text
//! LOGS/SERVER/log_2026-03-14_09-26-53.589_player-42.txt
//! ```
//!
//! Files are created with `create_new` and never reopened; two requests
//! landing on the same name get a numeric suffix instead of overwriting.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::{ChunkProvenance, Timings};

/// Everything recorded about one request.
pub struct AuditRecord<'a> {
    pub at: DateTime<Local>,
    pub session_id: &'a str,
    pub prompt: &'a str,
    pub answer: &'a str,
    pub timings: &'a Timings,
    pub embedding_model: &'a str,
    pub k_chunk: usize,
    pub size_chunk: usize,
    pub sources: &'a [ChunkProvenance],
}

pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one record, returning the file path.
    pub fn write(&self, record: &AuditRecord<'_>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create log directory: {}", self.dir.display()))?;

        let stem = format!(
            "log_{}_{}",
            record.at.format("%Y-%m-%d_%H-%M-%S%.3f"),
            sanitize_session_id(record.session_id)
        );

        let (path, mut file) = create_unique(&self.dir, &stem)?;
        file.write_all(render(record).as_bytes())
            .with_context(|| format!("Failed to write audit log: {}", path.display()))?;
        Ok(path)
    }
}

fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, std::fs::File)> {
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{}.txt", stem)
        } else {
            format!("{}_{}.txt", stem, attempt)
        };
        let path = dir.join(name);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < 1000 => {
                attempt += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create audit log: {}", path.display()))
            }
        }
    }
}

/// Keep session ids usable as a file-name fragment.
pub fn sanitize_session_id(session_id: &str) -> String {
    let cleaned: String = session_id
        .chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

fn render(record: &AuditRecord<'_>) -> String {
    let t = record.timings;
    let mut out = String::new();
    out.push_str(&format!("Time: {}\n", record.at.format("%Y-%m-%d %H:%M:%S%.3f")));
    out.push_str(&format!("Session: {}\n", record.session_id));
    out.push_str(&format!("Request duration: {:.2} sec\n", t.total.as_secs_f64()));
    out.push_str(&format!("  retrieval: {:.2} sec\n", t.retrieval.as_secs_f64()));
    out.push_str(&format!("  formatting: {:.3} sec\n", t.formatting.as_secs_f64()));
    out.push_str(&format!("  generation: {:.2} sec\n", t.generation.as_secs_f64()));
    out.push_str(&format!("EMBEDDING: {}\n", record.embedding_model));
    out.push_str(&format!("K_CHUNK: {}\n", record.k_chunk));
    out.push_str(&format!("SIZE_CHUNK: {}\n", record.size_chunk));
    out.push_str("\nPrompt:\n");
    out.push_str(record.prompt.trim());
    out.push_str("\n\nAnswer:\n");
    out.push_str(record.answer.trim());
    out.push('\n');

    if !record.sources.is_empty() {
        out.push_str("\n=== Chunks used ===\n");
        for (i, source) in record.sources.iter().enumerate() {
            let location = match (source.row, source.page) {
                (Some(row), _) => format!(" (row {})", row),
                (_, Some(page)) => format!(" (page {})", page),
                _ => String::new(),
            };
            out.push_str(&format!(
                "\n[{}] Source: {}{}\nRelevance: {:.3}\nExcerpt: {}...\n",
                i + 1,
                source.source,
                location,
                source.relevance,
                source.excerpt
            ));
        }
    }
    out
}
