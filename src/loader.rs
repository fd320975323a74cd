//! Document loader.
//!
//! Walks the corpus root, keeps files matching the include globs, and turns
//! each into one or more [`Document`]s:
//!
//! | Extension | Documents |
//! |-----------|-----------|
//! | `.csv` | one per row, cells rendered as `header: value` lines |
//! | `.txt` | one per file, UTF-8 with ISO-8859-1 fallback |
//! | `.pdf` | one per non-blank page |
//!
//! A file that cannot be read or parsed is logged, recorded in the
//! [`LoadReport`] and skipped. Only a corpus with no document at all is an
//! error ([`RagError::EmptyCorpus`]).

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::error::RagError;
use crate::extract::{self, ExtractError};
use crate::models::{Document, SourceKind, SourceMeta};

/// Outcome of loading a corpus.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    /// Files that matched but produced no document.
    pub failures: Vec<RagError>,
    /// Files that produced at least one document.
    pub files_loaded: usize,
}

/// Load every supported file under `config.data_dir`.
///
/// Fails with [`RagError::EmptyCorpus`] if no document could be produced.
pub fn load_corpus(config: &CorpusConfig) -> Result<LoadReport> {
    let root = &config.data_dir;
    if !root.is_dir() {
        bail!("corpus root does not exist: {}", root.display());
    }

    let mut report = LoadReport::default();
    for path in discover_files(config)? {
        match load_file(&path, config.min_text_bytes) {
            Ok(docs) if !docs.is_empty() => {
                report.files_loaded += 1;
                report.documents.extend(docs);
            }
            Ok(_) => record_failure(&mut report, path, "no extractable text".to_string()),
            Err(e) => record_failure(&mut report, path, e.to_string()),
        }
    }

    tracing::info!(
        root = %root.display(),
        files = report.files_loaded,
        failed = report.failures.len(),
        documents = report.documents.len(),
        "corpus loaded"
    );

    if report.documents.is_empty() {
        return Err(RagError::EmptyCorpus { root: root.clone() }.into());
    }

    Ok(report)
}

fn record_failure(report: &mut LoadReport, path: PathBuf, reason: String) {
    tracing::warn!(path = %path.display(), %reason, "skipping file");
    report.failures.push(RagError::LoadFailure { path, reason });
}

/// List matching files under the corpus root, sorted for deterministic order.
pub fn discover_files(config: &CorpusConfig) -> Result<Vec<PathBuf>> {
    let root = &config.data_dir;
    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

/// Load one file into its documents.
pub fn load_file(path: &Path, min_text_bytes: u64) -> std::result::Result<Vec<Document>, LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let bytes = std::fs::read(path)?;
    let meta = |kind| SourceMeta {
        source: path.to_path_buf(),
        kind,
    };

    match ext.as_str() {
        "csv" => {
            let rows = extract::extract_csv_rows(&bytes)?;
            Ok(rows
                .into_iter()
                .map(|(row, text)| Document {
                    text,
                    meta: meta(SourceKind::CsvRow { row }),
                })
                .collect())
        }
        "pdf" => {
            let pages = extract::extract_pdf_pages(&bytes)?;
            Ok(pages
                .into_iter()
                .enumerate()
                .filter(|(_, text)| !text.trim().is_empty())
                .map(|(i, text)| Document {
                    text,
                    meta: meta(SourceKind::PdfPage {
                        page: i as u32 + 1,
                    }),
                })
                .collect())
        }
        _ => {
            let size = bytes.len() as u64;
            if size < min_text_bytes {
                return Err(ExtractError::TooSmall {
                    size,
                    min: min_text_bytes,
                }
                .into());
            }
            let text = extract::decode_text(&bytes);
            if text.trim().is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![Document {
                text,
                meta: meta(SourceKind::TextFile),
            }])
        }
    }
}

/// Why a single file was skipped.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus(dir: &TempDir) -> CorpusConfig {
        CorpusConfig {
            data_dir: dir.path().to_path_buf(),
            ..CorpusConfig::default()
        }
    }

    #[test]
    fn csv_yields_one_document_per_row() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("quests.csv"),
            "title\nheal the village elder\nfind the lost sword\n",
        )
        .unwrap();
        let report = load_corpus(&corpus(&dir)).unwrap();
        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.documents[1].meta.kind, SourceKind::CsvRow { row: 1 });
        assert_eq!(report.documents[1].text, "title: find the lost sword");
    }

    #[test]
    fn tiny_text_file_is_a_failure_not_a_document() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tiny.txt"), "hi").unwrap();
        std::fs::write(dir.path().join("lore.txt"), "The dragon sleeps under the mountain.").unwrap();
        let report = load_corpus(&corpus(&dir)).unwrap();
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            RagError::LoadFailure { path, .. } if path.ends_with("tiny.txt")
        ));
    }

    #[test]
    fn broken_pdf_does_not_abort_the_run() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.pdf"), "%PDF-garbage").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "Collect seven wolf pelts.").unwrap();
        let report = load_corpus(&corpus(&dir)).unwrap();
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn empty_corpus_is_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        std::fs::write(dir.path().join("readme.md"), "ignored extension").unwrap();
        let err = load_corpus(&corpus(&dir)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::EmptyCorpus { .. })
        ));
    }

    #[test]
    fn excluded_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config.txt"), "not part of the corpus").unwrap();
        std::fs::write(dir.path().join("a.txt"), "A quest about bees.").unwrap();
        let files = discover_files(&corpus(&dir)).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a.txt"));
    }
}
