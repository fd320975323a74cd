//! Index build progress reporting.
//!
//! Reports observable progress while an index is built (`quest-rag index`,
//! or the first `serve` against a new cache key) so users see how many
//! files were loaded and how many chunks remain to embed.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an index build.
#[derive(Clone, Debug)]
pub enum BuildProgressEvent {
    /// Corpus discovery finished: `files` loaded, `failed` skipped.
    Loaded { files: u64, failed: u64, documents: u64 },
    /// Chunking finished with `chunks` units to embed.
    Chunked { chunks: u64 },
    /// Embedding: n chunks embedded out of total.
    Embedding { n: u64, total: u64 },
}

/// Reports build progress. Implementations write to stderr (human or JSON).
pub trait BuildProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgressEvent);
}

/// Human-friendly progress on stderr: "index  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let line = match &event {
            BuildProgressEvent::Loaded {
                files,
                failed,
                documents,
            } => format!(
                "index  loaded  {} files ({} skipped), {} documents\n",
                format_number(*files),
                format_number(*failed),
                format_number(*documents)
            ),
            BuildProgressEvent::Chunked { chunks } => {
                format!("index  chunked  {} chunks\n", format_number(*chunks))
            }
            BuildProgressEvent::Embedding { n, total } => format!(
                "index  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BuildProgressReporter for JsonProgress {
    fn report(&self, event: BuildProgressEvent) {
        let obj = match &event {
            BuildProgressEvent::Loaded {
                files,
                failed,
                documents,
            } => serde_json::json!({
                "event": "progress",
                "phase": "loaded",
                "files": files,
                "failed": failed,
                "documents": documents
            }),
            BuildProgressEvent::Chunked { chunks } => serde_json::json!({
                "event": "progress",
                "phase": "chunked",
                "chunks": chunks
            }),
            BuildProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
