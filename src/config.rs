//! Configuration loading and validation.
//!
//! Settings come from three layers, lowest precedence first:
//!
//! 1. A TOML file (`./config/quest-rag.toml` by default). Every section is
//!    optional; a missing file means "all defaults".
//! 2. Environment variables: `K_CHUNK`, `SIZE_CHUNK`, `MODEL_EMBEDDING`,
//!    `MODEL_LLM`, `OLLAMA_URL`.
//! 3. Command-line flags, applied by the binary through [`Overrides`].
//!
//! [`Config::validate`] runs after all layers are merged.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::RagError;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub prompt: PromptConfig,
    pub audit: AuditConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CorpusConfig {
    pub data_dir: PathBuf,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
    /// Text files smaller than this are treated as unusable.
    pub min_text_bytes: u64,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("DATA"),
            include_globs: vec![
                "**/*.csv".to_string(),
                "**/*.txt".to_string(),
                "**/*.pdf".to_string(),
            ],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            min_text_bytes: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length, in characters.
    pub size_chunk: usize,
    /// Characters shared between consecutive chunks of one document.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size_chunk: 2000,
            overlap: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k_chunk: usize,
    pub fetch_k: usize,
    /// MMR lambda: 1.0 is pure relevance, 0.0 pure diversity.
    pub diversity_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_chunk: 4,
            fetch_k: 50,
            diversity_weight: 0.7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub url: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "bge-m3".to_string(),
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub url: Option<String>,
    pub temperature: f32,
    /// Deadline for answering one request, retrieval included.
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "llama3.1:8b".to_string(),
            url: None,
            temperature: 0.9,
            timeout_secs: 300,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("RAG/CACHE"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub max_history_turns: usize,
    pub max_sessions: usize,
    /// Sessions idle for longer than this are dropped. Unset: never.
    pub idle_timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history_turns: 6,
            max_sessions: 1024,
            idle_timeout_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PromptConfig {
    /// `creative` or `qa`.
    pub preset: String,
    /// Custom template file; overrides `preset` when set.
    pub template_path: Option<PathBuf>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            preset: "creative".to_string(),
            template_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub log_dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: PathBuf::from("LOGS/SERVER"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Command-line overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub k_chunk: Option<usize>,
    pub size_chunk: Option<usize>,
    pub model_embedding: Option<String>,
    pub port: Option<u16>,
}

impl Config {
    /// Apply environment overrides using `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("K_CHUNK") {
            self.retrieval.k_chunk = v
                .trim()
                .parse()
                .with_context(|| format!("K_CHUNK is not an integer: '{}'", v))?;
        }
        if let Some(v) = lookup("SIZE_CHUNK") {
            self.chunking.size_chunk = v
                .trim()
                .parse()
                .with_context(|| format!("SIZE_CHUNK is not an integer: '{}'", v))?;
        }
        if let Some(v) = lookup("MODEL_EMBEDDING") {
            if !v.trim().is_empty() {
                self.embedding.model = v.trim().to_string();
            }
        }
        if let Some(v) = lookup("MODEL_LLM") {
            if !v.trim().is_empty() {
                self.llm.model = v.trim().to_string();
            }
        }
        if let Some(v) = lookup("OLLAMA_URL") {
            if !v.trim().is_empty() {
                if self.embedding.provider == "ollama" && self.embedding.url.is_none() {
                    self.embedding.url = Some(v.trim().to_string());
                }
                if self.llm.provider == "ollama" && self.llm.url.is_none() {
                    self.llm.url = Some(v.trim().to_string());
                }
            }
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(k) = overrides.k_chunk {
            self.retrieval.k_chunk = k;
        }
        if let Some(size) = overrides.size_chunk {
            self.chunking.size_chunk = size;
        }
        if let Some(model) = &overrides.model_embedding {
            self.embedding.model = model.clone();
        }
        if let Some(port) = overrides.port {
            let host = self
                .server
                .bind
                .rsplit_once(':')
                .map(|(h, _)| h.to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            self.server.bind = format!("{}:{}", host, port);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(RagError::InvalidConfig(msg).into()) };

        if self.chunking.size_chunk == 0 {
            return invalid("chunking.size_chunk must be > 0".to_string());
        }
        if self.chunking.overlap >= self.chunking.size_chunk {
            return invalid(format!(
                "chunking.overlap ({}) must be smaller than size_chunk ({})",
                self.chunking.overlap, self.chunking.size_chunk
            ));
        }
        if self.retrieval.k_chunk == 0 {
            return invalid("retrieval.k_chunk must be >= 1".to_string());
        }
        if self.retrieval.fetch_k < self.retrieval.k_chunk {
            return invalid(format!(
                "retrieval.fetch_k ({}) must be >= k_chunk ({})",
                self.retrieval.fetch_k, self.retrieval.k_chunk
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.diversity_weight) {
            return invalid("retrieval.diversity_weight must be in [0.0, 1.0]".to_string());
        }
        if self.embedding.model.trim().is_empty() {
            return invalid("embedding.model must not be empty".to_string());
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be >= 1".to_string());
        }
        match self.embedding.provider.as_str() {
            "ollama" | "openai" | "local" => {}
            other => {
                return invalid(format!(
                    "unknown embedding provider '{}'. Must be ollama, openai, or local.",
                    other
                ))
            }
        }
        match self.llm.provider.as_str() {
            "ollama" | "openai" => {}
            other => {
                return invalid(format!(
                    "unknown llm provider '{}'. Must be ollama or openai.",
                    other
                ))
            }
        }
        if self.llm.timeout_secs == 0 {
            return invalid("llm.timeout_secs must be > 0".to_string());
        }
        if self.session.max_history_turns == 0 {
            return invalid("session.max_history_turns must be >= 1".to_string());
        }
        if self.session.max_sessions == 0 {
            return invalid("session.max_sessions must be >= 1".to_string());
        }
        if self.prompt.template_path.is_none() {
            match self.prompt.preset.as_str() {
                "creative" | "qa" => {}
                other => {
                    return invalid(format!(
                        "unknown prompt preset '{}'. Must be creative or qa.",
                        other
                    ))
                }
            }
        }
        Ok(())
    }
}

/// Parse a TOML config file without applying overrides or validation.
pub fn parse_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load the full configuration: file (if present), environment, then CLI flags.
pub fn load_config(path: &Path, overrides: &Overrides) -> Result<Config> {
    let mut config = if path.exists() {
        parse_config_file(path)?
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.apply_overrides(overrides);
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.retrieval.k_chunk, 4);
        assert_eq!(cfg.chunking.size_chunk, 2000);
        assert_eq!(cfg.retrieval.fetch_k, 50);
        assert!((cfg.retrieval.diversity_weight - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.session.max_history_turns, 6);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[chunking]
size_chunk = 800
overlap = 100

[embedding]
model = "nomic-embed-text"
"#,
        )
        .unwrap();
        assert_eq!(cfg.chunking.size_chunk, 800);
        assert_eq!(cfg.embedding.model, "nomic-embed-text");
        assert_eq!(cfg.embedding.provider, "ollama");
        assert_eq!(cfg.retrieval.k_chunk, 4);
        cfg.validate().unwrap();
    }

    #[test]
    fn example_file_matches_defaults() {
        let cfg: Config =
            toml::from_str(include_str!("../config/quest-rag.example.toml")).unwrap();
        cfg.validate().unwrap();
        let defaults = Config::default();
        assert_eq!(cfg.corpus.include_globs, defaults.corpus.include_globs);
        assert_eq!(cfg.chunking.overlap, defaults.chunking.overlap);
        assert_eq!(cfg.embedding.batch_size, defaults.embedding.batch_size);
        assert_eq!(cfg.llm.model, defaults.llm.model);
        assert_eq!(cfg.session.max_sessions, defaults.session.max_sessions);
        assert_eq!(cfg.audit.log_dir, defaults.audit.log_dir);
        assert_eq!(cfg.server.bind, defaults.server.bind);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("K_CHUNK", "7"),
            ("SIZE_CHUNK", "1500"),
            ("MODEL_EMBEDDING", "mxbai-embed-large"),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.retrieval.k_chunk, 7);
        assert_eq!(cfg.chunking.size_chunk, 1500);
        assert_eq!(cfg.embedding.model, "mxbai-embed-large");
    }

    #[test]
    fn env_rejects_non_numeric() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(|k| (k == "K_CHUNK").then(|| "four".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("K_CHUNK"));
    }

    #[test]
    fn cli_overrides_win() {
        let mut cfg = Config::default();
        cfg.apply_overrides(&Overrides {
            k_chunk: Some(2),
            size_chunk: Some(3000),
            model_embedding: Some("bge-large".to_string()),
            port: Some(9001),
        });
        assert_eq!(cfg.retrieval.k_chunk, 2);
        assert_eq!(cfg.chunking.size_chunk, 3000);
        assert_eq!(cfg.embedding.model, "bge-large");
        assert_eq!(cfg.server.bind, "127.0.0.1:9001");
    }

    #[test]
    fn rejects_overlap_not_below_size() {
        let mut cfg = Config::default();
        cfg.chunking.size_chunk = 100;
        cfg.chunking.overlap = 100;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_fetch_k_below_k() {
        let mut cfg = Config::default();
        cfg.retrieval.k_chunk = 10;
        cfg.retrieval.fetch_k = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_preset() {
        let mut cfg = Config::default();
        cfg.prompt.preset = "poetry".to_string();
        assert!(cfg.validate().is_err());
    }
}
