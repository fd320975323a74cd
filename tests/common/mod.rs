//! Deterministic capabilities and fixtures shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use quest_rag::config::Config;
use quest_rag::embedding::EmbeddingProvider;
use quest_rag::llm::LanguageModel;

const DIMS: usize = 256;

/// Character-trigram hashing embedder: texts sharing substrings end up
/// close, identical texts get identical vectors.
#[derive(Default)]
pub struct TrigramEmbedder {
    calls: AtomicUsize,
}

impl TrigramEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub fn trigram_vector(text: &str) -> Vec<f32> {
    let padded: Vec<char> = format!(" {} ", text.to_lowercase()).chars().collect();
    let mut v = vec![0.0f32; DIMS];
    for w in padded.windows(3) {
        let gram: String = w.iter().collect();
        v[(fnv1a(&gram) % DIMS as u64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for TrigramEmbedder {
    fn model_name(&self) -> &str {
        "trigram-test"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| trigram_vector(t)).collect())
    }
}

/// Records every prompt it receives and answers with a numbered reply.
#[derive(Default)]
pub struct RecordingLlm {
    prompts: parking_lot::Mutex<Vec<String>>,
}

impl RecordingLlm {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for RecordingLlm {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut prompts = self.prompts.lock();
        prompts.push(prompt.to_string());
        Ok(format!("Quest #{}: escort the caravan", prompts.len()))
    }
}

/// Always fails like an unreachable model server.
pub struct FailingLlm;

#[async_trait]
impl LanguageModel for FailingLlm {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        anyhow::bail!("connection refused")
    }
}

/// Never answers within any reasonable deadline.
pub struct SlowLlm;

#[async_trait]
impl LanguageModel for SlowLlm {
    fn model_name(&self) -> &str {
        "slow"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".to_string())
    }
}

/// Three quest rows, the first and last identical.
pub fn write_quest_csv(data_dir: &Path) {
    std::fs::create_dir_all(data_dir).unwrap();
    std::fs::write(
        data_dir.join("quests.csv"),
        "quest\nheal the village elder\nfind the lost sword\nheal the village elder\n",
    )
    .unwrap();
}

/// Config rooted in `root`: corpus in `DATA`, cache in `CACHE`, logs in `LOGS`.
pub fn test_config(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.corpus.data_dir = root.join("DATA");
    cfg.cache.root = root.join("CACHE");
    cfg.audit.log_dir = root.join("LOGS");
    cfg.retrieval.k_chunk = 2;
    cfg.llm.timeout_secs = 5;
    cfg
}
