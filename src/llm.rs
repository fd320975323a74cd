//! Language-model capability and its providers.
//!
//! Everything above this module sees [`LanguageModel`]: a model name plus a
//! single `complete(prompt)` call that returns the generated text.
//!
//! - **[`OllamaLlm`]**: `POST /api/generate` with `stream: false` (default).
//! - **[`OpenAiLlm`]**: `POST /v1/chat/completions`, the rendered prompt sent
//!   as one user message. Needs `OPENAI_API_KEY`.
//!
//! Transient failures (HTTP 429, 5xx, connection errors) are retried by
//! the shared `http` module. The answer deadline is enforced by the caller.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::RagError;
use crate::http::post_json_with_retry;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Opaque prompt → text capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate a completion for a fully rendered prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Create the model named by `config.provider` (`ollama` or `openai`).
pub fn create_llm(config: &LlmConfig) -> Result<Box<dyn LanguageModel>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaLlm::new(config)?)),
        "openai" => Ok(Box::new(OpenAiLlm::new(config)?)),
        other => Err(RagError::InvalidConfig(format!("unknown llm provider: {}", other)).into()),
    }
}

/// Ollama text generation.
pub struct OllamaLlm {
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        // The answer deadline lives in the orchestrator; the client only
        // guards against connections that never complete.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaLlm {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let url = format!("{}/api/generate", self.url.trim_end_matches('/'));
        let json = post_json_with_retry(
            &self.client,
            &url,
            None,
            &body,
            self.max_retries,
            "Ollama",
            RagError::Generation,
        )
        .await?;
        parse_ollama_generate(&json)
    }
}

fn parse_ollama_generate(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            RagError::Generation("invalid Ollama response: missing 'response'".to_string()).into()
        })
}

/// OpenAI chat completion.
pub struct OpenAiLlm {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::InvalidConfig("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            url: config.url.clone().unwrap_or_else(|| OPENAI_CHAT_URL.to_string()),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiLlm {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let json = post_json_with_retry(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
            RagError::Generation,
        )
        .await?;
        parse_openai_chat(&json)
    }
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            RagError::Generation("invalid OpenAI response: missing message content".to_string())
                .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_generate_parses() {
        let json = serde_json::json!({ "model": "llama3.1:8b", "response": "Bonjour", "done": true });
        assert_eq!(parse_ollama_generate(&json).unwrap(), "Bonjour");
    }

    #[test]
    fn ollama_error_payload_is_generation_error() {
        let err = parse_ollama_generate(&serde_json::json!({ "error": "model not found" }))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::Generation(_))
        ));
    }

    #[test]
    fn openai_chat_parses() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "A quest!" } }]
        });
        assert_eq!(parse_openai_chat(&json).unwrap(), "A quest!");
    }

    #[test]
    fn unknown_provider_rejected() {
        let config = LlmConfig {
            provider: "bard".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_llm(&config).is_err());
    }
}
