//! Answer orchestration: history + retrieval + template → language model.
//!
//! [`Orchestrator::answer`] is the single entry point used by the HTTP
//! layer and the CLI. A turn is recorded in the session only after the
//! model returned successfully, so failed or timed-out requests leave the
//! history untouched.
//!
//! One deadline covers the whole request: the query embedding, the index
//! search and the generation call all count against it.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audit::{AuditLog, AuditRecord};
use crate::error::{kind_of, RagError};
use crate::llm::LanguageModel;
use crate::models::{AnswerResponse, ChunkProvenance, RetrievedChunk, Timings};
use crate::prompt::PromptTemplate;
use crate::retriever::Retriever;
use crate::session::SessionStore;

/// Characters of each chunk kept in provenance excerpts.
const EXCERPT_CHARS: usize = 300;

pub struct Orchestrator {
    retriever: Retriever,
    llm: Arc<dyn LanguageModel>,
    template: PromptTemplate,
    sessions: Arc<SessionStore>,
    answer_timeout: Duration,
    audit: Option<AuditLog>,
}

impl Orchestrator {
    pub fn new(
        retriever: Retriever,
        llm: Arc<dyn LanguageModel>,
        template: PromptTemplate,
        sessions: Arc<SessionStore>,
        answer_timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            llm,
            template,
            sessions,
            answer_timeout,
            audit: None,
        }
    }

    /// Write one audit file per answered request into `audit`.
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `prompt` in the context of `session_id`.
    pub async fn answer(&self, prompt: &str, session_id: &str) -> Result<AnswerResponse> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.answer_timeout;

        let history = self.sessions.get_history(session_id);

        let retrieval_started = Instant::now();
        let retrieved = match tokio::time::timeout_at(deadline, self.retriever.retrieve(prompt)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(self.timed_out(session_id, "retrieval")),
        };
        let retrieval = retrieval_started.elapsed();

        let formatting_started = Instant::now();
        let context = build_context(&retrieved);
        let filled = self.template.render(&context, &history, prompt);
        let formatting = formatting_started.elapsed();

        let generation_started = Instant::now();
        let answer = match tokio::time::timeout_at(deadline, self.llm.complete(&filled)).await {
            Ok(result) => result.map_err(|e| {
                if kind_of(&e).is_some() {
                    e
                } else {
                    RagError::Generation(format!("{:#}", e)).into()
                }
            })?,
            Err(_) => return Err(self.timed_out(session_id, "generation")),
        };
        let generation = generation_started.elapsed();

        let history_depth = self.sessions.append_turn(session_id, prompt, &answer);

        let timings = Timings {
            total: started.elapsed(),
            retrieval,
            formatting,
            generation,
        };
        let sources: Vec<ChunkProvenance> = retrieved
            .iter()
            .map(|rc| ChunkProvenance::from_retrieved(rc, EXCERPT_CHARS))
            .collect();

        tracing::info!(
            session_id,
            history_depth,
            chunks = retrieved.len(),
            total_ms = timings.total.as_millis() as u64,
            retrieval_ms = timings.retrieval.as_millis() as u64,
            generation_ms = timings.generation.as_millis() as u64,
            "answered query"
        );

        if let Some(audit) = &self.audit {
            let index = self.retriever.index().header();
            let record = AuditRecord {
                at: chrono::Local::now(),
                session_id,
                prompt,
                answer: &answer,
                timings: &timings,
                embedding_model: &index.embedding_model,
                k_chunk: self.retriever.params().k,
                size_chunk: index.size_chunk,
                sources: &sources,
            };
            if let Err(e) = audit.write(&record) {
                tracing::warn!(error = %e, "failed to write audit log");
            }
        }

        Ok(AnswerResponse {
            answer,
            session_id: session_id.to_string(),
            history_depth,
            timings,
            sources,
        })
    }

    fn timed_out(&self, session_id: &str, stage: &str) -> anyhow::Error {
        tracing::warn!(
            session_id,
            stage,
            timeout_secs = self.answer_timeout.as_secs(),
            "answer deadline exceeded"
        );
        RagError::GenerationTimeout {
            secs: self.answer_timeout.as_secs(),
        }
        .into()
    }

    /// Drop a session's history. Returns whether it existed.
    pub fn reset(&self, session_id: &str) -> bool {
        let existed = self.sessions.reset(session_id);
        tracing::info!(session_id, existed, "session reset");
        existed
    }
}

/// Chunk texts in retrieval order, separated by a blank line.
pub fn build_context(retrieved: &[RetrievedChunk]) -> String {
    retrieved
        .iter()
        .map(|rc| rc.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
