//! # Quest RAG
//!
//! Retrieval-augmented generation over a corpus of quests and lore: CSV
//! rows, text files and PDF pages are chunked, embedded and cached as an
//! index per `(embedding model, chunk size)`. Prompts are answered by
//! retrieving a diversified set of chunks, filling an instruction template
//! together with the session's recent history, and calling a language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunker │──▶│  IndexStore  │   (cold build only)
//! │ CSV/TXT/ │   └─────────┘   │ SQLite cache │
//! │   PDF    │                 └──────┬───────┘
//! └──────────┘                        ▼
//!                              ┌──────────────┐
//!                              │  Retriever   │
//!                              │ MMR, reversed│
//!                              └──────┬───────┘
//!                                     ▼
//!   SessionStore ────────┐     ┌──────────────┐
//!   PromptTemplate ──────┼────▶│ Orchestrator │──▶ HTTP / CLI / audit log
//!   LanguageModel ───────┘     └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env and CLI overrides |
//! | [`error`] | Error kinds shared across the pipeline |
//! | [`models`] | Core data types |
//! | [`extract`] | Text decoding, CSV rows and PDF pages |
//! | [`loader`] | Corpus discovery and document loading |
//! | [`chunk`] | Recursive boundary-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Language-model provider abstraction |
//! | `http` | JSON POST with retry, shared by the providers |
//! | [`index`] | Persistent, validated index cache |
//! | [`retriever`] | MMR retrieval, most salient chunk last |
//! | [`session`] | Bounded per-session history |
//! | [`prompt`] | Instruction templates and presets |
//! | [`orchestrator`] | Answering a prompt end to end |
//! | [`audit`] | One log file per answered request |
//! | [`progress`] | Index build progress on stderr |
//! | [`pipeline`] | Startup wiring |
//! | [`server`] | HTTP API |

pub mod audit;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
mod http;
pub mod index;
pub mod llm;
pub mod loader;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod retriever;
pub mod server;
pub mod session;
