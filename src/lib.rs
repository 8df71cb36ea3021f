//! ChatPye - chat with YouTube videos
//!
//! Ingests video transcripts into a searchable store and answers questions about them
//! with an LLM, grounded in the most relevant transcript chunks when a transcript exists
//! and directly from the video when it does not.
//!
//! # Architecture
//!
//! - `config` - Settings and prompt templates
//! - `transcript` - Video metadata and caption sources
//! - `chunking` - Greedy transcript chunking
//! - `embedding` - Embedding generation
//! - `store` - Job, chunk, and response stores
//! - `ingest` - Ingestion pipeline and job queue
//! - `llm` - LLM providers and model routing
//! - `rag` - Ranking, response cache, and query pipeline
//! - `orchestrator` - Wiring from settings
//!
//! # Example
//!
//! ```rust,no_run
//! use chatpye::config::Settings;
//! use chatpye::orchestrator::Orchestrator;
//! use chatpye::rag::ChatQuery;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = Orchestrator::new(Settings::load()?)?;
//!
//!     let job = orchestrator.ingestion().process("dQw4w9WgXcQ", "me").await?;
//!     let answer = orchestrator
//!         .query()
//!         .ask(&ChatQuery::for_job(&job.job_id, "What is this video about?"))
//!         .await?;
//!     println!("{}", answer.answer);
//!
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod openai;
pub mod orchestrator;
pub mod rag;
pub mod store;
pub mod transcript;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ChatPyeError, Result};
