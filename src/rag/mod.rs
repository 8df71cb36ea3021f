//! Retrieval-augmented question answering.
//!
//! Ranks a job's transcript chunks against a question, answers through an LLM provider,
//! and memoizes answers per job, question, and model.

mod cache;
mod query;
mod ranker;

pub use cache::{normalize_question, AnswerCache};
pub use query::{
    Answer, AnswerMeta, AnswerMode, AnswerStream, ChatQuery, ChatReply, QueryPipeline,
    SUMMARY_ANALYSIS,
};
pub use ranker::{cosine_similarity, rank_by_embedding, RelevanceRanker, ScoredChunk, DEFAULT_TOP_K};
