//! Embedding-based relevance ranking of transcript chunks.

use crate::embedding::Embedder;
use crate::error::Result;
use crate::store::TranscriptChunk;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Default number of chunks handed to the model.
pub const DEFAULT_TOP_K: usize = 3;

/// A chunk with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: TranscriptChunk,
    pub score: f32,
}

/// Cosine similarity of two vectors.
///
/// Returns `None` for mismatched dimensions or a zero-length vector, so such chunks
/// are never selected.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let score = dot_product / (norm_a * norm_b);
    (!score.is_nan()).then_some(score)
}

/// Rank chunks against an already-computed query embedding.
///
/// Chunks without an embedding are skipped. The result is sorted by descending score
/// and holds at most `top_k` entries.
pub fn rank_by_embedding(
    query_embedding: &[f32],
    chunks: &[TranscriptChunk],
    top_k: usize,
    min_score: Option<f32>,
) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = chunks
        .iter()
        .filter(|c| c.has_embedding())
        .filter_map(|c| {
            let score = cosine_similarity(query_embedding, &c.embedding);
            if score.is_none() {
                warn!(
                    "Skipping chunk {}/{}: embedding has {} dimensions, query has {}",
                    c.job_id,
                    c.chunk_id,
                    c.embedding.len(),
                    query_embedding.len()
                );
            }
            score.map(|score| ScoredChunk {
                chunk: c.clone(),
                score,
            })
        })
        .filter(|s| min_score.map_or(true, |min| s.score >= min))
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}

/// Ranks a job's chunks against a natural-language query.
#[derive(Clone)]
pub struct RelevanceRanker {
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    min_score: Option<f32>,
}

impl RelevanceRanker {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            top_k: DEFAULT_TOP_K,
            min_score: None,
        }
    }

    /// Set the maximum number of chunks returned.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the minimum similarity score.
    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Return the `top_k` chunks most similar to `query`.
    ///
    /// Never fails for lack of data: with no embedded chunks the result is empty and the
    /// query is not embedded at all.
    #[instrument(skip(self, chunks), fields(candidates = chunks.len()))]
    pub async fn rank(&self, query: &str, chunks: &[TranscriptChunk]) -> Result<Vec<ScoredChunk>> {
        if self.top_k == 0 || !chunks.iter().any(|c| c.has_embedding()) {
            debug!("No embedded chunks to rank");
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;
        let ranked = rank_by_embedding(&query_embedding, chunks, self.top_k, self.min_score);

        debug!("Selected {} chunks", ranked.len());
        Ok(ranked)
    }
}
