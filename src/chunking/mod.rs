//! Splitting transcripts into bounded-size chunks with timing metadata.
//!
//! Chunking is greedy by character count: consecutive segments are folded into the
//! running chunk until the next one would push it over the limit. Segments are never
//! split, so a single oversized segment becomes its own chunk.

use crate::error::{ChatPyeError, Result};
use crate::store::TranscriptChunk;
use crate::transcript::TranscriptSegment;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default maximum chunk size in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1000;

/// A chunk of transcript text, before it is attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    /// Number of segments folded into this chunk.
    pub segment_count: u32,
}

impl ContentChunk {
    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}

/// Greedy character-bounded chunker.
#[derive(Debug, Clone, Copy)]
pub struct TranscriptChunker {
    max_chars: usize,
}

impl TranscriptChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Split ordered segments into chunks.
    ///
    /// Whitespace-only segments are skipped. Each chunk ends where its last segment
    /// ends, clamped to the start of the following chunk when caption timing overlaps.
    pub fn chunk(&self, segments: &[TranscriptSegment]) -> Vec<ContentChunk> {
        let mut chunks: Vec<ContentChunk> = Vec::new();
        let mut current: Option<ContentChunk> = None;
        let mut current_len = 0usize;

        for segment in segments {
            let text = segment.text.trim();
            if text.is_empty() {
                continue;
            }
            let len = text.chars().count();

            match current.as_mut() {
                Some(chunk) if current_len + 1 + len <= self.max_chars => {
                    chunk.text.push(' ');
                    chunk.text.push_str(text);
                    chunk.end_seconds = segment.end_seconds();
                    chunk.segment_count += 1;
                    current_len += len + 1;
                }
                _ => {
                    if let Some(done) = current.take() {
                        chunks.push(done);
                    }
                    current = Some(ContentChunk {
                        text: text.to_string(),
                        start_seconds: segment.start,
                        end_seconds: segment.end_seconds(),
                        segment_count: 1,
                    });
                    current_len = len;
                }
            }
        }

        if let Some(done) = current {
            chunks.push(done);
        }

        for i in 1..chunks.len() {
            let next_start = chunks[i].start_seconds;
            let prev = &mut chunks[i - 1];
            if prev.end_seconds > next_start {
                prev.end_seconds = next_start.max(prev.start_seconds);
            } else if prev.end_seconds < next_start {
                debug!(
                    "Gap of {:.2}s between chunks {} and {}",
                    next_start - prev.end_seconds,
                    i - 1,
                    i
                );
            }
        }

        chunks
    }
}

impl Default for TranscriptChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_CHARS)
    }
}

/// Check that stored chunks, sorted by start, never overlap.
pub fn validate_chunk_sequence(chunks: &[TranscriptChunk]) -> Result<()> {
    for pair in chunks.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.end_seconds > b.start_seconds {
            return Err(ChatPyeError::Integrity(format!(
                "Chunk {} ({:.2}s-{:.2}s) overlaps chunk {} starting at {:.2}s in job {}",
                a.chunk_id, a.start_seconds, a.end_seconds, b.chunk_id, b.start_seconds, a.job_id
            )));
        }
        if a.end_seconds < b.start_seconds {
            debug!(
                "Gap between chunks {} and {} in job {}",
                a.chunk_id, b.chunk_id, a.job_id
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str, start: f64, duration: f64) -> TranscriptSegment {
        TranscriptSegment::new(text, start, duration)
    }

    #[test]
    fn test_small_transcript_is_one_chunk() {
        let segments = vec![
            seg("Hello there.", 0.0, 2.0),
            seg("Welcome to the video.", 2.0, 3.0),
            seg("Let's begin.", 5.0, 1.5),
        ];

        let chunks = TranscriptChunker::default().chunk(&segments);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_seconds, 0.0);
        assert_eq!(chunks[0].end_seconds, 6.5);
        assert_eq!(chunks[0].segment_count, 3);
        assert_eq!(chunks[0].text, "Hello there. Welcome to the video. Let's begin.");
    }

    #[test]
    fn test_empty_transcript_yields_no_chunks() {
        assert!(TranscriptChunker::default().chunk(&[]).is_empty());
        assert!(TranscriptChunker::default().chunk(&[seg("   ", 0.0, 1.0)]).is_empty());
    }

    #[test]
    fn test_oversized_segment_is_not_split() {
        let long = "x".repeat(50);
        let segments = vec![seg("short", 0.0, 1.0), seg(&long, 1.0, 4.0), seg("tail", 5.0, 1.0)];

        let chunks = TranscriptChunker::new(10).chunk(&segments);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, long);
        assert_eq!(chunks[1].start_seconds, 1.0);
        assert_eq!(chunks[1].end_seconds, 5.0);
    }

    #[test]
    fn test_joining_space_counts_toward_limit() {
        let segments = vec![seg("abcd", 0.0, 1.0), seg("efgh", 1.0, 1.0)];

        let split = TranscriptChunker::new(8).chunk(&segments);
        assert_eq!(split.len(), 2);

        let joined = TranscriptChunker::new(9).chunk(&segments);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].text, "abcd efgh");
        assert_eq!(joined[0].text.chars().count(), 9);
    }

    #[test]
    fn test_chunks_reconstruct_transcript() {
        let words = [
            "the", "quick", "brown", "fox", "jumps", "over", "the", "lazy", "dog", "again",
            "and", "again", "until", "the", "end",
        ];
        let segments: Vec<_> = words
            .iter()
            .enumerate()
            .map(|(i, w)| seg(w, i as f64 * 2.0, 2.0))
            .collect();

        for max in [1, 5, 12, 30, 1000] {
            let chunks = TranscriptChunker::new(max).chunk(&segments);
            let rebuilt: Vec<&str> = chunks.iter().map(|c| c.text.trim()).collect();
            assert_eq!(rebuilt.join(" "), words.join(" "), "max_chars = {}", max);
            assert_eq!(
                chunks.iter().map(|c| c.segment_count).sum::<u32>(),
                words.len() as u32
            );
        }
    }

    #[test]
    fn test_chunks_never_overlap() {
        // Auto-generated captions frequently overlap their successor.
        let segments: Vec<_> = (0..40)
            .map(|i| seg(&format!("caption line {}", i), i as f64 * 3.0, 4.5))
            .collect();

        let chunks = TranscriptChunker::new(40).chunk(&segments);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[0].end_seconds <= pair[1].start_seconds);
            assert!(pair[0].start_seconds <= pair[0].end_seconds);
        }
        // The final chunk keeps its natural end.
        assert_eq!(chunks.last().unwrap().end_seconds, 39.0 * 3.0 + 4.5);
    }

    #[test]
    fn test_validate_chunk_sequence() {
        let chunker = TranscriptChunker::new(5);
        let content = chunker.chunk(&[seg("alpha", 0.0, 2.0), seg("beta", 3.0, 2.0)]);
        let mut stored: Vec<TranscriptChunk> = content
            .into_iter()
            .enumerate()
            .map(|(i, c)| TranscriptChunk {
                job_id: "job".to_string(),
                chunk_id: i as u32,
                text_content: c.text,
                start_seconds: c.start_seconds,
                end_seconds: c.end_seconds,
                segment_count: c.segment_count,
                embedding: Vec::new(),
                owner_id: "owner".to_string(),
                video_id: "video".to_string(),
                created_at: chrono::Utc::now(),
            })
            .collect();

        assert!(validate_chunk_sequence(&stored).is_ok());

        stored[0].end_seconds = 4.0;
        let err = validate_chunk_sequence(&stored).unwrap_err();
        assert!(matches!(err, ChatPyeError::Integrity(_)));
    }
}
