//! Memoized answers keyed by job, normalized question, and model.
//!
//! Caching is an optimization: store failures are logged and treated as misses.

use crate::store::{CacheKey, CachedResponse, ResponseStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Normalize a question for cache lookup.
///
/// Lower-cases, trims, and collapses whitespace runs into single spaces.
pub fn normalize_question(question: &str) -> String {
    question
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Response cache over a [`ResponseStore`].
#[derive(Clone)]
pub struct AnswerCache {
    store: Arc<dyn ResponseStore>,
}

impl AnswerCache {
    pub fn new(store: Arc<dyn ResponseStore>) -> Self {
        Self { store }
    }

    /// Cached answer for this identity, if any.
    pub async fn lookup(&self, job_id: &str, key: &CacheKey, model: &str) -> Option<CachedResponse> {
        match self.store.find_cached_response(job_id, key, model).await {
            Ok(Some(hit)) => {
                debug!("Cache hit for job {} ({}, {})", job_id, key.kind(), model);
                Some(hit)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache lookup failed for job {}: {}", job_id, e);
                None
            }
        }
    }

    /// Store an answer. Last write wins.
    pub async fn store(&self, job_id: &str, key: &CacheKey, model: &str, text: &str) -> Option<CachedResponse> {
        match self.store.upsert_cached_response(job_id, key, model, text).await {
            Ok(saved) => Some(saved),
            Err(e) => {
                warn!("Failed to cache response for job {}: {}", job_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_normalize_question() {
        assert_eq!(normalize_question("What IS this?"), normalize_question("what is this?"));
        assert_eq!(normalize_question("  What   is\tthis?\n"), "what is this?");
        assert_eq!(normalize_question(""), "");
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let cache = AnswerCache::new(Arc::new(MemoryStore::new()));
        let key = CacheKey::Question(normalize_question("What IS this?"));

        assert!(cache.lookup("job", &key, "gpt-4o-mini").await.is_none());

        cache.store("job", &key, "gpt-4o-mini", "v").await.unwrap();
        cache.store("job", &key, "gpt-4o-mini", "v").await.unwrap();
        let hit = cache.lookup("job", &key, "gpt-4o-mini").await.unwrap();
        assert_eq!(hit.response_text, "v");

        cache.store("job", &key, "gpt-4o-mini", "v2").await.unwrap();
        let other = CacheKey::Question(normalize_question("what is   this?"));
        let hit = cache.lookup("job", &other, "gpt-4o-mini").await.unwrap();
        assert_eq!(hit.response_text, "v2");
    }
}
