//! Embedding generation with an LRU cache in front of the provider.
//!
//! [`EmbeddingService`] is the only way the rest of the crate turns text into
//! vectors. It owns:
//! - an [`EmbeddingProvider`] (normally [`OllamaProvider`]) and its HTTP client,
//! - a strict LRU [`cache::LruCache`] keyed by [`cache::cache_key`].
//!
//! # Failure semantics
//!
//! - Text shorter than 3 characters → [`RetrievalError::Usage`], no I/O.
//! - Provider error, timeout, or wrong dimensionality →
//!   [`RetrievalError::ProviderUnavailable`]. Nothing is retried here.
//!
//! # Cache key aliasing
//!
//! Only a bounded, whitespace-normalized prefix of the text is hashed, so two
//! long texts sharing that prefix share a cached vector. This bounds the
//! hashing cost for large documents.

pub mod cache;
pub mod provider;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::chunk::CHARS_PER_TOKEN;
use crate::config::EmbeddingConfig;
use crate::error::{RetrievalError, RetrievalResult};
use crate::text::truncate_chars;

pub use cache::CacheStats;
pub use provider::{EmbeddingProvider, OllamaProvider};

/// Inputs shorter than this are rejected as usage errors.
pub const MIN_TEXT_CHARS: usize = 3;

/// A generated (or cached) embedding.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbeddingOutcome {
    pub vector: Vec<f32>,
    pub cached: bool,
    pub elapsed_ms: u64,
}

pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Mutex<cache::LruCache>,
    dims: usize,
    max_input_chars: usize,
    key_chars: usize,
    timeout: Duration,
}

impl EmbeddingService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        config: &EmbeddingConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            cache: Mutex::new(cache::LruCache::new(config.cache_capacity)),
            dims: config.dims,
            max_input_chars: config.max_input_tokens * CHARS_PER_TOKEN,
            key_chars: config.cache_key_chars,
            timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn lock_cache(&self) -> MutexGuard<'_, cache::LruCache> {
        // A panic while holding the lock cannot leave the cache half-written
        // in a way that matters, so a poisoned lock is still usable.
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Embed one text, serving from the cache when possible.
    pub async fn generate(&self, text: &str) -> RetrievalResult<EmbeddingOutcome> {
        if text.trim().chars().count() < MIN_TEXT_CHARS {
            return Err(RetrievalError::Usage(format!(
                "text must be at least {} characters",
                MIN_TEXT_CHARS
            )));
        }

        let started = Instant::now();
        let key = cache::cache_key(text, self.key_chars);

        let cached = self.lock_cache().get(key);
        if let Some(vector) = cached {
            tracing::debug!(key, "embedding cache hit");
            return Ok(EmbeddingOutcome {
                vector,
                cached: true,
                elapsed_ms: 0,
            });
        }

        let prompt = truncate_chars(text, self.max_input_chars);
        let vector = match tokio::time::timeout(self.timeout, self.provider.embed(prompt)).await {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => {
                tracing::warn!(model = self.model_name(), error = %e, "embedding failed");
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(model = self.model_name(), timeout_ms = self.timeout.as_millis() as u64, "embedding timed out");
                return Err(RetrievalError::ProviderUnavailable(format!(
                    "embedding timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        if self.dims > 0 && vector.len() != self.dims {
            tracing::warn!(expected = self.dims, actual = vector.len(), "embedding dimension mismatch");
            return Err(RetrievalError::ProviderUnavailable(format!(
                "dimension mismatch: expected {}, got {}",
                self.dims,
                vector.len()
            )));
        }

        self.lock_cache().insert(key, vector.clone());

        Ok(EmbeddingOutcome {
            vector,
            cached: false,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Embed many texts concurrently.
    ///
    /// The output is positionally aligned with `texts`; one failure does not
    /// affect the others.
    pub async fn generate_batch(&self, texts: &[String]) -> Vec<RetrievalResult<EmbeddingOutcome>> {
        futures::future::join_all(texts.iter().map(|t| self.generate(t))).await
    }

    pub fn stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    /// Drop all cached vectors and reset the hit/miss counters.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
        tracing::info!("embedding cache cleared");
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a zero
/// vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic provider: vector derived from the prompt bytes.
    struct FakeProvider {
        calls: AtomicUsize,
        dims: usize,
        fail_on: Option<&'static str>,
        delay: Option<Duration>,
    }

    impl FakeProvider {
        fn new(dims: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                dims,
                fail_on: None,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn embed(&self, prompt: &str) -> RetrievalResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if self.fail_on.is_some_and(|f| prompt.contains(f)) {
                return Err(RetrievalError::ProviderUnavailable("HTTP 500".to_string()));
            }
            let seed = prompt.bytes().map(|b| b as f32).sum::<f32>();
            Ok((0..self.dims).map(|i| (seed + i as f32).sin()).collect())
        }
    }

    fn config(capacity: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            dims: 4,
            cache_capacity: capacity,
            ..Default::default()
        }
    }

    fn service(provider: Arc<FakeProvider>, capacity: usize) -> EmbeddingService {
        EmbeddingService::new(provider, &config(capacity), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_second_call_is_cached_and_identical() {
        let provider = Arc::new(FakeProvider::new(4));
        let svc = service(provider.clone(), 10);

        let first = svc.generate("configure traefik").await.unwrap();
        let second = svc.generate("configure traefik").await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.vector, second.vector);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let stats = svc.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_short_text_is_usage_error() {
        let provider = Arc::new(FakeProvider::new(4));
        let svc = service(provider.clone(), 10);
        let err = svc.generate("hi").await.unwrap_err();
        assert!(matches!(err, RetrievalError::Usage(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_unavailable() {
        let provider = Arc::new(FakeProvider::new(3));
        let svc = service(provider, 10);
        let err = svc.generate("some text").await.unwrap_err();
        assert!(matches!(err, RetrievalError::ProviderUnavailable(_)));
        assert_eq!(svc.stats().size, 0);
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let provider = Arc::new(FakeProvider {
            delay: Some(Duration::from_millis(200)),
            ..FakeProvider::new(4)
        });
        let svc = EmbeddingService::new(provider, &config(10), Duration::from_millis(20));
        let err = svc.generate("slow text").await.unwrap_err();
        assert_eq!(err.code(), "embedding-unavailable");
    }

    #[tokio::test]
    async fn test_batch_is_aligned_and_tolerates_failure() {
        let provider = Arc::new(FakeProvider {
            fail_on: Some("broken"),
            ..FakeProvider::new(4)
        });
        let svc = service(provider, 10);
        let texts = vec![
            "first text".to_string(),
            "broken text".to_string(),
            "third text".to_string(),
        ];
        let results = svc.generate_batch(&texts).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert_ne!(
            results[0].as_ref().unwrap().vector,
            results[2].as_ref().unwrap().vector
        );
    }

    #[tokio::test]
    async fn test_clear_cache_resets_everything() {
        let provider = Arc::new(FakeProvider::new(4));
        let svc = service(provider.clone(), 10);
        svc.generate("alpha text").await.unwrap();
        svc.generate("alpha text").await.unwrap();
        svc.clear_cache();
        assert_eq!(svc.stats(), CacheStats { capacity: 10, ..Default::default() });

        let again = svc.generate("alpha text").await.unwrap();
        assert!(!again.cached);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_capacity_bound_evicts() {
        let provider = Arc::new(FakeProvider::new(4));
        let svc = service(provider.clone(), 2);
        svc.generate("one one").await.unwrap();
        svc.generate("two two").await.unwrap();
        svc.generate("three three").await.unwrap();
        assert_eq!(svc.stats().size, 2);
        let again = svc.generate("one one").await.unwrap();
        assert!(!again.cached);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_degenerate() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
