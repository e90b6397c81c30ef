//! Second-pass relevance scoring and score fusion.
//!
//! With a reranker model configured, every (query, passage) pair is sent to
//! the provider concurrently and the returned vector is reduced to a score
//! in `[0, 1]`. Without one, the rerank score is the dense similarity itself,
//! which makes the fused ordering identical to dense ordering.
//!
//! # Fusion
//!
//! ```text
//! similarity = 1 / (1 + distance)
//! combined   = 0.6 × rerank + 0.4 × similarity
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::store::StoreHit;
use crate::text::truncate_chars;

pub const RERANK_WEIGHT: f64 = 0.6;
pub const DENSE_WEIGHT: f64 = 0.4;
/// Score given to a candidate whose rerank call failed.
pub const NEUTRAL_SCORE: f64 = 0.5;
/// Leading vector elements averaged into a rerank score.
pub const REDUCE_PREFIX: usize = 10;
/// Model label reported when reranking is disabled.
pub const SIMILARITY_ONLY: &str = "similarity-only";

/// Map a store distance (0 = identical) to a similarity in `(0, 1]`.
pub fn similarity_from_distance(distance: f32) -> f64 {
    1.0 / (1.0 + f64::from(distance.max(0.0)))
}

pub fn combined_score(rerank_score: f64, distance: f32) -> f64 {
    RERANK_WEIGHT * rerank_score + DENSE_WEIGHT * similarity_from_distance(distance)
}

/// Reduce a provider vector to a relevance score: mean magnitude of the
/// first [`REDUCE_PREFIX`] elements, clamped to `[0, 1]`.
pub fn reduce_vector(vector: &[f32]) -> f64 {
    let prefix = &vector[..vector.len().min(REDUCE_PREFIX)];
    if prefix.is_empty() {
        return NEUTRAL_SCORE;
    }
    let mean = prefix.iter().map(|v| f64::from(v.abs())).sum::<f64>() / prefix.len() as f64;
    mean.clamp(0.0, 1.0)
}

/// A store hit with all three scores attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub hit: StoreHit,
    pub dense_score: f64,
    pub rerank_score: f64,
    pub combined_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RerankStats {
    pub input_count: usize,
    pub output_count: usize,
    pub elapsed_ms: u64,
    pub model: String,
}

pub struct Reranker {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    max_document_chars: usize,
    min_relevance_score: f64,
    timeout: Duration,
}

impl Reranker {
    /// `provider = None` disables cross-encoder scoring.
    pub fn new(
        provider: Option<Arc<dyn EmbeddingProvider>>,
        max_document_chars: usize,
        min_relevance_score: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            max_document_chars,
            min_relevance_score,
            timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn model_name(&self) -> &str {
        self.provider
            .as_ref()
            .map_or(SIMILARITY_ONLY, |p| p.model_name())
    }

    async fn score_one(&self, provider: &dyn EmbeddingProvider, query: &str, document: &str) -> f64 {
        let prompt = format!(
            "Query: {}\nDocument: {}",
            query,
            truncate_chars(document, self.max_document_chars)
        );
        match tokio::time::timeout(self.timeout, provider.embed(&prompt)).await {
            Ok(Ok(vector)) => reduce_vector(&vector),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "rerank call failed, using neutral score");
                NEUTRAL_SCORE
            }
            Err(_) => {
                tracing::debug!("rerank call timed out, using neutral score");
                NEUTRAL_SCORE
            }
        }
    }

    /// Score, fuse, filter and order `candidates`, keeping at most `top_k`.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<StoreHit>,
        top_k: usize,
    ) -> (Vec<ScoredCandidate>, RerankStats) {
        let started = Instant::now();
        let input_count = candidates.len();

        let rerank_scores: Vec<f64> = match &self.provider {
            Some(provider) => {
                futures::future::join_all(
                    candidates
                        .iter()
                        .map(|c| self.score_one(provider.as_ref(), query, &c.document)),
                )
                .await
            }
            None => candidates
                .iter()
                .map(|c| similarity_from_distance(c.distance))
                .collect(),
        };

        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .zip(rerank_scores)
            .map(|(hit, rerank_score)| ScoredCandidate {
                dense_score: similarity_from_distance(hit.distance),
                combined_score: combined_score(rerank_score, hit.distance),
                rerank_score,
                hit,
            })
            .filter(|c| c.combined_score >= self.min_relevance_score)
            .collect();

        scored.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);

        let stats = RerankStats {
            input_count,
            output_count: scored.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            model: self.model_name().to_string(),
        };
        tracing::debug!(
            input = stats.input_count,
            output = stats.output_count,
            model = %stats.model,
            elapsed_ms = stats.elapsed_ms,
            "rerank complete"
        );
        (scored, stats)
    }
}
