//! Query path: embed, retrieve, optionally rerank, fuse, filter, order.
//!
//! Every query moves through the same stages:
//!
//! ```text
//! received → preprocessed → embedded → retrieved → [reranked] → response
//!                              ↓            ↓
//!                   embedding-unavailable   vector-store-unreachable
//!                                           collection-not-found
//! ```
//!
//! A failed stage never raises: the response comes back empty with
//! [`SearchResponse::failure`] set to the failure code and the timings of the
//! stages that did run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingService, MIN_TEXT_CHARS};
use crate::error::RetrievalError;
use crate::models::{SearchResponse, SearchResult};
use crate::rerank::{similarity_from_distance, Reranker, ScoredCandidate};
use crate::store::{filter_eq, StoreHit, VectorStore};
use crate::text::{normalize_whitespace, truncate_chars};

/// Result count used by [`SearchService::get_context_for_query`].
pub const CONTEXT_TOP_K: usize = 5;

/// Per-query knobs. `Default` is a reranked search with the configured
/// result count.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: Option<usize>,
    pub rerank: bool,
    pub topic: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: None,
            rerank: true,
            topic: None,
        }
    }
}

pub struct SearchService {
    embeddings: Arc<EmbeddingService>,
    store: Arc<dyn VectorStore>,
    reranker: Arc<Reranker>,
    settings: RetrievalConfig,
    timeout: Duration,
}

fn to_result(hit: StoreHit, dense_score: f64, rerank_score: Option<f64>, combined_score: f64) -> SearchResult {
    SearchResult {
        source: hit.meta_str("source").unwrap_or_default().to_string(),
        filename: hit.meta_str("filename").unwrap_or_default().to_string(),
        topic: hit.meta_str("topic").unwrap_or_default().to_string(),
        chunk_index: hit.meta_usize("chunk_index").unwrap_or(0),
        total_chunks: hit.meta_usize("total_chunks").unwrap_or(1),
        id: hit.id,
        content: hit.document,
        dense_score,
        rerank_score,
        combined_score,
    }
}

fn ms_since(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

impl SearchService {
    pub fn new(
        embeddings: Arc<EmbeddingService>,
        store: Arc<dyn VectorStore>,
        reranker: Arc<Reranker>,
        settings: RetrievalConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            embeddings,
            store,
            reranker,
            settings,
            timeout,
        }
    }

    /// Collapse whitespace and cap the length. Returns `None` when what is
    /// left is too short to search for.
    pub fn preprocess(&self, query: &str) -> Option<String> {
        let normalized = normalize_whitespace(query);
        let capped = truncate_chars(&normalized, self.settings.max_query_chars);
        (capped.chars().count() >= MIN_TEXT_CHARS).then(|| capped.to_string())
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> SearchResponse {
        let started = Instant::now();
        let Some(query) = self.preprocess(query) else {
            return SearchResponse::empty(normalize_whitespace(query));
        };
        let top_k = options.top_k.unwrap_or(self.settings.rerank_top_k).max(1);
        let mut response = SearchResponse::empty(query.clone());

        let embed_started = Instant::now();
        let embedding = self.embeddings.generate(&query).await;
        response.timings.embedding_ms = ms_since(embed_started);
        let vector = match embedding {
            Ok(outcome) => outcome.vector,
            Err(e) => return self.fail(response, e, started),
        };

        let n_results = if options.rerank {
            self.settings.retrieval_top_k.max(top_k)
        } else {
            top_k
        };
        let filter = options.topic.as_deref().map(|t| filter_eq("topic", t));

        let retrieve_started = Instant::now();
        let retrieved = tokio::time::timeout(
            self.timeout,
            self.store.query(&vector, n_results, filter.as_ref()),
        )
        .await
        .unwrap_or_else(|_| {
            Err(RetrievalError::StoreUnavailable(format!(
                "query timed out after {}ms",
                self.timeout.as_millis()
            )))
        });
        response.timings.retrieval_ms = ms_since(retrieve_started);
        let hits = match retrieved {
            Ok(hits) => hits,
            Err(e) => return self.fail(response, e, started),
        };
        response.total_found = hits.len();

        if options.rerank && hits.len() > top_k {
            let rerank_started = Instant::now();
            let (scored, _stats) = self.reranker.rerank(&query, hits, top_k).await;
            response.timings.rerank_ms = ms_since(rerank_started);
            response.reranked = true;
            response.results = scored
                .into_iter()
                .map(|ScoredCandidate { hit, dense_score, rerank_score, combined_score }| {
                    to_result(hit, dense_score, Some(rerank_score), combined_score)
                })
                .collect();
        } else {
            let mut results: Vec<SearchResult> = hits
                .into_iter()
                .map(|hit| {
                    let dense = similarity_from_distance(hit.distance);
                    to_result(hit, dense, None, dense)
                })
                .filter(|r| r.combined_score >= self.settings.min_relevance_score)
                .collect();
            results.sort_by(|a, b| {
                b.combined_score
                    .partial_cmp(&a.combined_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            results.truncate(top_k);
            response.results = results;
        }

        response.timings.total_ms = ms_since(started);
        tracing::info!(
            query = %truncate_chars(&query, 80),
            found = response.total_found,
            returned = response.results.len(),
            reranked = response.reranked,
            total_ms = response.timings.total_ms,
            "search complete"
        );
        response
    }

    fn fail(&self, mut response: SearchResponse, error: RetrievalError, started: Instant) -> SearchResponse {
        tracing::warn!(code = error.code(), error = %error, "search failed");
        response.failure = Some(error.code().to_string());
        response.timings.total_ms = ms_since(started);
        response
    }

    /// Reranked top-5 passages rendered as one text block of at most
    /// `max_chars` characters. Entries are never cut; `None` when nothing
    /// passes the relevance threshold.
    pub async fn get_context_for_query(&self, query: &str, max_chars: usize) -> Option<String> {
        let options = SearchOptions {
            top_k: Some(CONTEXT_TOP_K),
            ..Default::default()
        };
        let response = self.search(query, &options).await;

        let mut context = String::new();
        let mut used = 0;
        for result in response
            .results
            .iter()
            .filter(|r| r.combined_score >= self.settings.min_relevance_score)
        {
            let entry = result.format_entry();
            let separator = if context.is_empty() { 0 } else { 2 };
            let entry_chars = entry.chars().count();
            if used + separator + entry_chars > max_chars {
                break;
            }
            if separator > 0 {
                context.push_str("\n\n");
            }
            context.push_str(&entry);
            used += separator + entry_chars;
        }

        (!context.is_empty()).then_some(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EmbeddingConfig};
    use crate::embedding::EmbeddingProvider;
    use crate::error::RetrievalResult;
    use crate::store::memory::InMemoryStore;
    use crate::store::VectorRecord;
    use async_trait::async_trait;
    use serde_json::{Map, Value};

    /// Maps known words onto axes so distances are predictable.
    struct AxisProvider {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        fn model_name(&self) -> &str {
            "axis"
        }

        async fn embed(&self, prompt: &str) -> RetrievalResult<Vec<f32>> {
            if self.fail {
                return Err(RetrievalError::ProviderUnavailable("down".into()));
            }
            let p = prompt.to_lowercase();
            Ok(vec![
                if p.contains("docker") { 1.0 } else { 0.0 },
                if p.contains("traefik") { 1.0 } else { 0.0 },
                0.1,
            ])
        }
    }

    fn record(id: &str, topic: &str, embedding: Vec<f32>) -> VectorRecord {
        let mut metadata = Map::new();
        metadata.insert("source".into(), Value::from(format!("docs/{id}.md")));
        metadata.insert("filename".into(), Value::from(format!("{id}.md")));
        metadata.insert("topic".into(), Value::from(topic));
        metadata.insert("chunk_index".into(), Value::from(0));
        metadata.insert("total_chunks".into(), Value::from(1));
        VectorRecord {
            id: id.to_string(),
            document: format!("Passage about {id}."),
            embedding,
            metadata,
        }
    }

    async fn service(fail: bool, min_score: f64) -> SearchService {
        let config = Config::default();
        let embeddings = Arc::new(EmbeddingService::new(
            Arc::new(AxisProvider { fail }),
            &EmbeddingConfig { dims: 3, ..Default::default() },
            Duration::from_secs(1),
        ));
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert(&[
                record("docker", "deployment", vec![1.0, 0.0, 0.1]),
                record("traefik", "guide", vec![0.0, 1.0, 0.1]),
                record("mixed", "guide", vec![0.7, 0.7, 0.1]),
            ])
            .await
            .unwrap();
        let reranker = Arc::new(Reranker::new(None, 512, min_score, Duration::from_secs(1)));
        let settings = RetrievalConfig {
            min_relevance_score: min_score,
            ..config.retrieval
        };
        SearchService::new(embeddings, store, reranker, settings, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_short_query_is_empty_without_failure() {
        let svc = service(false, 0.0).await;
        let response = svc.search("  a ", &SearchOptions::default()).await;
        assert!(response.is_empty());
        assert_eq!(response.failure, None);
        assert_eq!(response.total_found, 0);
    }

    #[tokio::test]
    async fn test_dense_only_orders_by_similarity() {
        let svc = service(false, 0.0).await;
        let options = SearchOptions {
            top_k: Some(3),
            rerank: false,
            topic: None,
        };
        let response = svc.search("docker compose setup", &options).await;
        assert!(!response.reranked);
        assert_eq!(response.results[0].filename, "docker.md");
        assert!(response.results.iter().all(|r| r.rerank_score.is_none()));
        assert!(response
            .results
            .windows(2)
            .all(|w| w[0].combined_score >= w[1].combined_score));
    }

    #[tokio::test]
    async fn test_reranked_when_candidates_exceed_top_k() {
        let svc = service(false, 0.0).await;
        let options = SearchOptions {
            top_k: Some(1),
            rerank: true,
            topic: None,
        };
        let response = svc.search("traefik routing", &options).await;
        assert!(response.reranked);
        assert_eq!(response.total_found, 3);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].filename, "traefik.md");
        assert!(response.results[0].rerank_score.is_some());
    }

    #[tokio::test]
    async fn test_topic_filter() {
        let svc = service(false, 0.0).await;
        let options = SearchOptions {
            top_k: Some(5),
            rerank: false,
            topic: Some("guide".into()),
        };
        let response = svc.search("docker deploy", &options).await;
        assert_eq!(response.total_found, 2);
        assert!(response.results.iter().all(|r| r.topic == "guide"));
    }

    #[tokio::test]
    async fn test_min_relevance_applies_to_dense_results() {
        let svc = service(false, 0.9).await;
        let options = SearchOptions {
            top_k: Some(5),
            rerank: false,
            topic: None,
        };
        let response = svc.search("docker only", &options).await;
        assert_eq!(response.total_found, 3);
        assert!(response.results.iter().all(|r| r.combined_score >= 0.9));
        assert_eq!(response.results.len(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_marked() {
        let svc = service(true, 0.0).await;
        let response = svc.search("docker compose", &SearchOptions::default()).await;
        assert!(response.is_empty());
        assert_eq!(response.failure.as_deref(), Some("embedding-unavailable"));
    }

    #[tokio::test]
    async fn test_context_respects_budget_without_cutting() {
        let svc = service(false, 0.0).await;
        let full = svc.get_context_for_query("docker and traefik", 10_000).await.unwrap();
        assert!(full.contains("[mixed.md]"));

        let first_entry_len = full.split("\n\n").next().unwrap().chars().count();
        let tight = svc
            .get_context_for_query("docker and traefik", first_entry_len)
            .await
            .unwrap();
        assert_eq!(tight.chars().count(), first_entry_len);

        assert!(svc.get_context_for_query("docker and traefik", 5).await.is_none());
    }
}
