//! Process-start wiring.
//!
//! [`Engine::build`] constructs every service exactly once from a validated
//! [`Config`] and keeps shared references to them. Nothing else in the
//! crate creates HTTP clients or reads configuration; the CLI and the HTTP
//! server both receive an `Engine`.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::context::ContextInjector;
use crate::embedding::{CacheStats, EmbeddingProvider, EmbeddingService, OllamaProvider};
use crate::indexer::Indexer;
use crate::rerank::Reranker;
use crate::search::SearchService;
use crate::store::chroma::ChromaStore;
use crate::store::memory::InMemoryStore;
use crate::store::VectorStore;
use crate::tracker::IndexTracker;

pub struct Engine {
    pub config: Arc<Config>,
    pub embeddings: Arc<EmbeddingService>,
    pub store: Arc<dyn VectorStore>,
    pub tracker: Arc<IndexTracker>,
    pub indexer: Arc<Indexer>,
    pub reranker: Arc<Reranker>,
    pub search: Arc<SearchService>,
    pub injector: Arc<ContextInjector>,
}

/// Snapshot reported by `crag stats` and `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub version: String,
    pub embedding_model: String,
    pub reranker_model: String,
    pub store_backend: String,
    pub collection: String,
    pub tracked_files: usize,
    pub tracked_chunks: usize,
    /// `None` when the store could not be reached.
    pub stored_chunks: Option<usize>,
    pub embedding_cache: CacheStats,
}

impl Engine {
    /// Build the production service graph: Ollama-protocol providers and the
    /// configured vector-store backend.
    pub fn build(config: Config) -> Result<Self> {
        let timeouts = &config.timeouts;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OllamaProvider::new(
            &config.embedding.url,
            &config.embedding.model,
            timeouts.embedding(),
        )?);

        let reranker: Option<Arc<dyn EmbeddingProvider>> = if config.reranker.is_enabled() {
            let url = config
                .reranker
                .url
                .as_deref()
                .unwrap_or(&config.embedding.url);
            Some(Arc::new(OllamaProvider::new(
                url,
                &config.reranker.model,
                timeouts.rerank(),
            )?))
        } else {
            None
        };

        let store: Arc<dyn VectorStore> = match config.vector_store.backend.as_str() {
            "chroma" => Arc::new(ChromaStore::new(
                &config.vector_store.url,
                &config.vector_store.collection,
                timeouts.index(),
            )?),
            "memory" => Arc::new(InMemoryStore::new()),
            other => bail!("Unknown vector store backend: {}", other),
        };

        Ok(Self::with_parts(config, embedder, reranker, store))
    }

    /// Wire the services around caller-supplied providers and store.
    pub fn with_parts(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<dyn EmbeddingProvider>>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let config = Arc::new(config);

        let embeddings = Arc::new(EmbeddingService::new(
            embedder,
            &config.embedding,
            config.timeouts.embedding(),
        ));
        // A tracker that outlives its store would report files unchanged
        // against an empty index.
        let tracker = if store.is_persistent() {
            Arc::new(IndexTracker::open(&config.indexing.tracker_path))
        } else {
            tracing::debug!(store = store.name(), "store is not persistent, tracker kept in memory");
            Arc::new(IndexTracker::in_memory())
        };
        let indexer = Arc::new(Indexer::new(
            Chunker::from_config(&config.chunking),
            embeddings.clone(),
            store.clone(),
            tracker.clone(),
            config.indexing.clone(),
        ));
        let reranker = Arc::new(Reranker::new(
            reranker,
            config.reranker.max_document_chars,
            config.retrieval.min_relevance_score,
            config.timeouts.rerank(),
        ));
        let search = Arc::new(SearchService::new(
            embeddings.clone(),
            store.clone(),
            reranker.clone(),
            config.retrieval.clone(),
            config.timeouts.search(),
        ));
        let injector = Arc::new(ContextInjector::new(search.clone(), config.context.clone()));

        tracing::debug!(
            embedding_model = embeddings.model_name(),
            reranker = reranker.model_name(),
            store = store.name(),
            "engine ready"
        );

        Self {
            config,
            embeddings,
            store,
            tracker,
            indexer,
            reranker,
            search,
            injector,
        }
    }

    pub async fn stats(&self) -> EngineStats {
        let stored_chunks = match self.store.count().await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(error = %e, "cannot count stored chunks");
                None
            }
        };
        EngineStats {
            version: env!("CARGO_PKG_VERSION").to_string(),
            embedding_model: self.embeddings.model_name().to_string(),
            reranker_model: self.reranker.model_name().to_string(),
            store_backend: self.store.name().to_string(),
            collection: self.config.vector_store.collection.clone(),
            tracked_files: self.tracker.len().await,
            tracked_chunks: self.tracker.total_chunks().await,
            stored_chunks,
            embedding_cache: self.embeddings.stats(),
        }
    }
}
