//! Configuration loading and validation.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment overrides. The result is validated once and shared as an
//! `Arc<Config>`; nothing mutates it afterwards.
//!
//! ```toml
//! [embedding]
//! url = "http://localhost:11434"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [reranker]
//! model = "none"
//!
//! [vector_store]
//! backend = "chroma"
//! url = "http://localhost:8000"
//! collection = "documentation"
//!
//! [chunking]
//! chunk_size_tokens = 512
//! overlap_percent = 15
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Provider context window; longer inputs are truncated before the call.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Length of the normalized prefix that is hashed into the cache key.
    #[serde(default = "default_cache_key_chars")]
    pub cache_key_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_provider_url(),
            model: default_embedding_model(),
            dims: default_dims(),
            max_input_tokens: default_max_input_tokens(),
            cache_capacity: default_cache_capacity(),
            cache_key_chars: default_cache_key_chars(),
        }
    }
}

fn default_provider_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_max_input_tokens() -> usize {
    8192
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_cache_key_chars() -> usize {
    500
}

/// Sentinel model id that disables cross-encoder reranking.
pub const RERANKER_DISABLED: &str = "none";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RerankerConfig {
    pub model: String,
    /// Defaults to the embedding provider URL when unset.
    pub url: Option<String>,
    pub max_document_chars: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            model: RERANKER_DISABLED.to_string(),
            url: None,
            max_document_chars: 512,
        }
    }
}

impl RerankerConfig {
    pub fn is_enabled(&self) -> bool {
        !self.model.is_empty() && self.model != RERANKER_DISABLED
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// `"chroma"` or `"memory"`.
    pub backend: String,
    pub url: String,
    pub collection: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: "chroma".to_string(),
            url: "http://localhost:8000".to_string(),
            collection: "documentation".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size_tokens: usize,
    pub overlap_percent: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: 512,
            overlap_percent: 15,
        }
    }
}

impl ChunkingConfig {
    pub fn overlap_tokens(&self) -> usize {
        self.chunk_size_tokens * self.overlap_percent / 100
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidate-set size fetched from the store when reranking.
    pub retrieval_top_k: usize,
    /// Final result count.
    pub rerank_top_k: usize,
    pub min_relevance_score: f64,
    pub max_query_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieval_top_k: 20,
            rerank_top_k: 5,
            min_relevance_score: 0.3,
            max_query_chars: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    pub enabled: bool,
    pub max_chars: usize,
    pub min_score: f64,
    pub min_query_chars: usize,
    pub top_k: usize,
    pub passage_display_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chars: 4000,
            min_score: 0.5,
            min_query_chars: 10,
            top_k: 3,
            passage_display_chars: 800,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexingConfig {
    pub tracker_path: PathBuf,
    pub min_content_chars: usize,
    pub concurrency: usize,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            tracker_path: PathBuf::from(".crag/index_tracker.json"),
            min_content_chars: 50,
            concurrency: 4,
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: Vec::new(),
        }
    }
}

/// Per-call time bounds, in milliseconds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    pub embedding_ms: u64,
    pub rerank_ms: u64,
    pub search_ms: u64,
    pub index_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_ms: 30_000,
            rerank_ms: 10_000,
            search_ms: 10_000,
            index_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }
    pub fn rerank(&self) -> Duration {
        Duration::from_millis(self.rerank_ms)
    }
    pub fn search(&self) -> Duration {
        Duration::from_millis(self.search_ms)
    }
    pub fn index(&self) -> Duration {
        Duration::from_millis(self.index_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7341".to_string(),
        }
    }
}

impl Config {
    /// Load configuration for the process.
    ///
    /// A missing file falls back to defaults; environment overrides are
    /// applied last, then the whole thing is validated.
    pub fn load(path: &Path) -> Result<Config> {
        let mut config = if path.exists() {
            parse_file(path)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RAG_*` / provider URL overrides from a key lookup.
    ///
    /// Takes a lookup function rather than reading the environment directly
    /// so tests can feed a fixed map.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OLLAMA_URL") {
            self.embedding.url = v;
        }
        if let Some(v) = lookup("CHROMA_URL") {
            self.vector_store.url = v;
        }
        if let Some(v) = lookup("RAG_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("RAG_EMBEDDING_DIMS") {
            self.embedding.dims = parse_var("RAG_EMBEDDING_DIMS", &v)?;
        }
        if let Some(v) = lookup("RAG_RERANKER_MODEL") {
            self.reranker.model = v;
        }
        if let Some(v) = lookup("RAG_COLLECTION") {
            self.vector_store.collection = v;
        }
        if let Some(v) = lookup("RAG_VECTOR_BACKEND") {
            self.vector_store.backend = v;
        }
        if let Some(v) = lookup("RAG_CHUNK_SIZE") {
            self.chunking.chunk_size_tokens = parse_var("RAG_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("RAG_CHUNK_OVERLAP_PERCENT") {
            self.chunking.overlap_percent = parse_var("RAG_CHUNK_OVERLAP_PERCENT", &v)?;
        }
        if let Some(v) = lookup("RAG_TOP_K") {
            self.retrieval.retrieval_top_k = parse_var("RAG_TOP_K", &v)?;
        }
        if let Some(v) = lookup("RAG_RERANK_TOP_K") {
            self.retrieval.rerank_top_k = parse_var("RAG_RERANK_TOP_K", &v)?;
        }
        if let Some(v) = lookup("RAG_MIN_SCORE") {
            self.retrieval.min_relevance_score = parse_var("RAG_MIN_SCORE", &v)?;
        }
        if let Some(v) = lookup("RAG_CONTEXT_ENABLED") {
            self.context.enabled = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("RAG_CONTEXT_MAX_CHARS") {
            self.context.max_chars = parse_var("RAG_CONTEXT_MAX_CHARS", &v)?;
        }
        if let Some(v) = lookup("RAG_CONTEXT_MIN_SCORE") {
            self.context.min_score = parse_var("RAG_CONTEXT_MIN_SCORE", &v)?;
        }
        if let Some(v) = lookup("RAG_TRACKER_PATH") {
            self.indexing.tracker_path = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size_tokens == 0 {
            bail!("chunking.chunk_size_tokens must be > 0");
        }
        if self.chunking.overlap_percent >= 100 {
            bail!("chunking.overlap_percent must be < 100");
        }
        if self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.cache_capacity == 0 {
            bail!("embedding.cache_capacity must be > 0");
        }
        if self.retrieval.retrieval_top_k < 1 || self.retrieval.rerank_top_k < 1 {
            bail!("retrieval.retrieval_top_k and retrieval.rerank_top_k must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_relevance_score) {
            bail!("retrieval.min_relevance_score must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&self.context.min_score) {
            bail!("context.min_score must be in [0.0, 1.0]");
        }
        if self.indexing.concurrency == 0 {
            bail!("indexing.concurrency must be >= 1");
        }
        match self.vector_store.backend.as_str() {
            "chroma" | "memory" => {}
            other => bail!(
                "Unknown vector store backend: '{}'. Must be chroma or memory.",
                other
            ),
        }
        Ok(())
    }
}

fn parse_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid value for {}: '{}' ({})", key, value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(!config.reranker.is_enabled());
        assert_eq!(config.chunking.overlap_tokens(), 76);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            chunk_size_tokens = 100

            [reranker]
            model = "bge-reranker"
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size_tokens, 100);
        assert_eq!(config.chunking.overlap_percent, 15);
        assert_eq!(config.chunking.overlap_tokens(), 15);
        assert!(config.reranker.is_enabled());
        assert_eq!(config.embedding.model, "nomic-embed-text");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RAG_COLLECTION", "ops"),
            ("RAG_MIN_SCORE", "0.45"),
            ("RAG_CONTEXT_ENABLED", "false"),
            ("CHROMA_URL", "http://chroma:8000"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.vector_store.collection, "ops");
        assert!((config.retrieval.min_relevance_score - 0.45).abs() < 1e-9);
        assert!(!config.context.enabled);
        assert_eq!(config.vector_store.url, "http://chroma:8000");
    }

    #[test]
    fn test_bad_override_is_reported() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|k| (k == "RAG_CHUNK_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("RAG_CHUNK_SIZE"));
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let mut config = Config::default();
        config.retrieval.min_relevance_score = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.vector_store.backend = "qdrant".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chunking.overlap_percent = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.vector_store.backend, "chroma");
    }
}
