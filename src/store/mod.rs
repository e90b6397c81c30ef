//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only way the indexing and query paths
//! touch the nearest-neighbor index, so the backend is pluggable:
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | Chroma-compatible REST | [`chroma`] | production |
//! | brute-force, in process | [`memory`] | single-process runs, tests (nothing persists) |
//!
//! Distances follow the cosine-space convention: `0.0` is identical,
//! larger is less similar. Callers convert with `1 / (1 + distance)`.

pub mod chroma;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::RetrievalResult;

/// Equality filter over metadata fields. Every entry must match.
pub type MetadataFilter = Map<String, Value>;

/// One embedded chunk ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// One nearest-neighbor match.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoreHit {
    pub id: String,
    pub document: String,
    pub metadata: Map<String, Value>,
    pub distance: f32,
}

impl StoreHit {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn meta_usize(&self, key: &str) -> Option<usize> {
        self.metadata
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
    }
}

/// Build a single-field equality filter.
pub fn filter_eq(key: &str, value: impl Into<Value>) -> MetadataFilter {
    let mut filter = Map::new();
    filter.insert(key.to_string(), value.into());
    filter
}

/// Abstract nearest-neighbor index, scoped to one collection.
///
/// Implementations must be `Send + Sync`; they are shared behind `Arc`
/// between the indexer and the search service.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend label for logs and stats.
    fn name(&self) -> &str;

    /// Whether stored records outlive the process. The index tracker is
    /// only persisted for stores that do.
    fn is_persistent(&self) -> bool {
        true
    }

    /// Insert or replace records by id.
    async fn upsert(&self, records: &[VectorRecord]) -> RetrievalResult<()>;

    /// Up to `n_results` hits ordered by ascending distance.
    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> RetrievalResult<Vec<StoreHit>>;

    /// Delete every record whose metadata matches `filter`.
    async fn delete_where(&self, filter: &MetadataFilter) -> RetrievalResult<()>;

    /// Number of stored records.
    async fn count(&self) -> RetrievalResult<usize>;
}
