//! In-memory [`VectorStore`] for single-process runs and tests.
//!
//! Records live in a `HashMap` behind `std::sync::RwLock`. Queries are a
//! brute-force cosine scan over every stored vector. Nothing survives the
//! process, so the engine pairs this store with an in-memory tracker.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::embedding::cosine_similarity;
use crate::error::RetrievalResult;

use super::{MetadataFilter, StoreHit, VectorRecord, VectorStore};

pub struct InMemoryStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, VectorRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, VectorRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Ids of records whose metadata matches `filter`, sorted.
    pub fn ids_where(&self, filter: &MetadataFilter) -> Vec<String> {
        let mut ids: Vec<String> = self
            .read()
            .values()
            .filter(|r| matches(&r.metadata, filter))
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(metadata: &Map<String, Value>, filter: &MetadataFilter) -> bool {
    filter.iter().all(|(k, v)| metadata.get(k) == Some(v))
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_persistent(&self) -> bool {
        false
    }

    async fn upsert(&self, records: &[VectorRecord]) -> RetrievalResult<()> {
        let mut stored = self.write();
        for r in records {
            stored.insert(r.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> RetrievalResult<Vec<StoreHit>> {
        let stored = self.read();
        let mut hits: Vec<StoreHit> = stored
            .values()
            .filter(|r| filter.map_or(true, |f| matches(&r.metadata, f)))
            .map(|r| StoreHit {
                id: r.id.clone(),
                document: r.document.clone(),
                metadata: r.metadata.clone(),
                distance: (1.0 - cosine_similarity(embedding, &r.embedding)).max(0.0),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(n_results);
        Ok(hits)
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> RetrievalResult<()> {
        self.write().retain(|_, r| !matches(&r.metadata, filter));
        Ok(())
    }

    async fn count(&self) -> RetrievalResult<usize> {
        Ok(self.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::filter_eq;

    fn record(id: &str, source: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            document: format!("content of {id}"),
            embedding,
            metadata: filter_eq("source", source),
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_distance() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                record("far", "a.md", vec![0.0, 1.0]),
                record("near", "a.md", vec![1.0, 0.1]),
                record("exact", "b.md", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "exact");
        assert!(hits[0].distance < 1e-6);
        assert_eq!(hits[1].id, "near");
    }

    #[tokio::test]
    async fn test_query_filter_and_delete() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                record("a0", "a.md", vec![1.0, 0.0]),
                record("a1", "a.md", vec![0.5, 0.5]),
                record("b0", "b.md", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let only_b = filter_eq("source", "b.md");
        let hits = store.query(&[1.0, 0.0], 10, Some(&only_b)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b0");

        store.delete_where(&filter_eq("source", "a.md")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.ids_where(&filter_eq("source", "a.md")).is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = InMemoryStore::new();
        store.upsert(&[record("x", "a.md", vec![1.0])]).await.unwrap();
        store.upsert(&[record("x", "b.md", vec![1.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.ids_where(&filter_eq("source", "b.md")), vec!["x"]);
    }
}
