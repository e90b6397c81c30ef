//! Durable record of what has been indexed.
//!
//! The tracker maps each source path to the content hash and chunk count of
//! its last successful indexing. It answers one question for the indexer:
//! does this file need re-embedding?
//!
//! # Persistence
//!
//! The whole map is stored as one JSON object keyed by path:
//!
//! ```json
//! { "docs/guide.md": { "path": "docs/guide.md", "content_hash": "…",
//!   "chunk_count": 7, "indexed_at": "2026-01-01T00:00:00Z", "size_bytes": 2400 } }
//! ```
//!
//! Every mutation rewrites the file through a temp file and a rename, so a
//! crash never leaves a truncated tracker behind. A missing or unreadable
//! file is not fatal: the tracker starts empty and everything is re-indexed.
//!
//! A tracker built with [`IndexTracker::in_memory`] never touches disk. It
//! pairs with a store that does not outlive the process, so a restart
//! re-indexes instead of trusting records for chunks that are gone.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::models::IndexedFile;

/// 128-bit content digest, hex encoded.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct IndexTracker {
    /// `None` for an in-memory tracker.
    path: Option<PathBuf>,
    records: Mutex<HashMap<String, IndexedFile>>,
}

impl IndexTracker {
    /// Open the tracker at `path`, loading any existing records.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path);
        tracing::debug!(path = %path.display(), files = records.len(), "index tracker loaded");
        Self {
            path: Some(path),
            records: Mutex::new(records),
        }
    }

    /// A tracker whose records live only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// True when `path` has no record or was indexed with a different hash.
    pub async fn needs_reindex(&self, path: &str, hash: &str) -> bool {
        self.records
            .lock()
            .await
            .get(path)
            .map_or(true, |r| r.content_hash != hash)
    }

    pub async fn get(&self, path: &str) -> Option<IndexedFile> {
        self.records.lock().await.get(path).cloned()
    }

    /// Replace the record for `path` wholesale and persist.
    pub async fn record_indexed(
        &self,
        path: &str,
        hash: &str,
        chunk_count: usize,
        size_bytes: u64,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(
            path.to_string(),
            IndexedFile {
                path: path.to_string(),
                content_hash: hash.to_string(),
                chunk_count,
                indexed_at: Utc::now(),
                size_bytes,
            },
        );
        self.persist(&records).await
    }

    /// Drop the record for `path`. Returns whether one existed.
    pub async fn remove(&self, path: &str) -> Result<bool> {
        let mut records = self.records.lock().await;
        if records.remove(path).is_none() {
            return Ok(false);
        }
        self.persist(&records).await?;
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Tracked paths, sorted.
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.records.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Sum of recorded chunk counts.
    pub async fn total_chunks(&self) -> usize {
        self.records
            .lock()
            .await
            .values()
            .map(|r| r.chunk_count)
            .sum()
    }

    async fn persist(&self, records: &HashMap<String, IndexedFile>) -> Result<()> {
        match &self.path {
            Some(path) => persist(path, records).await,
            None => Ok(()),
        }
    }
}

fn load_records(path: &Path) -> HashMap<String, IndexedFile> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read index tracker, starting empty");
            return HashMap::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt index tracker, starting empty");
            HashMap::new()
        }
    }
}

async fn persist(path: &Path, records: &HashMap<String, IndexedFile>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let ordered: BTreeMap<&String, &IndexedFile> = records.iter().collect();
    let json = serde_json::to_string_pretty(&ordered).context("Failed to serialize tracker")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_content_hash_is_128_bit_hex() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, content_hash("hello"));
        assert_ne!(h, content_hash("hello!"));
    }

    #[tokio::test]
    async fn test_needs_reindex_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let tracker = IndexTracker::open(tmp.path().join("tracker.json"));

        assert!(tracker.needs_reindex("a.md", "h1").await);
        tracker.record_indexed("a.md", "h1", 3, 120).await.unwrap();
        assert!(!tracker.needs_reindex("a.md", "h1").await);
        assert!(tracker.needs_reindex("a.md", "h2").await);

        tracker.record_indexed("a.md", "h2", 5, 200).await.unwrap();
        let rec = tracker.get("a.md").await.unwrap();
        assert_eq!((rec.content_hash.as_str(), rec.chunk_count, rec.size_bytes), ("h2", 5, 200));
        assert_eq!(tracker.len().await, 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/tracker.json");
        {
            let tracker = IndexTracker::open(&path);
            tracker.record_indexed("a.md", "h1", 2, 10).await.unwrap();
            tracker.record_indexed("b.md", "h2", 4, 20).await.unwrap();
            assert!(tracker.remove("a.md").await.unwrap());
            assert!(!tracker.remove("a.md").await.unwrap());
        }
        let reopened = IndexTracker::open(&path);
        assert_eq!(reopened.paths().await, vec!["b.md".to_string()]);
        assert_eq!(reopened.total_chunks().await, 4);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_in_memory_tracker_keeps_records_without_a_file() {
        let tracker = IndexTracker::in_memory();
        assert!(tracker.path().is_none());

        tracker.record_indexed("a.md", "h1", 2, 10).await.unwrap();
        assert!(!tracker.needs_reindex("a.md", "h1").await);
        assert!(tracker.remove("a.md").await.unwrap());
        assert!(tracker.is_empty().await);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tracker.json");
        std::fs::write(&path, "{not json").unwrap();

        let tracker = IndexTracker::open(&path);
        assert!(tracker.is_empty().await);
        assert!(tracker.needs_reindex("a.md", "h").await);

        tracker.record_indexed("a.md", "h", 1, 1).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"a.md\""));
    }
}
