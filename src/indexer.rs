//! Incremental indexing of documents into the vector store.
//!
//! # Pipeline
//!
//! ```text
//! read file → length gate → content hash → tracker check
//!   → classify mode + topic → chunk → embed (concurrent) → purge old chunks
//!   → upsert → record in tracker
//! ```
//!
//! A file whose hash matches its tracker record is reported `unchanged` and
//! costs zero embedding calls. A changed file is re-chunked in full; once at
//! least one chunk is embedded, its previous chunks are deleted from the
//! store before the upsert so a shrinking document does not leave orphans
//! behind.
//!
//! # Failure
//!
//! - Some chunks fail: the rest are stored and the tracker records the
//!   reduced count. The file is not retried until its content changes.
//! - Every chunk fails: nothing is purged and the tracker is left alone, so
//!   the store and tracker still describe the previous run. A new or
//!   changed file is retried on the next run.
//! - The upsert fails: the tracker record is dropped, forcing a re-index.
//!
//! # Concurrency
//!
//! Indexing the same path twice at once is serialized by a per-path async
//! mutex. Directory runs index up to `indexing.concurrency` files at a time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::chunk::{ChunkMode, Chunker};
use crate::config::IndexingConfig;
use crate::embedding::EmbeddingService;
use crate::models::{Chunk, FileStatus, IndexFileReport, IndexStats};
use crate::store::{filter_eq, VectorRecord, VectorStore};
use crate::tracker::{content_hash, IndexTracker};

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Path keyword → topic label. First match wins.
const TOPIC_KEYWORDS: &[(&str, &str)] = &[
    ("guide", "guide"),
    ("tutorial", "guide"),
    ("session", "session"),
    ("readme", "readme"),
    ("install", "installation"),
    ("setup", "installation"),
    ("deploy", "deployment"),
    ("docker", "deployment"),
    ("config", "configuration"),
    ("troubleshoot", "troubleshooting"),
    ("faq", "troubleshooting"),
    ("api", "api"),
    ("changelog", "changelog"),
    ("architecture", "architecture"),
    ("design", "architecture"),
];

pub const DEFAULT_TOPIC: &str = "documentation";

/// Guess a document's topic from keywords in its path.
pub fn detect_topic(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    TOPIC_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map_or(DEFAULT_TOPIC, |(_, topic)| topic)
}

/// Deterministic chunk id: sanitized filename, chunk index, and a short
/// digest of the source path plus the chunk's leading content.
pub fn chunk_id(source: &str, filename: &str, index: usize, content: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(crate::text::truncate_chars(content, 100).as_bytes());
    let digest = hasher.finalize();
    let short: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}_{}_{}", sanitized, index, short)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

pub struct Indexer {
    chunker: Chunker,
    embeddings: Arc<EmbeddingService>,
    store: Arc<dyn VectorStore>,
    tracker: Arc<IndexTracker>,
    settings: IndexingConfig,
    path_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Indexer {
    pub fn new(
        chunker: Chunker,
        embeddings: Arc<EmbeddingService>,
        store: Arc<dyn VectorStore>,
        tracker: Arc<IndexTracker>,
        settings: IndexingConfig,
    ) -> Self {
        Self {
            chunker,
            embeddings,
            store,
            tracker,
            settings,
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &IndexTracker {
        &self.tracker
    }

    fn path_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.path_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Index one file.
    ///
    /// Never returns an error: every failure is folded into the report.
    pub async fn index_file(&self, path: &Path, force: bool) -> IndexFileReport {
        let key = path.to_string_lossy().to_string();
        let lock = self.path_lock(&key);
        let _guard = lock.lock().await;

        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %key, error = %e, "cannot read file");
                return IndexFileReport::failed(&key, format!("read error: {}", e));
            }
        };

        if content.trim().chars().count() < self.settings.min_content_chars {
            tracing::debug!(path = %key, "content too short, skipping");
            return IndexFileReport::skipped(&key, "content too short");
        }

        let hash = content_hash(&content);
        let previous = self.tracker.get(&key).await;
        if !force && previous.as_ref().is_some_and(|r| r.content_hash == hash) {
            tracing::debug!(path = %key, "unchanged");
            return IndexFileReport::unchanged(&key);
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| key.clone());
        let mode = ChunkMode::classify(&key, &content);
        let topic = detect_topic(&key);
        let indexed_at = chrono::Utc::now().to_rfc3339();

        let mut chunks = self.chunker.chunk(&content, mode);
        for chunk in &mut chunks {
            chunk.metadata.source = key.clone();
            chunk.metadata.filename = filename.clone();
            chunk.metadata.topic = topic.to_string();
            chunk.metadata.content_hash = hash.clone();
            chunk.metadata.embedding_model = self.embeddings.model_name().to_string();
            chunk.metadata.indexed_at = indexed_at.clone();
        }

        let records = self.embed_chunks(&key, &filename, &chunks).await;
        let chunks_failed = chunks.len() - records.len();
        if records.is_empty() {
            // Previous chunks and tracker record stay as they were.
            return IndexFileReport {
                chunks_failed,
                ..IndexFileReport::failed(&key, "no chunk could be embedded")
            };
        }

        if previous.is_some() {
            if let Err(e) = self.store.delete_where(&filter_eq("source", key.as_str())).await {
                tracing::warn!(path = %key, error = %e, "failed to purge previous chunks");
            }
        }

        if let Err(e) = self.store.upsert(&records).await {
            tracing::warn!(path = %key, error = %e, "upsert failed");
            // The purge may have run: force a re-index next time.
            if previous.is_some() {
                if let Err(e) = self.tracker.remove(&key).await {
                    tracing::warn!(path = %key, error = %e, "failed to drop tracker record");
                }
            }
            return IndexFileReport {
                chunks_failed: chunks.len(),
                ..IndexFileReport::failed(&key, format!("upsert failed: {}", e))
            };
        }
        let chunks_indexed = records.len();

        let size_bytes = content.len() as u64;
        if let Err(e) = self
            .tracker
            .record_indexed(&key, &hash, chunks_indexed, size_bytes)
            .await
        {
            tracing::warn!(path = %key, error = %e, "failed to persist tracker");
            return IndexFileReport {
                chunks_indexed,
                chunks_failed,
                ..IndexFileReport::failed(&key, format!("{:#}", e))
            };
        }

        let status = if previous.is_some() {
            FileStatus::Updated
        } else {
            FileStatus::New
        };
        tracing::info!(
            path = %key,
            mode = ?mode,
            topic,
            chunks = chunks_indexed,
            failed = chunks_failed,
            "indexed"
        );

        IndexFileReport {
            path: key,
            status,
            success: true,
            chunks_indexed,
            chunks_failed,
            error: None,
        }
    }

    /// Embed every chunk and build store records for the ones that
    /// succeeded. Failed chunks are logged and dropped.
    async fn embed_chunks(&self, source: &str, filename: &str, chunks: &[Chunk]) -> Vec<VectorRecord> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let outcomes = self.embeddings.generate_batch(&texts).await;

        let mut records = Vec::with_capacity(chunks.len());
        for (chunk, outcome) in chunks.iter().zip(outcomes) {
            match outcome {
                Ok(outcome) => records.push(VectorRecord {
                    id: chunk_id(source, filename, chunk.index, &chunk.content),
                    document: chunk.content.clone(),
                    embedding: outcome.vector,
                    metadata: chunk.store_metadata(),
                }),
                Err(e) => {
                    tracing::warn!(path = %source, chunk = chunk.index, error = %e, "chunk embedding failed");
                }
            }
        }
        records
    }

    /// Files under `dir` that match the include patterns and none of the
    /// excludes.
    pub fn discover(&self, dir: &Path, patterns: Option<&[String]>) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            bail!("Not a directory: {}", dir.display());
        }

        let include = build_globset(patterns.unwrap_or(&self.settings.include_globs))?;
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(self.settings.exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;

        let mut files = Vec::new();
        for entry in WalkDir::new(dir) {
            let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(dir).unwrap_or(path);
            let rel_str = relative.to_string_lossy();
            if exclude.is_match(rel_str.as_ref()) || !include.is_match(rel_str.as_ref()) {
                continue;
            }
            files.push(path.to_path_buf());
        }
        files.sort();
        Ok(files)
    }

    /// Index every matching file under `dir`.
    pub async fn index_directory(
        &self,
        dir: &Path,
        patterns: Option<&[String]>,
        force: bool,
    ) -> Result<IndexStats> {
        let started = Instant::now();
        let files = self.discover(dir, patterns)?;
        tracing::info!(dir = %dir.display(), files = files.len(), force, "indexing directory");

        let reports: Vec<IndexFileReport> = stream::iter(files.iter().cloned())
            .map(|path| async move { self.index_file(&path, force).await })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut stats = IndexStats::default();
        for report in &reports {
            stats.record(report);
        }
        stats.failures.sort();
        stats.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            files = stats.total_files,
            chunks = stats.total_chunks,
            new = stats.new_files,
            updated = stats.updated_files,
            unchanged = stats.unchanged_files,
            errors = stats.errors,
            duration_ms = stats.duration_ms,
            "directory indexed"
        );
        Ok(stats)
    }

    /// Remove a file's chunks from the store and drop its tracker record.
    ///
    /// Returns whether the file was tracked.
    pub async fn remove_file(&self, path: &Path) -> Result<bool> {
        let key = path.to_string_lossy().to_string();
        let lock = self.path_lock(&key);
        let _guard = lock.lock().await;

        self.store
            .delete_where(&filter_eq("source", key.as_str()))
            .await
            .with_context(|| format!("Failed to delete chunks of {}", key))?;
        let existed = self.tracker.remove(&key).await?;
        tracing::info!(path = %key, existed, "removed from index");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_topic() {
        assert_eq!(detect_topic("docs/GUIDE_traefik.md"), "guide");
        assert_eq!(detect_topic("notes/session-2024-01.md"), "session");
        assert_eq!(detect_topic("README.md"), "readme");
        assert_eq!(detect_topic("ops/docker-compose-notes.txt"), "deployment");
        assert_eq!(detect_topic("misc/notes.md"), DEFAULT_TOPIC);
    }

    #[test]
    fn test_chunk_id_is_deterministic_and_sanitized() {
        let a = chunk_id("docs/my guide.md", "my guide.md", 2, "Some content here");
        let b = chunk_id("docs/my guide.md", "my guide.md", 2, "Some content here");
        assert_eq!(a, b);
        assert!(a.starts_with("my_guide.md_2_"));
        assert_eq!(a.len(), "my_guide.md_2_".len() + 8);

        let other_dir = chunk_id("other/my guide.md", "my guide.md", 2, "Some content here");
        assert_ne!(a, other_dir);
        let other_content = chunk_id("docs/my guide.md", "my guide.md", 2, "Different");
        assert_ne!(a, other_content);
    }

    #[test]
    fn test_build_globset_rejects_invalid() {
        assert!(build_globset(&["**/*.md".to_string()]).is_ok());
        assert!(build_globset(&["a[".to_string()]).is_err());
    }
}
