//! Core data models shared by the indexing and query paths.
//!
//! Chunks are transient (built, embedded, upserted, dropped). Tracker records
//! persist across restarts. Search and injection results are built fresh per
//! query and serialize straight into HTTP responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-chunk metadata stored alongside the vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub source: String,
    pub filename: String,
    pub topic: String,
    /// Written by the chunker once the full split is known.
    pub total_chunks: usize,
    /// Digest of the parent document.
    pub content_hash: String,
    /// Owning heading, for sectioned documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub embedding_model: String,
    pub indexed_at: String,
    pub is_single: bool,
}

/// A contiguous span of a source document prepared for embedding.
///
/// `start_offset..end_offset` is a byte range into the original text, so
/// `&source[chunk.start_offset..chunk.end_offset] == chunk.content`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Flat metadata object as sent to the vector store.
    pub fn store_metadata(&self) -> Map<String, Value> {
        let mut map = match serde_json::to_value(&self.metadata) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.insert("chunk_index".to_string(), Value::from(self.index));
        map.insert("start_offset".to_string(), Value::from(self.start_offset));
        map.insert("end_offset".to_string(), Value::from(self.end_offset));
        map
    }
}

/// Tracking record of one source file's indexing state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedFile {
    pub path: String,
    pub content_hash: String,
    pub chunk_count: usize,
    pub indexed_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// One ranked passage returned to a caller.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub source: String,
    pub filename: String,
    pub topic: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub dense_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    pub combined_score: f64,
}

impl SearchResult {
    /// Plain-text rendering used by the context helpers and the CLI.
    pub fn format_entry(&self) -> String {
        format!(
            "[{}] ({}, chunk {}/{})\n{}",
            self.filename,
            self.topic,
            self.chunk_index + 1,
            self.total_chunks.max(1),
            self.content.trim()
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct StageTimings {
    pub embedding_ms: u64,
    pub retrieval_ms: u64,
    pub rerank_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    /// Candidate count before relevance filtering.
    pub total_found: usize,
    pub reranked: bool,
    pub timings: StageTimings,
    /// Failure code when the query could not run (`embedding-unavailable`,
    /// `vector-store-unreachable`, `collection-not-found`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl SearchResponse {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Outcome of a context-injection attempt.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct InjectionResult {
    pub context: Option<String>,
    pub sources: Vec<String>,
    pub relevance_score: f64,
    pub search_time_ms: u64,
    pub injected: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// First successful indexing of this path.
    New,
    /// Re-indexed after a content change (or forced).
    Updated,
    /// Content hash matched the tracker; nothing done.
    Unchanged,
    /// Too short to be worth indexing.
    Skipped,
    Failed,
}

/// Result of indexing a single file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexFileReport {
    pub path: String,
    pub status: FileStatus,
    pub success: bool,
    pub chunks_indexed: usize,
    /// Chunks the chunker produced but that could not be embedded or stored.
    pub chunks_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Marker carried in [`IndexFileReport::error`] for unchanged files.
///
/// Fixed and untranslated so callers can match on it; user-facing wording
/// belongs to the presentation layer. `status` carries the same fact.
pub const UNCHANGED: &str = "unchanged";

impl IndexFileReport {
    pub fn unchanged(path: &str) -> Self {
        Self {
            path: path.to_string(),
            status: FileStatus::Unchanged,
            success: true,
            chunks_indexed: 0,
            chunks_failed: 0,
            error: Some(UNCHANGED.to_string()),
        }
    }

    pub fn skipped(path: &str, reason: &str) -> Self {
        Self {
            path: path.to_string(),
            status: FileStatus::Skipped,
            success: true,
            chunks_indexed: 0,
            chunks_failed: 0,
            error: Some(reason.to_string()),
        }
    }

    pub fn failed(path: &str, error: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            status: FileStatus::Failed,
            success: false,
            chunks_indexed: 0,
            chunks_failed: 0,
            error: Some(error.into()),
        }
    }
}

/// Aggregate statistics for a directory run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub new_files: usize,
    pub updated_files: usize,
    pub unchanged_files: usize,
    pub skipped_files: usize,
    pub errors: usize,
    /// `(path, message)` for every failed file.
    pub failures: Vec<(String, String)>,
    pub duration_ms: u64,
}

impl IndexStats {
    pub fn record(&mut self, report: &IndexFileReport) {
        self.total_files += 1;
        self.total_chunks += report.chunks_indexed;
        match report.status {
            FileStatus::New => self.new_files += 1,
            FileStatus::Updated => self.updated_files += 1,
            FileStatus::Unchanged => self.unchanged_files += 1,
            FileStatus::Skipped => self.skipped_files += 1,
            FileStatus::Failed => {
                self.errors += 1;
                self.failures.push((
                    report.path.clone(),
                    report.error.clone().unwrap_or_default(),
                ));
            }
        }
    }
}
