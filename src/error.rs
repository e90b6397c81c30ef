//! Failure taxonomy for the retrieval services.
//!
//! Every variant has a defined degraded output at the service boundary:
//! callers branch on the kind instead of unwinding. Partial indexing failure
//! is not an error at all; it is reported through
//! [`IndexFileReport::chunks_failed`](crate::models::IndexFileReport).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    /// Invalid or too-short input, rejected before any I/O.
    #[error("invalid input: {0}")]
    Usage(String),

    /// Embedding or reranker call failed, returned garbage, or timed out.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Vector store unreachable or answered with an error.
    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),
}

impl RetrievalError {
    /// Short machine-readable label, used in responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            RetrievalError::Usage(_) => "usage",
            RetrievalError::ProviderUnavailable(_) => "embedding-unavailable",
            RetrievalError::StoreUnavailable(_) => "vector-store-unreachable",
            RetrievalError::CollectionNotFound(_) => "collection-not-found",
        }
    }
}

pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;
