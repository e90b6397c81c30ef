//! # context-rag
//!
//! Hybrid document retrieval for LLM prompts.
//!
//! Local documentation is chunked, embedded through an HTTP inference
//! provider and stored in an external vector index. Queries are embedded,
//! matched, optionally reranked, fused into one score and filtered before
//! being handed to a prompt.
//!
//! ## Architecture
//!
//! ```text
//!  write path                                   read path
//! ┌─────────┐  ┌─────────┐  ┌───────────┐      ┌─────────────────┐
//! │ Indexer │─▶│ Chunker │─▶│ Embedding │      │ ContextInjector │
//! └────┬────┘  └─────────┘  │  Service  │      └────────┬────────┘
//!      │                    └─────┬─────┘               ▼
//!      ▼                          ▼             ┌───────────────┐
//! ┌─────────┐              ┌─────────────┐◀─────│ SearchService │──▶ Reranker
//! │ Tracker │              │ VectorStore │      └───────────────┘
//! └─────────┘              └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! crag index ./docs                 # incremental indexing
//! crag search "configure traefik"   # ranked passages
//! crag context "Comment configurer Traefik pour mon service?"
//! crag serve                        # JSON HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Layered TOML + environment configuration |
//! | [`error`] | Failure taxonomy |
//! | [`models`] | Core data types |
//! | [`chunk`] | Content-aware chunking |
//! | [`embedding`] | Cached embedding generation and providers |
//! | [`store`] | Vector store seam (Chroma REST, in-memory) |
//! | [`tracker`] | Persisted per-file indexing state |
//! | [`indexer`] | Incremental indexing |
//! | [`rerank`] | Reranking and score fusion |
//! | [`search`] | Query path |
//! | [`context`] | Context-injection policy |
//! | [`engine`] | Service wiring |
//! | [`server`] | JSON HTTP API |

pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod models;
pub mod rerank;
pub mod search;
pub mod server;
pub mod store;
pub mod text;
pub mod tracker;
