//! # Retrieval CLI (`crag`)
//!
//! Indexes local documentation into a vector store and answers queries with
//! ranked, relevance-filtered passages.
//!
//! ## Usage
//!
//! ```bash
//! crag --config ./config/crag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag index <dir>` | Incrementally index every matching file under a directory |
//! | `crag index-file <file>` | Index a single file |
//! | `crag forget <file>` | Remove a file's chunks and tracker record |
//! | `crag search "<query>"` | Ranked passages for a query |
//! | `crag context "<query>"` | Show the context block a prompt would receive |
//! | `crag stats` | Index, store and cache statistics |
//! | `crag serve` | Start the JSON HTTP API |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`), so
//! stdout only carries command output.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use context_rag::config::Config;
use context_rag::engine::Engine;
use context_rag::models::{FileStatus, IndexFileReport};
use context_rag::search::SearchOptions;
use context_rag::server;

/// Hybrid document retrieval for LLM prompts.
#[derive(Parser)]
#[command(
    name = "crag",
    about = "Index documentation and retrieve relevant passages for LLM prompts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/crag.toml")]
    config: PathBuf,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every matching file under a directory.
    ///
    /// Unchanged files (same content hash as last time) are skipped without
    /// any embedding call.
    Index {
        dir: PathBuf,

        /// Include glob, relative to the directory. Repeatable. Defaults to
        /// `[indexing].include_globs`.
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Re-index even when the content hash is unchanged.
        #[arg(long)]
        force: bool,
    },

    /// Index a single file.
    IndexFile {
        path: PathBuf,

        #[arg(long)]
        force: bool,
    },

    /// Remove a file from the index.
    Forget { path: PathBuf },

    /// Search indexed passages.
    Search {
        query: String,

        /// Number of results.
        #[arg(long)]
        top_k: Option<usize>,

        /// Skip the reranking pass (dense similarity only).
        #[arg(long)]
        no_rerank: bool,

        /// Restrict to one topic (guide, session, readme, ...).
        #[arg(long)]
        topic: Option<String>,
    },

    /// Show the context block that would be injected for a query.
    Context {
        query: String,

        /// Print the full prompt with this system prompt prepended.
        #[arg(long)]
        system_prompt: Option<String>,
    },

    /// Show index, store and cache statistics.
    Stats,

    /// Start the JSON HTTP API on `[server].bind`.
    Serve,
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &IndexFileReport) {
    match report.status {
        FileStatus::New | FileStatus::Updated => println!(
            "{}: {} chunks indexed{}",
            report.path,
            report.chunks_indexed,
            if report.chunks_failed > 0 {
                format!(" ({} failed)", report.chunks_failed)
            } else {
                String::new()
            }
        ),
        FileStatus::Unchanged => println!("{}: unchanged", report.path),
        FileStatus::Skipped | FileStatus::Failed => println!(
            "{}: {}",
            report.path,
            report.error.as_deref().unwrap_or("skipped")
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = Config::load(&cli.config)?;
    let engine = Arc::new(Engine::build(config)?);

    match cli.command {
        Commands::Index {
            dir,
            patterns,
            force,
        } => {
            let patterns = (!patterns.is_empty()).then_some(patterns);
            let stats = engine
                .indexer
                .index_directory(&dir, patterns.as_deref(), force)
                .await?;
            if cli.json {
                print_json(&stats)?;
            } else {
                println!(
                    "{} files: {} new, {} updated, {} unchanged, {} skipped, {} errors ({} chunks, {} ms)",
                    stats.total_files,
                    stats.new_files,
                    stats.updated_files,
                    stats.unchanged_files,
                    stats.skipped_files,
                    stats.errors,
                    stats.total_chunks,
                    stats.duration_ms
                );
                for (path, message) in &stats.failures {
                    println!("  failed: {}: {}", path, message);
                }
            }
        }
        Commands::IndexFile { path, force } => {
            let report = engine.indexer.index_file(&path, force).await;
            if cli.json {
                print_json(&report)?;
            } else {
                print_report(&report);
            }
        }
        Commands::Forget { path } => {
            let existed = engine.indexer.remove_file(&path).await?;
            if existed {
                println!("{}: removed", path.display());
            } else {
                println!("{}: was not indexed", path.display());
            }
        }
        Commands::Search {
            query,
            top_k,
            no_rerank,
            topic,
        } => {
            let options = SearchOptions {
                top_k,
                rerank: !no_rerank,
                topic,
            };
            let response = engine.search.search(&query, &options).await;
            if cli.json {
                print_json(&response)?;
            } else if let Some(code) = &response.failure {
                println!("Search failed: {}", code);
            } else if response.is_empty() {
                println!("No results.");
            } else {
                for (i, r) in response.results.iter().enumerate() {
                    println!(
                        "{}. [{:.3}] {} ({}, chunk {}/{})",
                        i + 1,
                        r.combined_score,
                        r.source,
                        r.topic,
                        r.chunk_index + 1,
                        r.total_chunks
                    );
                    let preview = context_rag::text::normalize_whitespace(&r.content);
                    println!("    {}", context_rag::text::truncate_chars(&preview, 200));
                }
                println!(
                    "\n{} of {} candidates, {} ms{}",
                    response.results.len(),
                    response.total_found,
                    response.timings.total_ms,
                    if response.reranked { ", reranked" } else { "" }
                );
            }
        }
        Commands::Context {
            query,
            system_prompt,
        } => match system_prompt {
            Some(system_prompt) => {
                let (prompt, result) = engine
                    .injector
                    .inject_into_prompt(&system_prompt, &query)
                    .await;
                if cli.json {
                    print_json(&result)?;
                } else {
                    println!("{}", prompt);
                }
            }
            None => {
                let result = engine.injector.get_context_for_query(&query).await;
                if cli.json {
                    print_json(&result)?;
                } else if let Some(context) = &result.context {
                    println!("{}", context);
                    println!(
                        "\nrelevance {:.0}% from {} source(s)",
                        result.relevance_score * 100.0,
                        result.sources.len()
                    );
                } else {
                    println!("No context injected.");
                }
            }
        },
        Commands::Stats => {
            let stats = engine.stats().await;
            if cli.json {
                print_json(&stats)?;
            } else {
                println!("embedding model : {}", stats.embedding_model);
                println!("reranker        : {}", stats.reranker_model);
                println!("store           : {} ({})", stats.store_backend, stats.collection);
                println!("tracked files   : {}", stats.tracked_files);
                println!("tracked chunks  : {}", stats.tracked_chunks);
                match stats.stored_chunks {
                    Some(n) => println!("stored chunks   : {}", n),
                    None => println!("stored chunks   : unavailable"),
                }
            }
        }
        Commands::Serve => {
            server::run_server(engine).await?;
        }
    }

    Ok(())
}
