//! # doc-digest CLI (`ddg`)
//!
//! The `ddg` binary is the primary interface for doc-digest. It provides
//! commands for ingesting documents into the chunk cache, querying a
//! single document, searching across all cached documents, and inspecting
//! or clearing the cache.
//!
//! ## Usage
//!
//! ```bash
//! ddg [--config ./ddg.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ddg ingest <file>` | Chunk, summarize, and cache a document |
//! | `ddg query <file> "<query>"` | Rank one document's cached chunks |
//! | `ddg search "<query>"` | Search every cached document |
//! | `ddg stats` | Show cache contents and sizes |
//! | `ddg clear [hash]` | Remove one entry, or `--all` for everything |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest with an explicit document type, replacing any cached entry
//! ddg ingest report.xlsx --doc-type spreadsheet --force
//!
//! # Query one document
//! ddg query report.xlsx "april expenses"
//!
//! # Search across everything cached
//! ddg search "travel budget" --limit 5
//! ```

mod cache;
mod chunk;
mod classify;
mod config;
mod embedding;
mod models;
mod pipeline;
mod retriever;
mod stats;
mod summarize;
mod token;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use models::DocType;

/// doc-digest CLI — chunk, summarize, cache, and retrieve documents for
/// LLM consumers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; without it, built-in defaults are used (cache under
/// `~/.cache/doc-digest`, summarization and embeddings disabled).
#[derive(Parser)]
#[command(
    name = "ddg",
    about = "doc-digest — local-first document chunking, summarization, and retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest a document: chunk, summarize, embed, and cache it.
    ///
    /// A document whose identity hash is already cached is skipped unless
    /// `--force` is given.
    Ingest {
        /// Path to the source document.
        file: PathBuf,

        /// Document type: spreadsheet, word, pdf, or text.
        /// Inferred from the file extension when omitted.
        #[arg(long)]
        doc_type: Option<DocType>,

        /// Regenerate even if a cached entry exists.
        #[arg(long)]
        force: bool,
    },

    /// Rank one document's cached chunks against a query.
    Query {
        /// Path to the ingested document.
        file: PathBuf,

        /// The free-text query.
        query: String,
    },

    /// Search every cached document and return the global best matches.
    Search {
        /// The free-text query.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show cache statistics: entries, chunks, sizes, access times.
    Stats,

    /// Remove cache entries.
    Clear {
        /// Hash of the entry to remove (as shown by `ddg stats`).
        file_hash: Option<String>,

        /// Remove every entry.
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::Config::default(),
    };

    match cli.command {
        Commands::Ingest {
            file,
            doc_type,
            force,
        } => {
            pipeline::run_ingest(&cfg, &file, doc_type, force).await?;
        }
        Commands::Query { file, query } => {
            pipeline::run_query(&cfg, &file, &query).await?;
        }
        Commands::Search { query, limit } => {
            pipeline::run_search(&cfg, &query, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
        Commands::Clear { file_hash, all } => {
            stats::run_clear(&cfg, file_hash.as_deref(), all)?;
        }
    }

    Ok(())
}
