//! # doc-digest
//!
//! A local-first document chunking, summarization, and retrieval pipeline
//! for LLM consumers.
//!
//! doc-digest splits documents into bounded chunks, summarizes and tags
//! each chunk through an external backend (with local fallbacks), attaches
//! optional embeddings, and persists everything in a gzip-compressed,
//! TTL-expiring, size-bounded cache keyed by document identity. Cached
//! chunks are ranked against free-text queries with lexical heuristics
//! and, when embeddings are present, blended cosine similarity.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌────────────┐   ┌─────────┐
//! │  Source  │──▶│   Chunker    │──▶│ Summarizer │──▶│  Cache  │
//! │   text   │   │ size/blocks │   │ tags+embed │   │ gz JSON │
//! └──────────┘   └─────────────┘   └────────────┘   └────┬────┘
//!                                                        │
//!                                                        ▼
//!                                                  ┌───────────┐
//!                                                  │ Retriever │
//!                                                  │  (ddg)    │
//!                                                  └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ddg ingest report.xlsx          # chunk, summarize, cache
//! ddg query report.xlsx "april expenses"
//! ddg search "travel budget"      # across every cached document
//! ddg stats
//! ddg clear --all
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`token`] | Character-based token estimation |
//! | [`classify`] | Dense/sparse profiling and block detection |
//! | [`chunk`] | Bounded, overlap- and quality-aware chunking |
//! | [`summarize`] | Backend summarization with local fallbacks |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`cache`] | Compressed on-disk chunk cache |
//! | [`retriever`] | Lexical and hybrid query ranking |
//! | [`pipeline`] | Ingest/query orchestration |
//! | [`stats`] | Cache statistics and maintenance |

pub mod cache;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod embedding;
pub mod models;
pub mod pipeline;
pub mod retriever;
pub mod stats;
pub mod summarize;
pub mod token;
