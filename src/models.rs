//! Core data models used throughout doc-digest.
//!
//! These types represent the documents, chunks, and query matches that flow
//! through the chunking, summarization, caching, and retrieval pipeline.
//! `DocumentMetadata` and `ChunkMetadata` are persisted to the cache as
//! gzip-compressed JSON; `QueryMatch` is ephemeral and produced only at
//! retrieval time.

use serde::{Deserialize, Serialize};

/// Kind of source document the chunks were produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Spreadsheet,
    Word,
    Pdf,
    Text,
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocType::Spreadsheet => "spreadsheet",
            DocType::Word => "word",
            DocType::Pdf => "pdf",
            DocType::Text => "text",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DocType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spreadsheet" | "xlsx" => Ok(DocType::Spreadsheet),
            "word" | "docx" => Ok(DocType::Word),
            "pdf" => Ok(DocType::Pdf),
            "text" | "txt" => Ok(DocType::Text),
            other => anyhow::bail!(
                "Unknown doc type: '{}'. Use spreadsheet, word, pdf, or text.",
                other
            ),
        }
    }
}

/// Per-document metadata, written once per cache entry and replaced wholesale
/// when the source file's hash changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Source path; used only as an input to the cache key.
    pub file_path: String,
    /// Content identity hash (path + mtime + size).
    pub file_hash: String,
    pub file_size: u64,
    pub total_tokens: usize,
    pub chunk_count: usize,
    /// Target tokens per chunk used when the document was chunked.
    pub chunk_size: usize,
    /// Epoch seconds.
    pub created_at: i64,
    /// Seconds until the entry expires.
    pub ttl: u64,
    pub doc_type: DocType,
}

/// Whether a chunk covers a whole source unit or a slice of an oversized one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChunkKind {
    Full,
    Partial { part: usize, total: usize },
}

/// Where a chunk sits inside its document.
///
/// `start`/`end` are character offsets for raw-text chunking, or unit indices
/// for structural chunking (sheets, sections, pages).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPosition {
    pub start: usize,
    pub end: usize,
    pub kind: ChunkKind,
}

/// Summarized chunk record, immutable after creation; superseded only by a
/// full document re-chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Stable within a document: `"<hash prefix>-<index>"`.
    pub chunk_id: String,
    pub position: ChunkPosition,
    /// Short natural-language summary, capped at ~400 chars.
    pub summary: String,
    /// Up to 8 short keywords, order preserved.
    pub tags: Vec<String>,
    pub token_count: usize,
    pub summary_tokens: usize,
    pub tag_tokens: usize,
    /// Origin hints; at most one is set, depending on doc type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Set when the summary came from the local fallback path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkMetadata {
    /// The origin hint for display, whichever variant is present.
    pub fn origin_hint(&self) -> Option<&str> {
        self.sheet_name
            .as_deref()
            .or(self.section_title.as_deref())
            .or(self.page_range.as_deref())
    }
}

/// A chunk paired with its relevance score for one query. Never persisted.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub chunk: ChunkMetadata,
    pub score: f64,
}
