//! Chunk summarization with local fallback.
//!
//! Each chunk is condensed to a short summary plus a small tag set by an
//! external text-generation backend. The backend's reply is expected to
//! carry `SUMMARY:` and `TAGS: [a, b, c]` markers but is parsed tolerantly;
//! a chunk whose backend call fails outright gets a locally computed
//! fallback (truncated text + frequency-ranked keywords) with the failure
//! recorded in the result's `error` field. Summarization never raises past
//! the caller.
//!
//! Batches run with bounded concurrency in waves, preserving input order in
//! the output regardless of completion order.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingConfig, SummarizerConfig};
use crate::embedding::{self, EmbeddingProvider};
use crate::models::ChunkMetadata;
use crate::token::estimate_tokens;

/// Cap on the stored summary text.
pub const MAX_SUMMARY_CHARS: usize = 400;
/// Cap on the tag set.
pub const MAX_TAGS: usize = 8;
/// Keywords shorter than this carry too little signal.
const MIN_KEYWORD_CHARS: usize = 4;
/// Chunk text sent to the backend is bounded; the cached chunk keeps its
/// full span regardless.
const MAX_PROMPT_CHARS: usize = 8000;

/// Common words excluded from fallback keyword extraction.
const STOPWORDS: &[&str] = &[
    "this", "that", "with", "from", "have", "been", "were", "will", "would", "could", "should",
    "there", "their", "they", "them", "then", "than", "when", "where", "which", "while", "about",
    "into", "over", "under", "after", "before", "because", "between", "each", "other", "some",
    "such", "only", "also", "more", "most", "very", "here",
];

/// One backend completion with usage accounting.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// External text-generation service contract.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<GenerationResponse>;
}

/// OpenAI chat-completions backend.
pub struct OpenAiBackend {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<GenerationResponse> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))?
            .to_string();
        let input_tokens = json
            .pointer("/usage/prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output_tokens = json
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Ok(GenerationResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }
}

/// Origin hints formatted into the prompt; at most one is set per doc type.
#[derive(Debug, Clone, Default)]
pub struct SummaryContext {
    pub sheet_name: Option<String>,
    pub section_title: Option<String>,
    pub page_range: Option<String>,
}

impl SummaryContext {
    /// Short natural-language description, e.g. `" from sheet 'Q1'"`.
    pub fn describe(&self) -> String {
        if let Some(sheet) = &self.sheet_name {
            format!(" from sheet '{}'", sheet)
        } else if let Some(section) = &self.section_title {
            format!(" from section '{}'", section)
        } else if let Some(pages) = &self.page_range {
            format!(" from pages {}", pages)
        } else {
            String::new()
        }
    }
}

/// Result of summarizing one chunk. `error` is set when the summary came
/// from the local fallback path.
#[derive(Debug, Clone)]
pub struct ChunkSummary {
    pub summary: String,
    pub tags: Vec<String>,
    pub summary_tokens: usize,
    pub tag_tokens: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub error: Option<String>,
}

/// Converts chunks into summaries + tag sets, optionally attaching
/// embeddings afterwards.
pub struct Summarizer {
    backend: Option<Arc<dyn GenerationBackend>>,
    embedding: Option<(Box<dyn EmbeddingProvider>, EmbeddingConfig)>,
    max_output_tokens: usize,
    batch_size: usize,
}

impl Summarizer {
    /// Build a summarizer from configuration.
    ///
    /// An unknown summarizer provider is a configuration error. An
    /// embedding provider that fails to initialize only disables embedding
    /// augmentation for this instance — summaries still work.
    pub fn new(config: &SummarizerConfig, embedding_config: &EmbeddingConfig) -> Result<Self> {
        let backend: Option<Arc<dyn GenerationBackend>> = match config.provider.as_str() {
            "disabled" => None,
            "openai" => Some(Arc::new(OpenAiBackend::new(config)?)),
            other => anyhow::bail!(
                "Unknown summarizer provider: '{}'. Use disabled or openai.",
                other
            ),
        };

        let embedding = if embedding_config.is_enabled() {
            match embedding::create_provider(embedding_config) {
                Ok(provider) => Some((provider, embedding_config.clone())),
                Err(e) => {
                    eprintln!("Warning: embeddings disabled for summarizer: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            backend,
            embedding,
            max_output_tokens: config.max_output_tokens,
            batch_size: config.batch_size,
        })
    }

    /// Test seam: a summarizer with an explicit backend and no embeddings.
    pub fn with_backend(backend: Arc<dyn GenerationBackend>, batch_size: usize) -> Self {
        Self {
            backend: Some(backend),
            embedding: None,
            max_output_tokens: 150,
            batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Summarize one chunk. Never fails: backend errors, a disabled
    /// backend, and unparseable replies all resolve to a fallback result.
    pub async fn summarize(&self, chunk_text: &str, context: &SummaryContext) -> ChunkSummary {
        let backend = match &self.backend {
            Some(b) => b,
            None => return fallback_summary(chunk_text, "summarization backend disabled"),
        };

        let prompt = build_prompt(chunk_text, context);
        match backend.generate(&prompt, self.max_output_tokens).await {
            Ok(response) => {
                let (summary, tags) = parse_response(&response.text, chunk_text);
                finish(summary, tags, response.input_tokens, response.output_tokens, None)
            }
            Err(e) => fallback_summary(chunk_text, &e.to_string()),
        }
    }

    /// Summarize many chunks with at most `batch_size` concurrent backend
    /// calls per wave. Output order matches input order; one chunk's failure
    /// only affects that chunk.
    pub async fn summarize_batch(
        &self,
        chunks: &[(String, SummaryContext)],
        batch_size: usize,
    ) -> Vec<ChunkSummary> {
        let wave = batch_size.max(1);
        let mut results = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(wave) {
            let futures: Vec<_> = batch
                .iter()
                .map(|(text, ctx)| self.summarize(text, ctx))
                .collect();
            results.extend(join_all(futures).await);
        }
        results
    }

    /// Attach an embedding of `summary | tags` to every chunk.
    ///
    /// No-op when embeddings are disabled or their provider failed to
    /// initialize; a transient embedding failure leaves the chunks
    /// unchanged rather than failing the pipeline.
    pub async fn add_embeddings(&self, chunks: &mut [ChunkMetadata]) {
        let (provider, config) = match &self.embedding {
            Some(pair) => pair,
            None => return,
        };
        if chunks.is_empty() {
            return;
        }

        let texts: Vec<String> = chunks
            .iter()
            .map(|c| format!("{} | {}", c.summary, c.tags.join(", ")))
            .collect();

        match embedding::embed_texts(provider.as_ref(), config, &texts).await {
            Ok(vectors) => {
                for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                    chunk.embedding = Some(vector);
                }
            }
            Err(e) => {
                eprintln!("Warning: chunk embedding failed: {}", e);
            }
        }
    }
}

fn build_prompt(chunk_text: &str, context: &SummaryContext) -> String {
    let bounded = truncate_chars(chunk_text, MAX_PROMPT_CHARS);
    format!(
        "Summarize this document chunk{}.\n\n\
         Respond with exactly two lines:\n\
         SUMMARY: <one or two sentences, under {} characters>\n\
         TAGS: [keyword1, keyword2, ...] (up to {} short keywords)\n\n\
         Chunk:\n{}",
        context.describe(),
        MAX_SUMMARY_CHARS,
        MAX_TAGS,
        bounded
    )
}

/// Pull summary and tags out of a backend reply, tolerating a missing
/// marker on either line: a missing `SUMMARY:` falls back to the raw reply
/// text, missing `TAGS:` to keyword extraction from the chunk itself.
fn parse_response(response: &str, chunk_text: &str) -> (String, Vec<String>) {
    let mut summary: Option<String> = None;
    let mut tags: Option<Vec<String>> = None;

    for line in response.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("SUMMARY:") {
            if summary.is_none() {
                summary = Some(rest.trim().to_string());
            }
        } else if let Some(rest) = line.strip_prefix("TAGS:") {
            if tags.is_none() {
                tags = Some(parse_tag_list(rest));
            }
        }
    }

    let summary = match summary.filter(|s| !s.is_empty()) {
        Some(s) => truncate_chars(&s, MAX_SUMMARY_CHARS),
        None => truncate_chars(response.trim(), MAX_SUMMARY_CHARS),
    };
    let tags = match tags.filter(|t| !t.is_empty()) {
        Some(t) => t,
        None => extract_keywords(chunk_text),
    };

    (summary, tags)
}

/// Parse `[a, b, c]` (brackets optional), lowercased, deduplicated, capped.
fn parse_tag_list(raw: &str) -> Vec<String> {
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let mut tags: Vec<String> = Vec::new();
    for part in inner.split(',') {
        let tag = part.trim().trim_matches(|c| c == '"' || c == '\'').to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
        if tags.len() == MAX_TAGS {
            break;
        }
    }
    tags
}

/// Frequency-ranked keyword extraction: lowercase words of at least 4
/// chars, stopwords removed, first occurrence wins ties, capped at
/// [`MAX_TAGS`].
pub fn extract_keywords(text: &str) -> Vec<String> {
    // (word, count) in first-occurrence order.
    let mut counts: Vec<(String, usize)> = Vec::new();

    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.chars().count() < MIN_KEYWORD_CHARS {
            continue;
        }
        let word = raw.to_lowercase();
        if word.chars().all(|c| c.is_numeric()) || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        match counts.iter_mut().find(|(w, _)| *w == word) {
            Some((_, n)) => *n += 1,
            None => counts.push((word, 1)),
        }
    }

    // Stable sort keeps first-occurrence order within equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(MAX_TAGS).map(|(w, _)| w).collect()
}

/// Local result used when the backend is unavailable or unparseable.
fn fallback_summary(chunk_text: &str, reason: &str) -> ChunkSummary {
    let truncated = truncate_chars(chunk_text.trim(), MAX_SUMMARY_CHARS);
    let summary = if chunk_text.trim().chars().count() > MAX_SUMMARY_CHARS {
        format!("{}...", truncated)
    } else {
        truncated
    };
    finish(
        summary,
        extract_keywords(chunk_text),
        0,
        0,
        Some(reason.to_string()),
    )
}

fn finish(
    summary: String,
    tags: Vec<String>,
    input_tokens: u64,
    output_tokens: u64,
    error: Option<String>,
) -> ChunkSummary {
    let summary_tokens = estimate_tokens(&summary);
    let tag_tokens = estimate_tokens(&tags.join(", "));
    ChunkSummary {
        summary,
        tags,
        summary_tokens,
        tag_tokens,
        input_tokens,
        output_tokens,
        error,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
