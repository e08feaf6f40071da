//! Query-time ranking over cached chunk metadata.
//!
//! The lexical channel is a cheap per-term heuristic over tags, origin
//! hints, and summary words. When both the query and the chunks carry
//! embeddings, a cosine-similarity channel is blended in: each channel is
//! min-max normalized to [0, 1] over the candidate set, then combined with
//! the configured `hybrid_alpha` weight. Scoring is deterministic and
//! stable: equal scores preserve candidate order.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

use crate::cache::ChunkCache;
use crate::config::RetrievalConfig;
use crate::embedding;
use crate::models::{ChunkMetadata, QueryMatch};

/// An exact tag match is the strongest lexical signal.
pub const TAG_WEIGHT: f64 = 3.0;
/// Origin-hint (sheet/section/page) substring match.
pub const HINT_WEIGHT: f64 = 2.0;
/// Summary word overlap, once per distinct query term.
pub const SUMMARY_WEIGHT: f64 = 1.0;

/// Ranks one document's chunks against a free-text query.
pub struct Retriever {
    top_k: usize,
    hybrid_alpha: f64,
}

impl Retriever {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            hybrid_alpha: config.hybrid_alpha,
        }
    }

    /// Score `chunks` against `query` and return the top-K matches, best
    /// first. Chunks that match nothing are excluded. When
    /// `query_embedding` is present, chunks carrying embeddings are scored
    /// on the blended hybrid scale; without it the score is purely lexical.
    pub fn rank(
        &self,
        query: &str,
        chunks: &[ChunkMetadata],
        query_embedding: Option<&[f32]>,
    ) -> Vec<QueryMatch> {
        let terms = query_terms(query);
        if terms.is_empty() || chunks.is_empty() {
            return Vec::new();
        }

        let lexical: Vec<f64> = chunks.iter().map(|c| lexical_score(&terms, c)).collect();

        let semantic: Option<Vec<f64>> = query_embedding.and_then(|qv| {
            if chunks.iter().any(|c| c.embedding.is_some()) {
                Some(
                    chunks
                        .iter()
                        .map(|c| match &c.embedding {
                            Some(ev) => embedding::cosine_similarity(qv, ev) as f64,
                            None => 0.0,
                        })
                        .collect(),
                )
            } else {
                None
            }
        });

        let scored: Vec<f64> = match semantic {
            Some(sem) => {
                let norm_lex = normalize_scores(&lexical);
                let norm_sem = normalize_scores(&sem);
                norm_lex
                    .iter()
                    .zip(norm_sem.iter())
                    .map(|(l, s)| (1.0 - self.hybrid_alpha) * l + self.hybrid_alpha * s)
                    .collect()
            }
            None => lexical,
        };

        let mut matches: Vec<QueryMatch> = chunks
            .iter()
            .zip(scored)
            .filter(|(_, score)| *score > 0.0)
            .map(|(chunk, score)| QueryMatch {
                chunk: chunk.clone(),
                score,
            })
            .collect();

        // sort_by is stable: equal scores keep candidate order.
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(self.top_k);
        matches
    }
}

/// Lowercased, deduplicated query terms in first-occurrence order.
fn query_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in query.split_whitespace() {
        let term: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Per-term lexical score: tag match + hint substring + summary overlap,
/// all case-insensitive.
fn lexical_score(terms: &[String], chunk: &ChunkMetadata) -> f64 {
    let tags: Vec<String> = chunk.tags.iter().map(|t| t.to_lowercase()).collect();
    let hint = chunk.origin_hint().map(|h| h.to_lowercase());
    let summary_words: BTreeSet<String> = chunk
        .summary
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();

    let mut score = 0.0;
    for term in terms {
        if tags.iter().any(|t| t == term) {
            score += TAG_WEIGHT;
        }
        if let Some(ref hint) = hint {
            if hint.contains(term.as_str()) {
                score += HINT_WEIGHT;
            }
        }
        if summary_words.contains(term.as_str()) {
            score += SUMMARY_WEIGHT;
        }
    }
    score
}

/// Min-max normalize raw scores to [0, 1]. All-equal inputs map to 1.0.
fn normalize_scores(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }
    let s_min = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    raw.iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// A search hit attributed to its source document.
#[derive(Debug, Clone)]
pub struct DocMatch {
    pub file_hash: String,
    pub file_path: String,
    pub chunk: ChunkMetadata,
    pub score: f64,
}

/// Tag-level comparison of two cached documents.
#[derive(Debug, Clone)]
pub struct DocComparison {
    pub shared_tags: Vec<String>,
    pub unique_a: Vec<String>,
    pub unique_b: Vec<String>,
}

/// A document related to another through shared tags.
#[derive(Debug, Clone)]
pub struct CrossReference {
    pub file_hash: String,
    pub file_path: String,
    pub shared_tags: Vec<String>,
}

/// Composes the per-document [`Retriever`] across every live cache entry.
pub struct MultiDocRetriever<'a> {
    cache: &'a ChunkCache,
    retriever: Retriever,
}

impl<'a> MultiDocRetriever<'a> {
    pub fn new(cache: &'a ChunkCache, config: &RetrievalConfig) -> Self {
        Self {
            cache,
            retriever: Retriever::new(config),
        }
    }

    /// Search every cached document and return the global top `limit`
    /// matches, best first. Entries that fail to load (expired, corrupt)
    /// are skipped.
    pub fn search_all(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<DocMatch>> {
        let mut hits = Vec::new();

        for hash in self.cache.entry_hashes()? {
            let (meta, chunks) = match self.cache.load(&hash) {
                Some(entry) => entry,
                None => continue,
            };
            for m in self.retriever.rank(query, &chunks, query_embedding) {
                hits.push(DocMatch {
                    file_hash: meta.file_hash.clone(),
                    file_path: meta.file_path.clone(),
                    chunk: m.chunk,
                    score: m.score,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Compare the tag vocabularies of two cached documents.
    pub fn compare(&self, hash_a: &str, hash_b: &str) -> Result<DocComparison> {
        let tags_a = self.entry_tags(hash_a)?;
        let tags_b = self.entry_tags(hash_b)?;

        Ok(DocComparison {
            shared_tags: tags_a.intersection(&tags_b).cloned().collect(),
            unique_a: tags_a.difference(&tags_b).cloned().collect(),
            unique_b: tags_b.difference(&tags_a).cloned().collect(),
        })
    }

    /// Find documents related to `file_hash` through shared tags, most
    /// shared first.
    pub fn cross_references(&self, file_hash: &str) -> Result<Vec<CrossReference>> {
        let source_tags = self.entry_tags(file_hash)?;
        if source_tags.is_empty() {
            return Ok(Vec::new());
        }

        let mut related: BTreeMap<String, CrossReference> = BTreeMap::new();

        for hash in self.cache.entry_hashes()? {
            if hash == file_hash {
                continue;
            }
            let (meta, chunks) = match self.cache.load(&hash) {
                Some(entry) => entry,
                None => continue,
            };
            let tags = chunk_tags(&chunks);
            let shared: Vec<String> = source_tags.intersection(&tags).cloned().collect();
            if !shared.is_empty() {
                related.insert(
                    hash,
                    CrossReference {
                        file_hash: meta.file_hash.clone(),
                        file_path: meta.file_path.clone(),
                        shared_tags: shared,
                    },
                );
            }
        }

        let mut refs: Vec<CrossReference> = related.into_values().collect();
        refs.sort_by(|a, b| b.shared_tags.len().cmp(&a.shared_tags.len()));
        Ok(refs)
    }

    fn entry_tags(&self, file_hash: &str) -> Result<BTreeSet<String>> {
        match self.cache.load(file_hash) {
            Some((_, chunks)) => Ok(chunk_tags(&chunks)),
            None => anyhow::bail!("No cache entry for hash: {}", file_hash),
        }
    }
}

fn chunk_tags(chunks: &[ChunkMetadata]) -> BTreeSet<String> {
    chunks
        .iter()
        .flat_map(|c| c.tags.iter())
        .map(|t| t.to_lowercase())
        .collect()
}
