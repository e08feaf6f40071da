//! Token-bounded text chunker.
//!
//! Splits document text into chunks that respect a target token budget.
//! The generic splitter is a fixed character window, which keeps two
//! guarantees the rest of the pipeline leans on: with overlap disabled the
//! concatenated chunks reproduce the input exactly, and an input that is an
//! exact multiple of the window yields an exact chunk count.
//!
//! Opt-in behaviors, all off by default:
//! - adaptive sizing (smaller chunks for table/list/code-heavy content),
//! - block preservation (never cut through a fence, table, or list run),
//! - trailing overlap between consecutive chunks,
//! - quality filtering with a floor score.
//!
//! [`chunk_units`] handles already-segmented input (sheets, sections,
//! pages) by greedily packing whole units and splitting only oversized ones.

use crate::classify::{self, adaptive_target, detect_blocks};
use crate::models::{ChunkKind, ChunkPosition};
use crate::token::{chars_for_tokens, estimate_tokens};

/// Chunking behavior switches. `ChunkOptions::default()` reproduces plain
/// fixed-window splitting.
#[derive(Debug, Clone, Default)]
pub struct ChunkOptions {
    /// Shrink the target for dense content, grow it for sparse prose.
    pub adaptive_sizing: bool,
    /// Treat detected fences/tables/list runs as atomic.
    pub preserve_blocks: bool,
    /// Tokens repeated from the tail of the previous chunk; clamped to half
    /// the target.
    pub overlap_tokens: usize,
    /// Drop chunks scoring below this, always keeping the best one.
    pub quality_threshold: Option<f32>,
}

// Quality penalty weights. Tuned against the tests at the bottom of this
// file; the unterminated fence is the heaviest defect because it corrupts
// any renderer downstream.
const PENALTY_NO_LEADING_UPPERCASE: f32 = 0.10;
const PENALTY_NO_TERMINAL_PUNCT: f32 = 0.10;
const PENALTY_ORPHAN_LIST_ITEM: f32 = 0.15;
const PENALTY_HEADER_ONLY_TABLE: f32 = 0.20;
const PENALTY_UNTERMINATED_FENCE: f32 = 0.30;
const PENALTY_LEADING_REFERENCE: f32 = 0.10;
const PENALTY_TOO_SHORT: f32 = 0.15;
/// Chunks shorter than this are rarely self-contained.
const MIN_CHUNK_CHARS: usize = 50;

/// Words that make a chunk opening depend on unseen context.
const REFERENCE_WORDS: &[&str] = &[
    "it", "its", "this", "that", "these", "those", "they", "them", "he", "she", "however",
    "therefore", "also", "additionally", "furthermore", "moreover",
];

/// Split raw text into token-bounded chunks.
///
/// Empty input yields a single empty chunk; input at or under the target
/// yields a single chunk equal to the input.
pub fn chunk_text(text: &str, target_tokens: usize, options: &ChunkOptions) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }

    let target = if options.adaptive_sizing {
        adaptive_target(text, target_tokens)
    } else {
        target_tokens
    };
    let max_chars = chars_for_tokens(target.max(1));

    let spans = if options.preserve_blocks {
        block_aware_spans(text, max_chars)
    } else {
        window_spans(text, max_chars)
    };

    let overlap_chars = chars_for_tokens(options.overlap_tokens.min(target / 2));
    let mut chunks: Vec<String> = spans
        .iter()
        .enumerate()
        .map(|(i, &(start, end))| {
            let start = if i > 0 && overlap_chars > 0 {
                rewind_chars(text, start, overlap_chars)
            } else {
                start
            };
            text[start..end].to_string()
        })
        .collect();

    if let Some(threshold) = options.quality_threshold {
        chunks = filter_by_quality(chunks, threshold);
    }

    chunks
}

/// Fixed windows of at most `max_chars` characters, on char boundaries.
fn window_spans(text: &str, max_chars: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut count = 0usize;

    for (idx, _) in text.char_indices() {
        if count == max_chars {
            spans.push((start, idx));
            start = idx;
            count = 0;
        }
        count += 1;
    }
    spans.push((start, text.len()));
    spans
}

/// Like [`window_spans`], but detected blocks are atomic: the cut points
/// avoid block interiors, and a block that alone exceeds the budget becomes
/// its own oversized span.
fn block_aware_spans(text: &str, max_chars: usize) -> Vec<(usize, usize)> {
    let blocks = detect_blocks(text);
    if blocks.is_empty() {
        return window_spans(text, max_chars);
    }

    // Alternate free/atomic segments covering the whole text.
    let mut segments: Vec<(usize, usize, bool)> = Vec::new();
    let mut cursor = 0usize;
    for block in &blocks {
        if block.start > cursor {
            segments.push((cursor, block.start, false));
        }
        segments.push((block.start, block.end, true));
        cursor = block.end;
    }
    if cursor < text.len() {
        segments.push((cursor, text.len(), false));
    }

    let mut spans: Vec<(usize, usize)> = Vec::new();
    // Open span: (start, end, chars so far).
    let mut cur: Option<(usize, usize, usize)> = None;

    for &(seg_start, seg_end, atomic) in &segments {
        let seg_chars = text[seg_start..seg_end].chars().count();

        if atomic {
            if seg_chars > max_chars {
                // Oversized block stands alone.
                if let Some((s, e, _)) = cur.take() {
                    spans.push((s, e));
                }
                spans.push((seg_start, seg_end));
                continue;
            }
            match cur {
                Some((s, _, chars)) if chars + seg_chars <= max_chars => {
                    cur = Some((s, seg_end, chars + seg_chars));
                }
                Some((s, e, _)) => {
                    spans.push((s, e));
                    cur = Some((seg_start, seg_end, seg_chars));
                }
                None => {
                    cur = Some((seg_start, seg_end, seg_chars));
                }
            }
            continue;
        }

        // Free text: fill the open span, then window the rest.
        let mut pos = seg_start;
        let mut remaining = seg_chars;
        while remaining > 0 {
            let (span_start, _span_end, used) = match cur.take() {
                Some(open) => open,
                None => (pos, pos, 0),
            };
            let capacity = max_chars - used;
            let take = remaining.min(capacity);
            let next = advance_chars(text, pos, take);
            let filled = used + take;
            if filled == max_chars {
                spans.push((span_start, next));
            } else {
                cur = Some((span_start, next, filled));
            }
            remaining -= take;
            pos = next;
        }
    }

    if let Some((s, e, _)) = cur {
        spans.push((s, e));
    }
    if spans.is_empty() {
        spans.push((0, text.len()));
    }
    spans
}

/// Byte offset `count` characters forward of `from`.
fn advance_chars(text: &str, from: usize, count: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(count)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

/// Byte offset `count` characters back from `at`, stopping at 0.
fn rewind_chars(text: &str, at: usize, count: usize) -> usize {
    text[..at]
        .char_indices()
        .rev()
        .nth(count - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Drop chunks below the threshold, but never return an empty list: the
/// highest-scoring chunk survives even below the bar.
fn filter_by_quality(chunks: Vec<String>, threshold: f32) -> Vec<String> {
    let scored: Vec<(String, f32)> = chunks
        .into_iter()
        .map(|c| {
            let score = score_chunk_quality(&c);
            (c, score)
        })
        .collect();

    let any_passes = scored.iter().any(|(_, s)| *s >= threshold);
    if any_passes {
        return scored
            .into_iter()
            .filter(|(_, s)| *s >= threshold)
            .map(|(c, _)| c)
            .collect();
    }

    // First occurrence wins ties so order stays deterministic.
    let best = scored
        .iter()
        .enumerate()
        .max_by(|(ai, (_, a)), (bi, (_, b))| {
            a.partial_cmp(b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(bi.cmp(ai))
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    vec![scored
        .into_iter()
        .nth(best)
        .map(|(c, _)| c)
        .unwrap_or_default()]
}

/// Score how self-contained a chunk is, in `[0, 1]`. Empty text is 0.
pub fn score_chunk_quality(text: &str) -> f32 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let mut score = 1.0f32;

    if let Some(first) = trimmed.chars().next() {
        if !first.is_uppercase() {
            score -= PENALTY_NO_LEADING_UPPERCASE;
        }
    }

    if let Some(last) = trimmed.chars().last() {
        if !matches!(last, '.' | '!' | '?') {
            score -= PENALTY_NO_TERMINAL_PUNCT;
        }
    }

    let list_items = trimmed
        .lines()
        .filter(|l| classify::is_list_item(l))
        .count();
    if list_items == 1 {
        score -= PENALTY_ORPHAN_LIST_ITEM;
    }

    let table_rows: Vec<&str> = trimmed
        .lines()
        .filter(|l| classify::is_table_row(l))
        .collect();
    if !table_rows.is_empty() {
        let data_rows = table_rows
            .iter()
            .filter(|l| !classify::is_table_separator(l))
            .count();
        if data_rows <= 1 {
            score -= PENALTY_HEADER_ONLY_TABLE;
        }
    }

    let fence_lines = trimmed.lines().filter(|l| classify::is_fence(l)).count();
    if fence_lines % 2 == 1 {
        score -= PENALTY_UNTERMINATED_FENCE;
    }

    if let Some(first_word) = trimmed.split_whitespace().next() {
        let word = first_word
            .trim_end_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if REFERENCE_WORDS.contains(&word.as_str()) {
            score -= PENALTY_LEADING_REFERENCE;
        }
    }

    if trimmed.chars().count() < MIN_CHUNK_CHARS {
        score -= PENALTY_TOO_SHORT;
    }

    score.clamp(0.0, 1.0)
}

/// One pre-segmented piece of a document: a sheet, a section, or a page.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub title: String,
    pub content: String,
}

/// Output of structural chunking: one or more whole units, or one slice of
/// an oversized unit.
#[derive(Debug, Clone)]
pub struct UnitChunk {
    /// Titles of every unit folded into this chunk.
    pub titles: Vec<String>,
    pub content: String,
    pub position: ChunkPosition,
}

/// Greedily pack whole units into chunks while the running token total stays
/// under budget. A single unit over budget is split with the token-bounded
/// splitter; its partial chunks all carry the unit's title and are tagged
/// `Partial { part, total }`.
pub fn chunk_units(units: &[SourceUnit], target_tokens: usize) -> Vec<UnitChunk> {
    let mut out: Vec<UnitChunk> = Vec::new();
    let mut cur_titles: Vec<String> = Vec::new();
    let mut cur_content = String::new();
    let mut cur_tokens = 0usize;
    let mut cur_first = 0usize;

    let flush = |out: &mut Vec<UnitChunk>,
                 titles: &mut Vec<String>,
                 content: &mut String,
                 tokens: &mut usize,
                 first: usize,
                 last: usize| {
        if titles.is_empty() {
            return;
        }
        out.push(UnitChunk {
            titles: std::mem::take(titles),
            content: std::mem::take(content),
            position: ChunkPosition {
                start: first,
                end: last,
                kind: ChunkKind::Full,
            },
        });
        *tokens = 0;
    };

    for (i, unit) in units.iter().enumerate() {
        let unit_tokens = estimate_tokens(&unit.content);

        if unit_tokens > target_tokens {
            flush(
                &mut out,
                &mut cur_titles,
                &mut cur_content,
                &mut cur_tokens,
                cur_first,
                i,
            );
            let parts = chunk_text(&unit.content, target_tokens, &ChunkOptions::default());
            let total = parts.len();
            for (part_idx, part) in parts.into_iter().enumerate() {
                out.push(UnitChunk {
                    titles: vec![unit.title.clone()],
                    content: part,
                    position: ChunkPosition {
                        start: i,
                        end: i + 1,
                        kind: ChunkKind::Partial {
                            part: part_idx + 1,
                            total,
                        },
                    },
                });
            }
            cur_first = i + 1;
            continue;
        }

        if cur_tokens + unit_tokens > target_tokens && !cur_titles.is_empty() {
            flush(
                &mut out,
                &mut cur_titles,
                &mut cur_content,
                &mut cur_tokens,
                cur_first,
                i,
            );
            cur_first = i;
        }

        if !cur_content.is_empty() {
            cur_content.push_str("\n\n");
        }
        cur_content.push_str(&unit.content);
        cur_titles.push(unit.title.clone());
        cur_tokens += unit_tokens;
    }

    flush(
        &mut out,
        &mut cur_titles,
        &mut cur_content,
        &mut cur_tokens,
        cur_first,
        units.len(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::MIN_DENSE_TARGET;

    fn opts() -> ChunkOptions {
        ChunkOptions::default()
    }

    #[test]
    fn test_empty_text_single_empty_chunk() {
        let chunks = chunk_text("", 700, &opts());
        assert_eq!(chunks, vec![String::new()]);
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 700, &opts());
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_concatenation_is_lossless() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(100);
        let chunks = chunk_text(&text, 50, &opts());
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_exact_multiple_exact_count() {
        // 10 tokens = 40 chars; 8000 chars is exactly 200 chunks.
        let text = "x".repeat(8000);
        let chunks = chunk_text(&text, 10, &opts());
        assert_eq!(chunks.len(), 200);
        assert!(chunks.iter().all(|c| c.chars().count() == 40));
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "é".repeat(100);
        let chunks = chunk_text(&text, 10, &opts());
        assert_eq!(chunks.concat(), text);
        for c in &chunks {
            assert!(c.chars().count() <= 40);
        }
    }

    #[test]
    fn test_overlap_zero_identical_to_disabled() {
        let text = "Sentence one. Sentence two. Sentence three. ".repeat(50);
        let plain = chunk_text(&text, 30, &opts());
        let zero = chunk_text(
            &text,
            30,
            &ChunkOptions {
                overlap_tokens: 0,
                ..opts()
            },
        );
        assert_eq!(plain, zero);
    }

    #[test]
    fn test_overlap_repeats_previous_tail() {
        let text = "abcdefgh".repeat(100);
        let overlapped = chunk_text(
            &text,
            20, // 80 chars per window
            &ChunkOptions {
                overlap_tokens: 5, // 20 chars
                ..opts()
            },
        );
        let plain = chunk_text(&text, 20, &opts());
        assert_eq!(overlapped.len(), plain.len());
        for i in 1..overlapped.len() {
            let tail: String = plain[i - 1]
                .chars()
                .rev()
                .take(20)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            assert!(
                overlapped[i].starts_with(&tail),
                "chunk {} missing overlap",
                i
            );
            assert!(overlapped[i].ends_with(plain[i].as_str()));
        }
    }

    #[test]
    fn test_overlap_clamped_to_half_target() {
        let text = "z".repeat(1000);
        // Requested overlap is larger than the target; clamp keeps chunks finite.
        let chunks = chunk_text(
            &text,
            20,
            &ChunkOptions {
                overlap_tokens: 100,
                ..opts()
            },
        );
        // 80-char windows plus at most 40 chars of overlap.
        assert!(chunks.iter().all(|c| c.chars().count() <= 120));
        assert!(chunks[1].chars().count() == 120);
    }

    #[test]
    fn test_adaptive_sizing_shrinks_dense_content() {
        let text = "| A | B |\n|---|---|\n| 1 | 2 |\n".repeat(200);
        let adaptive = chunk_text(
            &text,
            1000,
            &ChunkOptions {
                adaptive_sizing: true,
                ..opts()
            },
        );
        let fixed = chunk_text(&text, 1000, &opts());
        assert!(adaptive.len() > fixed.len());
        // Effective target is >= 500 tokens, so full chunks hold at least
        // that many chars.
        assert!(adaptive[0].chars().count() >= MIN_DENSE_TARGET);
    }

    #[test]
    fn test_preserve_blocks_keeps_table_whole() {
        let mut text = String::new();
        for i in 0..30 {
            text.push_str(&format!("Paragraph {} of surrounding prose text here.\n", i));
        }
        let table = "| col1 | col2 |\n|------|------|\n| a | b |\n| c | d |\n";
        text.push_str(table);
        for i in 0..30 {
            text.push_str(&format!("Trailing paragraph {} of more prose text.\n", i));
        }

        let chunks = chunk_text(
            &text,
            100, // 400-char budget, table fits inside one
            &ChunkOptions {
                preserve_blocks: true,
                ..opts()
            },
        );
        let holders: Vec<&String> = chunks.iter().filter(|c| c.contains("| col1 |")).collect();
        assert_eq!(holders.len(), 1);
        assert!(
            holders[0].contains("| c | d |"),
            "table was split across chunks"
        );
    }

    #[test]
    fn test_preserve_blocks_lossless() {
        let text = "intro text\n```\ncode here\n```\n- one\n- two\nmore prose after the list\n";
        let chunks = chunk_text(
            text,
            5,
            &ChunkOptions {
                preserve_blocks: true,
                ..opts()
            },
        );
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_oversized_block_emitted_alone() {
        let mut text = String::from("A short intro line.\n");
        text.push_str("| h1 | h2 |\n|----|----|\n");
        for i in 0..200 {
            text.push_str(&format!("| row{} | value{} |\n", i, i));
        }
        text.push_str("A short outro line.\n");

        let chunks = chunk_text(
            &text,
            50, // 200 chars; the table is far larger
            &ChunkOptions {
                preserve_blocks: true,
                ..opts()
            },
        );
        let with_table: Vec<&String> = chunks.iter().filter(|c| c.contains("| row0 |")).collect();
        assert_eq!(with_table.len(), 1);
        assert!(with_table[0].contains("| row199 |"));
        assert!(with_table[0].chars().count() > 200);
    }

    #[test]
    fn test_quality_empty_is_zero() {
        assert_eq!(score_chunk_quality(""), 0.0);
        assert_eq!(score_chunk_quality("   \n "), 0.0);
    }

    #[test]
    fn test_quality_always_in_unit_interval() {
        let samples = [
            "it\n- x\n| h |\n|---|\n```",
            "A complete, well-formed sentence that stands alone quite nicely.",
            "```\nunclosed",
            "lowercase start and no ending",
        ];
        for s in samples {
            let q = score_chunk_quality(s);
            assert!(
                (0.0..=1.0).contains(&q),
                "score {} out of range for {:?}",
                q,
                s
            );
        }
    }

    #[test]
    fn test_quality_clean_sentence_scores_high() {
        let q = score_chunk_quality(
            "Revenue grew by twelve percent across all three regions this quarter.",
        );
        assert!(q >= 0.9, "got {}", q);
    }

    #[test]
    fn test_quality_unterminated_fence_is_heaviest() {
        let base = "A reasonably long paragraph of text that ends with punctuation and filler.";
        let with_fence = format!("{}\n```\nlet x = 1;", base);
        let with_orphan = format!("{}\n- lone item", base);
        assert!(score_chunk_quality(&with_fence) < score_chunk_quality(&with_orphan));
    }

    #[test]
    fn test_quality_penalizes_reference_opening() {
        let anchored =
            "Budgets were finalized in April after a long review cycle by the finance team.";
        let dangling =
            "However budgets were finalized in April after a long review cycle by finance.";
        assert!(score_chunk_quality(dangling) < score_chunk_quality(anchored));
    }

    #[test]
    fn test_quality_threshold_keeps_best_when_all_fail() {
        // Tiny fragments all score poorly; exactly one must survive.
        let text = "ab cd ef gh ij kl";
        let chunks = chunk_text(
            text,
            1, // 4-char windows
            &ChunkOptions {
                quality_threshold: Some(0.99),
                ..opts()
            },
        );
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_quality_threshold_filters_low_scorers() {
        let good = "This is a fully formed sentence with enough length to stand by itself. ";
        let text = format!("{}{}x", good, good); // trailing fragment
        let all = chunk_text(&text, 18, &opts()); // 72-char windows
        let filtered = chunk_text(
            &text,
            18,
            &ChunkOptions {
                quality_threshold: Some(0.85),
                ..opts()
            },
        );
        assert!(filtered.len() < all.len());
    }

    #[test]
    fn test_chunk_units_packs_whole_units() {
        let units = vec![
            SourceUnit {
                title: "Sheet1".to_string(),
                content: "a".repeat(400), // 100 tokens
            },
            SourceUnit {
                title: "Sheet2".to_string(),
                content: "b".repeat(400),
            },
            SourceUnit {
                title: "Sheet3".to_string(),
                content: "c".repeat(400),
            },
        ];
        let chunks = chunk_units(&units, 250);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].titles, vec!["Sheet1", "Sheet2"]);
        assert_eq!(chunks[1].titles, vec!["Sheet3"]);
        assert_eq!(chunks[0].position.kind, ChunkKind::Full);
        assert_eq!(chunks[0].position.start, 0);
        assert_eq!(chunks[0].position.end, 2);
    }

    #[test]
    fn test_chunk_units_splits_oversized_unit() {
        let units = vec![
            SourceUnit {
                title: "Small".to_string(),
                content: "tiny".to_string(),
            },
            SourceUnit {
                title: "Huge".to_string(),
                content: "x".repeat(4000), // 1000 tokens
            },
        ];
        let chunks = chunk_units(&units, 300);
        // One chunk for "Small", then ceil(1000/300) = 4 partials for "Huge".
        assert_eq!(chunks.len(), 5);
        let partials: Vec<&UnitChunk> = chunks
            .iter()
            .filter(|c| matches!(c.position.kind, ChunkKind::Partial { .. }))
            .collect();
        assert_eq!(partials.len(), 4);
        for (i, p) in partials.iter().enumerate() {
            assert_eq!(p.titles, vec!["Huge"]);
            assert_eq!(p.position.start, 1);
            assert_eq!(
                p.position.kind,
                ChunkKind::Partial {
                    part: i + 1,
                    total: 4
                }
            );
        }
        // Partial contents reassemble the unit.
        let rebuilt: String = partials.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(rebuilt, units[1].content);
    }

    #[test]
    fn test_chunk_units_empty_input() {
        assert!(chunk_units(&[], 500).is_empty());
    }

    #[test]
    fn test_chunk_units_preserves_order() {
        let units: Vec<SourceUnit> = (0..10)
            .map(|i| SourceUnit {
                title: format!("S{}", i),
                content: format!("content of sheet number {}", i),
            })
            .collect();
        let chunks = chunk_units(&units, 20);
        let titles: Vec<&String> = chunks.iter().flat_map(|c| &c.titles).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("S{}", i)).collect();
        assert_eq!(titles, expected.iter().collect::<Vec<_>>());
    }
}
