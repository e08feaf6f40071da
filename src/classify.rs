//! Content classification heuristics.
//!
//! Two jobs: profile a document as dense (tables, lists, code) or sparse
//! (prose) to drive adaptive chunk sizing, and detect non-splittable blocks
//! so the chunker never cuts through the middle of a table or fenced code
//! block. Everything here is regex-heuristic and approximate; thresholds are
//! named constants exercised directly by the tests below.

use once_cell::sync::Lazy;
use regex::Regex;

/// Table-line fraction at or above which content is dense. Tables take
/// priority over the combined ratio in mixed content.
pub const DENSE_TABLE_RATIO: f32 = 0.25;
/// Combined table+list+code line fraction at or above which content is dense.
pub const DENSE_LINE_RATIO: f32 = 0.40;
/// Floor for the adaptive target when content is dense.
pub const MIN_DENSE_TARGET: usize = 500;
/// Ceiling for the adaptive target when content is sparse prose.
pub const MAX_SPARSE_TARGET: usize = 1500;

static LIST_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+\S").unwrap());
static TABLE_ROW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\|.*\|\s*$").unwrap());
static TABLE_SEP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\|[\s:|\-]+\|\s*$").unwrap());
static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*```").unwrap());

/// Line classifiers shared with the chunk quality scorer.
pub fn is_list_item(line: &str) -> bool {
    LIST_ITEM_RE.is_match(line)
}

pub fn is_table_row(line: &str) -> bool {
    TABLE_ROW_RE.is_match(line)
}

/// A table alignment row like `|---|:---:|`.
pub fn is_table_separator(line: &str) -> bool {
    TABLE_SEP_RE.is_match(line) && line.contains('-')
}

pub fn is_fence(line: &str) -> bool {
    FENCE_RE.is_match(line)
}

/// What makes a span of text non-splittable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    FencedCode,
    Table,
    List,
}

/// A byte-offset span the chunker must treat as atomic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub start: usize,
    pub end: usize,
    pub kind: BlockKind,
}

/// Per-line-kind fractions over the non-blank lines of a text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentProfile {
    pub table_ratio: f32,
    pub list_ratio: f32,
    pub code_ratio: f32,
}

impl ContentProfile {
    /// Dense content benefits from smaller chunks. Tables dominate the
    /// decision in mixed content.
    pub fn is_dense(&self) -> bool {
        self.table_ratio >= DENSE_TABLE_RATIO
            || self.table_ratio + self.list_ratio + self.code_ratio >= DENSE_LINE_RATIO
    }
}

/// Classify the line makeup of a text.
pub fn content_profile(text: &str) -> ContentProfile {
    let mut total = 0usize;
    let mut table = 0usize;
    let mut list = 0usize;
    let mut code = 0usize;
    let mut in_fence = false;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        total += 1;
        if FENCE_RE.is_match(line) {
            code += 1;
            in_fence = !in_fence;
        } else if in_fence {
            code += 1;
        } else if TABLE_ROW_RE.is_match(line) {
            table += 1;
        } else if LIST_ITEM_RE.is_match(line) {
            list += 1;
        }
    }

    if total == 0 {
        return ContentProfile::default();
    }
    let t = total as f32;
    ContentProfile {
        table_ratio: table as f32 / t,
        list_ratio: list as f32 / t,
        code_ratio: code as f32 / t,
    }
}

/// Pick a chunk target for this text given the configured default.
///
/// Dense content halves the target (floored at [`MIN_DENSE_TARGET`], never
/// raised above the default); sparse prose grows it by half (capped at
/// [`MAX_SPARSE_TARGET`], never lowered below the default). Empty text keeps
/// the default unchanged.
pub fn adaptive_target(text: &str, default_target: usize) -> usize {
    if text.trim().is_empty() {
        return default_target;
    }
    let profile = content_profile(text);
    if profile.is_dense() {
        (default_target / 2).max(MIN_DENSE_TARGET).min(default_target)
    } else {
        (default_target * 3 / 2)
            .min(MAX_SPARSE_TARGET)
            .max(default_target)
    }
}

/// Detect non-splittable spans: fenced code, markdown tables, and contiguous
/// list runs. Spans are byte offsets, sorted by start, non-overlapping.
/// Fences take precedence over table/list rows inside them; an unterminated
/// fence runs to the end of the text. Single list items and lone table rows
/// are not blocks.
pub fn detect_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();

    // (byte offset, line including any trailing newline)
    let mut offset = 0usize;
    let lines: Vec<(usize, &str)> = text
        .split_inclusive('\n')
        .map(|line| {
            let at = offset;
            offset += line.len();
            (at, line)
        })
        .collect();

    let mut i = 0usize;
    while i < lines.len() {
        let (start, line) = lines[i];

        if FENCE_RE.is_match(line) {
            // Scan for the closing fence; absent one, the block runs out.
            let mut j = i + 1;
            let mut end = text.len();
            while j < lines.len() {
                if FENCE_RE.is_match(lines[j].1) {
                    end = lines[j].0 + lines[j].1.len();
                    break;
                }
                j += 1;
            }
            blocks.push(Block {
                start,
                end,
                kind: BlockKind::FencedCode,
            });
            i = if j < lines.len() { j + 1 } else { lines.len() };
            continue;
        }

        if TABLE_ROW_RE.is_match(line) {
            let mut j = i;
            while j < lines.len() && TABLE_ROW_RE.is_match(lines[j].1) {
                j += 1;
            }
            if j - i >= 2 {
                let (last_at, last_line) = lines[j - 1];
                blocks.push(Block {
                    start,
                    end: last_at + last_line.len(),
                    kind: BlockKind::Table,
                });
                i = j;
                continue;
            }
        }

        if LIST_ITEM_RE.is_match(line) {
            let mut j = i;
            while j < lines.len() && LIST_ITEM_RE.is_match(lines[j].1) {
                j += 1;
            }
            if j - i >= 2 {
                let (last_at, last_line) = lines[j - 1];
                blocks.push(Block {
                    start,
                    end: last_at + last_line.len(),
                    kind: BlockKind::List,
                });
                i = j;
                continue;
            }
        }

        i += 1;
    }

    blocks
}
