//! Character-length token estimation.
//!
//! Every size computed by the pipeline goes through [`estimate_tokens`].
//! The chars-per-token ratio is an intentional simplification that keeps the
//! core free of tokenizer dependencies; swapping in a real tokenizer here
//! would not change any other contract.

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Approximate token count for a piece of text. Empty text is 0 tokens;
/// any non-empty text is at least 1.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        0
    } else {
        chars.div_ceil(CHARS_PER_TOKEN)
    }
}

/// Character budget corresponding to a token budget.
pub fn chars_for_tokens(tokens: usize) -> usize {
    tokens * CHARS_PER_TOKEN
}
