//! Token estimates for stored text.
//!
//! Streamed replies are counted one token per model chunk. Text that did not
//! arrive as a stream (prompts, contexts, re-parsed messages) is estimated at
//! four characters per token.

const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of `text`.
pub fn estimate(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}
