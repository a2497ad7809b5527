//! Ordered exact-substring replacement engine.
//!
//! Edits proposed by the builder model must read top to bottom through a
//! file. Each `old` is searched for only in the text after the previous
//! edit's inserted `new`, so a batch is applied in a single forward pass and
//! an out-of-order or overlapping edit fails instead of matching somewhere
//! unexpected. A failed edit leaves the content untouched and the pass
//! continues with the next one.

pub mod correction;
pub mod current;


pub use correction::correction_prompt;
pub use current::{current_plan_files, CurrentPlanFiles};

use crate::models::Replacement;

/// Result of one forward pass over a replacement list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub content: String,
    /// Positions in the input list of replacements whose `old` was not found
    pub failed: Vec<usize>,
}

impl ApplyOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applies `replacements` to `content` in list order without touching the
/// replacements themselves.
pub fn apply_in_order<'a, I>(content: &str, replacements: I) -> ApplyOutcome
where
    I: IntoIterator<Item = &'a Replacement>,
{
    let mut updated = content.to_string();
    let mut last_inserted_idx = 0;
    let mut failed = Vec::new();

    for (idx, replacement) in replacements.into_iter().enumerate() {
        match updated[last_inserted_idx..].find(&replacement.old) {
            Some(offset) => {
                let start = last_inserted_idx + offset;
                updated.replace_range(start..start + replacement.old.len(), &replacement.new);
                last_inserted_idx = start + replacement.new.len();
            }
            None => failed.push(idx),
        }
    }

    ApplyOutcome {
        content: updated,
        failed,
    }
}

/// Applies `replacements` to `content`, marking each one whose `old` is not
/// found in the remaining text as failed.
///
/// Returns the updated content and whether every replacement succeeded.
///
/// # Examples
///
/// ```rust
/// use planstream_core::{models::Replacement, replace::apply_replacements};
///
/// let mut reps = vec![Replacement::new("X", "Y")];
/// let (updated, all_succeeded) = apply_replacements("abcXdef", &mut reps);
/// assert_eq!(updated, "abcYdef");
/// assert!(all_succeeded);
/// ```
pub fn apply_replacements(content: &str, replacements: &mut [Replacement]) -> (String, bool) {
    let outcome = apply_in_order(content, replacements.iter());
    for &idx in &outcome.failed {
        replacements[idx].failed = true;
    }
    let all_succeeded = outcome.all_succeeded();
    (outcome.content, all_succeeded)
}
