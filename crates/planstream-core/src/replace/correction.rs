//! Corrective message sent back to the builder model after failed matches.

use std::fmt::Write;

use crate::models::Replacement;

/// Builds the message listing every failed replacement's `old` text.
///
/// Returns `None` when nothing failed.
pub fn correction_prompt(replacements: &[Replacement]) -> Option<String> {
    let failed: Vec<(usize, &Replacement)> = replacements
        .iter()
        .enumerate()
        .filter(|(_, r)| r.failed)
        .collect();
    if failed.is_empty() {
        return None;
    }

    let mut msg = String::from("There were errors with the replacements you suggested.");
    for (index, replacement) in failed {
        let _ = write!(
            msg,
            "\n\nError in replacement at index {index}:\n- The string '{}' (which you set for the 'old' key) was not found verbatim in the current state of the file.",
            replacement.old
        );
    }
    msg.push_str(
        "\n\nReplacements are applied in order, and each 'old' string is only searched for after the previous replacement. \
Please review these errors and respond again with a corrected list of replacements. Pay special attention to special characters, \
extra spaces, or anything else that might cause the strings to not match exactly.",
    );
    Some(msg)
}
