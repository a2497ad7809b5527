//! Current plan file state: contexts with pending results replayed on top.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::apply_in_order;
use crate::{
    error::{PlanError, Result},
    models::{Context, PlanResult},
};

/// Path to content for every file a plan has touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentPlanFiles {
    pub files: BTreeMap<String, String>,
    pub context_shas: BTreeMap<String, String>,
}

/// Replays every pending result, per path in build order, over the loaded
/// file contexts.
///
/// # Errors
///
/// Returns `PlanError::Build` when a whole-file result lands on a path that
/// already has content, when a result was computed against a different
/// context version, or when a stored replacement no longer applies.
pub fn current_plan_files(contexts: &[Context], plan_result: &PlanResult) -> Result<CurrentPlanFiles> {
    let mut current = CurrentPlanFiles::default();

    for context in contexts {
        let Some(path) = context.file_path.as_ref() else {
            continue;
        };
        if plan_result.file_results_by_path.contains_key(path) {
            current.files.insert(path.clone(), context.body.clone());
            current.context_shas.insert(path.clone(), context.sha.clone());
        }
    }

    for (path, results) in &plan_result.file_results_by_path {
        let mut updated = current.files.get(path).cloned().unwrap_or_default();

        for result in results.iter().filter(|r| r.is_pending()) {
            if result.is_new_file() {
                if !updated.is_empty() {
                    return Err(build_error(path, "plan updates out of order"));
                }
                updated = result.content.clone();
                continue;
            }

            if let (Some(context_sha), Some(result_sha)) =
                (current.context_shas.get(path), result.context_sha.as_ref())
            {
                if context_sha != result_sha {
                    return Err(build_error(path, "result sha doesn't match context sha"));
                }
            }

            let outcome = apply_in_order(
                &updated,
                result.replacements.iter().filter(|r| r.is_pending()),
            );
            if !outcome.all_succeeded() {
                return Err(build_error(path, "plan replacement failed"));
            }
            updated = outcome.content;
        }

        current.files.insert(path.clone(), updated);
    }

    Ok(current)
}

fn build_error(path: &str, reason: &str) -> PlanError {
    PlanError::Build {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
