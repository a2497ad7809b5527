//! Build results: proposed replacements grouped per file.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// One proposed edit: replace the exact text `old` with `new`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Replacement {
    #[serde(default)]
    pub id: u64,
    pub old: String,
    pub new: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<Timestamp>,
}

impl Replacement {
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
            ..Self::default()
        }
    }

    /// Attaches a human-readable summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Neither failed nor rejected.
    pub fn is_pending(&self) -> bool {
        !self.failed && self.rejected_at.is_none()
    }

    pub fn set_rejected(&mut self, at: Timestamp) {
        self.rejected_at = Some(at);
    }
}

/// All replacements proposed for one file in one build cycle.
///
/// A result with `content` and no replacements is a whole-file result for
/// a file that did not exist before the build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanFileResult {
    #[serde(default)]
    pub id: u64,
    pub plan_id: u64,
    pub convo_message_id: u64,
    pub path: String,
    /// SHA of the context the replacements were computed against
    #[serde(default)]
    pub context_sha: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub replacements: Vec<Replacement>,
    #[serde(default)]
    pub any_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<Timestamp>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

impl PlanFileResult {
    pub fn num_pending_replacements(&self) -> usize {
        self.replacements.iter().filter(|r| r.is_pending()).count()
    }

    /// Not yet applied or rejected, and still carrying something to apply.
    pub fn is_pending(&self) -> bool {
        self.applied_at.is_none()
            && self.rejected_at.is_none()
            && (!self.content.is_empty() || self.num_pending_replacements() > 0)
    }

    /// Whole-file result rather than a replacement list.
    pub fn is_new_file(&self) -> bool {
        self.replacements.is_empty() && !self.content.is_empty()
    }
}

/// Results for a plan grouped by path, in build order within each path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanResult {
    pub sorted_paths: Vec<String>,
    pub file_results_by_path: BTreeMap<String, Vec<PlanFileResult>>,
}

impl PlanResult {
    /// Groups results by path, preserving the given order within a path.
    pub fn from_results(results: Vec<PlanFileResult>) -> Self {
        let mut file_results_by_path: BTreeMap<String, Vec<PlanFileResult>> = BTreeMap::new();
        for result in results {
            file_results_by_path
                .entry(result.path.clone())
                .or_default()
                .push(result);
        }
        let sorted_paths = file_results_by_path.keys().cloned().collect();
        Self {
            sorted_paths,
            file_results_by_path,
        }
    }

    /// Number of pending results across all paths.
    pub fn num_pending(&self) -> usize {
        self.results().filter(|r| r.is_pending()).count()
    }

    /// Pending replacement count for one path.
    pub fn num_pending_for_path(&self, path: &str) -> usize {
        self.file_results_by_path
            .get(path)
            .map(|results| {
                results
                    .iter()
                    .filter(|r| r.is_pending())
                    .map(PlanFileResult::num_pending_replacements)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Whether any result for any path recorded a failed replacement.
    pub fn any_failed(&self) -> bool {
        self.results().any(|r| r.any_failed)
    }

    /// Marks every pending result applied.
    pub fn set_applied(&mut self, at: Timestamp) {
        for result in self.results_mut() {
            if result.is_pending() {
                result.applied_at = Some(at);
            }
        }
    }

    /// Marks every pending result and its replacements rejected. Returns
    /// the number of results rejected.
    pub fn set_rejected(&mut self, at: Timestamp) -> usize {
        let mut num_rejected = 0;
        for result in self.results_mut() {
            if !result.is_pending() {
                continue;
            }
            result.rejected_at = Some(at);
            for replacement in &mut result.replacements {
                replacement.set_rejected(at);
            }
            num_rejected += 1;
        }
        num_rejected
    }

    pub fn results(&self) -> impl Iterator<Item = &PlanFileResult> {
        self.file_results_by_path.values().flatten()
    }

    fn results_mut(&mut self) -> impl Iterator<Item = &mut PlanFileResult> {
        self.file_results_by_path.values_mut().flatten()
    }
}
