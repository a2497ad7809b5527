//! Plan model definition.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::PlanStatus;

/// The persistent task aggregate a user iterates on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    /// Unique identifier for the plan
    pub id: u64,

    /// Human-readable plan name
    pub name: String,

    /// Status of the latest execution
    #[serde(default)]
    pub status: PlanStatus,

    /// Error text recorded with an `error` status
    pub error: Option<String>,

    /// Tokens across all loaded contexts
    pub context_tokens: usize,

    /// Tokens across the stored conversation
    pub convo_tokens: usize,

    /// Timestamp when the plan was created (UTC)
    pub created_at: Timestamp,

    /// Timestamp when the plan was last modified (UTC)
    pub updated_at: Timestamp,
}
