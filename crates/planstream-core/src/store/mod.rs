//! Persistence collaborator used by the orchestrator.
//!
//! [`PlanStore`] is synchronous: implementations may block on disk I/O, so
//! async callers go through [`blocking`], which moves the call onto tokio's
//! blocking pool.

use std::sync::Arc;

use jiff::Timestamp;
use tokio::task;

use crate::{
    error::{PlanError, Result},
    models::{Context, ConvoMessage, ConvoMessageDescription, Plan, PlanFileResult, PlanStatus},
};

pub mod memory;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage for plans and everything recorded while executing them.
pub trait PlanStore: Send + Sync {
    fn create_plan(&self, name: &str) -> Result<Plan>;

    fn get_plan(&self, plan_id: u64) -> Result<Option<Plan>>;

    fn list_plans(&self) -> Result<Vec<Plan>>;

    /// # Errors
    ///
    /// Returns `PlanError::PlanNotFound` if the plan does not exist.
    fn set_plan_status(&self, plan_id: u64, status: PlanStatus, error: Option<&str>) -> Result<()>;

    /// Stores a message and returns it with its ID assigned.
    fn store_convo_message(&self, message: &ConvoMessage) -> Result<ConvoMessage>;

    /// Conversation in sequence order.
    fn get_plan_convo(&self, plan_id: u64) -> Result<Vec<ConvoMessage>>;

    /// Stores a context, replacing a previously loaded one for the same path.
    fn store_context(&self, context: &Context) -> Result<Context>;

    fn get_plan_contexts(&self, plan_id: u64) -> Result<Vec<Context>>;

    fn store_description(&self, description: &ConvoMessageDescription) -> Result<ConvoMessageDescription>;

    /// Stores a build result and returns it with all IDs assigned.
    fn store_plan_file_result(&self, result: &PlanFileResult) -> Result<PlanFileResult>;

    /// Results in build order.
    fn get_plan_file_results(&self, plan_id: u64) -> Result<Vec<PlanFileResult>>;

    fn mark_results_applied(&self, result_ids: &[u64], at: Timestamp) -> Result<usize>;

    /// Rejects results and all their replacements.
    fn reject_results(&self, result_ids: &[u64], at: Timestamp) -> Result<usize>;

    fn reject_replacement(&self, replacement_id: u64, at: Timestamp) -> Result<bool>;
}

/// Runs a store call on the blocking pool.
pub(crate) async fn blocking<T, F>(store: &Arc<dyn PlanStore>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn PlanStore) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| PlanError::join(&e))?
}
