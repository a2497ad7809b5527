//! SQLite-backed store.

use std::path::{Path, PathBuf};

use jiff::Timestamp;

use super::PlanStore;
use crate::{
    db::Database,
    error::{PlanError, Result},
    models::{Context, ConvoMessage, ConvoMessageDescription, Plan, PlanFileResult, PlanStatus},
};

/// Opens a fresh connection to the database file for every call.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Creates the database file and its parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::FileSystem` if the parent directory cannot be
    /// created, or `PlanError::Database` if the schema cannot be initialized.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PlanError::FileSystem {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Database::new(&db_path)?;
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn db(&self) -> Result<Database> {
        Database::new(&self.db_path)
    }
}

impl PlanStore for SqliteStore {
    fn create_plan(&self, name: &str) -> Result<Plan> {
        self.db()?.create_plan(name)
    }

    fn get_plan(&self, plan_id: u64) -> Result<Option<Plan>> {
        self.db()?.get_plan(plan_id)
    }

    fn list_plans(&self) -> Result<Vec<Plan>> {
        self.db()?.list_plans()
    }

    fn set_plan_status(&self, plan_id: u64, status: PlanStatus, error: Option<&str>) -> Result<()> {
        if self.db()?.update_plan_status(plan_id, status, error)? {
            Ok(())
        } else {
            Err(PlanError::PlanNotFound { id: plan_id })
        }
    }

    fn store_convo_message(&self, message: &ConvoMessage) -> Result<ConvoMessage> {
        self.db()?.insert_convo_message(message)
    }

    fn get_plan_convo(&self, plan_id: u64) -> Result<Vec<ConvoMessage>> {
        self.db()?.get_convo(plan_id)
    }

    fn store_context(&self, context: &Context) -> Result<Context> {
        self.db()?.upsert_context(context)
    }

    fn get_plan_contexts(&self, plan_id: u64) -> Result<Vec<Context>> {
        self.db()?.get_contexts(plan_id)
    }

    fn store_description(&self, description: &ConvoMessageDescription) -> Result<ConvoMessageDescription> {
        self.db()?.insert_description(description)
    }

    fn store_plan_file_result(&self, result: &PlanFileResult) -> Result<PlanFileResult> {
        self.db()?.insert_file_result(result)
    }

    fn get_plan_file_results(&self, plan_id: u64) -> Result<Vec<PlanFileResult>> {
        self.db()?.get_file_results(plan_id)
    }

    fn mark_results_applied(&self, result_ids: &[u64], at: Timestamp) -> Result<usize> {
        self.db()?.mark_results_applied(result_ids, at)
    }

    fn reject_results(&self, result_ids: &[u64], at: Timestamp) -> Result<usize> {
        self.db()?.reject_results(result_ids, at)
    }

    fn reject_replacement(&self, replacement_id: u64, at: Timestamp) -> Result<bool> {
        self.db()?.reject_replacement(replacement_id, at)
    }
}
