//! Plan CRUD operations and queries.

use jiff::Timestamp;
use rusqlite::{params, OptionalExtension, Row};

use super::utils::{count, id, parsed, timestamp};
use crate::{
    error::{DatabaseResultExt, Result},
    models::{Plan, PlanStatus},
};

const INSERT_PLAN_SQL: &str =
    "INSERT INTO plans (name, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)";
const PLAN_COLUMNS: &str =
    "id, name, status, error, context_tokens, convo_tokens, created_at, updated_at";
const UPDATE_PLAN_STATUS_SQL: &str =
    "UPDATE plans SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4";
const UPDATE_PLAN_TOKENS_SQL: &str = "UPDATE plans SET context_tokens = (SELECT COALESCE(SUM(num_tokens), 0) FROM contexts WHERE plan_id = ?1), \
     convo_tokens = (SELECT COALESCE(SUM(tokens), 0) FROM convo_messages WHERE plan_id = ?1), updated_at = ?2 WHERE id = ?1";

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<Plan> {
    Ok(Plan {
        id: id(row, 0)?,
        name: row.get(1)?,
        status: parsed::<PlanStatus>(row, 2, "plan status")?,
        error: row.get(3)?,
        context_tokens: count(row, 4)?,
        convo_tokens: count(row, 5)?,
        created_at: timestamp(row, 6)?,
        updated_at: timestamp(row, 7)?,
    })
}

impl super::Database {
    /// Creates a plan with no conversation yet.
    pub fn create_plan(&mut self, name: &str) -> Result<Plan> {
        let now = Timestamp::now();
        let now_str = now.to_string();

        self.connection
            .execute(
                INSERT_PLAN_SQL,
                params![name, PlanStatus::Finished.as_str(), &now_str, &now_str],
            )
            .db_context("Failed to insert plan")?;

        Ok(Plan {
            id: self.connection.last_insert_rowid() as u64,
            name: name.to_string(),
            status: PlanStatus::Finished,
            error: None,
            context_tokens: 0,
            convo_tokens: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Retrieves a plan by its ID.
    pub fn get_plan(&self, id: u64) -> Result<Option<Plan>> {
        self.connection
            .query_row(
                &format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?1"),
                params![id as i64],
                plan_from_row,
            )
            .optional()
            .db_context("Failed to query plan")
    }

    /// Lists plans, newest first.
    pub fn list_plans(&self) -> Result<Vec<Plan>> {
        let mut stmt = self
            .connection
            .prepare(&format!(
                "SELECT {PLAN_COLUMNS} FROM plans ORDER BY created_at DESC, id DESC"
            ))
            .db_context("Failed to prepare query")?;

        let plans = stmt
            .query_map([], plan_from_row)
            .db_context("Failed to query plans")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .db_context("Failed to read plan rows")?;
        Ok(plans)
    }

    /// Records the status of the latest execution. Returns false when the
    /// plan does not exist.
    pub fn update_plan_status(
        &self,
        id: u64,
        status: PlanStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let updated = self
            .connection
            .execute(
                UPDATE_PLAN_STATUS_SQL,
                params![status.as_str(), error, Timestamp::now().to_string(), id as i64],
            )
            .db_context("Failed to update plan status")?;
        Ok(updated > 0)
    }

    /// Recomputes the plan's context and conversation token totals.
    pub fn refresh_plan_tokens(&self, id: u64) -> Result<()> {
        self.connection
            .execute(
                UPDATE_PLAN_TOKENS_SQL,
                params![id as i64, Timestamp::now().to_string()],
            )
            .db_context("Failed to update plan tokens")?;
        Ok(())
    }
}
