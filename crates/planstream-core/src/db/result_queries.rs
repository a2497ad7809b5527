//! Build results and their replacements.

use std::collections::HashMap;

use jiff::Timestamp;
use rusqlite::{params, Row};

use super::utils::{id, optional_timestamp};
use crate::{
    error::{DatabaseResultExt, Result},
    models::{PlanFileResult, Replacement},
};

const INSERT_RESULT_SQL: &str = "INSERT INTO plan_file_results \
     (plan_id, convo_message_id, path, context_sha, content, any_failed, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
const INSERT_REPLACEMENT_SQL: &str = "INSERT INTO replacements (result_id, position, old, new, summary, failed) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";
const SELECT_RESULTS_SQL: &str = "SELECT id, plan_id, convo_message_id, path, context_sha, content, any_failed, \
     applied_at, rejected_at, created_at FROM plan_file_results WHERE plan_id = ?1 ORDER BY id";
const SELECT_REPLACEMENTS_SQL: &str = "SELECT r.id, r.result_id, r.old, r.new, r.summary, r.failed, r.rejected_at \
     FROM replacements r JOIN plan_file_results f ON f.id = r.result_id \
     WHERE f.plan_id = ?1 ORDER BY r.result_id, r.position";
const SET_RESULT_APPLIED_SQL: &str =
    "UPDATE plan_file_results SET applied_at = ?1 WHERE id = ?2 AND applied_at IS NULL";
const SET_RESULT_REJECTED_SQL: &str =
    "UPDATE plan_file_results SET rejected_at = ?1 WHERE id = ?2 AND applied_at IS NULL AND rejected_at IS NULL";
const SET_RESULT_REPLACEMENTS_REJECTED_SQL: &str =
    "UPDATE replacements SET rejected_at = ?1 WHERE result_id = ?2 AND rejected_at IS NULL";
const SET_REPLACEMENT_REJECTED_SQL: &str =
    "UPDATE replacements SET rejected_at = ?1 WHERE id = ?2 AND rejected_at IS NULL";

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<PlanFileResult> {
    Ok(PlanFileResult {
        id: id(row, 0)?,
        plan_id: id(row, 1)?,
        convo_message_id: id(row, 2)?,
        path: row.get(3)?,
        context_sha: row.get(4)?,
        content: row.get(5)?,
        replacements: Vec::new(),
        any_failed: row.get(6)?,
        applied_at: optional_timestamp(row, 7)?,
        rejected_at: optional_timestamp(row, 8)?,
        created_at: optional_timestamp(row, 9)?,
    })
}

fn replacement_from_row(row: &Row<'_>) -> rusqlite::Result<(u64, Replacement)> {
    Ok((
        id(row, 1)?,
        Replacement {
            id: id(row, 0)?,
            old: row.get(2)?,
            new: row.get(3)?,
            summary: row.get(4)?,
            failed: row.get(5)?,
            rejected_at: optional_timestamp(row, 6)?,
        },
    ))
}

impl super::Database {
    /// Stores a result and its replacements in one transaction, returning
    /// the result with all IDs assigned.
    pub fn insert_file_result(&mut self, result: &PlanFileResult) -> Result<PlanFileResult> {
        let tx = self
            .connection
            .transaction()
            .db_context("Failed to begin transaction")?;

        let created_at = result.created_at.unwrap_or_else(Timestamp::now);
        tx.execute(
            INSERT_RESULT_SQL,
            params![
                result.plan_id as i64,
                result.convo_message_id as i64,
                &result.path,
                result.context_sha.as_deref(),
                &result.content,
                result.any_failed,
                created_at.to_string(),
            ],
        )
        .db_context("Failed to insert plan file result")?;
        let result_id = tx.last_insert_rowid() as u64;

        let mut replacements = Vec::with_capacity(result.replacements.len());
        for (position, replacement) in result.replacements.iter().enumerate() {
            tx.execute(
                INSERT_REPLACEMENT_SQL,
                params![
                    result_id as i64,
                    position as i64,
                    &replacement.old,
                    &replacement.new,
                    &replacement.summary,
                    replacement.failed,
                ],
            )
            .db_context("Failed to insert replacement")?;
            replacements.push(Replacement {
                id: tx.last_insert_rowid() as u64,
                ..replacement.clone()
            });
        }

        tx.commit().db_context("Failed to commit transaction")?;

        Ok(PlanFileResult {
            id: result_id,
            replacements,
            created_at: Some(created_at),
            ..result.clone()
        })
    }

    /// All results of a plan in build order, replacements in list order.
    pub fn get_file_results(&self, plan_id: u64) -> Result<Vec<PlanFileResult>> {
        let mut stmt = self
            .connection
            .prepare(SELECT_RESULTS_SQL)
            .db_context("Failed to prepare query")?;
        let mut results = stmt
            .query_map(params![plan_id as i64], result_from_row)
            .db_context("Failed to query plan file results")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .db_context("Failed to read plan file result rows")?;

        let mut stmt = self
            .connection
            .prepare(SELECT_REPLACEMENTS_SQL)
            .db_context("Failed to prepare query")?;
        let rows = stmt
            .query_map(params![plan_id as i64], replacement_from_row)
            .db_context("Failed to query replacements")?;

        let mut by_result: HashMap<u64, Vec<Replacement>> = HashMap::new();
        for row in rows {
            let (result_id, replacement) = row.db_context("Failed to read replacement row")?;
            by_result.entry(result_id).or_default().push(replacement);
        }
        for result in &mut results {
            result.replacements = by_result.remove(&result.id).unwrap_or_default();
        }

        Ok(results)
    }

    /// Marks the given results applied. Returns how many rows changed.
    pub fn mark_results_applied(&mut self, result_ids: &[u64], at: Timestamp) -> Result<usize> {
        let tx = self
            .connection
            .transaction()
            .db_context("Failed to begin transaction")?;
        let at = at.to_string();
        let mut updated = 0;
        for result_id in result_ids {
            updated += tx
                .execute(SET_RESULT_APPLIED_SQL, params![&at, *result_id as i64])
                .db_context("Failed to mark result applied")?;
        }
        tx.commit().db_context("Failed to commit transaction")?;
        Ok(updated)
    }

    /// Rejects the given results along with their replacements. Returns how
    /// many results changed.
    pub fn reject_results(&mut self, result_ids: &[u64], at: Timestamp) -> Result<usize> {
        let tx = self
            .connection
            .transaction()
            .db_context("Failed to begin transaction")?;
        let at = at.to_string();
        let mut updated = 0;
        for result_id in result_ids {
            let changed = tx
                .execute(SET_RESULT_REJECTED_SQL, params![&at, *result_id as i64])
                .db_context("Failed to reject result")?;
            if changed > 0 {
                tx.execute(
                    SET_RESULT_REPLACEMENTS_REJECTED_SQL,
                    params![&at, *result_id as i64],
                )
                .db_context("Failed to reject result replacements")?;
            }
            updated += changed;
        }
        tx.commit().db_context("Failed to commit transaction")?;
        Ok(updated)
    }

    /// Rejects one replacement. Returns false when it does not exist or was
    /// already rejected.
    pub fn reject_replacement(&self, replacement_id: u64, at: Timestamp) -> Result<bool> {
        let updated = self
            .connection
            .execute(
                SET_REPLACEMENT_REJECTED_SQL,
                params![at.to_string(), replacement_id as i64],
            )
            .db_context("Failed to reject replacement")?;
        Ok(updated > 0)
    }
}
