//! Plan contexts.

use rusqlite::{params, Row};

use super::utils::{count, id, timestamp};
use crate::{
    error::{DatabaseResultExt, Result},
    models::Context,
};

// A reloaded file replaces the stored body and keeps the row's ID.
const UPSERT_CONTEXT_SQL: &str = "INSERT INTO contexts (plan_id, name, file_path, body, sha, num_tokens, created_at, updated_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
     ON CONFLICT (plan_id, file_path) DO UPDATE SET name = excluded.name, body = excluded.body, \
     sha = excluded.sha, num_tokens = excluded.num_tokens, updated_at = excluded.updated_at \
     RETURNING id, created_at";
const SELECT_CONTEXTS_SQL: &str = "SELECT id, plan_id, name, file_path, body, sha, num_tokens, created_at, updated_at \
     FROM contexts WHERE plan_id = ?1 ORDER BY id";

fn context_from_row(row: &Row<'_>) -> rusqlite::Result<Context> {
    Ok(Context {
        id: id(row, 0)?,
        plan_id: id(row, 1)?,
        name: row.get(2)?,
        file_path: row.get(3)?,
        body: row.get(4)?,
        sha: row.get(5)?,
        num_tokens: count(row, 6)?,
        created_at: timestamp(row, 7)?,
        updated_at: timestamp(row, 8)?,
    })
}

impl super::Database {
    /// Inserts a context, or replaces the body of the context already loaded
    /// for the same file path.
    pub fn upsert_context(&mut self, context: &Context) -> Result<Context> {
        let (id, created_at) = self
            .connection
            .query_row(
                UPSERT_CONTEXT_SQL,
                params![
                    context.plan_id as i64,
                    &context.name,
                    context.file_path.as_deref(),
                    &context.body,
                    &context.sha,
                    context.num_tokens as i64,
                    context.updated_at.to_string(),
                ],
                |row| Ok((id(row, 0)?, timestamp(row, 1)?)),
            )
            .db_context("Failed to store context")?;

        self.refresh_plan_tokens(context.plan_id)?;
        Ok(Context {
            id,
            created_at,
            ..context.clone()
        })
    }

    pub fn get_contexts(&self, plan_id: u64) -> Result<Vec<Context>> {
        let mut stmt = self
            .connection
            .prepare(SELECT_CONTEXTS_SQL)
            .db_context("Failed to prepare query")?;

        let contexts = stmt
            .query_map(params![plan_id as i64], context_from_row)
            .db_context("Failed to query contexts")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .db_context("Failed to read context rows")?;
        Ok(contexts)
    }
}
