//! Conversation messages and reply descriptions.

use rusqlite::{params, Row};

use super::utils::{count, id, parsed, timestamp};
use crate::{
    error::{DatabaseResultExt, Result},
    models::{ConvoMessage, ConvoMessageDescription, Role},
};

const INSERT_CONVO_MESSAGE_SQL: &str = "INSERT INTO convo_messages (plan_id, role, tokens, num, message, stopped, created_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
const SELECT_CONVO_SQL: &str = "SELECT id, plan_id, role, tokens, num, message, stopped, created_at \
     FROM convo_messages WHERE plan_id = ?1 ORDER BY num";
const INSERT_DESCRIPTION_SQL: &str = "INSERT INTO convo_message_descriptions \
     (plan_id, convo_message_id, made_plan, commit_msg, files, error, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ConvoMessage> {
    Ok(ConvoMessage {
        id: id(row, 0)?,
        plan_id: id(row, 1)?,
        role: parsed::<Role>(row, 2, "role")?,
        tokens: count(row, 3)?,
        num: count(row, 4)?,
        message: row.get(5)?,
        stopped: row.get(6)?,
        created_at: timestamp(row, 7)?,
    })
}

impl super::Database {
    /// Stores a message and returns it with its assigned ID.
    pub fn insert_convo_message(&mut self, message: &ConvoMessage) -> Result<ConvoMessage> {
        self.connection
            .execute(
                INSERT_CONVO_MESSAGE_SQL,
                params![
                    message.plan_id as i64,
                    message.role.as_str(),
                    message.tokens as i64,
                    message.num as i64,
                    &message.message,
                    message.stopped,
                    message.created_at.to_string(),
                ],
            )
            .db_context("Failed to insert convo message")?;

        let stored = ConvoMessage {
            id: self.connection.last_insert_rowid() as u64,
            ..message.clone()
        };
        self.refresh_plan_tokens(message.plan_id)?;
        Ok(stored)
    }

    /// All messages of a plan in sequence order.
    pub fn get_convo(&self, plan_id: u64) -> Result<Vec<ConvoMessage>> {
        let mut stmt = self
            .connection
            .prepare(SELECT_CONVO_SQL)
            .db_context("Failed to prepare query")?;

        let messages = stmt
            .query_map(params![plan_id as i64], message_from_row)
            .db_context("Failed to query convo")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .db_context("Failed to read convo rows")?;
        Ok(messages)
    }

    pub fn insert_description(
        &mut self,
        description: &ConvoMessageDescription,
    ) -> Result<ConvoMessageDescription> {
        let files = serde_json::to_string(&description.files)?;
        self.connection
            .execute(
                INSERT_DESCRIPTION_SQL,
                params![
                    description.plan_id as i64,
                    description.convo_message_id as i64,
                    description.made_plan,
                    &description.commit_msg,
                    files,
                    description.error.as_deref(),
                    description.created_at.to_string(),
                ],
            )
            .db_context("Failed to insert description")?;

        Ok(ConvoMessageDescription {
            id: self.connection.last_insert_rowid() as u64,
            ..description.clone()
        })
    }
}
