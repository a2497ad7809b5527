//! SQLite persistence for plans, conversations, contexts and build results.
//!
//! Every call opens its own [`Database`]; callers in async code run it on a
//! blocking thread. Query sets are split per table family.

use std::path::Path;

use rusqlite::Connection;

use crate::error::{DatabaseResultExt, Result};

pub mod context_queries;
pub mod convo_queries;
pub mod migrations;
pub mod plan_queries;
pub mod result_queries;
pub mod utils;

/// Database connection and operations handler.
pub struct Database {
    connection: Connection,
}

impl Database {
    /// Opens the database at `path` and initializes the schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let connection = Connection::open(path).db_context("Failed to open database connection")?;

        let db = Self { connection };
        db.initialize_schema()?;
        Ok(db)
    }
}
