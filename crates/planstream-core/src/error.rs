//! Error types for the planstream library.

use std::path::PathBuf;

use thiserror::Error;

use crate::stream::{Phase, StreamEvent};

/// Comprehensive error type for all plan execution operations.
#[derive(Error, Debug)]
pub enum PlanError {
    /// Database connection or query errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: rusqlite::Error,
    },
    /// Plan not found for the given ID
    #[error("Plan with ID {id} not found")]
    PlanNotFound { id: u64 },
    /// A stored result or replacement was not found
    #[error("{kind} with ID {id} not found")]
    RecordNotFound { kind: &'static str, id: u64 },
    /// A tell was issued while the plan already has a live execution
    #[error("Plan {id} already has an active stream")]
    AlreadyActive { id: u64 },
    /// Connect or stop was issued for a plan with no live execution
    #[error("Plan {id} has no active stream")]
    NotActive { id: u64 },
    /// The stream protocol rejected a phase transition
    #[error("Invalid stream transition '{event}' from phase '{from}'")]
    InvalidTransition { from: Phase, event: StreamEvent },
    /// Model call or model stream failures
    #[error("Model error: {message}")]
    Model { message: String },
    /// No model token arrived before the inactivity watchdog fired
    #[error("Stream timeout due to inactivity after {seconds}s")]
    StreamTimeout { seconds: u64 },
    /// A file build exhausted its retries
    #[error("Build failed for '{path}': {reason}")]
    Build { path: String, reason: String },
    /// Prompt and context exceed the configured token budget
    #[error("Token limit exceeded: {tokens} tokens, maximum is {max}")]
    TokenLimit { tokens: usize, max: usize },
    /// The execution scope was canceled
    #[error("Plan execution canceled")]
    Canceled,
    /// File system operation errors
    #[error("File system error at path '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        source: std::io::Error,
    },
    /// XDG directory specification errors
    #[error("XDG directory error: {0}")]
    XdgDirectory(String),
    /// Invalid input validation errors
    #[error("Invalid input for field '{field}': {reason}")]
    InvalidInput { field: String, reason: String },
    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Builder for creating database errors with optional context.
pub struct DatabaseErrorBuilder {
    message: String,
}

impl DatabaseErrorBuilder {
    /// Create a new database error builder with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build the error with the given source.
    pub fn with_source(self, source: rusqlite::Error) -> PlanError {
        PlanError::Database {
            message: self.message,
            source,
        }
    }
}

/// Builder for creating input validation errors.
pub struct InvalidInputBuilder {
    field: String,
}

impl InvalidInputBuilder {
    /// Create a new invalid input error builder for a field.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    /// Build the error with the given reason.
    pub fn with_reason(self, reason: impl Into<String>) -> PlanError {
        PlanError::InvalidInput {
            field: self.field,
            reason: reason.into(),
        }
    }
}

impl PlanError {
    /// Creates a builder for database errors.
    pub fn database(message: impl Into<String>) -> DatabaseErrorBuilder {
        DatabaseErrorBuilder::new(message)
    }

    /// Creates a builder for input validation errors.
    pub fn invalid_input(field: impl Into<String>) -> InvalidInputBuilder {
        InvalidInputBuilder::new(field)
    }

    /// Creates a model error from any displayable cause.
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// Wraps a tokio join failure from a blocking persistence call.
    pub(crate) fn join(err: &tokio::task::JoinError) -> Self {
        Self::Configuration {
            message: format!("Task join error: {err}"),
        }
    }

    /// Whether a retry of the same model call could succeed.
    ///
    /// Cancellation and duplicate starts are never retried; transport and
    /// timeout failures are.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Model { .. } | Self::StreamTimeout { .. })
    }
}

/// Specialized extension trait for database-related Results.
pub trait DatabaseResultExt<T> {
    /// Map database errors with a message.
    fn db_context(self, message: &str) -> Result<T>;
}

impl<T> DatabaseResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn db_context(self, message: &str) -> Result<T> {
        self.map_err(|e| PlanError::database(message).with_source(e))
    }
}

/// Result type alias for plan operations
pub type Result<T> = std::result::Result<T, PlanError>;
