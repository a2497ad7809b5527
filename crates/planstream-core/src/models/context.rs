//! Context model: file contents supplied to the model with each prompt.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A piece of context loaded into a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Context {
    pub id: u64,
    pub plan_id: u64,
    pub name: String,
    /// Project-relative path when the context is a file
    pub file_path: Option<String>,
    pub body: String,
    /// Hex SHA-256 of `body`
    pub sha: String,
    pub num_tokens: usize,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Context {
    /// Creates an unsaved file context from its path and body.
    pub fn file(plan_id: u64, path: impl Into<String>, body: impl Into<String>) -> Self {
        let path = path.into();
        let body = body.into();
        let now = Timestamp::now();
        Self {
            id: 0,
            plan_id,
            name: path.clone(),
            file_path: Some(path),
            sha: content_sha(&body),
            num_tokens: crate::tokens::estimate(&body),
            body,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Hex SHA-256 digest of a file's contents.
pub fn content_sha(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
