//! Conversation message and reply description models.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::Role;

/// One turn in a plan's conversation. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvoMessage {
    /// Assigned by the store; zero until persisted
    pub id: u64,
    pub plan_id: u64,
    pub role: Role,
    pub tokens: usize,
    /// 1-based sequence number within the conversation
    pub num: usize,
    pub message: String,
    /// Set when the reply was cut short by a stop request
    pub stopped: bool,
    pub created_at: Timestamp,
}

impl ConvoMessage {
    /// Creates an unsaved message.
    pub fn new(plan_id: u64, role: Role, num: usize, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            id: 0,
            plan_id,
            role,
            tokens: crate::tokens::estimate(&message),
            num,
            message,
            stopped: false,
            created_at: Timestamp::now(),
        }
    }
}

/// Summary of what an assistant reply proposed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvoMessageDescription {
    pub id: u64,
    pub plan_id: u64,
    pub convo_message_id: u64,
    /// Whether the reply proposed any file changes
    pub made_plan: bool,
    pub commit_msg: String,
    pub files: Vec<String>,
    pub error: Option<String>,
    pub created_at: Timestamp,
}

impl ConvoMessageDescription {
    /// Description of a reply that proposed no files.
    pub fn chat_only(plan_id: u64, convo_message_id: u64) -> Self {
        Self {
            id: 0,
            plan_id,
            convo_message_id,
            made_plan: false,
            commit_msg: String::new(),
            files: Vec::new(),
            error: None,
            created_at: Timestamp::now(),
        }
    }
}
