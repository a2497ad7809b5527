//! Model collaborator: a cancellable token stream per request.
//!
//! The orchestrator only sees [`ModelClient`]. [`OpenAiClient`] talks to an
//! OpenAI-compatible chat completions endpoint; [`ScriptedModel`] replays
//! canned responses for tests and offline runs.

use std::time::Duration;

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{PlanError, Result};

pub mod openai;
pub mod scripted;


pub use openai::OpenAiClient;
pub use scripted::{Script, ScriptedModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// What a request is for. Clients may ignore it; test doubles key on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Purpose {
    Reply,
    Describe,
    Build { path: String },
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Ask the endpoint for a JSON object response
    pub json_output: bool,
    pub purpose: Purpose,
}

/// One streamed delta. `finish_reason` is set on the final chunk of a
/// cleanly finished response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelChunk {
    pub content: String,
    pub finish_reason: Option<String>,
}

pub type ModelStream = BoxStream<'static, Result<ModelChunk>>;

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Starts a streamed completion. The stream must end promptly once
    /// `cancel` fires.
    async fn stream(&self, request: ModelRequest, cancel: CancellationToken) -> Result<ModelStream>;
}

/// Drains a stream into one string, stopping at the first finish reason.
///
/// # Errors
///
/// Returns `PlanError::Canceled` if `cancel` fires, `PlanError::StreamTimeout`
/// if no chunk arrives within `idle_timeout`, or the stream's own error.
pub async fn collect_text(
    mut stream: ModelStream,
    cancel: &CancellationToken,
    idle_timeout: Duration,
) -> Result<String> {
    let mut text = String::new();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PlanError::Canceled),
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };
        match next {
            Err(_) => {
                return Err(PlanError::StreamTimeout {
                    seconds: idle_timeout.as_secs(),
                })
            }
            Ok(Some(Ok(chunk))) => {
                text.push_str(&chunk.content);
                if chunk.finish_reason.is_some() {
                    break;
                }
            }
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => break,
        }
    }
    Ok(text)
}
