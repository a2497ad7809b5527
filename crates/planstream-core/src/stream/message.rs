//! Messages exchanged between an active plan and its subscribers.

use serde::{Deserialize, Serialize};

use super::state::StreamEvent;

/// Per-file build progress streamed during the build phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub path: String,
    pub num_tokens: usize,
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildInfo {
    pub fn progress(path: impl Into<String>, num_tokens: usize) -> Self {
        Self {
            path: path.into(),
            num_tokens,
            finished: false,
            error: None,
        }
    }

    pub fn finished(path: impl Into<String>, num_tokens: usize) -> Self {
        Self {
            finished: true,
            ..Self::progress(path, num_tokens)
        }
    }

    pub fn failed(path: impl Into<String>, num_tokens: usize, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::finished(path, num_tokens)
        }
    }
}

/// One unit of a plan stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Content { content: String },
    Describing,
    Building,
    BuildInfo(BuildInfo),
    Finished,
    Aborted,
    Error { message: String },
}

impl StreamMessage {
    pub fn content(content: impl Into<String>) -> Self {
        Self::Content {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Phase transition this message carries, if any.
    pub fn event(&self) -> Option<StreamEvent> {
        match self {
            Self::Content { .. } | Self::BuildInfo(_) => None,
            Self::Describing => Some(StreamEvent::Describe),
            Self::Building => Some(StreamEvent::Build),
            Self::Finished => Some(StreamEvent::Finish),
            Self::Aborted => Some(StreamEvent::Abort),
            Self::Error { .. } => Some(StreamEvent::Error),
        }
    }

    /// Whether this is one of the terminal sentinels. After ABORTED the
    /// stream stays open until the plan is revised or canceled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted | Self::Error { .. })
    }
}
