//! Status enumerations for plans and conversation roles.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Type-safe enumeration of plan statuses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// The model is streaming its reply
    #[default]
    Replying,

    /// The reply finished and is being described
    Describing,

    /// Proposed files are being built into replacements
    Building,

    /// The last execution completed
    Finished,

    /// The last execution was stopped by a client
    Stopped,

    /// The last execution failed
    Error,
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "replying" => Ok(PlanStatus::Replying),
            "describing" => Ok(PlanStatus::Describing),
            "building" => Ok(PlanStatus::Building),
            "finished" => Ok(PlanStatus::Finished),
            "stopped" => Ok(PlanStatus::Stopped),
            "error" => Ok(PlanStatus::Error),
            _ => Err(format!("Invalid plan status: {s}")),
        }
    }
}

impl PlanStatus {
    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Replying => "replying",
            PlanStatus::Describing => "describing",
            PlanStatus::Building => "building",
            PlanStatus::Finished => "finished",
            PlanStatus::Stopped => "stopped",
            PlanStatus::Error => "error",
        }
    }

    /// Whether an execution is still in flight in this status.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            PlanStatus::Replying | PlanStatus::Describing | PlanStatus::Building
        )
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("Invalid role: {s}")),
        }
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}
