//! Phase state machine for one plan stream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};

/// Stream phase. `Finished`, `Canceled` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Replying,
    Describing,
    Building,
    Finished,
    Aborted,
    Revising,
    Canceled,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replying => "replying",
            Self::Describing => "describing",
            Self::Building => "building",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
            Self::Revising => "revising",
            Self::Canceled => "canceled",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Canceled | Self::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replying" => Ok(Self::Replying),
            "describing" => Ok(Self::Describing),
            "building" => Ok(Self::Building),
            "finished" => Ok(Self::Finished),
            "aborted" => Ok(Self::Aborted),
            "revising" => Ok(Self::Revising),
            "canceled" => Ok(Self::Canceled),
            "error" => Ok(Self::Error),
            _ => Err(PlanError::invalid_input("phase").with_reason(format!("unknown phase '{s}'"))),
        }
    }
}

/// Named transition between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEvent {
    Describe,
    Build,
    Finish,
    Abort,
    Revise,
    Cancel,
    Error,
}

impl StreamEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Describe => "describe",
            Self::Build => "build",
            Self::Finish => "finish",
            Self::Abort => "abort",
            Self::Revise => "revise",
            Self::Cancel => "cancel",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target phase for `event` fired in `from`, or `None` when the table has
/// no such edge.
pub fn transition(from: Phase, event: StreamEvent) -> Option<Phase> {
    use Phase as P;
    use StreamEvent as E;

    match (from, event) {
        (P::Replying | P::Revising, E::Describe) => Some(P::Describing),
        (P::Describing, E::Build) => Some(P::Building),
        (P::Describing | P::Building, E::Finish) => Some(P::Finished),
        (P::Replying | P::Describing | P::Building | P::Revising, E::Abort) => Some(P::Aborted),
        (P::Aborted, E::Revise) => Some(P::Revising),
        (P::Aborted, E::Cancel) => Some(P::Canceled),
        (p, E::Error) if !p.is_terminal() => Some(P::Error),
        _ => None,
    }
}

/// Current phase plus the transition table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStreamState {
    phase: Phase,
}

impl PlanStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn can(&self, event: StreamEvent) -> bool {
        transition(self.phase, event).is_some()
    }

    /// Applies `event`, returning the new phase.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::InvalidTransition` and leaves the phase unchanged
    /// when the event is not allowed from the current phase.
    pub fn fire(&mut self, event: StreamEvent) -> Result<Phase> {
        let next = transition(self.phase, event).ok_or(PlanError::InvalidTransition {
            from: self.phase,
            event,
        })?;
        self.phase = next;
        Ok(next)
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
