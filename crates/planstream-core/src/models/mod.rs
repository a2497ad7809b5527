//! Data models for plans, conversations, contexts and build results.
//!
//! These are plain serde types shared by the persistence layer, the
//! orchestrator and the wire protocol. Status types parse from and render to
//! the same lowercase strings used in the database.

pub mod context;
pub mod convo;
pub mod plan;
pub mod result;
pub mod status;


pub use context::{content_sha, Context};
pub use convo::{ConvoMessage, ConvoMessageDescription};
pub use plan::Plan;
pub use result::{PlanFileResult, PlanResult, Replacement};
pub use status::{PlanStatus, Role};
