//! Core library for planstream, a streaming plan orchestrator for AI
//! coding assistants.
//!
//! A plan holds loaded file contexts and a conversation. Telling a plan
//! streams a model reply to every subscriber while an incremental parser
//! pulls proposed files out of it. Each proposed file is then built into a
//! list of exact-match replacements against the current file, with builds
//! serialized per path and parallel across paths. Results are stored and
//! can be applied to a project directory or rejected.
//!
//! # Architecture
//!
//! - **Parsing** ([`reply`]): byte-chunk independent extraction of file
//!   blocks from a streamed reply
//! - **Replacements** ([`replace`]): ordered exact-match edits and the
//!   current plan file state
//! - **Stream protocol** ([`stream`]): phase machine, typed messages and the
//!   sentinel and JSON-lines wire formats
//! - **Execution** ([`active`], [`orchestrator`]): live plan state, fan-out
//!   to subscribers, reply and build workers
//! - **Collaborators** ([`store`], [`model`]): persistence and the model
//!   endpoint, both behind traits
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use planstream_core::{
//!     model::{Script, ScriptedModel},
//!     store::MemoryStore,
//!     PlanServerBuilder, StreamMessage,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let model = ScriptedModel::new();
//! model.on_reply(Script::text("- hello.txt:\n```\nhi\n```\n", 4));
//!
//! let server = PlanServerBuilder::new()
//!     .with_store(Arc::new(MemoryStore::new()))
//!     .with_model(Arc::new(model))
//!     .build()
//!     .await?;
//!
//! let plan = server.create_plan("greeting").await?;
//! let mut stream = server.tell(plan.id, "Add a greeting file").await?;
//! while let Some(message) = stream.next().await {
//!     if let StreamMessage::Content { content } = &message {
//!         print!("{content}");
//!     }
//! }
//!
//! let current = server.current_files(plan.id).await?;
//! assert_eq!(current.files["hello.txt"], "hi\n");
//! # Ok(())
//! # }
//! ```

pub mod active;
pub mod apply;
pub mod config;
pub mod db;
pub mod debug;
pub mod error;
pub mod model;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod replace;
pub mod reply;
pub mod store;
pub mod stream;
pub mod tokens;

// Re-export commonly used types
pub use apply::{ApplyReport, Snapshot};
pub use config::OrchestratorConfig;
pub use db::Database;
pub use debug::{CommandOutput, CommandRunner, DebugLoop, DebugOutcome, OnFailure, ShellRunner};
pub use error::{PlanError, Result};
pub use model::{ModelClient, OpenAiClient};
pub use models::{
    Context, ConvoMessage, ConvoMessageDescription, Plan, PlanFileResult, PlanResult, PlanStatus,
    Replacement, Role,
};
pub use orchestrator::{PlanServer, PlanServerBuilder};
pub use replace::CurrentPlanFiles;
pub use reply::{FileBlock, ReplyParseResult, ReplyParser};
pub use stream::{BuildInfo, Phase, PlanStreamReader, StreamMessage, WireFormat};
