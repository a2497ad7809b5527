use std::path::PathBuf;

use clap::{Parser, Subcommand};
use planstream_core::model::openai::DEFAULT_API_BASE;

use crate::cli::{ApplyArgs, DebugArgs, LoadArgs, NewArgs, PlanArg, TellArgs};

/// Command-line driver for planstream plans
///
/// A plan collects file contexts and a conversation with a model. `tell`
/// streams the model's reply, builds every file it proposes into exact
/// replacements, and stores the results for review with `results`, `apply`
/// and `reject`.
#[derive(Parser)]
#[command(version, about, name = "px")]
pub struct Args {
    /// Path to the SQLite database file. Defaults to
    /// $XDG_DATA_HOME/planstream/planstream.db
    #[arg(long, global = true)]
    pub database_file: Option<PathBuf>,

    #[command(flatten)]
    pub model: ModelArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Model endpoint settings
#[derive(clap::Args)]
pub struct ModelArgs {
    /// Base URL of an OpenAI-compatible API
    #[arg(long, global = true, env = "PX_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// API key sent as a bearer token
    #[arg(long, global = true, env = "PX_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model used for replies and commit messages
    #[arg(long, global = true, env = "PX_MODEL", default_value = "gpt-4o")]
    pub model: String,

    /// Model used to build file replacements
    #[arg(long, global = true, env = "PX_BUILDER_MODEL", default_value = "gpt-4o-mini")]
    pub builder_model: String,
}

/// Available commands. With no command, plans are listed.
#[derive(Subcommand)]
pub enum Commands {
    /// Create a plan
    New(NewArgs),
    /// Load files into a plan's context
    Load(LoadArgs),
    /// Send a prompt and stream the reply and builds
    #[command(alias = "t")]
    Tell(TellArgs),
    /// Show stored results
    Results(PlanArg),
    /// Write pending results into the project
    Apply(ApplyArgs),
    /// Reject every pending result
    Reject(PlanArg),
    /// Run a command and let the plan fix it until it passes
    Debug(DebugArgs),
}
