//! px: command-line driver for planstream.
//!
//! Wires the core plan server to an SQLite store and an OpenAI-compatible
//! endpoint.

mod args;
mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use args::{Args, Commands};
use clap::Parser;
use cli::Cli;
use log::info;
use planstream_core::{OpenAiClient, OrchestratorConfig, PlanServerBuilder};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let Args {
        database_file,
        model,
        command,
    } = Args::parse();

    let config = OrchestratorConfig {
        planner_model: model.model,
        builder_model: model.builder_model,
        ..OrchestratorConfig::default()
    };
    let client = OpenAiClient::new(model.api_base, model.api_key);

    let server = PlanServerBuilder::new()
        .with_database_path(database_file)
        .with_model(Arc::new(client))
        .with_config(config)
        .build()
        .await
        .context("Failed to initialize plan server")?;

    info!("px started");
    let cli = Cli::new(server);

    match command {
        Some(Commands::New(args)) => cli.new_plan(args).await,
        Some(Commands::Load(args)) => cli.load(args).await,
        Some(Commands::Tell(args)) => cli.tell(args).await,
        Some(Commands::Results(args)) => cli.results(args).await,
        Some(Commands::Apply(args)) => cli.apply(args).await,
        Some(Commands::Reject(args)) => cli.reject(args).await,
        Some(Commands::Debug(args)) => cli.debug(args).await,
        None => cli.list_plans().await,
    }
}
