//! Command arguments and handlers.
//!
//! Each command has a clap argument struct, and [`Cli`] turns it into calls
//! on the [`PlanServer`] and prints the outcome.

use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use futures::StreamExt;
use log::{error, info, warn};
use planstream_core::{
    DebugLoop, OnFailure, Plan, PlanFileResult, PlanServer, StreamMessage, WireFormat,
};

#[derive(Args)]
pub struct NewArgs {
    /// Name of the plan
    pub name: String,
}

#[derive(Args)]
pub struct PlanArg {
    /// ID of the plan
    pub plan: u64,
}

#[derive(Args)]
pub struct LoadArgs {
    /// ID of the plan
    pub plan: u64,
    /// Files to load, stored under the path as given
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Reply text on stdout, phases in the log
    Text,
    /// Raw sentinel-delimited stream
    Sentinel,
    /// One JSON message per line
    Json,
}

#[derive(Args)]
pub struct TellArgs {
    /// ID of the plan
    pub plan: u64,
    /// Prompt for the model
    pub prompt: String,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// ID of the plan
    pub plan: u64,
    /// Project directory to write into
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Args)]
pub struct DebugArgs {
    /// ID of the plan
    pub plan: u64,
    /// Shell command that must succeed
    pub command: String,
    /// Fix attempts before giving up
    #[arg(long, default_value_t = 3)]
    pub attempts: usize,
    /// Restore touched files if the command still fails at the end
    #[arg(long)]
    pub rollback: bool,
    /// Project directory to run in and write into
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}

pub struct Cli {
    server: PlanServer,
}

impl Cli {
    pub fn new(server: PlanServer) -> Self {
        Self { server }
    }

    pub async fn list_plans(&self) -> Result<()> {
        let plans = self.server.list_plans().await.context("Failed to list plans")?;
        if plans.is_empty() {
            println!("No plans found.");
            return Ok(());
        }
        for plan in &plans {
            println!("{}", plan_line(plan));
        }
        Ok(())
    }

    pub async fn new_plan(&self, args: NewArgs) -> Result<()> {
        let plan = self
            .server
            .create_plan(&args.name)
            .await
            .context("Failed to create plan")?;
        println!("Created plan {}: {}", plan.id, plan.name);
        Ok(())
    }

    pub async fn load(&self, args: LoadArgs) -> Result<()> {
        for file in &args.files {
            let body = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let path = file.to_string_lossy();
            let context = self
                .server
                .load_context(args.plan, &path, &body)
                .await
                .with_context(|| format!("Failed to load {path}"))?;
            println!("Loaded {path} ({} tokens)", context.num_tokens);
        }
        Ok(())
    }

    /// Streams one tell. Ctrl-C stops the plan and keeps the partial reply.
    pub async fn tell(&self, args: TellArgs) -> Result<()> {
        let plan_id = args.plan;
        let mut stream = self
            .server
            .tell(plan_id, &args.prompt)
            .await
            .context("Failed to start tell")?;
        let mut out = io::stdout().lock();
        let mut failure = None;
        let mut stopping = false;

        loop {
            let message = tokio::select! {
                message = stream.next() => message,
                _ = tokio::signal::ctrl_c(), if !stopping => {
                    stopping = true;
                    info!("Stopping plan {plan_id}");
                    // A one-shot tell has nothing to revise with, so the
                    // stopped plan is canceled right away.
                    if let Err(e) = self.server.stop(plan_id).await {
                        warn!("Stop failed: {e}");
                    } else if let Err(e) = self.server.cancel(plan_id) {
                        warn!("Cancel failed: {e}");
                    }
                    continue;
                }
            };
            let Some(message) = message else {
                break;
            };

            match args.format {
                OutputFormat::Text => write_text(&mut out, &message)?,
                OutputFormat::Sentinel => write!(out, "{}", WireFormat::Sentinel.encode(&message)?)?,
                OutputFormat::Json => write!(out, "{}", WireFormat::JsonLines.encode(&message)?)?,
            }
            out.flush()?;

            if let StreamMessage::Error { message } = message {
                failure = Some(message);
            }
        }

        if let Some(message) = failure {
            bail!("Plan {plan_id} failed: {message}");
        }
        Ok(())
    }

    pub async fn results(&self, args: PlanArg) -> Result<()> {
        let plan_result = self
            .server
            .results(args.plan)
            .await
            .context("Failed to load results")?;
        if plan_result.file_results_by_path.is_empty() {
            println!("No results for plan {}.", args.plan);
            return Ok(());
        }
        for result in plan_result.results() {
            println!("{}", result_line(result));
        }
        println!("{} pending", plan_result.num_pending());
        Ok(())
    }

    pub async fn apply(&self, args: ApplyArgs) -> Result<()> {
        let report = self
            .server
            .apply(args.plan, &args.dir)
            .await
            .context("Failed to apply plan")?;
        for path in &report.written {
            println!("Wrote {}", path.display());
        }
        println!("Applied {} files", report.written.len());
        Ok(())
    }

    pub async fn reject(&self, args: PlanArg) -> Result<()> {
        let rejected = self
            .server
            .reject_all(args.plan)
            .await
            .context("Failed to reject results")?;
        println!("Rejected {rejected} results");
        Ok(())
    }

    pub async fn debug(&self, args: DebugArgs) -> Result<()> {
        let on_failure = if args.rollback {
            OnFailure::Rollback
        } else {
            OnFailure::KeepPartial
        };
        let outcome = DebugLoop::new(self.server.clone())
            .with_max_attempts(args.attempts)
            .with_on_failure(on_failure)
            .run(args.plan, &args.command, &args.dir)
            .await
            .context("Debug loop failed")?;

        if outcome.succeeded {
            println!(
                "`{}` passed after {} fix attempts",
                args.command, outcome.attempts
            );
            return Ok(());
        }
        print!("{}", outcome.last_output.output);
        if outcome.rolled_back {
            println!("Rolled back {} files", outcome.touched.len());
        }
        bail!(
            "`{}` still failing after {} fix attempts",
            args.command,
            outcome.attempts
        )
    }
}

fn write_text(out: &mut impl Write, message: &StreamMessage) -> io::Result<()> {
    match message {
        StreamMessage::Content { content } => write!(out, "{content}")?,
        StreamMessage::Describing => {
            writeln!(out)?;
            info!("Describing changes");
        }
        StreamMessage::Building => info!("Building files"),
        StreamMessage::BuildInfo(build) => match &build.error {
            Some(e) => warn!("Build failed for {}: {e}", build.path),
            None if build.finished => info!("Built {} ({} tokens)", build.path, build.num_tokens),
            None => {}
        },
        StreamMessage::Finished => info!("Plan finished"),
        StreamMessage::Aborted => {
            writeln!(out)?;
            info!("Plan stopped");
        }
        StreamMessage::Error { message } => error!("{message}"),
    }
    Ok(())
}

fn plan_line(plan: &Plan) -> String {
    let mut line = format!(
        "{}. {} [{}] {} context tokens, {} convo tokens",
        plan.id, plan.name, plan.status, plan.context_tokens, plan.convo_tokens
    );
    if let Some(error) = &plan.error {
        line.push_str(&format!(" ({error})"));
    }
    line
}

fn result_line(result: &PlanFileResult) -> String {
    let state = if result.applied_at.is_some() {
        "applied"
    } else if result.rejected_at.is_some() {
        "rejected"
    } else if result.is_pending() {
        "pending"
    } else {
        "nothing to apply"
    };
    let detail = if result.is_new_file() {
        "new file".to_string()
    } else {
        let failed = result.replacements.iter().filter(|r| r.failed).count();
        match failed {
            0 => format!("{} replacements", result.replacements.len()),
            n => format!("{} replacements, {n} failed", result.replacements.len()),
        }
    };
    format!("#{} {}: {state}, {detail}", result.id, result.path)
}
