//! Debug-and-retry: run a verification command, feed failures back to the
//! plan, apply the fix, run again.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use futures::StreamExt;
use log::{info, warn};

use crate::{
    apply::Snapshot,
    error::{PlanError, Result},
    orchestrator::PlanServer,
    stream::StreamMessage,
};

/// Longest command output sent back to the model, in characters. Longer
/// output keeps its tail.
const MAX_OUTPUT_CHARS: usize = 16_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, dir: &Path) -> Result<CommandOutput>;
}

/// Runs commands through `sh -c` in the project directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, dir: &Path) -> Result<CommandOutput> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .output()
            .await
            .map_err(|source| PlanError::FileSystem {
                path: dir.to_path_buf(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            output: text,
        })
    }
}

/// What to do with applied changes when every attempt fails or an attempt
/// ends in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnFailure {
    /// Restore every touched file to its state before the first apply
    Rollback,
    #[default]
    KeepPartial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugOutcome {
    pub succeeded: bool,
    /// Fix attempts made, each one a tell followed by an apply
    pub attempts: usize,
    pub last_output: CommandOutput,
    /// Files written across all attempts
    pub touched: Vec<PathBuf>,
    pub rolled_back: bool,
}

pub struct DebugLoop {
    server: PlanServer,
    runner: Arc<dyn CommandRunner>,
    max_attempts: usize,
    on_failure: OnFailure,
}

impl DebugLoop {
    pub fn new(server: PlanServer) -> Self {
        Self {
            server,
            runner: Arc::new(ShellRunner),
            max_attempts: 3,
            on_failure: OnFailure::default(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    /// Runs `command` in `project_root` until it passes or the attempts
    /// run out.
    ///
    /// # Errors
    ///
    /// Returns the plan's error if a fix attempt ends in ERROR or is
    /// stopped, and apply or command-spawn errors. With
    /// [`OnFailure::Rollback`], changes applied before such an error are
    /// restored first.
    pub async fn run(&self, plan_id: u64, command: &str, project_root: &Path) -> Result<DebugOutcome> {
        let mut snapshot = Snapshot::default();
        let result = self.run_attempts(plan_id, command, project_root, &mut snapshot).await;
        if result.is_err() && self.on_failure == OnFailure::Rollback && !snapshot.is_empty() {
            match snapshot.restore() {
                Ok(()) => info!("Plan {plan_id}: rolled back {} files after an error", snapshot.len()),
                Err(e) => warn!("Plan {plan_id}: rollback after an error failed: {e}"),
            }
        }
        result
    }

    async fn run_attempts(
        &self,
        plan_id: u64,
        command: &str,
        project_root: &Path,
        snapshot: &mut Snapshot,
    ) -> Result<DebugOutcome> {
        let mut attempts = 0;

        loop {
            let output = self.runner.run(command, project_root).await?;
            if output.success {
                info!("Plan {plan_id}: `{command}` passed after {attempts} fix attempts");
                return Ok(DebugOutcome {
                    succeeded: true,
                    attempts,
                    last_output: output,
                    touched: snapshot.paths().map(Path::to_path_buf).collect(),
                    rolled_back: false,
                });
            }

            if attempts >= self.max_attempts {
                return self.give_up(plan_id, snapshot, attempts, output);
            }
            attempts += 1;
            info!(
                "Plan {plan_id}: `{command}` failed (exit {:?}), fix attempt {attempts}/{}",
                output.exit_code, self.max_attempts
            );

            let stream = self.server.tell(plan_id, &fix_prompt(command, &output)).await?;
            wait_for_finish(stream).await?;
            let report = self.server.apply(plan_id, project_root).await?;
            snapshot.absorb(report.into_snapshot());
        }
    }

    fn give_up(
        &self,
        plan_id: u64,
        snapshot: &Snapshot,
        attempts: usize,
        last_output: CommandOutput,
    ) -> Result<DebugOutcome> {
        warn!("Plan {plan_id}: still failing after {attempts} fix attempts");
        let touched = snapshot.paths().map(Path::to_path_buf).collect();
        let rolled_back = match self.on_failure {
            OnFailure::Rollback => {
                snapshot.restore()?;
                info!("Plan {plan_id}: rolled back {} files", snapshot.len());
                true
            }
            OnFailure::KeepPartial => false,
        };
        Ok(DebugOutcome {
            succeeded: false,
            attempts,
            last_output,
            touched,
            rolled_back,
        })
    }
}

async fn wait_for_finish(mut stream: crate::active::PlanStream) -> Result<()> {
    while let Some(message) = stream.next().await {
        match message {
            StreamMessage::Finished => return Ok(()),
            StreamMessage::Error { message } => return Err(PlanError::model(message)),
            StreamMessage::Aborted => return Err(PlanError::Canceled),
            _ => {}
        }
    }
    Err(PlanError::model("plan stream closed before finishing"))
}

fn fix_prompt(command: &str, output: &CommandOutput) -> String {
    let status = output
        .exit_code
        .map_or_else(|| "a signal".to_string(), |code| format!("exit code {code}"));
    format!(
        "Running `{command}` failed with {status}. Fix the code so it succeeds.\n\nOutput:\n\n{}",
        tail(&output.output, MAX_OUTPUT_CHARS)
    )
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    text.char_indices().nth(skip).map_or(text, |(idx, _)| &text[idx..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_end_of_output() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("ééé", 2), "éé");
    }

    #[test]
    fn test_fix_prompt_mentions_command_and_status() {
        let output = CommandOutput {
            success: false,
            exit_code: Some(2),
            output: "error[E0308]: mismatched types".to_string(),
        };
        let prompt = fix_prompt("cargo test", &output);

        assert!(prompt.contains("`cargo test`"));
        assert!(prompt.contains("exit code 2"));
        assert!(prompt.contains("mismatched types"));
    }

    #[tokio::test]
    async fn test_shell_runner_captures_output_and_status() {
        let dir = tempfile::TempDir::new().unwrap();

        let ok = ShellRunner.run("echo hello", dir.path()).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.output.trim(), "hello");

        let failed = ShellRunner.run("echo oops >&2; exit 3", dir.path()).await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.exit_code, Some(3));
        assert!(failed.output.contains("oops"));
    }
}
