mod common;

use std::{
    collections::VecDeque,
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use common::{create_test_server, plan_with_files, replacements_json, reply_with_blocks};
use planstream_core::{
    model::{Script, ScriptedModel},
    CommandOutput, CommandRunner, DebugLoop, OnFailure, Result,
};
use tempfile::TempDir;

/// Returns queued outcomes in order, then keeps failing.
#[derive(Default)]
struct QueuedRunner {
    outcomes: Mutex<VecDeque<bool>>,
    commands: Mutex<Vec<String>>,
}

impl QueuedRunner {
    fn new(outcomes: &[bool]) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.iter().copied().collect()),
            commands: Mutex::default(),
        })
    }

    fn runs(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for QueuedRunner {
    async fn run(&self, command: &str, _dir: &Path) -> Result<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        let success = self.outcomes.lock().unwrap().pop_front().unwrap_or(false);
        Ok(CommandOutput {
            success,
            exit_code: Some(if success { 0 } else { 1 }),
            output: if success { String::new() } else { "assertion failed: broken".to_string() },
        })
    }
}

#[tokio::test]
async fn test_debug_loop_fixes_and_passes() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(&reply_with_blocks(&[("check.txt", "fixed")]), 9));
    model.on_build("check.txt", Script::tokens([replacements_json(&[("broken", "fixed")])]));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[("check.txt", "broken\n")]).await;

    let project = TempDir::new().unwrap();
    fs::write(project.path().join("check.txt"), "broken\n").unwrap();
    let runner = QueuedRunner::new(&[false, true]);

    let outcome = DebugLoop::new(server.clone())
        .with_runner(runner.clone())
        .with_max_attempts(2)
        .run(plan.id, "make check", project.path())
        .await
        .unwrap();

    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(runner.runs(), 2);
    assert_eq!(fs::read_to_string(project.path().join("check.txt")).unwrap(), "fixed\n");

    // The failure output went to the model as the next prompt.
    let convo = server.convo(plan.id).await.unwrap();
    assert!(convo[0].message.contains("`make check`"));
    assert!(convo[0].message.contains("assertion failed: broken"));
}

#[tokio::test]
async fn test_debug_loop_rolls_back_when_attempts_run_out() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(
        &reply_with_blocks(&[("check.txt", "attempt"), ("helper.txt", "new helper")]),
        9,
    ));
    model.on_build("check.txt", Script::tokens([replacements_json(&[("broken", "attempt")])]));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[("check.txt", "broken\n")]).await;

    let project = TempDir::new().unwrap();
    fs::write(project.path().join("check.txt"), "broken\n").unwrap();
    let runner = QueuedRunner::new(&[]);

    let outcome = DebugLoop::new(server)
        .with_runner(runner.clone())
        .with_max_attempts(1)
        .with_on_failure(OnFailure::Rollback)
        .run(plan.id, "make check", project.path())
        .await
        .unwrap();

    assert!(!outcome.succeeded);
    assert!(outcome.rolled_back);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.touched.len(), 2);
    assert_eq!(runner.runs(), 2);
    assert_eq!(fs::read_to_string(project.path().join("check.txt")).unwrap(), "broken\n");
    assert!(!project.path().join("helper.txt").exists());
}

#[tokio::test]
async fn test_debug_loop_keeps_partial_results() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(&reply_with_blocks(&[("helper.txt", "new helper")]), 9));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[]).await;

    let project = TempDir::new().unwrap();
    let outcome = DebugLoop::new(server)
        .with_runner(QueuedRunner::new(&[]))
        .with_max_attempts(1)
        .run(plan.id, "make check", project.path())
        .await
        .unwrap();

    assert!(!outcome.succeeded);
    assert!(!outcome.rolled_back);
    assert_eq!(
        fs::read_to_string(project.path().join("helper.txt")).unwrap(),
        "new helper\n"
    );
}

#[tokio::test]
async fn test_debug_loop_passing_command_makes_no_tell() {
    let model = ScriptedModel::new();
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[]).await;
    let project = TempDir::new().unwrap();

    let outcome = DebugLoop::new(server)
        .with_runner(QueuedRunner::new(&[true]))
        .run(plan.id, "true", project.path())
        .await
        .unwrap();

    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts, 0);
    assert!(model.requests().is_empty());
}

#[tokio::test]
async fn test_debug_loop_surfaces_plan_errors() {
    let model = ScriptedModel::new();
    model.on_reply(Script::failing("model offline"));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[]).await;
    let project = TempDir::new().unwrap();

    let result = DebugLoop::new(server)
        .with_runner(QueuedRunner::new(&[false]))
        .run(plan.id, "make check", project.path())
        .await;

    assert!(matches!(result, Err(e) if e.to_string().contains("model offline")));
}

#[tokio::test]
async fn test_debug_loop_rolls_back_when_a_later_attempt_errors() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(&reply_with_blocks(&[("helper.txt", "new helper")]), 9));
    model.on_reply(Script::failing("model offline"));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[]).await;
    let project = TempDir::new().unwrap();
    let runner = QueuedRunner::new(&[]);

    let result = DebugLoop::new(server)
        .with_runner(runner.clone())
        .with_max_attempts(3)
        .with_on_failure(OnFailure::Rollback)
        .run(plan.id, "make check", project.path())
        .await;

    assert!(matches!(result, Err(e) if e.to_string().contains("model offline")));
    assert_eq!(runner.runs(), 2);
    // The first attempt's file was written, then restored by the rollback.
    assert!(!project.path().join("helper.txt").exists());
}

#[tokio::test]
async fn test_debug_loop_keeps_partial_results_when_a_later_attempt_errors() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(&reply_with_blocks(&[("helper.txt", "new helper")]), 9));
    model.on_reply(Script::failing("model offline"));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[]).await;
    let project = TempDir::new().unwrap();

    let result = DebugLoop::new(server)
        .with_runner(QueuedRunner::new(&[]))
        .with_max_attempts(3)
        .run(plan.id, "make check", project.path())
        .await;

    assert!(result.is_err());
    assert_eq!(
        fs::read_to_string(project.path().join("helper.txt")).unwrap(),
        "new helper\n"
    );
}
