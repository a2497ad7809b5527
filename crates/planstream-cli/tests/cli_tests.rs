use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper function to create a temporary directory for CLI tests
fn create_cli_test_environment() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// A `px` command bound to a database inside `dir`, with model settings
/// cleared from the environment.
fn px_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("px").expect("Failed to find px binary");
    let db_path = dir.path().join("cli_test.db");
    cmd.env_remove("PX_API_BASE")
        .env_remove("PX_API_KEY")
        .env_remove("PX_MODEL")
        .env_remove("PX_BUILDER_MODEL")
        .arg("--database-file")
        .arg(db_path);
    cmd
}

#[test]
fn test_cli_list_empty_plans() {
    let dir = create_cli_test_environment();

    px_cmd(&dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("No plans found."));
}

#[test]
fn test_cli_new_and_list_plan() {
    let dir = create_cli_test_environment();

    px_cmd(&dir)
        .args(["new", "Add logging"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created plan 1: Add logging"));

    px_cmd(&dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("1. Add logging [finished]"));
}

#[test]
fn test_cli_load_files_into_context() {
    let dir = create_cli_test_environment();
    let file = dir.path().join("main.rs");
    fs::write(&file, "fn main() {}\n").unwrap();

    px_cmd(&dir).args(["new", "p"]).assert().success();
    px_cmd(&dir)
        .args(["load", "1"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded").and(predicate::str::contains("main.rs")));

    px_cmd(&dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("context tokens").and(predicate::str::contains("0 context tokens").not()));
}

#[test]
fn test_cli_load_missing_file_fails() {
    let dir = create_cli_test_environment();
    px_cmd(&dir).args(["new", "p"]).assert().success();

    px_cmd(&dir)
        .args(["load", "1", "does-not-exist.rs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_cli_results_apply_reject_on_empty_plan() {
    let dir = create_cli_test_environment();
    px_cmd(&dir).args(["new", "p"]).assert().success();

    px_cmd(&dir)
        .args(["results", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No results for plan 1."));

    px_cmd(&dir)
        .args(["apply", "1", "--dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 0 files"));

    px_cmd(&dir)
        .args(["reject", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rejected 0 results"));
}

#[test]
fn test_cli_unknown_plan_fails() {
    let dir = create_cli_test_environment();

    px_cmd(&dir)
        .args(["results", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Plan with ID 42 not found"));
}

#[test]
fn test_cli_tell_rejects_empty_prompt() {
    let dir = create_cli_test_environment();
    px_cmd(&dir).args(["new", "p"]).assert().success();

    px_cmd(&dir)
        .args(["tell", "1", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Prompt cannot be empty"));
}

#[test]
fn test_cli_tell_reports_unreachable_model() {
    let dir = create_cli_test_environment();
    px_cmd(&dir).args(["new", "p"]).assert().success();

    px_cmd(&dir)
        .args(["--api-base", "http://127.0.0.1:9", "tell", "1", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Plan 1 failed"));

    px_cmd(&dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("[error]"));
}

#[test]
fn test_cli_help_lists_commands() {
    let dir = create_cli_test_environment();

    px_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tell"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("debug"));
}
