mod common;

use std::{fs, sync::Arc, time::Duration};

use common::{
    build_reports, build_requests, collect, create_test_server, create_test_server_with_config, fast_config,
    plan_with_files, replacements_json, reply_with_blocks,
};
use planstream_core::{
    model::{ChatRole, Purpose, Script, ScriptedModel},
    store::PlanStore,
    OrchestratorConfig, PlanError, PlanServerBuilder, PlanStatus, StreamMessage,
};
use tempfile::{NamedTempFile, TempDir};

const MAIN_RS: &str = "fn main() {\n    println!(\"hi\");\n}\n";

#[tokio::test]
async fn test_existing_file_built_from_replacements() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(
        &reply_with_blocks(&[("src/main.rs", "    println!(\"hello\");")]),
        6,
    ));
    model.on_build(
        "src/main.rs",
        Script::text(&replacements_json(&[("println!(\"hi\")", "println!(\"hello\")")]), 10),
    );
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[("src/main.rs", MAIN_RS)]).await;

    let messages = collect(server.tell(plan.id, "Say hello").await.unwrap()).await;
    assert_eq!(messages.last(), Some(&StreamMessage::Finished));

    let current = server.current_files(plan.id).await.unwrap();
    assert_eq!(current.files["src/main.rs"], "fn main() {\n    println!(\"hello\");\n}\n");

    let results = server.results(plan.id).await.unwrap();
    assert_eq!(results.sorted_paths, vec!["src/main.rs"]);
    let result = &results.file_results_by_path["src/main.rs"][0];
    assert_eq!(result.replacements.len(), 1);
    assert!(!result.any_failed);
    assert!(result.context_sha.is_some());

    // The builder sees the current file and the JSON response format.
    let request = model
        .requests()
        .into_iter()
        .find(|r| matches!(r.purpose, Purpose::Build { .. }))
        .unwrap();
    assert!(request.json_output);
    assert!(request.messages[1].content.contains("println!(\"hi\")"));
    assert_eq!(server.get_plan(plan.id).await.unwrap().status, PlanStatus::Finished);
}

#[tokio::test]
async fn test_same_path_builds_run_one_at_a_time() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(
        &reply_with_blocks(&[("lib.rs", "pub fn a() {}"), ("other.rs", "x"), ("lib.rs", "pub fn b() {}")]),
        7,
    ));
    let slow = Duration::from_millis(10);
    model.on_build("lib.rs", Script::text(&replacements_json(&[("// a", "pub fn a() {}")]), 8).with_delay(slow));
    model.on_build("lib.rs", Script::text(&replacements_json(&[("// b", "pub fn b() {}")]), 8).with_delay(slow));
    model.on_build("other.rs", Script::text(&replacements_json(&[("old", "x")]), 8).with_delay(slow));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[("lib.rs", "// a\n// b\n"), ("other.rs", "old\n")]).await;

    let messages = collect(server.tell(plan.id, "Fill in the stubs").await.unwrap()).await;
    assert_eq!(messages.last(), Some(&StreamMessage::Finished));

    assert_eq!(model.max_concurrent_builds("lib.rs"), 1);
    assert_eq!(build_requests(&model, "lib.rs"), 2);

    // The second build ran against the output of the first.
    let current = server.current_files(plan.id).await.unwrap();
    assert_eq!(current.files["lib.rs"], "pub fn a() {}\npub fn b() {}\n");
    assert_eq!(current.files["other.rs"], "x\n");

    let results = server.results(plan.id).await.unwrap();
    assert_eq!(results.file_results_by_path["lib.rs"].len(), 2);
    assert_eq!(results.num_pending(), 3);
}

#[tokio::test]
async fn test_correction_retry_recovers_failed_match() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(&reply_with_blocks(&[("a.txt", "new line")]), 9));
    model.on_build("a.txt", Script::tokens([replacements_json(&[("not there", "new line")])]));
    model.on_build("a.txt", Script::tokens([replacements_json(&[("old line", "new line")])]));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[("a.txt", "old line\n")]).await;

    let messages = collect(server.tell(plan.id, "update").await.unwrap()).await;

    let reports = build_reports(&messages);
    assert_eq!(reports.len(), 1);
    assert!(reports[0].finished);
    assert_eq!(build_requests(&model, "a.txt"), 2);

    let correction = model
        .requests()
        .into_iter()
        .filter(|r| matches!(&r.purpose, Purpose::Build { .. }))
        .nth(1)
        .unwrap();
    let last = correction.messages.last().unwrap();
    assert_eq!(last.role, ChatRole::User);
    assert!(last.content.contains("'not there'"));
    assert!(last.content.contains("not found verbatim"));
    assert_eq!(correction.messages[correction.messages.len() - 2].role, ChatRole::Assistant);

    assert_eq!(server.current_files(plan.id).await.unwrap().files["a.txt"], "new line\n");
}

#[tokio::test]
async fn test_exhausted_corrections_fail_only_that_file() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(&reply_with_blocks(&[("bad.txt", "b"), ("good.txt", "g")]), 9));
    model.on_build("bad.txt", Script::tokens([replacements_json(&[("missing", "b")])]));
    model.on_build("bad.txt", Script::tokens([replacements_json(&[("still missing", "b")])]));
    model.on_build("good.txt", Script::tokens([replacements_json(&[("before", "g")])]));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[("bad.txt", "original\n"), ("good.txt", "before\n")]).await;

    let messages = collect(server.tell(plan.id, "change both").await.unwrap()).await;

    assert_eq!(messages.last(), Some(&StreamMessage::Finished));
    let reports = build_reports(&messages);
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].path, "bad.txt");
    assert!(reports[0].error.is_some());
    assert_eq!(reports[1].path, "good.txt");
    assert!(reports[1].finished);
    assert!(reports[1].error.is_none());

    let results = server.results(plan.id).await.unwrap();
    assert!(results.any_failed());
    let bad = &results.file_results_by_path["bad.txt"][0];
    assert!(bad.any_failed);
    assert!(bad.replacements.iter().all(|r| r.failed));

    let current = server.current_files(plan.id).await.unwrap();
    assert_eq!(current.files["bad.txt"], "original\n");
    assert_eq!(current.files["good.txt"], "g\n");
}

#[tokio::test]
async fn test_transport_failures_retry_with_backoff() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(&reply_with_blocks(&[("a.txt", "two")]), 9));
    model.on_build("a.txt", Script::failing("503 service unavailable"));
    model.on_build("a.txt", Script::tokens(["not json"]));
    model.on_build("a.txt", Script::tokens([replacements_json(&[("one", "two")])]));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[("a.txt", "one\n")]).await;

    let messages = collect(server.tell(plan.id, "bump").await.unwrap()).await;

    assert_eq!(messages.last(), Some(&StreamMessage::Finished));
    assert_eq!(build_requests(&model, "a.txt"), 3);
    assert_eq!(server.current_files(plan.id).await.unwrap().files["a.txt"], "two\n");
}

#[tokio::test]
async fn test_transport_retries_exhausted_reports_failed_build() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(&reply_with_blocks(&[("a.txt", "two")]), 9));
    model.on_build("a.txt", Script::failing("down"));
    model.on_build("a.txt", Script::failing("still down"));
    let config = OrchestratorConfig {
        max_transport_retries: 1,
        ..fast_config()
    };
    let server = create_test_server_with_config(&model, config).await;
    let plan = plan_with_files(&server, &[("a.txt", "one\n")]).await;

    let messages = collect(server.tell(plan.id, "bump").await.unwrap()).await;

    assert_eq!(messages.last(), Some(&StreamMessage::Finished));
    let reports = build_reports(&messages);
    assert!(reports[0].error.as_deref().unwrap_or_default().contains("still down"));
    assert!(server.results(plan.id).await.unwrap().sorted_paths.is_empty());
}

#[tokio::test]
async fn test_apply_writes_files_and_reloads_context() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(
        &reply_with_blocks(&[("src/lib.rs", "pub fn two() {}"), ("notes/todo.md", "- ship it")]),
        9,
    ));
    model.on_build("src/lib.rs", Script::tokens([replacements_json(&[("one", "two")])]));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[("src/lib.rs", "pub fn one() {}\n")]).await;
    collect(server.tell(plan.id, "rename").await.unwrap()).await;

    let project = TempDir::new().unwrap();
    let report = server.apply(plan.id, project.path()).await.unwrap();

    assert_eq!(report.written.len(), 2);
    assert_eq!(report.created.len(), 2);
    assert_eq!(
        fs::read_to_string(project.path().join("src/lib.rs")).unwrap(),
        "pub fn two() {}\n"
    );
    assert_eq!(
        fs::read_to_string(project.path().join("notes/todo.md")).unwrap(),
        "- ship it\n"
    );

    let results = server.results(plan.id).await.unwrap();
    assert_eq!(results.num_pending(), 0);
    assert!(results.results().all(|r| r.applied_at.is_some()));

    // Context now holds the applied content, so the next build starts there.
    let contexts = server.store().get_plan_contexts(plan.id).unwrap();
    let lib = contexts.iter().find(|c| c.file_path.as_deref() == Some("src/lib.rs")).unwrap();
    assert_eq!(lib.body, "pub fn two() {}\n");
    assert_eq!(contexts.len(), 2);
}

#[tokio::test]
async fn test_reject_actions() {
    let model = ScriptedModel::new();
    model.on_reply(Script::text(&reply_with_blocks(&[("a.txt", "A"), ("b.txt", "B")]), 9));
    model.on_build("a.txt", Script::tokens([replacements_json(&[("a", "A"), ("x", "X")])]));
    model.on_build("b.txt", Script::tokens([replacements_json(&[("b", "B")])]));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[("a.txt", "a x\n"), ("b.txt", "b\n")]).await;
    collect(server.tell(plan.id, "caps").await.unwrap()).await;

    let results = server.results(plan.id).await.unwrap();
    let a = &results.file_results_by_path["a.txt"][0];
    server.reject_replacement(a.replacements[1].id).await.unwrap();
    assert_eq!(server.current_files(plan.id).await.unwrap().files["a.txt"], "A x\n");

    let b = &results.file_results_by_path["b.txt"][0];
    server.reject_result(b.id).await.unwrap();
    assert!(matches!(
        server.reject_result(b.id).await,
        Err(PlanError::RecordNotFound { .. })
    ));
    assert!(matches!(
        server.reject_replacement(9_999).await,
        Err(PlanError::RecordNotFound { .. })
    ));

    assert_eq!(server.reject_all(plan.id).await.unwrap(), 1);
    assert_eq!(server.results(plan.id).await.unwrap().num_pending(), 0);
}

#[tokio::test]
async fn test_apply_refused_while_plan_is_running() {
    let model = ScriptedModel::new();
    model.on_reply(Script::tokens(["thinking", "..."]).stall_after(1));
    let server = create_test_server(&model).await;
    let plan = plan_with_files(&server, &[]).await;
    let stream = server.tell(plan.id, "go").await.unwrap();

    let project = TempDir::new().unwrap();
    assert!(matches!(
        server.apply(plan.id, project.path()).await,
        Err(PlanError::AlreadyActive { .. })
    ));

    server.stop(plan.id).await.unwrap();
    server.cancel(plan.id).unwrap();
    collect(stream).await;
}

#[tokio::test]
async fn test_sqlite_backed_server_persists_results() {
    let db_file = NamedTempFile::new().unwrap();
    let model = ScriptedModel::new();
    model.on_reply(Script::text(&reply_with_blocks(&[("a.txt", "after")]), 9));
    model.on_build("a.txt", Script::tokens([replacements_json(&[("before", "after")])]));

    let server = PlanServerBuilder::new()
        .with_database_path(Some(db_file.path()))
        .with_model(Arc::new(model.clone()))
        .with_config(fast_config())
        .build()
        .await
        .unwrap();
    let plan = plan_with_files(&server, &[("a.txt", "before\n")]).await;
    collect(server.tell(plan.id, "update").await.unwrap()).await;
    drop(server);

    let reopened = PlanServerBuilder::new()
        .with_database_path(Some(db_file.path()))
        .with_model(Arc::new(ScriptedModel::new()))
        .build()
        .await
        .unwrap();
    let stored = reopened.get_plan(plan.id).await.unwrap();
    assert_eq!(stored.status, PlanStatus::Finished);
    assert_eq!(reopened.convo(plan.id).await.unwrap().len(), 2);
    assert_eq!(reopened.current_files(plan.id).await.unwrap().files["a.txt"], "after\n");
}
