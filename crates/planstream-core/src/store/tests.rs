use std::sync::Arc;

use jiff::Timestamp;
use tempfile::TempDir;

use super::*;
use crate::models::{Replacement, Role};

fn exercise_store(store: &dyn PlanStore) {
    let plan = store.create_plan("demo").expect("create plan");
    store
        .store_convo_message(&ConvoMessage::new(plan.id, Role::User, 1, "add logging"))
        .expect("store message");
    store
        .store_context(&Context::file(plan.id, "src/main.rs", "fn main() {}\n"))
        .expect("store context");
    let reloaded = store
        .store_context(&Context::file(plan.id, "src/main.rs", "fn main() { run(); }\n"))
        .expect("reload context");

    let contexts = store.get_plan_contexts(plan.id).expect("contexts");
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].sha, reloaded.sha);

    let result = store
        .store_plan_file_result(&PlanFileResult {
            plan_id: plan.id,
            convo_message_id: 1,
            path: "src/main.rs".to_string(),
            replacements: vec![Replacement::new("run", "start"), Replacement::new("}", "};")],
            ..PlanFileResult::default()
        })
        .expect("store result");
    assert!(result.id > 0);
    assert_ne!(result.replacements[0].id, result.replacements[1].id);

    assert!(store
        .reject_replacement(result.replacements[1].id, Timestamp::now())
        .expect("reject replacement"));
    assert_eq!(
        store.mark_results_applied(&[result.id], Timestamp::now()).expect("apply"),
        1
    );

    let results = store.get_plan_file_results(plan.id).expect("results");
    assert!(results[0].applied_at.is_some());
    assert!(results[0].replacements[1].rejected_at.is_some());

    store
        .set_plan_status(plan.id, PlanStatus::Error, Some("boom"))
        .expect("status");
    let plan = store.get_plan(plan.id).expect("get").expect("exists");
    assert_eq!(plan.status, PlanStatus::Error);
    assert!(plan.convo_tokens > 0);
    assert_eq!(plan.context_tokens, reloaded.num_tokens);

    assert!(matches!(
        store.set_plan_status(4242, PlanStatus::Finished, None),
        Err(PlanError::PlanNotFound { id: 4242 })
    ));
}

#[test]
fn test_memory_store_behaviour() {
    exercise_store(&MemoryStore::new());
}

#[test]
fn test_sqlite_store_behaviour() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = SqliteStore::open(temp_dir.path().join("nested/dir/plans.db")).expect("open");
    assert!(store.db_path().exists());
    exercise_store(&store);
}

#[test]
fn test_memory_store_rejects_duplicate_num() {
    let store = MemoryStore::new();
    let plan = store.create_plan("p").unwrap();
    store
        .store_convo_message(&ConvoMessage::new(plan.id, Role::User, 1, "a"))
        .unwrap();
    assert!(store
        .store_convo_message(&ConvoMessage::new(plan.id, Role::User, 1, "b"))
        .is_err());
}

#[tokio::test]
async fn test_blocking_runs_store_call() {
    let store: Arc<dyn PlanStore> = Arc::new(MemoryStore::new());
    let plan = blocking(&store, |s| s.create_plan("async")).await.unwrap();
    let fetched = blocking(&store, move |s| s.get_plan(plan.id)).await.unwrap();
    assert_eq!(fetched.map(|p| p.name), Some("async".to_string()));
}
