//! Shared helpers for plan server integration tests.
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use planstream_core::{
    active::PlanStream,
    model::{Purpose, ScriptedModel},
    store::MemoryStore,
    BuildInfo, OrchestratorConfig, Plan, PlanServer, PlanServerBuilder, StreamMessage,
};

/// Short timeouts and near-zero backoff so failure paths run quickly.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        stream_inactivity_timeout: Duration::from_secs(5),
        subscriber_delivery_timeout: Duration::from_secs(1),
        retry_backoff_base: Duration::from_millis(1),
        ..OrchestratorConfig::default()
    }
}

pub async fn create_test_server(model: &ScriptedModel) -> PlanServer {
    create_test_server_with_config(model, fast_config()).await
}

pub async fn create_test_server_with_config(model: &ScriptedModel, config: OrchestratorConfig) -> PlanServer {
    PlanServerBuilder::new()
        .with_store(Arc::new(MemoryStore::new()))
        .with_model(Arc::new(model.clone()))
        .with_config(config)
        .build()
        .await
        .expect("Failed to build test server")
}

/// Creates a plan with the given files loaded as context.
pub async fn plan_with_files(server: &PlanServer, files: &[(&str, &str)]) -> Plan {
    let plan = server.create_plan("test plan").await.expect("Failed to create plan");
    for (path, body) in files {
        server
            .load_context(plan.id, path, body)
            .await
            .expect("Failed to load context");
    }
    plan
}

/// Reads a stream to its end.
pub async fn collect(stream: PlanStream) -> Vec<StreamMessage> {
    tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .expect("stream did not end")
}

pub fn text_of(messages: &[StreamMessage]) -> String {
    messages
        .iter()
        .filter_map(|m| match m {
            StreamMessage::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

/// Every message except content and build progress, in order.
pub fn phases_of(messages: &[StreamMessage]) -> Vec<StreamMessage> {
    messages
        .iter()
        .filter(|m| !matches!(m, StreamMessage::Content { .. } | StreamMessage::BuildInfo(_)))
        .cloned()
        .collect()
}

/// Final build report per path: finished or failed.
pub fn build_reports(messages: &[StreamMessage]) -> Vec<BuildInfo> {
    let mut reports: Vec<BuildInfo> = messages
        .iter()
        .filter_map(|m| match m {
            StreamMessage::BuildInfo(info) if info.finished || info.error.is_some() => Some(info.clone()),
            _ => None,
        })
        .collect();
    reports.sort_by(|a, b| a.path.cmp(&b.path));
    reports
}

/// Builder response in the JSON shape the builder prompt asks for.
pub fn replacements_json(pairs: &[(&str, &str)]) -> String {
    let items: Vec<serde_json::Value> = pairs
        .iter()
        .map(|(old, new)| serde_json::json!({ "old": old, "new": new, "summary": "" }))
        .collect();
    serde_json::json!({ "replacements": items }).to_string()
}

/// A planner reply proposing one block per `(path, code)` pair.
pub fn reply_with_blocks(blocks: &[(&str, &str)]) -> String {
    let mut reply = String::from("Here is the change.\n\n");
    for (path, code) in blocks {
        reply.push_str(&format!("- {path}:\n```\n{code}\n```\n\n"));
    }
    reply.push_str("That should do it.");
    reply
}

pub fn build_requests(model: &ScriptedModel, path: &str) -> usize {
    model
        .requests()
        .iter()
        .filter(|r| matches!(&r.purpose, Purpose::Build { path: p } if p == path))
        .count()
}
