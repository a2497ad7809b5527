//! Per-path build workers.
//!
//! One worker runs per path at a time and takes that path's queued builds
//! in order, so two builds never edit the same file concurrently while
//! different paths build in parallel.

use std::sync::Arc;

use log::{debug, info, warn};

use super::PlanServer;
use crate::{
    active::{ActiveBuild, ActivePlan, BuildCompletion},
    error::{PlanError, Result},
    model::{collect_text, ChatMessage, ModelRequest, Purpose},
    models::{PlanFileResult, Replacement},
    prompts,
    replace::{apply_replacements, correction_prompt},
    store::blocking,
    stream::{BuildInfo, StreamMessage},
    tokens,
};

/// What one build produced.
struct BuildOutput {
    result: PlanFileResult,
    content: String,
    num_tokens: usize,
    /// Set when some replacements still failed after every correction
    error: Option<String>,
}

impl PlanServer {
    pub(crate) async fn run_build_worker(&self, plan: Arc<ActivePlan>, path: String) {
        debug!("Plan {}: build worker for {path} started", plan.plan_id);
        while let Some((idx, build)) = plan.take_next_build(&path) {
            if plan.is_canceled() {
                return;
            }
            let _ = plan.emit(StreamMessage::BuildInfo(BuildInfo::progress(&path, 0)));

            let completion = match self.build_file(&plan, &build).await {
                Err(PlanError::Canceled) => return,
                Err(err) if plan.is_canceled() => {
                    debug!("Plan {}: build of {path} ended by cancel: {err}", plan.plan_id);
                    return;
                }
                Err(err) => {
                    warn!("Plan {}: build of {path} failed: {err}", plan.plan_id);
                    let _ = plan.emit(StreamMessage::BuildInfo(BuildInfo::failed(
                        &path,
                        0,
                        err.to_string(),
                    )));
                    BuildCompletion::Failed {
                        content: None,
                        error: err.to_string(),
                    }
                }
                Ok(output) => self.record_build(&plan, &path, output).await,
            };

            if plan.finish_build(&path, idx, completion) {
                self.finish(&plan).await;
            }
        }
    }

    /// Stores the result and reports progress. A store failure turns the
    /// build into a failed one.
    async fn record_build(
        &self,
        plan: &Arc<ActivePlan>,
        path: &str,
        output: BuildOutput,
    ) -> BuildCompletion {
        let BuildOutput {
            result,
            content,
            num_tokens,
            error,
        } = output;

        if let Err(e) = blocking(&self.store, move |s| s.store_plan_file_result(&result)).await {
            warn!("Plan {}: storing result for {path} failed: {e}", plan.plan_id);
            let _ = plan.emit(StreamMessage::BuildInfo(BuildInfo::failed(
                path,
                num_tokens,
                e.to_string(),
            )));
            return BuildCompletion::Failed {
                content: None,
                error: e.to_string(),
            };
        }

        match error {
            None => {
                info!("Plan {}: built {path}", plan.plan_id);
                let _ = plan.emit(StreamMessage::BuildInfo(BuildInfo::finished(path, num_tokens)));
                BuildCompletion::Succeeded { content }
            }
            Some(error) => {
                let _ = plan.emit(StreamMessage::BuildInfo(BuildInfo::failed(
                    path,
                    num_tokens,
                    error.clone(),
                )));
                BuildCompletion::Failed {
                    content: Some(content),
                    error,
                }
            }
        }
    }

    async fn build_file(&self, plan: &Arc<ActivePlan>, build: &ActiveBuild) -> Result<BuildOutput> {
        let convo_message_id = plan.update(|s| s.reply_message_id).unwrap_or_default();
        let mut result = PlanFileResult {
            plan_id: plan.plan_id,
            convo_message_id,
            path: build.path.clone(),
            context_sha: plan.context_sha(&build.path),
            ..PlanFileResult::default()
        };

        let Some(current) = plan.file_state(&build.path) else {
            debug!("Plan {}: {} is a new file", plan.plan_id, build.path);
            result.content.clone_from(&build.content);
            return Ok(BuildOutput {
                result,
                content: build.content.clone(),
                num_tokens: build.num_tokens,
                error: None,
            });
        };

        let mut messages =
            prompts::build_messages(&build.path, &current, &build.content, &build.description);
        let mut num_tokens = 0;

        for correction in 0..=self.config.max_correction_retries {
            let (response, mut replacements) = self.request_replacements(plan, &build.path, &messages).await?;
            num_tokens += tokens::estimate(&response);
            let _ = plan.emit(StreamMessage::BuildInfo(BuildInfo::progress(&build.path, num_tokens)));

            let (updated, all_succeeded) = apply_replacements(&current, &mut replacements);
            if all_succeeded {
                result.replacements = replacements;
                return Ok(BuildOutput {
                    result,
                    content: updated,
                    num_tokens,
                    error: None,
                });
            }

            let num_failed = replacements.iter().filter(|r| r.failed).count();
            if correction < self.config.max_correction_retries {
                info!(
                    "Plan {}: {num_failed} replacements for {} did not match, requesting correction",
                    plan.plan_id, build.path
                );
                messages.push(ChatMessage::assistant(response));
                if let Some(prompt) = correction_prompt(&replacements) {
                    messages.push(ChatMessage::user(prompt));
                }
                continue;
            }

            result.any_failed = true;
            result.replacements = replacements;
            return Ok(BuildOutput {
                result,
                content: updated,
                num_tokens,
                error: Some(format!("{num_failed} replacements did not match the current file")),
            });
        }

        Err(PlanError::Build {
            path: build.path.clone(),
            reason: "no replacement attempt was made".to_string(),
        })
    }

    /// Calls the builder model, retrying transient failures with quadratic
    /// backoff.
    async fn request_replacements(
        &self,
        plan: &Arc<ActivePlan>,
        path: &str,
        messages: &[ChatMessage],
    ) -> Result<(String, Vec<Replacement>)> {
        let cancel = plan.cancel_token();
        let mut attempt = 0;
        loop {
            let request = ModelRequest {
                model: self.config.builder_model.clone(),
                messages: messages.to_vec(),
                json_output: true,
                purpose: Purpose::Build {
                    path: path.to_string(),
                },
            };
            let outcome = match self.model.stream(request, cancel.clone()).await {
                Ok(stream) => collect_text(stream, &cancel, self.config.stream_inactivity_timeout)
                    .await
                    .and_then(|text| prompts::parse_replacements(&text).map(|reps| (text, reps))),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(ok) => return Ok(ok),
                Err(err) if err.is_transient() && attempt < self.config.max_transport_retries => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        "Plan {}: builder call for {path} failed ({err}), retrying in {delay:?}",
                        plan.plan_id
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(PlanError::Canceled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    return Err(PlanError::Build {
                        path: path.to_string(),
                        reason: err.to_string(),
                    })
                }
            }
        }
    }
}
