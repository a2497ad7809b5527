//! Plan server: the entry points callers use to run plans.
//!
//! [`PlanServer`] ties the store, the model client and the active-plan
//! registry together. `tell` starts an execution and returns its stream,
//! `connect` attaches another subscriber, `stop` aborts the execution.
//! A stopped plan either continues with a revised prompt or is canceled,
//! explicitly or once the revise window passes. Result queries and actions
//! work on stored results whether or not a plan is active.
//!
//! ```text
//! tell ──▶ ActivePlan ──▶ reply stream ──▶ parser ──▶ build queues ──▶ results
//!              │                                           │
//!              └────────── fan-out ◀── phases, BuildInfo ◀─┘
//! ```

use std::{path::Path, sync::Arc};

use jiff::Timestamp;
use log::{debug, info, warn};

use crate::{
    active::{ActivePlan, ActivePlans, PlanStream},
    apply::{self, ApplyReport},
    config::OrchestratorConfig,
    error::{PlanError, Result},
    model::ModelClient,
    models::{Context, ConvoMessage, Plan, PlanResult, PlanStatus, Role},
    replace::{current_plan_files, CurrentPlanFiles},
    store::{blocking, PlanStore},
    stream::{Phase, StreamMessage},
};

pub mod build;
pub mod builder;
pub mod tell;

pub use builder::PlanServerBuilder;

/// Cheap to clone; clones share the store, model and registry.
#[derive(Clone)]
pub struct PlanServer {
    pub(crate) store: Arc<dyn PlanStore>,
    pub(crate) model: Arc<dyn ModelClient>,
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) active: Arc<ActivePlans>,
}

impl PlanServer {
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn PlanStore> {
        Arc::clone(&self.store)
    }

    pub async fn create_plan(&self, name: &str) -> Result<Plan> {
        if name.trim().is_empty() {
            return Err(PlanError::invalid_input("name").with_reason("Plan name cannot be empty"));
        }
        let name = name.to_string();
        blocking(&self.store, move |s| s.create_plan(&name)).await
    }

    pub async fn get_plan(&self, plan_id: u64) -> Result<Plan> {
        blocking(&self.store, move |s| s.get_plan(plan_id))
            .await?
            .ok_or(PlanError::PlanNotFound { id: plan_id })
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>> {
        blocking(&self.store, |s| s.list_plans()).await
    }

    /// Loads or reloads a file into the plan's context.
    pub async fn load_context(&self, plan_id: u64, path: &str, body: &str) -> Result<Context> {
        self.get_plan(plan_id).await?;
        let context = Context::file(plan_id, path, body);
        blocking(&self.store, move |s| s.store_context(&context)).await
    }

    pub async fn convo(&self, plan_id: u64) -> Result<Vec<ConvoMessage>> {
        blocking(&self.store, move |s| s.get_plan_convo(plan_id)).await
    }

    /// Whether the plan has an execution in flight. A stopped plan waiting
    /// for a revision does not count.
    pub fn is_active(&self, plan_id: u64) -> bool {
        self.active
            .get(plan_id)
            .is_some_and(|plan| plan.phase() != Phase::Aborted)
    }

    /// Attaches a subscriber to a running plan. The stream starts with a
    /// replay of everything sent so far.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::NotActive` if the plan has no live execution.
    pub fn connect(&self, plan_id: u64) -> Result<PlanStream> {
        let plan = self
            .active
            .get(plan_id)
            .ok_or(PlanError::NotActive { id: plan_id })?;
        info!("Subscriber connecting to plan {plan_id}");
        Ok(plan.subscribe())
    }

    /// Stops a running plan: sends ABORTED and cancels the execution, then
    /// keeps the partial reply.
    ///
    /// The plan stays attached in ABORTED until [`Self::continue_plan`]
    /// revises it or [`Self::cancel`] ends it. After the configured revise
    /// window it is canceled on its own.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::NotActive` if the plan has no live execution.
    pub async fn stop(&self, plan_id: u64) -> Result<()> {
        let plan = self
            .active
            .get(plan_id)
            .ok_or(PlanError::NotActive { id: plan_id })?;

        let (revision, partial) = match plan.abort() {
            Ok(aborted) => aborted,
            Err(e) => {
                debug!("Plan {plan_id} already ended, nothing to stop: {e}");
                return Ok(());
            }
        };
        info!("Plan {plan_id} stopped");
        self.watch_revise_window(&plan, revision);

        if let Some(content) = partial {
            self.store_stopped_reply(plan_id, content).await?;
        }
        let store = Arc::clone(&self.store);
        blocking(&store, move |s| s.set_plan_status(plan_id, PlanStatus::Stopped, None)).await
    }

    /// Ends a stopped plan: fires CANCELED, closes every subscriber stream
    /// and detaches the plan.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::NotActive` if the plan is not attached, or
    /// `PlanError::InvalidTransition` if it was not stopped.
    pub fn cancel(&self, plan_id: u64) -> Result<()> {
        let plan = self
            .active
            .get(plan_id)
            .ok_or(PlanError::NotActive { id: plan_id })?;
        plan.cancel_aborted(None)?;
        self.active.remove(&plan);
        info!("Plan {plan_id} canceled");
        Ok(())
    }

    /// Cancels `plan` once the revise window passes, unless `revision` was
    /// revised or the plan closed first.
    fn watch_revise_window(&self, plan: &Arc<ActivePlan>, revision: u64) {
        let active = Arc::clone(&self.active);
        let plan = Arc::clone(plan);
        let window = self.config.revise_window;
        tokio::spawn(async move {
            tokio::select! {
                () = plan.closed() => {}
                () = tokio::time::sleep(window) => {
                    if let Ok(true) = plan.cancel_aborted(Some(revision)) {
                        active.remove(&plan);
                        info!("Plan {}: no revision within {window:?}, canceled", plan.plan_id);
                    }
                }
            }
        });
    }

    async fn store_stopped_reply(&self, plan_id: u64, content: String) -> Result<()> {
        if content.is_empty() {
            return Ok(());
        }
        blocking(&self.store, move |s| {
            let num = s.get_plan_convo(plan_id)?.len() + 1;
            let mut message = ConvoMessage::new(plan_id, Role::Assistant, num, content);
            message.stopped = true;
            s.store_convo_message(&message).map(|_| ())
        })
        .await
    }

    /// Stored results grouped by path.
    pub async fn results(&self, plan_id: u64) -> Result<PlanResult> {
        self.get_plan(plan_id).await?;
        let results = blocking(&self.store, move |s| s.get_plan_file_results(plan_id)).await?;
        Ok(PlanResult::from_results(results))
    }

    /// File contents with every pending result applied.
    pub async fn current_files(&self, plan_id: u64) -> Result<CurrentPlanFiles> {
        let plan_result = self.results(plan_id).await?;
        let contexts = blocking(&self.store, move |s| s.get_plan_contexts(plan_id)).await?;
        current_plan_files(&contexts, &plan_result)
    }

    /// Writes the current plan files under `project_root`, marks the
    /// pending results applied and reloads the written files as context.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::AlreadyActive` while the plan is still running,
    /// and file-system errors from writing. Files already written are
    /// restored when a later write fails.
    pub async fn apply(&self, plan_id: u64, project_root: &Path) -> Result<ApplyReport> {
        if self.is_active(plan_id) {
            return Err(PlanError::AlreadyActive { id: plan_id });
        }
        let plan_result = self.results(plan_id).await?;
        let contexts = blocking(&self.store, move |s| s.get_plan_contexts(plan_id)).await?;
        let current = current_plan_files(&contexts, &plan_result)?;

        let pending_ids: Vec<u64> = plan_result
            .results()
            .filter(|r| r.is_pending())
            .map(|r| r.id)
            .collect();
        let paths: Vec<String> = plan_result
            .file_results_by_path
            .iter()
            .filter(|(_, results)| results.iter().any(|r| r.is_pending()))
            .map(|(path, _)| path.clone())
            .collect();

        let applied: Vec<Context> = paths
            .iter()
            .filter_map(|path| {
                current
                    .files
                    .get(path)
                    .map(|body| Context::file(plan_id, path.as_str(), body.as_str()))
            })
            .collect();
        let root = project_root.to_path_buf();
        let report = tokio::task::spawn_blocking(move || apply::write_files(&root, &current, &paths))
            .await
            .map_err(|e| PlanError::join(&e))??;

        // Applied content becomes the new context so later builds start from it.
        blocking(&self.store, move |s| {
            s.mark_results_applied(&pending_ids, Timestamp::now())?;
            applied.iter().try_for_each(|context| s.store_context(context).map(|_| ()))
        })
        .await?;
        info!("Plan {plan_id}: applied {} files", report.written.len());
        Ok(report)
    }

    /// Rejects every pending result. Returns how many were rejected.
    pub async fn reject_all(&self, plan_id: u64) -> Result<usize> {
        let plan_result = self.results(plan_id).await?;
        let pending_ids: Vec<u64> = plan_result
            .results()
            .filter(|r| r.is_pending())
            .map(|r| r.id)
            .collect();
        blocking(&self.store, move |s| s.reject_results(&pending_ids, Timestamp::now())).await
    }

    /// # Errors
    ///
    /// Returns `PlanError::RecordNotFound` if no pending result has the ID.
    pub async fn reject_result(&self, result_id: u64) -> Result<()> {
        let rejected = blocking(&self.store, move |s| s.reject_results(&[result_id], Timestamp::now())).await?;
        if rejected == 0 {
            return Err(PlanError::RecordNotFound {
                kind: "Plan file result",
                id: result_id,
            });
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `PlanError::RecordNotFound` if no unrejected replacement has
    /// the ID.
    pub async fn reject_replacement(&self, replacement_id: u64) -> Result<()> {
        let rejected = blocking(&self.store, move |s| {
            s.reject_replacement(replacement_id, Timestamp::now())
        })
        .await?;
        if !rejected {
            return Err(PlanError::RecordNotFound {
                kind: "Replacement",
                id: replacement_id,
            });
        }
        Ok(())
    }

    /// Records `status` unless the execution was stopped or failed.
    pub(crate) async fn set_status(&self, plan: &ActivePlan, status: PlanStatus) -> Result<()> {
        if plan.is_canceled() {
            return Ok(());
        }
        let plan_id = plan.plan_id;
        blocking(&self.store, move |s| s.set_plan_status(plan_id, status, None)).await
    }

    /// Ends an execution with an error visible to every subscriber.
    ///
    /// The plan leaves the registry and its status is recorded before the
    /// error goes out, so a subscriber that sees it can tell again at once.
    pub(crate) async fn fail(&self, plan: &Arc<ActivePlan>, err: &PlanError) {
        if plan.is_canceled() {
            return;
        }
        warn!("Plan {} failed: {err}", plan.plan_id);
        self.active.remove(plan);

        let plan_id = plan.plan_id;
        let message = err.to_string();
        if let Err(e) = blocking(&self.store, move |s| {
            s.set_plan_status(plan_id, PlanStatus::Error, Some(&message))
        })
        .await
        {
            warn!("Plan {plan_id}: failed to record error status: {e}");
        }

        if let Err(e) = plan.emit(StreamMessage::error(err.to_string())) {
            warn!("Plan {plan_id}: error not delivered: {e}");
        }
        plan.cancel();
    }

    /// Ends an execution cleanly, in the same order as [`Self::fail`].
    pub(crate) async fn finish(&self, plan: &Arc<ActivePlan>) {
        if plan.is_canceled() {
            return;
        }
        self.active.remove(plan);
        let failed = plan.failed_builds();
        if !failed.is_empty() {
            warn!(
                "Plan {} finished with {} failed builds",
                plan.plan_id,
                failed.len()
            );
        }

        if let Err(e) = self.set_status(plan, PlanStatus::Finished).await {
            warn!("Plan {}: failed to record finished status: {e}", plan.plan_id);
        }
        match plan.emit(StreamMessage::Finished) {
            Ok(()) => info!("Plan {} finished", plan.plan_id),
            Err(e) => warn!("Plan {}: finish not delivered: {e}", plan.plan_id),
        }
        // The plan already left the registry, so nothing can revise it.
        plan.cancel();
    }
}
