//! Tell: run one reply/describe/build cycle for a plan, and continue a
//! stopped plan with a revised prompt.

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, info, warn};

use super::PlanServer;
use crate::{
    active::{ActivePlan, PlanStream},
    error::{PlanError, Result},
    model::{collect_text, ModelRequest, Purpose},
    models::{Context, ConvoMessage, ConvoMessageDescription, PlanResult, PlanStatus, Role},
    prompts,
    replace::current_plan_files,
    reply::{ReplyParseResult, ReplyParser},
    store::blocking,
    stream::{Phase, StreamMessage},
};

impl PlanServer {
    /// Starts a new execution for `plan_id` and returns its stream.
    ///
    /// # Errors
    ///
    /// A plan left stopped by [`Self::stop`] is canceled first.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::PlanNotFound` for an unknown plan, or
    /// `PlanError::AlreadyActive` if the plan is already running; the
    /// running execution is left untouched.
    pub async fn tell(&self, plan_id: u64, prompt: &str) -> Result<PlanStream> {
        validate_prompt(prompt)?;
        self.get_plan(plan_id).await?;

        if let Some(stopped) = self.active.get(plan_id) {
            if stopped.phase() == Phase::Aborted && stopped.cancel_aborted(None).is_ok() {
                self.active.remove(&stopped);
                debug!("Plan {plan_id}: canceled the stopped execution for a new tell");
            }
        }

        let config = Arc::clone(&self.config);
        let plan = self.active.insert_new(plan_id, || {
            ActivePlan::new(
                plan_id,
                config.subscriber_queue_capacity,
                config.subscriber_delivery_timeout,
            )
        })?;
        let stream = plan.subscribe();
        info!("Plan {plan_id}: tell started");
        self.spawn_execution(&plan, prompt.to_string());
        Ok(stream)
    }

    /// Resumes a stopped plan with a revised prompt on the same stream.
    ///
    /// The plan moves from ABORTED to REVISING once every task of the
    /// stopped execution has exited, then replies, describes and builds as
    /// a tell would. Subscribers that stayed attached through the abort
    /// keep receiving; the returned stream is one more subscriber.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::NotActive` if the plan is not attached, and
    /// `PlanError::AlreadyActive` if it is running rather than stopped.
    pub async fn continue_plan(&self, plan_id: u64, prompt: &str) -> Result<PlanStream> {
        validate_prompt(prompt)?;
        let plan = self
            .active
            .get(plan_id)
            .ok_or(PlanError::NotActive { id: plan_id })?;
        match plan.phase() {
            Phase::Aborted => {}
            phase if phase.is_terminal() => return Err(PlanError::NotActive { id: plan_id }),
            _ => return Err(PlanError::AlreadyActive { id: plan_id }),
        }

        plan.wait_idle().await;
        let revision = plan.revise()?;
        let stream = plan.subscribe();
        info!("Plan {plan_id}: continuing as revision {revision}");
        self.spawn_execution(&plan, prompt.to_string());
        Ok(stream)
    }

    fn spawn_execution(&self, plan: &Arc<ActivePlan>, prompt: String) {
        let server = self.clone();
        let task_plan = Arc::clone(plan);
        plan.spawn(async move {
            if let Err(err) = server.exec_tell(&task_plan, prompt).await {
                server.fail(&task_plan, &err).await;
            }
        });
    }

    async fn exec_tell(&self, plan: &Arc<ActivePlan>, prompt: String) -> Result<()> {
        let plan_id = plan.plan_id;
        self.set_status(plan, PlanStatus::Replying).await?;

        let (contexts, convo) = tokio::try_join!(
            blocking(&self.store, move |s| s.get_plan_contexts(plan_id)),
            blocking(&self.store, move |s| s.get_plan_convo(plan_id)),
        )?;

        let tokens = prompts::reply_tokens(&contexts, &convo, &prompt);
        if tokens > self.config.max_tokens {
            return Err(PlanError::TokenLimit {
                tokens,
                max: self.config.max_tokens,
            });
        }

        let messages = prompts::reply_messages(&contexts, &convo, &prompt);
        let user_message = ConvoMessage::new(plan_id, Role::User, convo.len() + 1, prompt);
        let user_message = blocking(&self.store, move |s| s.store_convo_message(&user_message)).await?;

        let request = ModelRequest {
            model: self.config.planner_model.clone(),
            messages,
            json_output: false,
            purpose: Purpose::Reply,
        };
        let Some(parsed) = self.stream_reply(plan, request).await? else {
            return Ok(());
        };

        plan.emit(StreamMessage::Describing)?;
        self.set_status(plan, PlanStatus::Describing).await?;

        let Some(reply) = plan.claim_reply() else {
            return Ok(());
        };
        let assistant = ConvoMessage::new(plan_id, Role::Assistant, user_message.num + 1, reply.clone());
        let assistant = blocking(&self.store, move |s| s.store_convo_message(&assistant)).await?;
        plan.update(|s| s.reply_message_id = Some(assistant.id));

        if parsed.is_chat_only() {
            let description = ConvoMessageDescription::chat_only(plan_id, assistant.id);
            blocking(&self.store, move |s| s.store_description(&description)).await?;
            self.finish(plan).await;
            return Ok(());
        }

        let description = self.describe(plan, assistant.id, &reply, &parsed).await?;
        blocking(&self.store, move |s| s.store_description(&description)).await?;

        if plan.is_canceled() {
            return Ok(());
        }
        self.start_builds(plan, &contexts, &parsed).await
    }

    /// Streams the planner reply through the parser. Returns `None` when the
    /// execution was canceled mid-stream.
    async fn stream_reply(
        &self,
        plan: &Arc<ActivePlan>,
        request: ModelRequest,
    ) -> Result<Option<ReplyParseResult>> {
        let cancel = plan.cancel_token();
        let mut stream = self.model.stream(request, cancel.clone()).await?;
        let mut parser = ReplyParser::new();
        let idle = self.config.stream_inactivity_timeout;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(None),
                next = tokio::time::timeout(idle, stream.next()) => next,
            };
            match next {
                Err(_) => {
                    return Err(PlanError::StreamTimeout {
                        seconds: idle.as_secs(),
                    })
                }
                Ok(Some(Ok(chunk))) => {
                    parser.add_token(&chunk.content, true);
                    plan.add_reply_token(&chunk.content);
                    if let Some(reason) = chunk.finish_reason {
                        debug!("Plan {}: reply finished ({reason})", plan.plan_id);
                        break;
                    }
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) if cancel.is_cancelled() => return Ok(None),
                Ok(None) => return Err(PlanError::model("model stream ended without a finish reason")),
            }
        }

        let parsed = parser.finish();
        info!(
            "Plan {}: reply proposed {} files in {} blocks",
            plan.plan_id,
            parsed.files.len(),
            parsed.blocks.len()
        );
        Ok(Some(parsed))
    }

    /// Asks the model for a commit message. A failure is recorded on the
    /// description rather than failing the plan.
    async fn describe(
        &self,
        plan: &Arc<ActivePlan>,
        convo_message_id: u64,
        reply: &str,
        parsed: &ReplyParseResult,
    ) -> Result<ConvoMessageDescription> {
        let mut description = ConvoMessageDescription::chat_only(plan.plan_id, convo_message_id);
        description.made_plan = true;
        description.files.clone_from(&parsed.files);

        let cancel = plan.cancel_token();
        let request = ModelRequest {
            model: self.config.planner_model.clone(),
            messages: prompts::describe_messages(reply),
            json_output: false,
            purpose: Purpose::Describe,
        };
        let commit_msg = match self.model.stream(request, cancel.clone()).await {
            Ok(stream) => collect_text(stream, &cancel, self.config.stream_inactivity_timeout).await,
            Err(e) => Err(e),
        };
        match commit_msg {
            Ok(text) => description.commit_msg = text.trim().to_string(),
            Err(PlanError::Canceled) => return Err(PlanError::Canceled),
            Err(e) => {
                warn!("Plan {}: describe failed: {e}", plan.plan_id);
                description.error = Some(e.to_string());
            }
        }
        Ok(description)
    }

    async fn start_builds(
        &self,
        plan: &Arc<ActivePlan>,
        contexts: &[Context],
        parsed: &ReplyParseResult,
    ) -> Result<()> {
        let plan_id = plan.plan_id;
        let results = blocking(&self.store, move |s| s.get_plan_file_results(plan_id)).await?;
        let plan_result = PlanResult::from_results(results);

        // Start from contexts with earlier pending results on top.
        let current = current_plan_files(contexts, &plan_result).unwrap_or_else(|e| {
            warn!("Plan {plan_id}: pending results no longer apply, building on contexts: {e}");
            Default::default()
        });
        plan.update(|s| {
            for context in contexts {
                if let Some(path) = &context.file_path {
                    s.file_states.insert(path.clone(), context.body.clone());
                    s.context_shas.insert(path.clone(), context.sha.clone());
                }
            }
            s.file_states.extend(current.files);
        });

        plan.emit(StreamMessage::Building)?;
        self.set_status(plan, PlanStatus::Building).await?;

        for path in plan.enqueue_builds(&parsed.blocks) {
            let server = self.clone();
            let worker_plan = Arc::clone(plan);
            plan.spawn(async move { server.run_build_worker(worker_plan, path).await });
        }
        Ok(())
    }
}

fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(PlanError::invalid_input("prompt").with_reason("Prompt cannot be empty"));
    }
    Ok(())
}
