//! In-memory state of a plan with an execution in flight.
//!
//! An [`ActivePlan`] owns the plan's cancellation scope, the reply
//! accumulator, per-path build queues and the subscriber fan-out. Each
//! execution (the first tell, and every revision after an abort) runs under
//! a child token of that scope, so stopping an execution leaves the fan-out
//! open for a revision or a cancel. All
//! mutable state sits behind one mutex reached only through
//! [`ActivePlan::update`], and every phase change is checked against the
//! stream state machine and queued for fan-out under that same lock, so
//! subscribers observe transitions in exactly the order they happened.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use log::{debug, info};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    error::Result,
    reply::FileBlock,
    stream::{Phase, PlanStreamState, StreamEvent, StreamMessage},
};

pub mod hub;
pub mod registry;


pub use hub::{PlanStream, ReplayLog, SubscriberHub};
pub use registry::ActivePlans;

/// One queued build for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBuild {
    pub path: String,
    pub content: String,
    pub description: String,
    pub num_tokens: usize,
    pub started: bool,
    pub success: bool,
    pub error: Option<String>,
}

impl ActiveBuild {
    pub fn from_block(block: &FileBlock) -> Self {
        Self {
            path: block.path.clone(),
            content: block.content.clone(),
            description: block.description.clone(),
            num_tokens: block.num_tokens,
            started: false,
            success: false,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.success || self.error.is_some()
    }
}

/// How a build ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildCompletion {
    /// The file's content after the build
    Succeeded { content: String },
    /// Some or all edits failed; `content` holds whatever did apply
    Failed { content: Option<String>, error: String },
}

/// Shared mutable state of an active plan.
#[derive(Debug, Default)]
pub struct PlanState {
    pub stream: PlanStreamState,
    pub content: String,
    pub num_tokens: usize,
    /// ID of the stored assistant reply once it has been claimed for storage
    pub reply_message_id: Option<u64>,
    pub reply_stored: bool,
    pub build_queues_by_path: HashMap<String, Vec<ActiveBuild>>,
    pub is_building_by_path: HashSet<String>,
    /// Paths with at least one build not yet finished
    pub unfinished_paths: HashSet<String>,
    pub file_states: HashMap<String, String>,
    pub context_shas: HashMap<String, String>,
    /// Scope of the current execution, a child of the plan scope
    pub execution: CancellationToken,
    /// Bumped by every revision
    pub revision: u64,
}

impl PlanState {
    fn path_finished(&self, path: &str) -> bool {
        self.build_queues_by_path
            .get(path)
            .map_or(true, |queue| queue.iter().all(ActiveBuild::is_finished))
    }

    /// Drops everything the previous execution accumulated.
    fn reset_execution(&mut self, execution: CancellationToken) {
        self.content.clear();
        self.num_tokens = 0;
        self.reply_message_id = None;
        self.reply_stored = false;
        self.build_queues_by_path.clear();
        self.is_building_by_path.clear();
        self.unfinished_paths.clear();
        self.file_states.clear();
        self.context_shas.clear();
        self.execution = execution;
        self.revision += 1;
    }
}

pub struct ActivePlan {
    pub plan_id: u64,
    scope: CancellationToken,
    state: Mutex<PlanState>,
    queue: mpsc::UnboundedSender<StreamMessage>,
    hub: Arc<SubscriberHub>,
    tasks: TaskTracker,
}

impl ActivePlan {
    /// Creates the plan and spawns its fan-out task on the current runtime.
    pub fn new(plan_id: u64, queue_capacity: usize, delivery_timeout: Duration) -> Arc<Self> {
        let (queue, rx) = mpsc::unbounded_channel();
        let hub = SubscriberHub::new(queue_capacity, delivery_timeout);
        let scope = CancellationToken::new();
        tokio::spawn(fan_out(plan_id, rx, Arc::clone(&hub), scope.clone()));

        let state = PlanState {
            execution: scope.child_token(),
            ..PlanState::default()
        };
        Arc::new(Self {
            plan_id,
            scope,
            state: Mutex::new(state),
            queue,
            hub,
            tasks: TaskTracker::new(),
        })
    }

    /// Runs `f` with exclusive access to the plan state.
    pub fn update<R>(&self, f: impl FnOnce(&mut PlanState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn phase(&self) -> Phase {
        self.update(|s| s.stream.phase())
    }

    /// Token of the current execution.
    pub fn cancel_token(&self) -> CancellationToken {
        self.update(|s| s.execution.clone())
    }

    /// Cancels the whole plan: the current execution stops and the fan-out
    /// closes after delivering what is already queued.
    pub fn cancel(&self) {
        self.scope.cancel();
    }

    /// Whether the current execution was stopped or the plan canceled.
    pub fn is_canceled(&self) -> bool {
        self.update(|s| s.execution.is_cancelled())
    }

    /// Resolves once the plan scope is canceled.
    pub async fn closed(&self) {
        self.scope.cancelled().await;
    }

    /// Runs `task` as part of the current execution.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Waits until every task spawned so far has exited.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    pub fn subscribe(&self) -> PlanStream {
        self.hub.subscribe()
    }

    pub fn num_subscribers(&self) -> usize {
        self.hub.num_subscribers()
    }

    /// Queues `message` for every subscriber.
    ///
    /// Phase messages fire their transition first.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::InvalidTransition` when the phase change is not
    /// allowed; nothing is sent in that case. Content sent after the stream
    /// ended is dropped.
    pub fn emit(&self, message: StreamMessage) -> Result<()> {
        self.update(|state| self.emit_locked(state, message))
    }

    fn emit_locked(&self, state: &mut PlanState, message: StreamMessage) -> Result<()> {
        match message.event() {
            Some(event) => {
                let phase = state.stream.fire(event)?;
                info!("Plan {} entered phase {phase}", self.plan_id);
            }
            None if state.stream.is_terminal() || state.stream.phase() == Phase::Aborted => {
                return Ok(());
            }
            None => {}
        }
        // The fan-out task only goes away after a terminal message.
        let _ = self.queue.send(message);
        Ok(())
    }

    /// Appends a reply token and forwards it as content.
    pub fn add_reply_token(&self, token: &str) {
        self.update(|state| {
            state.content.push_str(token);
            state.num_tokens += 1;
            if !token.is_empty() {
                let _ = self.emit_locked(state, StreamMessage::content(token));
            }
        });
    }

    /// Sends ABORTED and cancels the current execution in the same
    /// critical section, so the execution can never get past the abort.
    /// Returns the revision that was aborted and, when the reply was still
    /// streaming, the partial content for storage.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::InvalidTransition` if the stream already ended
    /// or is already aborted.
    pub fn abort(&self) -> Result<(u64, Option<String>)> {
        self.update(|state| {
            let was_replying = matches!(state.stream.phase(), Phase::Replying | Phase::Revising);
            self.emit_locked(state, StreamMessage::Aborted)?;
            state.execution.cancel();
            let partial = (was_replying && !state.reply_stored).then(|| {
                state.reply_stored = true;
                state.content.clone()
            });
            Ok((state.revision, partial))
        })
    }

    /// Moves an aborted plan to REVISING and opens a fresh execution scope.
    /// Callers wait for [`Self::wait_idle`] first so no task of the aborted
    /// execution is left running.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::InvalidTransition` unless the plan is aborted.
    pub fn revise(&self) -> Result<u64> {
        self.update(|state| {
            let phase = state.stream.fire(StreamEvent::Revise)?;
            info!("Plan {} entered phase {phase}", self.plan_id);
            state.reset_execution(self.scope.child_token());
            Ok(state.revision)
        })
    }

    /// Moves an aborted plan to CANCELED and closes it. With `revision`
    /// set, nothing happens unless that revision is still the aborted one;
    /// returns whether the plan was canceled.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::InvalidTransition` unless the plan is aborted.
    pub fn cancel_aborted(&self, revision: Option<u64>) -> Result<bool> {
        self.update(|state| {
            if revision.is_some_and(|r| r != state.revision) {
                return Ok(false);
            }
            let phase = state.stream.fire(StreamEvent::Cancel)?;
            info!("Plan {} entered phase {phase}", self.plan_id);
            self.scope.cancel();
            Ok(true)
        })
    }

    /// Claims the right to store the assistant reply. Only the first caller
    /// gets the accumulated content.
    pub fn claim_reply(&self) -> Option<String> {
        self.update(|state| {
            if state.reply_stored {
                None
            } else {
                state.reply_stored = true;
                Some(state.content.clone())
            }
        })
    }

    /// Queues builds for every block and returns the paths that need a
    /// worker started.
    pub fn enqueue_builds(&self, blocks: &[FileBlock]) -> Vec<String> {
        self.update(|state| {
            let mut start = Vec::new();
            for block in blocks {
                state
                    .build_queues_by_path
                    .entry(block.path.clone())
                    .or_default()
                    .push(ActiveBuild::from_block(block));
                state.unfinished_paths.insert(block.path.clone());
                if state.is_building_by_path.insert(block.path.clone()) {
                    start.push(block.path.clone());
                }
            }
            start
        })
    }

    /// Hands the next unstarted build for `path` to its worker. When none
    /// is left the path stops counting as building, in the same critical
    /// section, so a later enqueue starts a fresh worker.
    pub fn take_next_build(&self, path: &str) -> Option<(usize, ActiveBuild)> {
        self.update(|state| {
            let next = state.build_queues_by_path.get_mut(path).and_then(|queue| {
                queue.iter_mut().enumerate().find(|(_, b)| !b.started).map(|(idx, build)| {
                    build.started = true;
                    (idx, build.clone())
                })
            });
            if next.is_none() {
                state.is_building_by_path.remove(path);
            }
            next
        })
    }

    /// Records the end of build `idx` for `path`. Returns true for the call
    /// that finishes the last unfinished path.
    pub fn finish_build(&self, path: &str, idx: usize, completion: BuildCompletion) -> bool {
        self.update(|state| {
            let (content, error) = match completion {
                BuildCompletion::Succeeded { content } => (Some(content), None),
                BuildCompletion::Failed { content, error } => (content, Some(error)),
            };
            if let Some(content) = content {
                state.file_states.insert(path.to_string(), content);
            }
            if let Some(build) = state
                .build_queues_by_path
                .get_mut(path)
                .and_then(|queue| queue.get_mut(idx))
            {
                build.success = error.is_none();
                build.error = error;
            }

            if !state.path_finished(path) {
                return false;
            }
            debug!("Plan {}: all builds for {path} finished", self.plan_id);
            state.unfinished_paths.remove(path) && state.unfinished_paths.is_empty()
        })
    }

    /// Content the next build for `path` must start from, if the file exists.
    pub fn file_state(&self, path: &str) -> Option<String> {
        self.update(|state| state.file_states.get(path).cloned())
    }

    pub fn context_sha(&self, path: &str) -> Option<String> {
        self.update(|state| state.context_shas.get(path).cloned())
    }

    /// Builds that ended with an error, keyed by path.
    pub fn failed_builds(&self) -> Vec<(String, String)> {
        self.update(|state| {
            let mut failed: Vec<(String, String)> = state
                .build_queues_by_path
                .iter()
                .flat_map(|(path, queue)| {
                    queue
                        .iter()
                        .filter_map(|b| b.error.clone().map(|e| (path.clone(), e)))
                })
                .collect();
            failed.sort();
            failed
        })
    }

    pub fn replay(&self) -> ReplayLog {
        self.hub.replay()
    }
}

/// FINISHED and ERROR end the fan-out. ABORTED does not, since a revision
/// may follow it on the same stream.
fn closes_stream(message: &StreamMessage) -> bool {
    matches!(message, StreamMessage::Finished | StreamMessage::Error { .. })
}

/// Drains the internal queue into the hub until a closing message goes
/// out, the queue closes, or the scope is canceled. On cancel, messages
/// already queued are still delivered.
async fn fan_out(
    plan_id: u64,
    mut rx: mpsc::UnboundedReceiver<StreamMessage>,
    hub: Arc<SubscriberHub>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            message = rx.recv() => message,
            () = cancel.cancelled() => {
                while let Ok(message) = rx.try_recv() {
                    let last = closes_stream(&message);
                    hub.broadcast(&message);
                    if last {
                        break;
                    }
                }
                break;
            }
        };
        let Some(message) = message else {
            break;
        };
        let last = closes_stream(&message);
        hub.broadcast(&message);
        if last {
            break;
        }
    }
    hub.close();
    debug!("Plan {plan_id}: fan-out closed");
}
