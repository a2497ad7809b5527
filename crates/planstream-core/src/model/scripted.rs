//! Scripted model for tests and offline runs.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::{ModelChunk, ModelClient, ModelRequest, ModelStream, Purpose};
use crate::error::{PlanError, Result};

/// Commit message used for describe requests with nothing queued.
pub const DEFAULT_DESCRIPTION: &str = "Apply proposed changes";

/// One canned response.
#[derive(Debug, Clone, Default)]
pub struct Script {
    tokens: Vec<String>,
    token_delay: Duration,
    stall_after: Option<usize>,
    error_after: Option<(usize, String)>,
    reject: Option<String>,
}

impl Script {
    /// Streams `tokens` as given, then finishes with reason `stop`.
    pub fn tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Streams `text` in chunks of `chunk_chars` characters.
    pub fn text(text: &str, chunk_chars: usize) -> Self {
        let chars: Vec<char> = text.chars().collect();
        Self::tokens(
            chars
                .chunks(chunk_chars.max(1))
                .map(|c| c.iter().collect::<String>()),
        )
    }

    /// The request itself fails before any token is produced.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reject: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Goes silent after `n` tokens until canceled.
    pub fn stall_after(mut self, n: usize) -> Self {
        self.stall_after = Some(n);
        self
    }

    /// Yields a stream error after `n` tokens.
    pub fn error_after(mut self, n: usize, message: impl Into<String>) -> Self {
        self.error_after = Some((n, message.into()));
        self
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    reply: VecDeque<Script>,
    describe: VecDeque<Script>,
    build: HashMap<String, VecDeque<Script>>,
    requests: Vec<ModelRequest>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
}

/// Replays queued [`Script`]s by request purpose, in queue order.
///
/// Build scripts are queued per path. Every request is recorded, and the
/// peak number of concurrent streams per build path is tracked.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_reply(&self, script: Script) -> &Self {
        self.state().reply.push_back(script);
        self
    }

    pub fn on_describe(&self, script: Script) -> &Self {
        self.state().describe.push_back(script);
        self
    }

    pub fn on_build(&self, path: impl Into<String>, script: Script) -> &Self {
        self.state()
            .build
            .entry(path.into())
            .or_default()
            .push_back(script);
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.state().requests.clone()
    }

    /// Highest number of simultaneously open build streams for `path`.
    pub fn max_concurrent_builds(&self, path: &str) -> usize {
        self.state().max_in_flight.get(path).copied().unwrap_or(0)
    }

    fn next_script(&self, purpose: &Purpose) -> Option<Script> {
        let mut state = self.state();
        match purpose {
            Purpose::Reply => state.reply.pop_front(),
            Purpose::Describe => Some(
                state
                    .describe
                    .pop_front()
                    .unwrap_or_else(|| Script::tokens([DEFAULT_DESCRIPTION])),
            ),
            Purpose::Build { path } => state.build.get_mut(path).and_then(VecDeque::pop_front),
        }
    }
}

/// Keeps a build path counted as in flight until the stream is dropped.
struct InFlight {
    state: Arc<Mutex<ScriptedState>>,
    path: String,
}

impl InFlight {
    fn enter(state: &Arc<Mutex<ScriptedState>>, path: &str) -> Self {
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        let count = guard.in_flight.entry(path.to_string()).or_insert(0);
        *count += 1;
        let current = *count;
        let peak = guard.max_in_flight.entry(path.to_string()).or_insert(0);
        *peak = (*peak).max(current);
        Self {
            state: Arc::clone(state),
            path: path.to_string(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = guard.in_flight.get_mut(&self.path) {
            *count = count.saturating_sub(1);
        }
    }
}

struct Playback {
    script: Script,
    next: usize,
    cancel: CancellationToken,
    finished: bool,
    _in_flight: Option<InFlight>,
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn stream(&self, request: ModelRequest, cancel: CancellationToken) -> Result<ModelStream> {
        let purpose = request.purpose.clone();
        self.state().requests.push(request);

        let script = self
            .next_script(&purpose)
            .ok_or_else(|| PlanError::model(format!("no scripted response for {purpose:?}")))?;
        if let Some(message) = &script.reject {
            return Err(PlanError::model(message.clone()));
        }

        let in_flight = match &purpose {
            Purpose::Build { path } => Some(InFlight::enter(&self.state, path)),
            _ => None,
        };
        let playback = Playback {
            script,
            next: 0,
            cancel,
            finished: false,
            _in_flight: in_flight,
        };

        Ok(stream::unfold(playback, |mut pb| async move {
            if pb.finished {
                return None;
            }
            if pb.script.stall_after == Some(pb.next) {
                pb.cancel.cancelled().await;
                return None;
            }
            if let Some((n, message)) = &pb.script.error_after {
                if *n == pb.next {
                    pb.finished = true;
                    let err = PlanError::model(message.clone());
                    return Some((Err(err), pb));
                }
            }
            if !pb.script.token_delay.is_zero() {
                tokio::select! {
                    () = pb.cancel.cancelled() => return None,
                    () = tokio::time::sleep(pb.script.token_delay) => {}
                }
            } else if pb.cancel.is_cancelled() {
                return None;
            }

            let is_last = pb.next + 1 >= pb.script.tokens.len();
            let content = pb.script.tokens.get(pb.next).cloned().unwrap_or_default();
            pb.next += 1;
            pb.finished = is_last;
            let chunk = ModelChunk {
                content,
                finish_reason: is_last.then(|| "stop".to_string()),
            };
            Some((Ok(chunk), pb))
        })
        .boxed())
    }
}
