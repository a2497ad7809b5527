//! OpenAI-compatible streaming chat completions client.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{ChatMessage, ModelChunk, ModelClient, ModelRequest, ModelStream};
use crate::error::{PlanError, Result};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// Client for `POST {api_base}/chat/completions` with `stream: true`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn stream(&self, request: ModelRequest, cancel: CancellationToken) -> Result<ModelStream> {
        let body = ApiRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            response_format: request.json_output.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let mut http_request = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        debug!(
            "Sending {:?} request to {} with model {}",
            request.purpose, self.api_base, request.model
        );
        let resp = tokio::select! {
            () = cancel.cancelled() => return Err(PlanError::Canceled),
            resp = http_request.send() => resp.map_err(|e| PlanError::model(format!("HTTP request failed: {e}")))?,
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(PlanError::model(format!("API error {status}: {text}")));
        }

        Ok(sse_stream(resp, cancel))
    }
}

struct SseState {
    resp: reqwest::Response,
    cancel: CancellationToken,
    pending: Vec<u8>,
    ready: VecDeque<Result<ModelChunk>>,
    done: bool,
}

fn sse_stream(resp: reqwest::Response, cancel: CancellationToken) -> ModelStream {
    let state = SseState {
        resp,
        cancel,
        pending: Vec::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            let chunk = tokio::select! {
                () = state.cancel.cancelled() => return None,
                chunk = state.resp.chunk() => chunk,
            };
            match chunk {
                Ok(Some(bytes)) => {
                    state.pending.extend_from_slice(&bytes);
                    state.done = drain_sse_frames(&mut state.pending, &mut state.ready);
                }
                Ok(None) => {
                    state.pending.extend_from_slice(b"\n\n");
                    drain_sse_frames(&mut state.pending, &mut state.ready);
                    state.done = true;
                }
                Err(e) => {
                    state.ready.push_back(Err(PlanError::model(format!(
                        "failed reading stream chunk: {e}"
                    ))));
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}

/// Moves every complete frame out of `pending`. Returns true once the
/// `[DONE]` marker has been seen.
pub(crate) fn drain_sse_frames(
    pending: &mut Vec<u8>,
    ready: &mut VecDeque<Result<ModelChunk>>,
) -> bool {
    let mut saw_done = false;
    while let Some((pos, len)) = find_frame_end(pending) {
        let frame: Vec<u8> = pending.drain(..pos + len).take(pos).collect();
        saw_done |= handle_sse_frame(&String::from_utf8_lossy(&frame), ready);
    }
    saw_done
}

fn find_frame_end(pending: &[u8]) -> Option<(usize, usize)> {
    let lf = pending.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = pending
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn handle_sse_frame(frame: &str, ready: &mut VecDeque<Result<ModelChunk>>) -> bool {
    for raw_line in frame.lines() {
        let line = raw_line.trim_end_matches('\r');
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim_start();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            return true;
        }
        let event = match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping unparseable stream event: {e}");
                continue;
            }
        };
        for choice in event.choices {
            let content = choice.delta.content.unwrap_or_default();
            if content.is_empty() && choice.finish_reason.is_none() {
                continue;
            }
            ready.push_back(Ok(ModelChunk {
                content,
                finish_reason: choice.finish_reason,
            }));
        }
    }
    false
}
