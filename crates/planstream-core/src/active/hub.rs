//! Subscriber fan-out.
//!
//! Every message the fan-out task broadcasts is appended to a replay log
//! and pushed to each subscriber's inbox under one lock, so a subscriber
//! that joins mid-stream sees the replay followed by live messages with no
//! gap and no duplicate. A relay task per subscriber moves its inbox into a
//! bounded outbox. When a delivery waits longer than the delivery timeout,
//! that subscriber starts skipping content and build progress it has no
//! room for, without affecting anyone else. Phase and terminal messages
//! are always delivered.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::{stream, stream::BoxStream, StreamExt};
use log::{debug, warn};
use tokio::{sync::mpsc, time::Instant};

use crate::stream::StreamMessage;

/// Messages delivered to one subscriber, ending after FINISHED or ERROR.
pub type PlanStream = BoxStream<'static, StreamMessage>;

/// Everything broadcast so far, with consecutive content merged.
#[derive(Debug, Default, Clone)]
pub struct ReplayLog {
    messages: Vec<StreamMessage>,
}

impl ReplayLog {
    pub fn push(&mut self, message: StreamMessage) {
        if let StreamMessage::Content { content } = &message {
            if let Some(StreamMessage::Content { content: last }) = self.messages.last_mut() {
                last.push_str(content);
                return;
            }
        }
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[StreamMessage] {
        &self.messages
    }
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<StreamMessage>>,
    replay: ReplayLog,
    closed: bool,
}

/// Registry of subscriber queues for one active plan.
pub struct SubscriberHub {
    state: Mutex<HubState>,
    capacity: usize,
    delivery_timeout: Duration,
}

impl SubscriberHub {
    pub fn new(capacity: usize, delivery_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            capacity: capacity.max(1),
            delivery_timeout,
        })
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Joins the stream. The returned stream starts with the replay.
    pub fn subscribe(self: &Arc<Self>) -> PlanStream {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state();
            for message in state.replay.messages() {
                let _ = inbox_tx.send(message.clone());
            }
            let id = state.next_id;
            state.next_id += 1;
            if !state.closed {
                state.subscribers.insert(id, inbox_tx);
            }
            id
        };
        debug!("Subscriber {id} joined");

        let (outbox_tx, outbox_rx) = mpsc::channel(self.capacity);
        tokio::spawn(relay(Arc::clone(self), id, inbox_rx, outbox_tx));

        stream::unfold(outbox_rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        })
        .boxed()
    }

    /// Removes a subscriber; its stream ends after what it already holds.
    pub fn leave(&self, id: u64) {
        if self.state().subscribers.remove(&id).is_some() {
            debug!("Subscriber {id} left");
        }
    }

    /// Records `message` and queues it for every current subscriber.
    pub fn broadcast(&self, message: &StreamMessage) {
        let mut state = self.state();
        if state.closed {
            return;
        }
        state.replay.push(message.clone());

        let snapshot: Vec<(u64, mpsc::UnboundedSender<StreamMessage>)> = state
            .subscribers
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        for (id, tx) in snapshot {
            if tx.send(message.clone()).is_err() {
                state.subscribers.remove(&id);
            }
        }
    }

    /// Stops accepting messages and lets every subscriber stream end.
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn num_subscribers(&self) -> usize {
        self.state().subscribers.len()
    }

    pub fn replay(&self) -> ReplayLog {
        self.state().replay.clone()
    }
}

/// Messages a lagging subscriber may lose.
fn is_skippable(message: &StreamMessage) -> bool {
    matches!(message, StreamMessage::Content { .. } | StreamMessage::BuildInfo(_))
}

/// Moves one subscriber's inbox into its outbox.
///
/// The inbox is drained into a local backlog while a delivery waits. If the
/// front of the backlog waits past the delivery timeout, the subscriber is
/// lagging: queued content is skipped and new content is dropped on
/// arrival until the backlog empties. Phase and terminal messages are kept
/// and wait for as long as the subscriber holds its stream.
async fn relay(
    hub: Arc<SubscriberHub>,
    id: u64,
    mut inbox: mpsc::UnboundedReceiver<StreamMessage>,
    outbox: mpsc::Sender<StreamMessage>,
) {
    let mut backlog: VecDeque<StreamMessage> = VecDeque::new();
    let mut inbox_open = true;
    let mut lagging = false;
    let mut skipped = 0usize;
    let mut waiting_since: Option<Instant> = None;

    loop {
        if backlog.is_empty() {
            let next = if inbox_open { inbox.recv().await } else { None };
            let Some(message) = next else {
                break;
            };
            backlog.push_back(message);
        }
        let deadline = *waiting_since.get_or_insert_with(Instant::now) + hub.delivery_timeout;

        tokio::select! {
            biased;
            permit = outbox.reserve() => {
                let Ok(permit) = permit else {
                    debug!("Subscriber {id} disconnected");
                    break;
                };
                if let Some(message) = backlog.pop_front() {
                    permit.send(message);
                }
                waiting_since = None;
                if lagging && backlog.is_empty() {
                    debug!("Subscriber {id} caught up after skipping {skipped} messages");
                    lagging = false;
                    skipped = 0;
                }
            }
            () = tokio::time::sleep_until(deadline), if !lagging => {
                let queued = backlog.len();
                backlog.retain(|m| !is_skippable(m));
                skipped += queued - backlog.len();
                lagging = true;
                waiting_since = None;
                warn!(
                    "Subscriber {id} blocked delivery for {:?}, skipping content until it catches up",
                    hub.delivery_timeout
                );
            }
            next = inbox.recv(), if inbox_open => match next {
                Some(message) if lagging && is_skippable(&message) => skipped += 1,
                Some(message) => backlog.push_back(message),
                None => inbox_open = false,
            },
        }
    }
    hub.leave(id);
}
