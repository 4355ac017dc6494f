//! Frame dispatch for one connection.
//!
//! The reader task hands every decoded [`Frame`] to the [`FrameBus`], which
//! routes it to exactly one of:
//!
//! - the pending call waiting on that response id (a oneshot sender that
//!   was registered *before* the request was written), or
//! - the bounded replay buffer, when nobody is waiting on that id yet, or
//! - every topic subscriber whose method (and optional params filter)
//!   matches a notification.
//!
//! A fatal error (decode, read, server hang-up) terminates the bus: every
//! pending call and subscriber gets the error, and anything registered
//! afterwards gets it immediately.
//!
//! # Architecture
//!
//! ```text
//!   reader task ──dispatch(frame)──► FrameBus ──oneshot──► call_and_await()
//!                                       │
//!                                       ├──mpsc──► Subscription (numblocks)
//!                                       └──mpsc──► Subscription (address 1abc)
//! ```

// Rust guideline compliant 2026-02

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::frame::{Frame, Notification};
use crate::error::{Result, StratumError};

/// Outcome delivered to a pending call.
pub type CallResult = Result<Value>;

/// Which notifications of a method a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    /// Every notification for the method.
    All,
    /// Only notifications whose params text contains this string.
    ParamsContain(String),
}

impl TopicFilter {
    fn matches(&self, notification: &Notification) -> bool {
        match self {
            Self::All => true,
            Self::ParamsContain(needle) => notification.params_contain(needle),
        }
    }
}

/// One attached listener on a topic.
struct TopicSubscriber {
    id: u64,
    filter: TopicFilter,
    tx: mpsc::UnboundedSender<Result<Notification>>,
}

/// Mutable routing tables, guarded by one mutex.
struct BusState {
    /// Response id -> waiter. At most one waiter per id.
    pending: HashMap<u64, oneshot::Sender<CallResult>>,
    /// Responses that arrived before anybody waited on them, oldest first.
    unclaimed: VecDeque<(u64, CallResult)>,
    /// Method -> subscribers.
    topics: HashMap<String, Vec<TopicSubscriber>>,
    next_subscriber_id: u64,
    /// Set once; the bus never recovers.
    terminal: Option<StratumError>,
}

/// Routes decoded frames to pending calls and topic subscribers.
///
/// Shared between the reader task (publishing) and any number of callers
/// (registering and detaching). All operations take the lock briefly and
/// never await while holding it.
pub struct FrameBus {
    state: Mutex<BusState>,
    replay_capacity: usize,
}

impl std::fmt::Debug for FrameBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("FrameBus")
            .field("pending", &state.pending.len())
            .field("unclaimed", &state.unclaimed.len())
            .field("topics", &state.topics.len())
            .field("terminal", &state.terminal)
            .finish()
    }
}

impl FrameBus {
    /// Create a bus that keeps at most `replay_capacity` unclaimed responses.
    pub fn new(replay_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BusState {
                pending: HashMap::new(),
                unclaimed: VecDeque::new(),
                topics: HashMap::new(),
                next_subscriber_id: 0,
                terminal: None,
            }),
            replay_capacity,
        })
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Calls ───────────────────────────────────────────────────────────────

    /// Register the waiter for response `id`.
    ///
    /// If that response already arrived and is still in the replay buffer,
    /// it is claimed (and evicted) and the returned receiver is ready.
    ///
    /// # Errors
    ///
    /// Returns the terminal error if the bus is already finished, or
    /// [`StratumError::AlreadyAwaited`] if `id` has a live waiter.
    pub fn register_call(&self, id: u64) -> Result<oneshot::Receiver<CallResult>> {
        let mut state = self.state();
        if let Some(err) = &state.terminal {
            return Err(err.clone());
        }

        let (tx, rx) = oneshot::channel();

        if let Some(pos) = state.unclaimed.iter().position(|(claimed, _)| *claimed == id) {
            if let Some((_, outcome)) = state.unclaimed.remove(pos) {
                log::trace!("[Stratum] Response #{} claimed from replay buffer", id);
                let _ = tx.send(outcome);
                return Ok(rx);
            }
        }

        if state.pending.contains_key(&id) {
            return Err(StratumError::AlreadyAwaited { id });
        }
        state.pending.insert(id, tx);
        Ok(rx)
    }

    /// Drop the waiter for `id` without resolving it.
    ///
    /// Used when the request could not be written, a timeout fired, or the
    /// caller stopped waiting. A no-op if `id` was already resolved.
    pub fn release_call(&self, id: u64) {
        if self.state().pending.remove(&id).is_some() {
            log::trace!("[Stratum] Released waiter for #{}", id);
        }
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.state().pending.len()
    }

    // ── Topics ──────────────────────────────────────────────────────────────

    /// Attach a new, independent subscriber to `method`.
    ///
    /// On a bus that already failed, the subscription yields the failure
    /// once and ends. On a closed bus it ends immediately.
    pub fn subscribe(self: &Arc<Self>, method: &str, filter: TopicFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;

        match &state.terminal {
            Some(StratumError::Closed) => {}
            Some(err) => {
                let _ = tx.send(Err(err.clone()));
            }
            None => {
                log::debug!("[Stratum] Subscriber {} attached to {} ({:?})", id, method, filter);
                state
                    .topics
                    .entry(method.to_string())
                    .or_default()
                    .push(TopicSubscriber { id, filter, tx });
            }
        }

        Subscription {
            method: method.to_string(),
            id,
            rx,
            bus: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, method: &str, id: u64) {
        let mut state = self.state();
        if let Some(subscribers) = state.topics.get_mut(method) {
            subscribers.retain(|s| s.id != id);
            if subscribers.is_empty() {
                state.topics.remove(method);
            }
            log::debug!("[Stratum] Subscriber {} detached from {}", id, method);
        }
    }

    // ── Publishing ──────────────────────────────────────────────────────────

    /// Route one decoded frame.
    pub fn dispatch(&self, frame: Frame) {
        let mut state = self.state();
        if state.terminal.is_some() {
            return;
        }

        match frame {
            Frame::Response { id, result, error } => {
                let outcome = match error {
                    Some(error) => Err(StratumError::Server { id, error }),
                    None => Ok(result),
                };
                match state.pending.remove(&id) {
                    Some(waiter) => {
                        if waiter.send(outcome).is_err() {
                            log::trace!("[Stratum] Waiter for #{} went away before its response", id);
                        }
                    }
                    None => {
                        log::trace!("[Stratum] No waiter for #{}, keeping for replay", id);
                        state.unclaimed.push_back((id, outcome));
                        while state.unclaimed.len() > self.replay_capacity {
                            if let Some((evicted, _)) = state.unclaimed.pop_front() {
                                log::trace!("[Stratum] Evicted unclaimed response #{}", evicted);
                            }
                        }
                    }
                }
            }
            Frame::Notification(notification) => {
                let Some(subscribers) = state.topics.get_mut(&notification.method) else {
                    log::trace!("[Stratum] Notification for {} has no subscribers", notification.method);
                    return;
                };
                // Detach anyone whose receiver is gone while delivering.
                subscribers.retain(|s| {
                    !s.filter.matches(&notification) || s.tx.send(Ok(notification.clone())).is_ok()
                });
                if subscribers.is_empty() {
                    state.topics.remove(&notification.method);
                }
            }
        }
    }

    /// Terminate the bus with a fatal error.
    ///
    /// Every pending call and every subscriber receives `err`; subscription
    /// streams then end. Later registrations get `err` immediately.
    pub fn fail(&self, err: StratumError) {
        let mut state = self.state();
        if state.terminal.is_some() {
            return;
        }
        log::error!("[Stratum] Connection failed: {}", err);

        for (_, waiter) in state.pending.drain() {
            let _ = waiter.send(Err(err.clone()));
        }
        for (_, subscribers) in state.topics.drain() {
            for subscriber in subscribers {
                let _ = subscriber.tx.send(Err(err.clone()));
            }
        }
        state.unclaimed.clear();
        state.terminal = Some(err);
    }

    /// Terminate the bus for an expected shutdown.
    ///
    /// Pending calls resolve with [`StratumError::Closed`]; subscription
    /// streams end without an error. A bus that already failed keeps its
    /// first error.
    pub fn close(&self) {
        let mut state = self.state();
        if state.terminal.is_some() {
            return;
        }

        for (_, waiter) in state.pending.drain() {
            let _ = waiter.send(Err(StratumError::Closed));
        }
        state.topics.clear();
        state.unclaimed.clear();
        state.terminal = Some(StratumError::Closed);
    }

    /// The error that terminated the bus, if any.
    pub fn terminal_error(&self) -> Option<StratumError> {
        self.state().terminal.clone()
    }
}

/// An independent stream of notifications for one topic.
///
/// Yields `Err` at most once (when the connection fails) and then ends.
/// Dropping it detaches only this subscriber.
pub struct Subscription {
    method: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Result<Notification>>,
    bus: Weak<FrameBus>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("method", &self.method)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Method this subscription listens to.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the next notification. `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Result<Notification>> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Result<Notification>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(&self.method, self.id);
        }
    }
}
