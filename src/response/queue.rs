//! Single-flight request queue for remote generations.
//!
//! [`ResponseRequestQueue`] is the synchronous core: it owns the state
//! machine, the FIFO of waiting requests, the one in-flight request and all
//! timers. It never reads a clock; every entry point takes `now`.
//!
//! [`ResponseQueueHandle::spawn`] runs the core inside a tokio task. Callers
//! and the transport talk to it only through commands on a channel, so every
//! mutation happens in one place and a caller can never re-enter the core
//! from inside its own call.
//!
//! Processing after an enqueue is deferred through a zero-delay timer. The
//! actor drains all queued commands before it looks at timers, so requests
//! issued together are all queued before the first one is sent.

use crate::clock::{Clock, TokioClock};
use crate::defaults;
use crate::response::protocol::{OutboundMessage, ResponseEvent, ResponseId, ResponseRequest};
use crate::response::state::{ResponseState, ResponseStateManager, StateChange};
use crate::response::transport::Transport;
use crate::timer::{self, Deadline};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("cannot create a response while {state}")]
    CannotCreateResponse { state: ResponseState },

    #[error("remote service did not answer within {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    #[error("remote service already has an active response: {message}")]
    RemoteConflict { message: String },

    #[error("remote service error: {message}")]
    Remote {
        code: Option<String>,
        message: String,
    },

    #[error("request queue cleared")]
    QueueCleared,

    #[error("failed to send request: {message}")]
    Transport { message: String },

    #[error("response queue is not running")]
    Closed,
}

impl QueueError {
    /// Errors the pipeline recovers from on its own and reports as warnings.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::Timeout { .. } | QueueError::RemoteConflict { .. } | QueueError::Remote { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseQueueConfig {
    /// Time allowed between sending a request and its `created` event.
    pub timeout: Duration,
    /// Time allowed between `created` and `done`.
    pub completion_timeout: Duration,
    /// Pause after a generation closes before the next request is sent.
    pub settle_delay: Duration,
    /// Transitions kept by the state machine.
    pub history_capacity: usize,
    /// Error code meaning the remote already has an active generation.
    pub conflict_code: String,
}

impl Default for ResponseQueueConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(defaults::RESPONSE_TIMEOUT_MS),
            completion_timeout: Duration::from_millis(defaults::COMPLETION_TIMEOUT_MS),
            settle_delay: Duration::from_millis(defaults::SETTLE_DELAY_MS),
            history_capacity: defaults::STATE_HISTORY_CAPACITY,
            conflict_code: defaults::CONFLICT_ERROR_CODE.to_string(),
        }
    }
}

/// Counters are monotonic; `pending` and `in_flight` are snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub pending: usize,
    pub in_flight: bool,
}

/// Where a caller's result is delivered. Consumed on use, so every request
/// settles at most once.
pub type Responder = oneshot::Sender<Result<ResponseId, QueueError>>;

struct QueueItem {
    request_id: u64,
    request: ResponseRequest,
    responder: Responder,
    enqueued_at: Instant,
}

struct InFlight {
    request_id: u64,
    responder: Responder,
    sent_at: Instant,
}

impl InFlight {
    fn settle(self, result: Result<ResponseId, QueueError>) {
        if self.responder.send(result).is_err() {
            tracing::debug!(request = self.request_id, "caller dropped before result");
        }
    }
}

pub struct ResponseRequestQueue {
    config: ResponseQueueConfig,
    state: ResponseStateManager,
    transport: Arc<dyn Transport>,
    pending: VecDeque<QueueItem>,
    in_flight: Option<InFlight>,
    next_request_id: u64,
    kick: Option<Deadline>,
    settle: Option<Deadline>,
    timeout: Option<Deadline>,
    stats: QueueStats,
}

impl ResponseRequestQueue {
    pub fn new(config: ResponseQueueConfig, transport: Arc<dyn Transport>) -> Self {
        let state = ResponseStateManager::with_history_capacity(config.history_capacity);
        Self {
            config,
            state,
            transport,
            pending: VecDeque::new(),
            in_flight: None,
            next_request_id: 1,
            kick: None,
            settle: None,
            timeout: None,
            stats: QueueStats::default(),
        }
    }

    /// Accepts a request, or rejects it at once when the state machine
    /// does not admit new generations.
    ///
    /// Returns the local request id when accepted. Processing happens on the
    /// next `poll_timers`, never inside this call.
    pub fn enqueue(&mut self, request: ResponseRequest, responder: Responder, now: Instant) -> Option<u64> {
        if !self.state.can_create_response() {
            let state = self.state.state();
            tracing::debug!(%state, "request refused at admission");
            if responder
                .send(Err(QueueError::CannotCreateResponse { state }))
                .is_err()
            {
                tracing::debug!("caller dropped before admission result");
            }
            return None;
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending.push_back(QueueItem {
            request_id,
            request,
            responder,
            enqueued_at: now,
        });
        tracing::debug!(
            request = request_id,
            pending = self.pending.len(),
            "request queued"
        );
        self.schedule_kick(now);
        Some(request_id)
    }

    /// Applies one event from the remote service.
    pub fn handle_event(&mut self, event: ResponseEvent, now: Instant) {
        match event {
            ResponseEvent::Created { response_id } => self.handle_created(response_id, now),
            ResponseEvent::Done { response_id } => self.handle_done(&response_id, now),
            ResponseEvent::Error { code, message } => self.handle_error(code, message, now),
            ResponseEvent::AudioBufferStarted => {
                if self.state.state() == ResponseState::Idle {
                    self.transition(ResponseState::AudioBuffering, None);
                }
            }
            ResponseEvent::AudioBufferCommitted => {
                if self.state.state() == ResponseState::AudioBuffering {
                    self.transition(ResponseState::AudioCommitted, None);
                }
            }
            ResponseEvent::AudioBufferCleared => {
                if matches!(
                    self.state.state(),
                    ResponseState::AudioBuffering | ResponseState::AudioCommitted
                ) {
                    self.transition(ResponseState::Idle, None);
                    self.schedule_kick(now);
                }
            }
        }
    }

    /// Fires due timers: request timeout, settle delay, deferred kick.
    pub fn poll_timers(&mut self, now: Instant) {
        if timer::take_if_due(&mut self.timeout, now).is_some() {
            self.handle_timeout(now);
        }
        if timer::take_if_due(&mut self.settle, now).is_some() {
            self.process_next(now);
        }
        if timer::take_if_due(&mut self.kick, now).is_some() {
            self.process_next(now);
        }
    }

    /// Earliest armed timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        timer::earliest([self.timeout, self.settle, self.kick])
    }

    /// Rejects every waiting and in-flight request with `QueueCleared` and
    /// returns the state machine to `IDLE`.
    pub fn clear(&mut self) -> usize {
        let mut cleared = 0;
        for item in self.pending.drain(..) {
            if item.responder.send(Err(QueueError::QueueCleared)).is_err() {
                tracing::debug!(request = item.request_id, "caller dropped before clear");
            }
            cleared += 1;
        }
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.settle(Err(QueueError::QueueCleared));
            cleared += 1;
        }
        self.kick = None;
        self.settle = None;
        self.timeout = None;
        self.state.reset();
        if cleared > 0 {
            tracing::info!(cleared, "request queue cleared");
        }
        cleared
    }

    pub fn state(&self) -> ResponseState {
        self.state.state()
    }

    pub fn active_response_id(&self) -> Option<&str> {
        self.state.active_response_id()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending.len(),
            in_flight: self.in_flight.is_some(),
            ..self.stats
        }
    }

    pub fn history(&self) -> Vec<StateChange> {
        self.state.history()
    }

    /// Registers a state listener on the underlying state machine.
    pub fn add_state_listener<F>(&mut self, listener: F)
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.state.add_listener(listener);
    }

    fn schedule_kick(&mut self, now: Instant) {
        if self.kick.is_none() {
            self.kick = Some(Deadline::arm(now, Duration::ZERO));
        }
    }

    fn process_next(&mut self, now: Instant) {
        if self.in_flight.is_some() || self.settle.is_some() {
            return;
        }
        if !self.state.can_create_response() {
            if !self.pending.is_empty() {
                tracing::debug!(state = %self.state.state(), "requests waiting for admission");
            }
            return;
        }
        let Some(item) = self.pending.pop_front() else {
            return;
        };

        if !self.enter_pending() {
            self.pending.push_front(item);
            return;
        }

        let request_id = item.request_id;
        let message = OutboundMessage::CreateResponse {
            request_id,
            request: item.request,
        };
        if let Err(e) = self.transport.send(message) {
            tracing::warn!(request = request_id, error = %e, "failed to send request");
            self.state.reset();
            self.stats.failed += 1;
            if item
                .responder
                .send(Err(QueueError::Transport {
                    message: e.to_string(),
                }))
                .is_err()
            {
                tracing::debug!(request = request_id, "caller dropped before send failure");
            }
            self.schedule_kick(now);
            return;
        }

        tracing::debug!(
            request = request_id,
            waited_ms = now.saturating_duration_since(item.enqueued_at).as_millis() as u64,
            transport = self.transport.name(),
            "request sent"
        );
        self.in_flight = Some(InFlight {
            request_id,
            responder: item.responder,
            sent_at: now,
        });
        self.timeout = Some(Deadline::arm(now, self.config.timeout));
    }

    /// Moves to `RESPONSE_PENDING`, committing first from `AUDIO_BUFFERING`
    /// since the table has no direct edge.
    fn enter_pending(&mut self) -> bool {
        match self.state.state() {
            ResponseState::Idle | ResponseState::AudioCommitted => {
                self.transition(ResponseState::ResponsePending, None)
            }
            ResponseState::AudioBuffering => {
                self.transition(ResponseState::AudioCommitted, None)
                    && self.transition(ResponseState::ResponsePending, None)
            }
            _ => false,
        }
    }

    fn handle_created(&mut self, response_id: ResponseId, now: Instant) {
        match self.state.state() {
            ResponseState::ResponsePending => {}
            state
                if self.in_flight.is_none()
                    && !matches!(
                        state,
                        ResponseState::ResponseActive | ResponseState::ResponseCompleting
                    ) =>
            {
                // Started by the remote on its own (e.g. after an audio commit).
                // Track it so nothing is sent until it finishes.
                tracing::info!(response = %response_id, %state, "remote started a response");
                if !self.enter_pending() {
                    return;
                }
            }
            state => {
                tracing::warn!(response = %response_id, %state, "unexpected created event ignored");
                return;
            }
        }

        if self.transition(ResponseState::ResponseActive, Some(response_id)) {
            self.timeout = Some(Deadline::arm(now, self.config.completion_timeout));
        }
    }

    fn handle_done(&mut self, response_id: &str, now: Instant) {
        if self.state.state() != ResponseState::ResponseActive
            || self.state.active_response_id() != Some(response_id)
        {
            tracing::warn!(
                response = response_id,
                state = %self.state.state(),
                "done event for unknown response ignored"
            );
            return;
        }

        self.timeout = None;
        if self.transition(ResponseState::ResponseCompleting, None) {
            self.transition(ResponseState::Idle, None);
        }

        if let Some(in_flight) = self.in_flight.take() {
            tracing::debug!(
                request = in_flight.request_id,
                response = response_id,
                elapsed_ms = now.saturating_duration_since(in_flight.sent_at).as_millis() as u64,
                "response complete"
            );
            in_flight.settle(Ok(response_id.to_string()));
            self.stats.completed += 1;
        }
        self.settle = Some(Deadline::arm(now, self.config.settle_delay));
    }

    fn handle_error(&mut self, code: Option<String>, message: String, now: Instant) {
        let error = if code.as_deref() == Some(self.config.conflict_code.as_str()) {
            tracing::warn!(%message, state = %self.state.state(), "remote conflict, resetting response state");
            QueueError::RemoteConflict { message }
        } else {
            tracing::warn!(code = ?code, %message, "remote error, resetting response state");
            QueueError::Remote { code, message }
        };

        self.state.reset();
        self.timeout = None;
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.settle(Err(error));
            self.stats.failed += 1;
        }
        self.settle = Some(Deadline::arm(now, self.config.settle_delay));
    }

    fn handle_timeout(&mut self, now: Instant) {
        match self.in_flight.take() {
            Some(in_flight) => {
                let waited_ms = now.saturating_duration_since(in_flight.sent_at).as_millis() as u64;
                tracing::warn!(request = in_flight.request_id, waited_ms, "response timed out");
                in_flight.settle(Err(QueueError::Timeout { waited_ms }));
                self.stats.timed_out += 1;
            }
            None => {
                tracing::warn!(state = %self.state.state(), "remote-started response timed out");
            }
        }
        self.state.reset();
        self.schedule_kick(now);
    }

    /// Applies a table transition; an illegal one is logged and recovered
    /// with a reset.
    fn transition(&mut self, to: ResponseState, response_id: Option<ResponseId>) -> bool {
        match self.state.transition(to, response_id) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "response state out of sync, resetting");
                self.state.reset();
                false
            }
        }
    }
}

/// Commands accepted by the queue actor.
enum QueueCommand {
    Enqueue {
        request: ResponseRequest,
        reply: Responder,
    },
    Event(ResponseEvent),
    Clear {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
    History {
        reply: oneshot::Sender<Vec<StateChange>>,
    },
    Shutdown,
}

/// Cloneable handle to a queue running in its own task.
#[derive(Clone)]
pub struct ResponseQueueHandle {
    tx: mpsc::UnboundedSender<QueueCommand>,
    state_rx: watch::Receiver<ResponseState>,
}

impl ResponseQueueHandle {
    /// Starts the queue actor.
    ///
    /// The join handle yields the final stats once the queue shuts down,
    /// either through [`shutdown`](Self::shutdown) or when every handle is
    /// dropped. Requests still queued at that point are rejected with
    /// `QueueCleared`.
    pub fn spawn(
        config: ResponseQueueConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, JoinHandle<QueueStats>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ResponseState::Idle);

        let mut core = ResponseRequestQueue::new(config, transport);
        core.add_state_listener(move |change| {
            state_tx.send_replace(change.to);
        });

        let task = tokio::spawn(run_actor(core, rx));
        (Self { tx, state_rx }, task)
    }

    /// Requests a generation and waits until it completes or fails.
    pub async fn enqueue(&self, request: ResponseRequest) -> Result<ResponseId, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(QueueCommand::Enqueue { request, reply })?;
        rx.await.map_err(|_| QueueError::Closed)?
    }

    /// Delivers an event from the remote service.
    pub fn handle_event(&self, event: ResponseEvent) -> Result<(), QueueError> {
        self.send(QueueCommand::Event(event))
    }

    /// Forwards every event from `events` into the queue until either side closes.
    pub fn attach_events(&self, mut events: mpsc::UnboundedReceiver<ResponseEvent>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if handle.handle_event(event).is_err() {
                    break;
                }
            }
        })
    }

    /// Rejects all waiting and in-flight requests; returns how many.
    pub async fn clear(&self) -> Result<usize, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(QueueCommand::Clear { reply })?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(QueueCommand::Stats { reply })?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Snapshot of recent state transitions.
    pub async fn history(&self) -> Result<Vec<StateChange>, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(QueueCommand::History { reply })?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Current state as last published by the actor.
    pub fn state(&self) -> ResponseState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ResponseState> {
        self.state_rx.clone()
    }

    /// Stops the actor after it drains commands sent before this one.
    pub fn shutdown(&self) {
        if self.tx.send(QueueCommand::Shutdown).is_err() {
            tracing::debug!("response queue already stopped");
        }
    }

    fn send(&self, command: QueueCommand) -> Result<(), QueueError> {
        self.tx.send(command).map_err(|_| QueueError::Closed)
    }
}

impl std::fmt::Debug for ResponseQueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseQueueHandle")
            .field("state", &self.state())
            .finish()
    }
}

fn now() -> Instant {
    TokioClock.now()
}

async fn run_actor(
    mut core: ResponseRequestQueue,
    mut rx: mpsc::UnboundedReceiver<QueueCommand>,
) -> QueueStats {
    loop {
        let deadline = core.next_deadline();
        tokio::select! {
            biased;
            command = rx.recv() => match command {
                Some(QueueCommand::Enqueue { request, reply }) => {
                    core.enqueue(request, reply, now());
                }
                Some(QueueCommand::Event(event)) => core.handle_event(event, now()),
                Some(QueueCommand::Clear { reply }) => {
                    let cleared = core.clear();
                    if reply.send(cleared).is_err() {
                        tracing::debug!(cleared, "caller dropped before clear reply");
                    }
                }
                Some(QueueCommand::Stats { reply }) => {
                    if reply.send(core.stats()).is_err() {
                        tracing::debug!("caller dropped before stats reply");
                    }
                }
                Some(QueueCommand::History { reply }) => {
                    if reply.send(core.history()).is_err() {
                        tracing::debug!("caller dropped before history reply");
                    }
                }
                Some(QueueCommand::Shutdown) | None => break,
            },
            () = timer::sleep_until(deadline) => core.poll_timers(now()),
        }
    }

    core.clear();
    let stats = core.stats();
    tracing::debug!(?stats, "response queue stopped");
    stats
}
