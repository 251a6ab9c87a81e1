//! Finite state machine for the remote service's single-flight constraint.
//!
//! The transition table below is the only way the state changes, apart from
//! `reset()`, which forces `IDLE` for error recovery:
//!
//! ```text
//! IDLE                -> AUDIO_BUFFERING | RESPONSE_PENDING
//! AUDIO_BUFFERING     -> AUDIO_COMMITTED | IDLE
//! AUDIO_COMMITTED     -> RESPONSE_PENDING | IDLE
//! RESPONSE_PENDING    -> RESPONSE_ACTIVE | IDLE
//! RESPONSE_ACTIVE     -> RESPONSE_COMPLETING
//! RESPONSE_COMPLETING -> IDLE
//! ```
//!
//! The active response id is present exactly while the state is
//! `RESPONSE_ACTIVE`.

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::response::protocol::ResponseId;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseState {
    #[default]
    Idle,
    AudioBuffering,
    AudioCommitted,
    ResponsePending,
    ResponseActive,
    ResponseCompleting,
}

impl ResponseState {
    pub const ALL: [ResponseState; 6] = [
        ResponseState::Idle,
        ResponseState::AudioBuffering,
        ResponseState::AudioCommitted,
        ResponseState::ResponsePending,
        ResponseState::ResponseActive,
        ResponseState::ResponseCompleting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResponseState::Idle => "IDLE",
            ResponseState::AudioBuffering => "AUDIO_BUFFERING",
            ResponseState::AudioCommitted => "AUDIO_COMMITTED",
            ResponseState::ResponsePending => "RESPONSE_PENDING",
            ResponseState::ResponseActive => "RESPONSE_ACTIVE",
            ResponseState::ResponseCompleting => "RESPONSE_COMPLETING",
        }
    }

    /// Whether `self -> to` is in the transition table.
    pub fn can_transition_to(self, to: ResponseState) -> bool {
        use ResponseState::*;
        matches!(
            (self, to),
            (Idle, AudioBuffering)
                | (Idle, ResponsePending)
                | (AudioBuffering, AudioCommitted)
                | (AudioBuffering, Idle)
                | (AudioCommitted, ResponsePending)
                | (AudioCommitted, Idle)
                | (ResponsePending, ResponseActive)
                | (ResponsePending, Idle)
                | (ResponseActive, ResponseCompleting)
                | (ResponseCompleting, Idle)
        )
    }

    /// Admission gate: a new generation may be requested only from here.
    pub fn can_create_response(self) -> bool {
        matches!(self, ResponseState::Idle | ResponseState::AudioBuffering)
    }

    /// A generation has been requested and not yet finished.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            ResponseState::ResponsePending | ResponseState::ResponseActive
        )
    }
}

impl fmt::Display for ResponseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: ResponseState,
        to: ResponseState,
    },

    #[error("entering RESPONSE_ACTIVE requires a response id")]
    MissingResponseId,
}

/// One entry of the transition history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub from: ResponseState,
    pub to: ResponseState,
    /// Response id carried into `RESPONSE_ACTIVE`.
    pub response_id: Option<ResponseId>,
    pub at: Instant,
    /// True for `reset()`, which bypasses the table.
    pub forced: bool,
}

/// Synchronous transition observer.
pub type StateListener = Box<dyn Fn(&StateChange) + Send + Sync>;

pub struct ResponseStateManager {
    state: ResponseState,
    active_response_id: Option<ResponseId>,
    history: VecDeque<StateChange>,
    history_capacity: usize,
    listeners: Vec<StateListener>,
    clock: Arc<dyn Clock>,
}

impl ResponseStateManager {
    pub fn new() -> Self {
        Self::with_history_capacity(defaults::STATE_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(history_capacity: usize) -> Self {
        Self {
            state: ResponseState::Idle,
            active_response_id: None,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            listeners: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets a custom clock for history timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers a listener called synchronously after every change.
    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Moves to `to` along the transition table.
    ///
    /// `response_id` is required when entering `RESPONSE_ACTIVE` and ignored
    /// otherwise.
    pub fn transition(
        &mut self,
        to: ResponseState,
        response_id: Option<ResponseId>,
    ) -> Result<(), StateError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            tracing::error!(%from, %to, "invalid response state transition");
            return Err(StateError::InvalidTransition { from, to });
        }

        let response_id = if to == ResponseState::ResponseActive {
            Some(response_id.ok_or(StateError::MissingResponseId)?)
        } else {
            None
        };

        self.state = to;
        self.active_response_id = response_id.clone();
        tracing::debug!(%from, %to, response_id = ?response_id, "response state transition");
        self.record(StateChange {
            from,
            to,
            response_id,
            at: self.clock.now(),
            forced: false,
        });
        Ok(())
    }

    /// Forces `IDLE` regardless of the current state.
    ///
    /// Used whenever local bookkeeping can no longer be trusted, e.g. after a
    /// remote conflict or a timeout.
    pub fn reset(&mut self) {
        let from = self.state;
        if from == ResponseState::Idle {
            return;
        }
        self.state = ResponseState::Idle;
        self.active_response_id = None;
        tracing::debug!(%from, "response state reset");
        self.record(StateChange {
            from,
            to: ResponseState::Idle,
            response_id: None,
            at: self.clock.now(),
            forced: true,
        });
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    pub fn active_response_id(&self) -> Option<&str> {
        self.active_response_id.as_deref()
    }

    pub fn can_create_response(&self) -> bool {
        self.state.can_create_response()
    }

    /// Most recent transitions, oldest first.
    pub fn history(&self) -> Vec<StateChange> {
        self.history.iter().cloned().collect()
    }

    fn record(&mut self, change: StateChange) {
        for listener in &self.listeners {
            listener(&change);
        }
        if self.history_capacity == 0 {
            return;
        }
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(change);
    }
}

impl Default for ResponseStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResponseStateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStateManager")
            .field("state", &self.state)
            .field("active_response_id", &self.active_response_id)
            .field("history_len", &self.history.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
