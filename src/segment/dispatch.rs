//! Bounded FIFO of finalized segments with per-path completion tracking.
//!
//! The queue owns every segment from acceptance until both of its paths are
//! terminal. At most `max_concurrent` segments are dispatched at once;
//! capacity counts waiting and dispatched segments together.

use crate::defaults;
use crate::segment::types::{CompletedSegment, PathKind, PathOutcome, PathStatus, Segment};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("segment queue full (capacity {capacity})")]
    QueueFull { capacity: usize },
}

/// Notifications for the orchestrator and any observers.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// Segment accepted into the queue. Sent once per segment, before it
    /// is handed to the path processors.
    SegmentReady(Arc<Segment>),
    /// Both paths reached a terminal status and the segment was evicted.
    SegmentComplete(CompletedSegment),
    /// A segment was refused because the queue is at capacity.
    QueueFull { segment_id: u64, capacity: usize },
}

impl DispatchEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchEvent::SegmentReady(_) => "segment_ready",
            DispatchEvent::SegmentComplete(_) => "segment_complete",
            DispatchEvent::QueueFull { .. } => "queue_full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Maximum segments owned by the queue (waiting plus dispatched).
    pub capacity: usize,
    /// Maximum segments dispatched at the same time.
    pub max_concurrent: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::DISPATCH_CAPACITY,
            max_concurrent: defaults::DISPATCH_MAX_CONCURRENT,
        }
    }
}

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub accepted: u64,
    pub rejected: u64,
    pub completed: u64,
}

#[derive(Debug)]
struct InFlight {
    segment: Arc<Segment>,
    text: Option<PathOutcome>,
    voice: Option<PathOutcome>,
}

impl InFlight {
    fn slot(&mut self, kind: PathKind) -> &mut Option<PathOutcome> {
        match kind {
            PathKind::Text => &mut self.text,
            PathKind::Voice => &mut self.voice,
        }
    }

    fn status(&self, kind: PathKind) -> PathStatus {
        let slot = match kind {
            PathKind::Text => &self.text,
            PathKind::Voice => &self.voice,
        };
        slot.as_ref().map_or(PathStatus::Pending, PathOutcome::status)
    }
}

#[derive(Debug)]
pub struct SegmentDispatchQueue {
    config: DispatchConfig,
    waiting: VecDeque<Arc<Segment>>,
    in_flight: HashMap<u64, InFlight>,
    event_tx: Option<crossbeam_channel::Sender<DispatchEvent>>,
    stats: DispatchStats,
}

impl SegmentDispatchQueue {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            waiting: VecDeque::with_capacity(config.capacity),
            in_flight: HashMap::new(),
            event_tx: None,
            stats: DispatchStats::default(),
        }
    }

    /// Sends lifecycle events to `tx` without blocking.
    ///
    /// Use an unbounded channel: a full bounded channel drops events, and a
    /// dropped `SegmentComplete` is only visible in the debug log.
    pub fn with_event_sender(mut self, tx: crossbeam_channel::Sender<DispatchEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Accepts a finalized segment.
    ///
    /// At capacity the segment is refused, `QueueFull` is emitted and the
    /// error is returned so the producer can apply backpressure.
    pub fn enqueue(&mut self, segment: Segment) -> Result<Arc<Segment>, DispatchError> {
        if self.len() >= self.config.capacity {
            self.stats.rejected += 1;
            tracing::warn!(
                segment = segment.id,
                capacity = self.config.capacity,
                "segment queue full, dropping segment"
            );
            self.emit(DispatchEvent::QueueFull {
                segment_id: segment.id,
                capacity: self.config.capacity,
            });
            return Err(DispatchError::QueueFull {
                capacity: self.config.capacity,
            });
        }

        let segment = Arc::new(segment);
        self.stats.accepted += 1;
        self.waiting.push_back(segment.clone());
        tracing::debug!(
            segment = segment.id,
            waiting = self.waiting.len(),
            "segment queued"
        );
        self.emit(DispatchEvent::SegmentReady(segment.clone()));
        Ok(segment)
    }

    /// Dispatches the oldest waiting segment if a concurrency slot is free.
    pub fn next_ready(&mut self) -> Option<Arc<Segment>> {
        if self.in_flight.len() >= self.config.max_concurrent.max(1) {
            return None;
        }
        let segment = self.waiting.pop_front()?;
        self.in_flight.insert(
            segment.id,
            InFlight {
                segment: segment.clone(),
                text: None,
                voice: None,
            },
        );
        tracing::info!(segment = segment.id, "segment dispatched");
        Some(segment)
    }

    /// Dispatches as many waiting segments as free slots allow.
    pub fn drain_ready(&mut self) -> Vec<Arc<Segment>> {
        std::iter::from_fn(|| self.next_ready()).collect()
    }

    /// Records the terminal outcome of one path.
    ///
    /// Repeated reports for a path that is already terminal, and reports for
    /// unknown segments, are ignored. Returns the completed segment when this
    /// report made both paths terminal.
    pub fn complete_path(
        &mut self,
        segment_id: u64,
        kind: PathKind,
        outcome: PathOutcome,
    ) -> Option<CompletedSegment> {
        let Some(entry) = self.in_flight.get_mut(&segment_id) else {
            tracing::debug!(segment = segment_id, path = %kind, "report for unknown segment ignored");
            return None;
        };

        let slot = entry.slot(kind);
        if slot.is_some() {
            tracing::debug!(segment = segment_id, path = %kind, "duplicate path report ignored");
            return None;
        }
        if let PathOutcome::Failed { reason } = &outcome {
            tracing::debug!(segment = segment_id, path = %kind, %reason, "path failed");
        }
        *slot = Some(outcome);

        if !(entry.status(PathKind::Text).is_terminal() && entry.status(PathKind::Voice).is_terminal())
        {
            return None;
        }

        let entry = self.in_flight.remove(&segment_id)?;
        let completed = CompletedSegment {
            segment: entry.segment,
            text: entry.text?,
            voice: entry.voice?,
            completed_at: Instant::now(),
        };
        self.stats.completed += 1;
        tracing::info!(
            segment = segment_id,
            success = completed.is_success(),
            "segment complete"
        );
        self.emit(DispatchEvent::SegmentComplete(completed.clone()));
        Some(completed)
    }

    /// Status of one path of an owned segment.
    pub fn path_status(&self, segment_id: u64, kind: PathKind) -> Option<PathStatus> {
        if let Some(entry) = self.in_flight.get(&segment_id) {
            return Some(entry.status(kind));
        }
        self.waiting
            .iter()
            .any(|s| s.id == segment_id)
            .then_some(PathStatus::Pending)
    }

    /// Drops every owned segment, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.len();
        self.waiting.clear();
        self.in_flight.clear();
        dropped
    }

    /// Segments owned by the queue (waiting plus dispatched).
    pub fn len(&self) -> usize {
        self.waiting.len() + self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn emit(&self, event: DispatchEvent) {
        let Some(tx) = &self.event_tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            let event_kind = e.into_inner().kind();
            tracing::debug!(event_kind, "dispatch event dropped");
        }
    }
}
