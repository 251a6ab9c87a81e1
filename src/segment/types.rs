//! Data types shared by the utterance buffer, the dispatch queue and the
//! path processors.

use crate::audio::frame::samples_to_ms;
use crate::response::protocol::ResponseId;
use std::fmt;
use std::time::{Duration, Instant};

/// A finalized span of audio representing one utterance.
///
/// Segments are immutable once built; the dispatch queue and both path
/// processors share them behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Monotonically increasing identifier assigned by the utterance buffer.
    pub id: u64,
    /// Mono PCM samples in temporal order.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Duration of `samples` in milliseconds.
    pub duration_ms: u32,
    /// Instant the segment was finalized.
    pub created_at: Instant,
}

impl Segment {
    pub fn new(id: u64, samples: Vec<f32>, sample_rate: u32, created_at: Instant) -> Self {
        let duration_ms = samples_to_ms(samples.len(), sample_rate);
        Self {
            id,
            samples,
            sample_rate,
            duration_ms,
            created_at,
        }
    }

    /// Samples converted to 16-bit PCM for the wire.
    pub fn to_pcm16(&self) -> Vec<i16> {
        self.samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect()
    }
}

/// One of the two independent consumers of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathKind {
    /// Translated transcript delivery.
    Text,
    /// Synthesized translated voice delivery.
    Voice,
}

impl PathKind {
    pub const ALL: [PathKind; 2] = [PathKind::Text, PathKind::Voice];

    pub fn as_str(self) -> &'static str {
        match self {
            PathKind::Text => "text",
            PathKind::Voice => "voice",
        }
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one path on one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    Pending,
    Done,
    Failed,
}

impl PathStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PathStatus::Pending)
    }
}

/// Successful result of a path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub kind: PathKind,
    /// Generation the remote service produced for this path.
    pub response_id: ResponseId,
    /// Time from dispatch to completion, including admission retries.
    pub elapsed: Duration,
}

/// Terminal outcome of a path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathOutcome {
    Done(PathResult),
    Failed { reason: String },
}

impl PathOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        PathOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> PathStatus {
        match self {
            PathOutcome::Done(_) => PathStatus::Done,
            PathOutcome::Failed { .. } => PathStatus::Failed,
        }
    }

    pub fn response_id(&self) -> Option<&ResponseId> {
        match self {
            PathOutcome::Done(result) => Some(&result.response_id),
            PathOutcome::Failed { .. } => None,
        }
    }
}

/// A segment whose text and voice paths have both reached a terminal status.
#[derive(Debug, Clone)]
pub struct CompletedSegment {
    pub segment: std::sync::Arc<Segment>,
    pub text: PathOutcome,
    pub voice: PathOutcome,
    pub completed_at: Instant,
}

impl CompletedSegment {
    pub fn outcome(&self, kind: PathKind) -> &PathOutcome {
        match kind {
            PathKind::Text => &self.text,
            PathKind::Voice => &self.voice,
        }
    }

    /// True when both paths succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.text, PathOutcome::Done(_)) && matches!(self.voice, PathOutcome::Done(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_duration_from_samples() {
        let segment = Segment::new(1, vec![0.0; 3600], 24000, Instant::now());
        assert_eq!(segment.duration_ms, 150);
    }

    #[test]
    fn test_pcm16_conversion_clamps() {
        let segment = Segment::new(1, vec![0.0, 1.0, -1.0, 2.0], 24000, Instant::now());
        assert_eq!(segment.to_pcm16(), vec![0, i16::MAX, -i16::MAX, i16::MAX]);
    }

    #[test]
    fn test_outcome_status() {
        let done = PathOutcome::Done(PathResult {
            kind: PathKind::Text,
            response_id: "r1".to_string(),
            elapsed: Duration::from_millis(5),
        });
        assert_eq!(done.status(), PathStatus::Done);
        assert_eq!(done.response_id().map(String::as_str), Some("r1"));

        let failed = PathOutcome::failed("timeout");
        assert_eq!(failed.status(), PathStatus::Failed);
        assert!(failed.response_id().is_none());
        assert!(PathStatus::Failed.is_terminal());
        assert!(!PathStatus::Pending.is_terminal());
    }

    #[test]
    fn test_path_kind_display() {
        assert_eq!(PathKind::Text.to_string(), "text");
        assert_eq!(PathKind::Voice.to_string(), "voice");
    }
}
