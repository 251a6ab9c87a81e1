//! Utterance segmentation and dispatch.

pub mod dispatch;
pub mod types;
pub mod utterance;

pub use dispatch::{DispatchConfig, DispatchError, DispatchEvent, DispatchStats, SegmentDispatchQueue};
pub use types::{CompletedSegment, PathKind, PathOutcome, PathResult, PathStatus, Segment};
pub use utterance::{UtteranceBuffer, UtteranceConfig};
