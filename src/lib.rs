//! voxbridge - concurrency control for real-time speech translation
//!
//! Turns a continuous audio stream into utterance segments and serializes
//! their text and voice generations against a remote service that allows
//! exactly one in-flight generation per connection.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod response;
pub mod segment;
pub mod timer;

// Segmentation
pub use audio::{AudioFrame, SourceProfile, VadConfig, VoiceActivityDetector};
pub use segment::{
    CompletedSegment, DispatchEvent, PathKind, PathOutcome, Segment, SegmentDispatchQueue,
    UtteranceBuffer,
};

// Response control
pub use response::{
    ResponseEvent, ResponseQueueHandle, ResponseRequest, ResponseRequestQueue, ResponseState,
    ResponseStateManager, Transport,
};

// Pipeline
pub use pipeline::{Orchestrator, OrchestratorConfig, PathProcessor, SessionSummary};

// Error handling
pub use error::{Result, VoxbridgeError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
