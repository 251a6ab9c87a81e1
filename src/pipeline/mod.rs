//! Translation pipeline: frame sources, the two path processors and the
//! session orchestrator that ties them to the segmenter.

pub mod orchestrator;
pub mod paths;
pub mod source;

pub use orchestrator::{Orchestrator, OrchestratorConfig, SessionSummary};
pub use paths::{MockPath, PathConfig, PathProcessor, TextPath, VoicePath};
pub use source::spawn_wav_source;
