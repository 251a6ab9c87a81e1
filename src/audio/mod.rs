//! Audio input: frames, voice activity detection, WAV decoding.

pub mod frame;
pub mod vad;
pub mod wav;

pub use frame::AudioFrame;
pub use vad::{SourceProfile, VadAnalysis, VadConfig, VadEvent, VoiceActivityDetector};
pub use wav::WavFrames;
