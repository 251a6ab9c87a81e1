//! Default configuration constants for voxbridge.
//!
//! Shared by the TOML configuration types and the component configs so both
//! agree on the same numbers.

/// Default audio sample rate in Hz.
///
/// 24kHz mono PCM is what realtime speech services commonly accept.
pub const SAMPLE_RATE: u32 = 24000;

/// Default capture frame length in milliseconds.
pub const FRAME_MS: u32 = 20;

/// Number of frames in the VAD smoothing window.
pub const VAD_HISTORY_FRAMES: usize = 10;

/// Number of leading frames used to calibrate the noise floor.
pub const VAD_CALIBRATION_FRAMES: usize = 30;

/// Standard deviations above the noise floor for the adaptive threshold.
pub const VAD_THRESHOLD_STDDEV_MULTIPLIER: f32 = 3.0;

/// Threshold floor and speech-end debounce for microphone input.
pub const MIC_MIN_THRESHOLD: f32 = 0.01;
pub const MIC_DEBOUNCE_MS: u32 = 800;

/// Threshold floor and speech-end debounce for captured system audio.
///
/// Loopback capture has a noise floor roughly an order of magnitude lower
/// than a microphone in a room.
pub const SYSTEM_MIN_THRESHOLD: f32 = 0.001;
pub const SYSTEM_DEBOUNCE_MS: u32 = 400;

/// Utterances shorter than this at speech-end wait for confirmation.
pub const MIN_SPEECH_DURATION_MS: u32 = 1000;

/// How long a short utterance waits for speech to resume before finalizing.
pub const SILENCE_CONFIRM_DELAY_MS: u32 = 500;

/// Segments shorter than this are held and merged with the next one.
pub const MIN_QUEUE_DURATION_MS: u32 = 300;

/// How long a held short segment waits for a merge partner.
pub const PENDING_MERGE_TIMEOUT_MS: u32 = 1000;

/// Finalize signals closer together than this are treated as duplicates.
pub const DUPLICATE_FINALIZE_WINDOW_MS: u32 = 500;

/// Maximum number of segments owned by the dispatch queue.
pub const DISPATCH_CAPACITY: usize = 10;

/// Maximum number of segments processed at the same time.
pub const DISPATCH_MAX_CONCURRENT: usize = 1;

/// Time allowed for the remote service to acknowledge a create request.
pub const RESPONSE_TIMEOUT_MS: u64 = 30_000;

/// Time allowed between `created` and `done` for one generation.
pub const COMPLETION_TIMEOUT_MS: u64 = 120_000;

/// Pause after a generation closes before the next one is sent.
///
/// Creating a generation in the same tick the previous one closed provokes
/// spurious conflict errors from the remote service.
pub const SETTLE_DELAY_MS: u64 = 100;

/// Number of state transitions kept for postmortem debugging.
pub const STATE_HISTORY_CAPACITY: usize = 50;

/// Error code the remote service uses when it already has an active generation.
pub const CONFLICT_ERROR_CODE: &str = "conversation_already_has_active_response";

/// Default translation target language.
pub const TARGET_LANGUAGE: &str = "en";

/// Default synthesized voice.
pub const VOICE: &str = "alloy";

/// Admission attempts a path makes before giving up on a segment.
pub const MAX_ADMISSION_ATTEMPTS: u32 = 5;

/// Pause between admission attempts.
pub const ADMISSION_BACKOFF_MS: u64 = 200;
