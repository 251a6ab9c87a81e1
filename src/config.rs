use crate::audio::vad::{SourceProfile, VadConfig};
use crate::defaults;
use crate::error::{Result, VoxbridgeError};
use crate::pipeline::orchestrator::OrchestratorConfig;
use crate::pipeline::paths::PathConfig;
use crate::response::queue::ResponseQueueConfig;
use crate::segment::dispatch::DispatchConfig;
use crate::segment::utterance::UtteranceConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub vad: VadSection,
    pub segmenter: SegmenterConfig,
    pub dispatch: DispatchSection,
    pub response: ResponseConfig,
    pub paths: PathsConfig,
}

/// Audio input configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub source: SourceProfile,
}

/// Voice activity detection
///
/// `min_threshold` and `debounce_ms` default to the values of the selected
/// audio source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadSection {
    pub history_frames: usize,
    pub calibration_frames: usize,
    pub threshold_stddev_multiplier: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u32>,
}

/// Utterance segmentation timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmenterConfig {
    pub min_speech_duration_ms: u32,
    pub silence_confirm_delay_ms: u32,
    pub min_queue_duration_ms: u32,
    pub pending_merge_timeout_ms: u32,
    pub duplicate_window_ms: u32,
}

/// Segment dispatch limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchSection {
    pub capacity: usize,
    pub max_concurrent: usize,
}

/// Remote generation control
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResponseConfig {
    pub timeout_ms: u64,
    pub completion_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub history_capacity: usize,
    pub conflict_code: String,
}

/// Text and voice path settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub target_language: String,
    pub voice: String,
    pub max_admission_attempts: u32,
    pub admission_backoff_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
            source: SourceProfile::Microphone,
        }
    }
}

impl Default for VadSection {
    fn default() -> Self {
        Self {
            history_frames: defaults::VAD_HISTORY_FRAMES,
            calibration_frames: defaults::VAD_CALIBRATION_FRAMES,
            threshold_stddev_multiplier: defaults::VAD_THRESHOLD_STDDEV_MULTIPLIER,
            min_threshold: None,
            debounce_ms: None,
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_speech_duration_ms: defaults::MIN_SPEECH_DURATION_MS,
            silence_confirm_delay_ms: defaults::SILENCE_CONFIRM_DELAY_MS,
            min_queue_duration_ms: defaults::MIN_QUEUE_DURATION_MS,
            pending_merge_timeout_ms: defaults::PENDING_MERGE_TIMEOUT_MS,
            duplicate_window_ms: defaults::DUPLICATE_FINALIZE_WINDOW_MS,
        }
    }
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            capacity: defaults::DISPATCH_CAPACITY,
            max_concurrent: defaults::DISPATCH_MAX_CONCURRENT,
        }
    }
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::RESPONSE_TIMEOUT_MS,
            completion_timeout_ms: defaults::COMPLETION_TIMEOUT_MS,
            settle_delay_ms: defaults::SETTLE_DELAY_MS,
            history_capacity: defaults::STATE_HISTORY_CAPACITY,
            conflict_code: defaults::CONFLICT_ERROR_CODE.to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            target_language: defaults::TARGET_LANGUAGE.to_string(),
            voice: defaults::VOICE.to_string(),
            max_admission_attempts: defaults::MAX_ADMISSION_ATTEMPTS,
            admission_backoff_ms: defaults::ADMISSION_BACKOFF_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VoxbridgeError::ConfigFileNotFound {
                    path: path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(VoxbridgeError::ConfigFileNotFound { .. }) => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXBRIDGE_TARGET_LANGUAGE → paths.target_language
    /// - VOXBRIDGE_VOICE → paths.voice
    /// - VOXBRIDGE_AUDIO_SOURCE → audio.source
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(language) = std::env::var("VOXBRIDGE_TARGET_LANGUAGE")
            && !language.is_empty()
        {
            self.paths.target_language = language;
        }

        if let Ok(voice) = std::env::var("VOXBRIDGE_VOICE")
            && !voice.is_empty()
        {
            self.paths.voice = voice;
        }

        if let Ok(source) = std::env::var("VOXBRIDGE_AUDIO_SOURCE")
            && !source.is_empty()
        {
            match source.parse() {
                Ok(profile) => self.audio.source = profile,
                Err(e) => tracing::warn!(error = %e, "ignoring VOXBRIDGE_AUDIO_SOURCE"),
            }
        }

        self
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Result<()> {
            Err(VoxbridgeError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        }

        if self.audio.sample_rate == 0 {
            return invalid("audio.sample_rate", "must be greater than 0");
        }
        if self.audio.frame_ms == 0 {
            return invalid("audio.frame_ms", "must be greater than 0");
        }
        if self.vad.history_frames == 0 {
            return invalid("vad.history_frames", "must be at least 1");
        }
        if self.dispatch.capacity == 0 {
            return invalid("dispatch.capacity", "must be at least 1");
        }
        if self.dispatch.max_concurrent == 0 {
            return invalid("dispatch.max_concurrent", "must be at least 1");
        }
        if self.response.timeout_ms == 0 {
            return invalid("response.timeout_ms", "must be greater than 0");
        }
        if self.paths.max_admission_attempts == 0 {
            return invalid("paths.max_admission_attempts", "must be at least 1");
        }
        if self.paths.target_language.trim().is_empty() {
            return invalid("paths.target_language", "must not be empty");
        }
        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VoxbridgeError::ConfigParse {
            message: e.to_string(),
        })
    }

    pub fn vad_config(&self) -> VadConfig {
        let profile = VadConfig::for_source(self.audio.source);
        VadConfig {
            history_frames: self.vad.history_frames,
            calibration_frames: self.vad.calibration_frames,
            threshold_stddev_multiplier: self.vad.threshold_stddev_multiplier,
            min_threshold: self.vad.min_threshold.unwrap_or(profile.min_threshold),
            debounce_ms: self.vad.debounce_ms.unwrap_or(profile.debounce_ms),
        }
    }

    pub fn utterance_config(&self) -> UtteranceConfig {
        UtteranceConfig {
            sample_rate: self.audio.sample_rate,
            min_speech_duration_ms: self.segmenter.min_speech_duration_ms,
            silence_confirm_delay_ms: self.segmenter.silence_confirm_delay_ms,
            min_queue_duration_ms: self.segmenter.min_queue_duration_ms,
            pending_merge_timeout_ms: self.segmenter.pending_merge_timeout_ms,
            duplicate_window_ms: self.segmenter.duplicate_window_ms,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            capacity: self.dispatch.capacity,
            max_concurrent: self.dispatch.max_concurrent,
        }
    }

    pub fn response_queue_config(&self) -> ResponseQueueConfig {
        ResponseQueueConfig {
            timeout: Duration::from_millis(self.response.timeout_ms),
            completion_timeout: Duration::from_millis(self.response.completion_timeout_ms),
            settle_delay: Duration::from_millis(self.response.settle_delay_ms),
            history_capacity: self.response.history_capacity,
            conflict_code: self.response.conflict_code.clone(),
        }
    }

    pub fn path_config(&self) -> PathConfig {
        PathConfig {
            target_language: self.paths.target_language.clone(),
            voice: self.paths.voice.clone(),
            max_admission_attempts: self.paths.max_admission_attempts,
            admission_backoff: Duration::from_millis(self.paths.admission_backoff_ms),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            vad: self.vad_config(),
            utterance: self.utterance_config(),
            dispatch: self.dispatch_config(),
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxbridge/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| VoxbridgeError::Other("could not determine config directory".to_string()))?;
        Ok(dir.join("voxbridge").join("config.toml"))
    }
}
