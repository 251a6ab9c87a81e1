//! Voice Activity Detection (VAD) module.
//!
//! Classifies frames as speech or silence using RMS energy smoothed over a
//! short history window, compared against a threshold calibrated from the
//! first frames of each session. Speech-end is debounced so brief dips in
//! energy between words do not split an utterance.

use crate::audio::frame::AudioFrame;
use crate::defaults;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Capture source, which selects the threshold floor and debounce pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceProfile {
    #[default]
    Microphone,
    SystemAudio,
}

impl SourceProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceProfile::Microphone => "microphone",
            SourceProfile::SystemAudio => "system_audio",
        }
    }

    /// Minimum adaptive threshold for this source.
    pub fn min_threshold(self) -> f32 {
        match self {
            SourceProfile::Microphone => defaults::MIC_MIN_THRESHOLD,
            SourceProfile::SystemAudio => defaults::SYSTEM_MIN_THRESHOLD,
        }
    }

    /// Speech-end debounce for this source.
    pub fn debounce_ms(self) -> u32 {
        match self {
            SourceProfile::Microphone => defaults::MIC_DEBOUNCE_MS,
            SourceProfile::SystemAudio => defaults::SYSTEM_DEBOUNCE_MS,
        }
    }
}

impl std::fmt::Display for SourceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "microphone" | "mic" => Ok(SourceProfile::Microphone),
            "system_audio" | "system" => Ok(SourceProfile::SystemAudio),
            other => Err(format!(
                "unknown audio source '{other}' (expected microphone or system_audio)"
            )),
        }
    }
}

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Frames in the rolling energy mean.
    pub history_frames: usize,
    /// Leading frames collected to estimate the noise floor.
    pub calibration_frames: usize,
    /// Standard deviations above the noise floor for the threshold.
    pub threshold_stddev_multiplier: f32,
    /// Floor for the adaptive threshold.
    pub min_threshold: f32,
    /// Continuous sub-threshold time before speech is considered ended (ms).
    pub debounce_ms: u32,
}

impl VadConfig {
    /// Default configuration for the given capture source.
    pub fn for_source(profile: SourceProfile) -> Self {
        Self {
            history_frames: defaults::VAD_HISTORY_FRAMES,
            calibration_frames: defaults::VAD_CALIBRATION_FRAMES,
            threshold_stddev_multiplier: defaults::VAD_THRESHOLD_STDDEV_MULTIPLIER,
            min_threshold: profile.min_threshold(),
            debounce_ms: profile.debounce_ms(),
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::for_source(SourceProfile::Microphone)
    }
}

/// Events emitted by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech has started.
    SpeechStart,
    /// Ongoing speech (including debounced sub-threshold frames).
    Speech,
    /// No speech, or still calibrating.
    Silence,
    /// Speech has ended after the debounce elapsed.
    SpeechEnd,
}

/// Per-frame analysis result.
#[derive(Debug, Clone, Copy)]
pub struct VadAnalysis {
    /// Smoothed RMS energy over the history window.
    pub energy: f32,
    /// Raw RMS energy of this frame alone.
    pub frame_energy: f32,
    /// Whether the detector currently considers the source to be speaking.
    pub is_speaking: bool,
    /// True while the noise floor is still being calibrated.
    pub calibrating: bool,
    /// Transition produced by this frame.
    pub event: VadEvent,
    /// Threshold in effect for this frame (0.0 while calibrating).
    pub threshold: f32,
}

/// Energy-based voice activity detector with adaptive calibration.
///
/// `reset()` must be called at the start of every recording session so the
/// noise floor is re-measured for the current environment.
#[derive(Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    history: VecDeque<f32>,
    calibration: Vec<f32>,
    noise_floor: Option<f32>,
    threshold: f32,
    speaking: bool,
    below_since: Option<Instant>,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            history: VecDeque::with_capacity(config.history_frames.max(1)),
            calibration: Vec::with_capacity(config.calibration_frames),
            noise_floor: None,
            threshold: 0.0,
            speaking: false,
            below_since: None,
        }
    }

    /// Analyzes one frame.
    pub fn analyze(&mut self, frame: &AudioFrame) -> VadAnalysis {
        let frame_energy = calculate_rms(&frame.samples);
        let energy = self.smooth(frame_energy);

        if self.noise_floor.is_none() {
            self.calibration.push(frame_energy);
            if self.calibration.len() >= self.config.calibration_frames {
                self.finish_calibration();
            }
            return VadAnalysis {
                energy,
                frame_energy,
                is_speaking: false,
                calibrating: true,
                event: VadEvent::Silence,
                threshold: 0.0,
            };
        }

        let above = energy > self.threshold;
        let event = match (self.speaking, above) {
            (false, true) => {
                self.speaking = true;
                self.below_since = None;
                VadEvent::SpeechStart
            }
            (true, true) => {
                self.below_since = None;
                VadEvent::Speech
            }
            (true, false) => {
                let since = *self.below_since.get_or_insert(frame.timestamp);
                let below_for = frame.timestamp.saturating_duration_since(since);
                if below_for >= Duration::from_millis(self.config.debounce_ms as u64) {
                    self.speaking = false;
                    self.below_since = None;
                    VadEvent::SpeechEnd
                } else {
                    VadEvent::Speech
                }
            }
            (false, false) => VadEvent::Silence,
        };

        VadAnalysis {
            energy,
            frame_energy,
            is_speaking: self.speaking,
            calibrating: false,
            event,
            threshold: self.threshold,
        }
    }

    /// Clears all history and re-enters calibration.
    pub fn reset(&mut self) {
        self.history.clear();
        self.calibration.clear();
        self.noise_floor = None;
        self.threshold = 0.0;
        self.speaking = false;
        self.below_since = None;
    }

    pub fn is_calibrating(&self) -> bool {
        self.noise_floor.is_none()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Calibrated noise floor, once calibration has completed.
    pub fn noise_floor(&self) -> Option<f32> {
        self.noise_floor
    }

    /// Current adaptive threshold (0.0 while calibrating).
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    fn smooth(&mut self, frame_energy: f32) -> f32 {
        self.history.push_back(frame_energy);
        while self.history.len() > self.config.history_frames.max(1) {
            self.history.pop_front();
        }
        self.history.iter().sum::<f32>() / self.history.len() as f32
    }

    fn finish_calibration(&mut self) {
        let n = self.calibration.len().max(1) as f32;
        let mean = self.calibration.iter().sum::<f32>() / n;
        let variance = self
            .calibration
            .iter()
            .map(|e| (e - mean) * (e - mean))
            .sum::<f32>()
            / n;
        let stddev = variance.sqrt();

        self.noise_floor = Some(mean);
        self.threshold =
            (mean + self.config.threshold_stddev_multiplier * stddev).max(self.config.min_threshold);
        self.calibration.clear();

        tracing::debug!(
            noise_floor = mean,
            threshold = self.threshold,
            "VAD calibration complete"
        );
    }
}

/// Calculates the Root Mean Square (RMS) of normalized samples.
///
/// Returns 0.0 for an empty slice, ~0.707 for a full-scale sine and 1.0 for
/// a full-scale square wave.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;
    const FRAME_MS: u64 = 20;

    struct Feed {
        vad: VoiceActivityDetector,
        start: Instant,
        sequence: u64,
    }

    impl Feed {
        fn new(config: VadConfig) -> Self {
            Self {
                vad: VoiceActivityDetector::new(config),
                start: Instant::now(),
                sequence: 0,
            }
        }

        fn push(&mut self, amplitude: f32) -> VadAnalysis {
            let ts = self.start + Duration::from_millis(self.sequence * FRAME_MS);
            let frame = AudioFrame::new(vec![amplitude; 320], RATE, ts, self.sequence);
            self.sequence += 1;
            self.vad.analyze(&frame)
        }

        fn push_n(&mut self, amplitude: f32, n: usize) -> Vec<VadAnalysis> {
            (0..n).map(|_| self.push(amplitude)).collect()
        }

        fn calibrate(&mut self) {
            let n = self.vad.config().calibration_frames;
            self.push_n(0.001, n);
            assert!(!self.vad.is_calibrating());
        }
    }

    #[test]
    fn test_rms_silence_is_zero() {
        assert_eq!(calculate_rms(&[0.0; 100]), 0.0);
        assert_eq!(calculate_rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_constant_amplitude() {
        let rms = calculate_rms(&[-0.5; 100]);
        assert!((rms - 0.5).abs() < 1e-6, "got {}", rms);
    }

    #[test]
    fn test_calibration_frames_are_never_classified() {
        let mut feed = Feed::new(VadConfig::default());

        for analysis in feed.push_n(0.9, 30) {
            assert!(analysis.calibrating);
            assert!(!analysis.is_speaking);
            assert_eq!(analysis.event, VadEvent::Silence);
        }
        assert!(!feed.vad.is_calibrating());
    }

    #[test]
    fn test_threshold_is_mean_plus_three_stddev() {
        let config = VadConfig {
            min_threshold: 0.0,
            ..VadConfig::default()
        };
        let mut feed = Feed::new(config);
        // Alternating 0.01 / 0.03: mean 0.02, population stddev 0.01
        for i in 0..30 {
            feed.push(if i % 2 == 0 { 0.01 } else { 0.03 });
        }

        let floor = feed.vad.noise_floor().unwrap();
        assert!((floor - 0.02).abs() < 1e-4, "floor {}", floor);
        assert!(
            (feed.vad.threshold() - 0.05).abs() < 1e-4,
            "threshold {}",
            feed.vad.threshold()
        );
    }

    #[test]
    fn test_threshold_floored_in_silent_room() {
        let mut feed = Feed::new(VadConfig::default());
        feed.push_n(0.0, 30);

        assert_eq!(feed.vad.noise_floor(), Some(0.0));
        assert_eq!(feed.vad.threshold(), defaults::MIC_MIN_THRESHOLD);
    }

    #[test]
    fn test_detects_speech_start_after_calibration() {
        let mut feed = Feed::new(VadConfig::default());
        feed.calibrate();

        let analysis = feed.push(0.3);
        assert_eq!(analysis.event, VadEvent::SpeechStart);
        assert!(analysis.is_speaking);

        let analysis = feed.push(0.3);
        assert_eq!(analysis.event, VadEvent::Speech);
    }

    #[test]
    fn test_single_spike_is_smoothed_away() {
        let config = VadConfig {
            min_threshold: 0.05,
            ..VadConfig::default()
        };
        let mut feed = Feed::new(config);
        feed.calibrate();
        feed.push_n(0.001, 10);

        // One frame at 0.3 moves the 10-frame mean to ~0.031, under 0.05
        let analysis = feed.push(0.3);
        assert!(analysis.frame_energy > 0.05);
        assert!(!analysis.is_speaking);
        assert_eq!(analysis.event, VadEvent::Silence);
    }

    #[test]
    fn test_single_low_frame_does_not_toggle() {
        let config = VadConfig {
            history_frames: 1,
            ..VadConfig::default()
        };
        let mut feed = Feed::new(config);
        feed.calibrate();
        feed.push_n(0.3, 5);

        let low = feed.push(0.0);
        assert!(low.is_speaking);
        assert_eq!(low.event, VadEvent::Speech);

        let high = feed.push(0.3);
        assert!(high.is_speaking);
        assert_eq!(high.event, VadEvent::Speech);
    }

    #[test]
    fn test_speech_end_only_after_debounce() {
        let config = VadConfig {
            history_frames: 1,
            debounce_ms: 200,
            ..VadConfig::default()
        };
        let mut feed = Feed::new(config);
        feed.calibrate();
        feed.push_n(0.3, 10);

        // First quiet frame starts the debounce clock at t; frames arrive every 20ms,
        // so the frame at t+200ms is the 11th quiet frame.
        let quiet = feed.push_n(0.0, 10);
        assert!(quiet.iter().all(|a| a.is_speaking && a.event == VadEvent::Speech));

        let end = feed.push(0.0);
        assert_eq!(end.event, VadEvent::SpeechEnd);
        assert!(!end.is_speaking);

        let after = feed.push(0.0);
        assert_eq!(after.event, VadEvent::Silence);
    }

    #[test]
    fn test_debounce_restarts_when_speech_resumes() {
        let config = VadConfig {
            history_frames: 1,
            debounce_ms: 100,
            ..VadConfig::default()
        };
        let mut feed = Feed::new(config);
        feed.calibrate();
        feed.push_n(0.3, 3);

        feed.push_n(0.0, 4); // 60ms below threshold
        feed.push(0.3);
        let quiet = feed.push_n(0.0, 5); // 80ms, clock restarted
        assert!(quiet.iter().all(|a| a.is_speaking));

        let end = feed.push(0.0);
        assert_eq!(end.event, VadEvent::SpeechEnd);
    }

    #[test]
    fn test_reset_reenters_calibration() {
        let mut feed = Feed::new(VadConfig::default());
        feed.calibrate();
        feed.push(0.3);
        assert!(feed.vad.is_speaking());

        feed.vad.reset();
        assert!(feed.vad.is_calibrating());
        assert!(!feed.vad.is_speaking());
        assert_eq!(feed.vad.noise_floor(), None);

        let analysis = feed.push(0.3);
        assert!(analysis.calibrating);
        assert!(!analysis.is_speaking);
    }

    #[test]
    fn test_source_profiles_differ() {
        let mic = VadConfig::for_source(SourceProfile::Microphone);
        let system = VadConfig::for_source(SourceProfile::SystemAudio);

        assert!(mic.min_threshold > system.min_threshold * 5.0);
        assert_ne!(mic.debounce_ms, system.debounce_ms);
    }

    #[test]
    fn test_source_profile_parsing() {
        assert_eq!("mic".parse::<SourceProfile>(), Ok(SourceProfile::Microphone));
        assert_eq!(
            "system-audio".parse::<SourceProfile>(),
            Ok(SourceProfile::SystemAudio)
        );
        assert!("speaker".parse::<SourceProfile>().is_err());

        for profile in [SourceProfile::Microphone, SourceProfile::SystemAudio] {
            assert_eq!(profile.to_string().parse::<SourceProfile>(), Ok(profile));
        }
    }
}
