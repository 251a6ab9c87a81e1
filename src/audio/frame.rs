//! Raw capture frames.

use std::time::{Duration, Instant};

/// A fixed-length block of PCM samples from the capture collaborator.
///
/// Frames are ephemeral: they flow through the VAD and the utterance buffer
/// and are never persisted.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono PCM samples normalized to `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Monotonic capture timestamp of the first sample.
    pub timestamp: Instant,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(samples: Vec<f32>, sample_rate: u32, timestamp: Instant, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp,
            sequence,
        }
    }

    /// Duration covered by this frame.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Duration covered by this frame in whole milliseconds.
    pub fn duration_ms(&self) -> u32 {
        samples_to_ms(self.samples.len(), self.sample_rate)
    }
}

/// Converts a sample count to whole milliseconds.
pub fn samples_to_ms(sample_count: usize, sample_rate: u32) -> u32 {
    if sample_rate == 0 {
        return 0;
    }
    ((sample_count as u64 * 1000) / sample_rate as u64) as u32
}

/// Converts a sample count to an exact duration.
pub fn samples_to_duration(sample_count: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(sample_count as u64 * 1_000_000_000 / sample_rate as u64)
}

/// Number of samples in `ms` milliseconds of audio.
pub fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_frame_creation() {
        let timestamp = Instant::now();
        let frame = AudioFrame::new(vec![0.1, 0.2, 0.3], 24000, timestamp, 42);

        assert_eq!(frame.samples, vec![0.1, 0.2, 0.3]);
        assert_eq!(frame.sample_rate, 24000);
        assert_eq!(frame.timestamp, timestamp);
        assert_eq!(frame.sequence, 42);
    }

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 480], 24000, Instant::now(), 0);
        assert_eq!(frame.duration_ms(), 20);
        assert_eq!(frame.duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_zero_sample_rate_has_no_duration() {
        let frame = AudioFrame::new(vec![0.0; 480], 0, Instant::now(), 0);
        assert_eq!(frame.duration_ms(), 0);
        assert_eq!(frame.duration(), Duration::ZERO);
    }

    #[test]
    fn test_sample_conversions() {
        assert_eq!(samples_to_ms(16000, 16000), 1000);
        assert_eq!(samples_to_ms(3600, 24000), 150);
        assert_eq!(ms_to_samples(150, 24000), 3600);
        assert_eq!(ms_to_samples(20, 16000), 320);
    }
}
