//! WAV file input, cut into fixed-size capture frames.

use crate::audio::frame::{AudioFrame, ms_to_samples, samples_to_duration};
use crate::error::{Result, VoxbridgeError};
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

/// Mono audio decoded from a WAV file, resampled to the pipeline rate.
pub struct WavFrames {
    samples: Vec<f32>,
    sample_rate: u32,
    frame_len: usize,
    position: usize,
    sequence: u64,
}

impl WavFrames {
    /// Opens a WAV file.
    pub fn open(path: &Path, sample_rate: u32, frame_ms: u32) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)), sample_rate, frame_ms)
    }

    /// Decodes WAV data from any reader.
    ///
    /// Integer and float encodings are accepted; stereo is downmixed and the
    /// signal is resampled to `sample_rate`.
    pub fn from_reader(
        reader: Box<dyn Read + Send>,
        sample_rate: u32,
        frame_ms: u32,
    ) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| VoxbridgeError::AudioRead {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        if spec.channels == 0 || spec.channels > 2 {
            return Err(VoxbridgeError::AudioFormatMismatch {
                expected: "1 or 2 channels".to_string(),
                actual: format!("{} channels", spec.channels),
            });
        }

        let raw: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => wav_reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                wav_reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
        }
        .map_err(|e| VoxbridgeError::AudioRead {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        let mono = if spec.channels == 2 {
            raw.chunks_exact(2).map(|c| (c[0] + c[1]) / 2.0).collect()
        } else {
            raw
        };

        let samples = resample(&mono, spec.sample_rate, sample_rate);
        let frame_len = ms_to_samples(frame_ms, sample_rate).max(1);

        Ok(Self {
            samples,
            sample_rate,
            frame_len,
            position: 0,
            sequence: 0,
        })
    }

    /// Total audio duration.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Duration of one frame.
    pub fn frame_duration(&self) -> Duration {
        samples_to_duration(self.frame_len, self.sample_rate)
    }

    /// Next frame stamped with `timestamp`, or `None` once exhausted.
    pub fn next_frame(&mut self, timestamp: Instant) -> Option<AudioFrame> {
        if self.position >= self.samples.len() {
            return None;
        }
        let end = (self.position + self.frame_len).min(self.samples.len());
        let frame = AudioFrame::new(
            self.samples[self.position..end].to_vec(),
            self.sample_rate,
            timestamp,
            self.sequence,
        );
        self.position = end;
        self.sequence += 1;
        Some(frame)
    }
}

/// Simple linear interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn mono_at_pipeline_rate_is_normalized() {
        let wav = make_wav_data(16000, 1, &[16384, -16384, 0]);
        let mut frames = WavFrames::from_reader(Box::new(Cursor::new(wav)), 16000, 20).unwrap();

        let frame = frames.next_frame(Instant::now()).unwrap();
        assert_eq!(frame.samples.len(), 3);
        assert!((frame.samples[0] - 0.5).abs() < 1e-4);
        assert!((frame.samples[1] + 0.5).abs() < 1e-4);
        assert_eq!(frame.samples[2], 0.0);
        assert!(frames.next_frame(Instant::now()).is_none());
    }

    #[test]
    fn stereo_is_downmixed() {
        let wav = make_wav_data(16000, 2, &[16384, 0, 8192, 8192]);
        let mut frames = WavFrames::from_reader(Box::new(Cursor::new(wav)), 16000, 20).unwrap();

        let frame = frames.next_frame(Instant::now()).unwrap();
        assert_eq!(frame.samples.len(), 2);
        assert!((frame.samples[0] - 0.25).abs() < 1e-4);
        assert!((frame.samples[1] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn resamples_to_pipeline_rate() {
        let wav = make_wav_data(48000, 1, &vec![1000i16; 48000]);
        let frames = WavFrames::from_reader(Box::new(Cursor::new(wav)), 24000, 20).unwrap();

        let secs = frames.duration().as_secs_f64();
        assert!((secs - 1.0).abs() < 0.01, "duration {}", secs);
    }

    #[test]
    fn frames_have_fixed_length_and_sequence() {
        let wav = make_wav_data(16000, 1, &vec![1i16; 1000]);
        let mut frames = WavFrames::from_reader(Box::new(Cursor::new(wav)), 16000, 20).unwrap();
        let t0 = Instant::now();

        let mut lens = Vec::new();
        while let Some(frame) = frames.next_frame(t0) {
            assert_eq!(frame.sequence as usize, lens.len());
            lens.push(frame.samples.len());
        }
        // 1000 samples in 320-sample frames
        assert_eq!(lens, vec![320, 320, 320, 40]);
        assert_eq!(frames.frame_duration(), Duration::from_millis(20));
    }

    #[test]
    fn invalid_data_is_an_error() {
        let result = WavFrames::from_reader(Box::new(Cursor::new(vec![1u8, 2, 3])), 16000, 20);
        assert!(matches!(result, Err(VoxbridgeError::AudioRead { .. })));
    }
}
