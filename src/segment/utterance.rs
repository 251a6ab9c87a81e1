//! Utterance buffer: accumulates speech frames and finalizes segments.
//!
//! Frames are buffered from a VAD speech-start until a confirmed stop. A stop
//! that arrives before `min_speech_duration_ms` of audio is only confirmed
//! once `silence_confirm_delay_ms` passes without speech resuming. Finalized
//! audio shorter than `min_queue_duration_ms` is held and concatenated with
//! the next finalized segment, or flushed on its own after
//! `pending_merge_timeout_ms`.
//!
//! The buffer never reads a clock. Frame timestamps drive `feed`, and the
//! owner calls `poll` periodically so timers fire during silence.

use crate::audio::frame::{AudioFrame, samples_to_ms};
use crate::audio::vad::{VadAnalysis, VadEvent};
use crate::defaults;
use crate::segment::types::Segment;
use crate::timer::{self, Deadline};
use std::time::{Duration, Instant};

/// Timing policy for the utterance buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtteranceConfig {
    pub sample_rate: u32,
    pub min_speech_duration_ms: u32,
    pub silence_confirm_delay_ms: u32,
    pub min_queue_duration_ms: u32,
    pub pending_merge_timeout_ms: u32,
    pub duplicate_window_ms: u32,
}

impl Default for UtteranceConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            min_speech_duration_ms: defaults::MIN_SPEECH_DURATION_MS,
            silence_confirm_delay_ms: defaults::SILENCE_CONFIRM_DELAY_MS,
            min_queue_duration_ms: defaults::MIN_QUEUE_DURATION_MS,
            pending_merge_timeout_ms: defaults::PENDING_MERGE_TIMEOUT_MS,
            duplicate_window_ms: defaults::DUPLICATE_FINALIZE_WINDOW_MS,
        }
    }
}

fn ms(value: u32) -> Duration {
    Duration::from_millis(value as u64)
}

/// Short audio waiting for a merge partner.
#[derive(Debug)]
struct HeldAudio {
    samples: Vec<f32>,
    deadline: Deadline,
}

#[derive(Debug)]
pub struct UtteranceBuffer {
    config: UtteranceConfig,
    samples: Vec<f32>,
    capturing: bool,
    confirm: Option<Deadline>,
    held: Option<HeldAudio>,
    last_finalize: Option<Instant>,
    next_id: u64,
}

impl UtteranceBuffer {
    pub fn new(config: UtteranceConfig) -> Self {
        Self {
            config,
            samples: Vec::new(),
            capturing: false,
            confirm: None,
            held: None,
            last_finalize: None,
            next_id: 1,
        }
    }

    /// Feeds one analyzed frame, returning any segments it finalized.
    pub fn feed(&mut self, frame: &AudioFrame, analysis: &VadAnalysis) -> Vec<Segment> {
        let now = frame.timestamp;
        let mut out = self.poll(now);

        if analysis.calibrating {
            return out;
        }

        match analysis.event {
            VadEvent::SpeechStart | VadEvent::Speech => {
                if self.confirm.take().is_some() {
                    tracing::debug!(
                        buffered_ms = self.buffered_ms(),
                        "speech resumed, stop cancelled"
                    );
                }
                self.capturing = true;
                self.samples.extend_from_slice(&frame.samples);
            }
            VadEvent::SpeechEnd => {
                self.samples.extend_from_slice(&frame.samples);
                self.capturing = false;
                out.extend(self.finalize(now));
            }
            VadEvent::Silence => {
                if self.confirm.is_some() {
                    self.samples.extend_from_slice(&frame.samples);
                }
            }
        }

        out
    }

    /// External finalize signal (a VAD stop or a manual commit).
    ///
    /// A signal within `duplicate_window_ms` of the previously accepted one
    /// is ignored. Buffered audio below `min_speech_duration_ms` arms the
    /// confirmation timer instead of finalizing.
    pub fn finalize(&mut self, now: Instant) -> Vec<Segment> {
        self.capturing = false;
        if self.samples.is_empty() {
            return Vec::new();
        }

        if let Some(last) = self.last_finalize
            && now.saturating_duration_since(last) < ms(self.config.duplicate_window_ms)
        {
            tracing::debug!("duplicate finalize signal ignored");
            // The audio still needs a way out if no further signal arrives.
            if self.confirm.is_none() {
                self.confirm = Some(Deadline::arm(now, ms(self.config.silence_confirm_delay_ms)));
            }
            return Vec::new();
        }
        self.last_finalize = Some(now);

        if self.buffered_ms() < self.config.min_speech_duration_ms {
            if self.confirm.is_none() {
                tracing::debug!(
                    buffered_ms = self.buffered_ms(),
                    "short utterance, waiting for confirmation"
                );
                self.confirm = Some(Deadline::arm(now, ms(self.config.silence_confirm_delay_ms)));
            }
            return Vec::new();
        }

        self.confirm = None;
        let samples = std::mem::take(&mut self.samples);
        self.emit(samples, now).into_iter().collect()
    }

    /// Fires due timers.
    pub fn poll(&mut self, now: Instant) -> Vec<Segment> {
        let mut out = Vec::new();

        if timer::take_if_due(&mut self.confirm, now).is_some() && !self.samples.is_empty() {
            tracing::debug!(buffered_ms = self.buffered_ms(), "stop confirmed");
            self.capturing = false;
            let samples = std::mem::take(&mut self.samples);
            out.extend(self.emit(samples, now));
        }

        if self.held.as_ref().is_some_and(|h| h.deadline.is_due(now))
            && let Some(held) = self.held.take()
        {
            tracing::debug!(
                held_ms = samples_to_ms(held.samples.len(), self.config.sample_rate),
                "no merge partner, flushing held audio"
            );
            out.push(self.build(held.samples, now));
        }

        out
    }

    /// Finalizes everything still buffered, for teardown.
    ///
    /// Held and in-progress audio are combined into at most one segment,
    /// regardless of length.
    pub fn flush(&mut self, now: Instant) -> Option<Segment> {
        self.confirm = None;
        self.capturing = false;
        let mut samples = self.held.take().map(|h| h.samples).unwrap_or_default();
        samples.append(&mut self.samples);
        if samples.is_empty() {
            return None;
        }
        Some(self.build(samples, now))
    }

    /// Drops all buffered audio and timers.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.capturing = false;
        self.confirm = None;
        self.held = None;
        self.last_finalize = None;
    }

    /// Duration of the utterance currently being captured.
    pub fn buffered_ms(&self) -> u32 {
        samples_to_ms(self.samples.len(), self.config.sample_rate)
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// True while a short utterance waits for its stop to be confirmed.
    pub fn is_confirming(&self) -> bool {
        self.confirm.is_some()
    }

    /// Duration of audio held for merging, if any.
    pub fn held_ms(&self) -> Option<u32> {
        self.held
            .as_ref()
            .map(|h| samples_to_ms(h.samples.len(), self.config.sample_rate))
    }

    /// Earliest instant at which `poll` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        timer::earliest([self.confirm, self.held.as_ref().map(|h| h.deadline)])
    }

    pub fn config(&self) -> &UtteranceConfig {
        &self.config
    }

    /// Applies the merge policy to freshly finalized audio.
    fn emit(&mut self, samples: Vec<f32>, now: Instant) -> Option<Segment> {
        if let Some(mut held) = self.held.take() {
            held.samples.extend(samples);
            tracing::debug!(
                merged_ms = samples_to_ms(held.samples.len(), self.config.sample_rate),
                "merged held audio into next segment"
            );
            return Some(self.build(held.samples, now));
        }

        if samples_to_ms(samples.len(), self.config.sample_rate) < self.config.min_queue_duration_ms {
            tracing::debug!(
                duration_ms = samples_to_ms(samples.len(), self.config.sample_rate),
                "segment too short, holding for merge"
            );
            self.held = Some(HeldAudio {
                samples,
                deadline: Deadline::arm(now, ms(self.config.pending_merge_timeout_ms)),
            });
            return None;
        }

        Some(self.build(samples, now))
    }

    fn build(&mut self, samples: Vec<f32>, now: Instant) -> Segment {
        let id = self.next_id;
        self.next_id += 1;
        let segment = Segment::new(id, samples, self.config.sample_rate, now);
        tracing::info!(
            segment = segment.id,
            duration_ms = segment.duration_ms,
            "segment finalized"
        );
        segment
    }
}
