//! Session orchestrator: audio frames in, translated segments out.
//!
//! One task owns the detector, the utterance buffer and the dispatch queue,
//! so none of them is shared. For every dispatched segment the text and
//! voice processors run as separate tasks and report back over a channel.
//! A path that errors or panics is recorded as failed on its own slot and
//! never cancels its sibling.

use crate::audio::frame::AudioFrame;
use crate::audio::vad::{VadConfig, VoiceActivityDetector};
use crate::clock::{Clock, TokioClock};
use crate::error::{Result, VoxbridgeError};
use crate::pipeline::paths::PathProcessor;
use crate::response::queue::{QueueStats, ResponseQueueHandle};
use crate::segment::dispatch::{DispatchConfig, DispatchEvent, DispatchStats, SegmentDispatchQueue};
use crate::segment::types::{PathKind, PathOutcome, PathStatus, Segment};
use crate::segment::utterance::{UtteranceBuffer, UtteranceConfig};
use crate::timer;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Configuration for one orchestrated session.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub vad: VadConfig,
    pub utterance: UtteranceConfig,
    pub dispatch: DispatchConfig,
}

/// What happened during a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: u64,
    pub segments_completed: u64,
    /// Segments refused by a full dispatch queue.
    pub segments_dropped: u64,
    pub text_failures: u64,
    pub voice_failures: u64,
    pub dispatch: DispatchStats,
    /// Request queue counters, when a queue handle was attached.
    pub queue: Option<QueueStats>,
}

#[derive(Debug)]
struct PathReport {
    segment_id: u64,
    kind: PathKind,
    outcome: PathOutcome,
}

pub struct Orchestrator {
    vad: VoiceActivityDetector,
    buffer: UtteranceBuffer,
    dispatch: SegmentDispatchQueue,
    text: Arc<dyn PathProcessor>,
    voice: Arc<dyn PathProcessor>,
    clock: Arc<dyn Clock>,
    queue: Option<ResponseQueueHandle>,
    summary: SessionSummary,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        text: Arc<dyn PathProcessor>,
        voice: Arc<dyn PathProcessor>,
    ) -> Self {
        Self {
            vad: VoiceActivityDetector::new(config.vad),
            buffer: UtteranceBuffer::new(config.utterance),
            dispatch: SegmentDispatchQueue::new(config.dispatch),
            text,
            voice,
            clock: Arc::new(TokioClock),
            queue: None,
            summary: SessionSummary::default(),
        }
    }

    /// Sets a custom clock. It must agree with the timestamps on incoming frames.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Forwards segment lifecycle events to `tx`.
    pub fn with_event_sender(mut self, tx: crossbeam_channel::Sender<DispatchEvent>) -> Self {
        self.dispatch = self.dispatch.with_event_sender(tx);
        self
    }

    /// Includes the request queue's counters in the session summary.
    pub fn with_response_queue(mut self, queue: ResponseQueueHandle) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Runs the session until `frames` closes and every dispatched segment
    /// has completed.
    ///
    /// Audio still buffered when the input closes is flushed as a final
    /// segment.
    pub async fn run(mut self, mut frames: mpsc::Receiver<AudioFrame>) -> Result<SessionSummary> {
        self.vad.reset();
        self.buffer.reset();

        let (report_tx, mut reports) = mpsc::unbounded_channel();
        let mut outstanding = 0usize;
        let mut input_open = true;
        tracing::info!(
            text = self.text.kind().as_str(),
            voice = self.voice.kind().as_str(),
            "session started"
        );

        loop {
            if !input_open && outstanding == 0 {
                break;
            }
            let deadline = self.buffer.next_deadline();
            tokio::select! {
                frame = frames.recv(), if input_open => match frame {
                    Some(frame) => self.on_frame(&frame),
                    None => {
                        input_open = false;
                        self.on_input_closed();
                    }
                },
                Some(report) = reports.recv() => {
                    outstanding = outstanding.saturating_sub(1);
                    self.on_report(report);
                }
                () = timer::sleep_until(deadline), if input_open => {
                    let segments = self.buffer.poll(self.clock.now());
                    self.accept(segments);
                }
            }
            outstanding += self.dispatch_ready(&report_tx);
        }

        self.summary.dispatch = self.dispatch.stats();
        if let Some(queue) = &self.queue {
            self.summary.queue = Some(queue.stats().await?);
        }
        tracing::info!(
            frames = self.summary.frames,
            completed = self.summary.segments_completed,
            dropped = self.summary.segments_dropped,
            "session finished"
        );
        Ok(self.summary)
    }

    fn on_frame(&mut self, frame: &AudioFrame) {
        self.summary.frames += 1;
        let analysis = self.vad.analyze(frame);
        let segments = self.buffer.feed(frame, &analysis);
        self.accept(segments);
    }

    fn on_input_closed(&mut self) {
        tracing::debug!(frames = self.summary.frames, "audio input closed");
        if let Some(segment) = self.buffer.flush(self.clock.now()) {
            self.accept(vec![segment]);
        }
    }

    fn accept(&mut self, segments: Vec<Segment>) {
        for segment in segments {
            if self.dispatch.enqueue(segment).is_err() {
                self.summary.segments_dropped += 1;
            }
        }
    }

    fn on_report(&mut self, report: PathReport) {
        if report.outcome.status() == PathStatus::Failed {
            match report.kind {
                PathKind::Text => self.summary.text_failures += 1,
                PathKind::Voice => self.summary.voice_failures += 1,
            }
        }
        if self
            .dispatch
            .complete_path(report.segment_id, report.kind, report.outcome)
            .is_some()
        {
            self.summary.segments_completed += 1;
        }
    }

    /// Starts both paths for every segment the dispatch queue releases.
    fn dispatch_ready(&mut self, reports: &mpsc::UnboundedSender<PathReport>) -> usize {
        let mut spawned = 0;
        for segment in self.dispatch.drain_ready() {
            for processor in [self.text.clone(), self.voice.clone()] {
                spawn_path(processor, segment.clone(), reports.clone());
                spawned += 1;
            }
        }
        spawned
    }
}

/// Runs one path in its own task and reports its outcome, whatever it is.
fn spawn_path(
    processor: Arc<dyn PathProcessor>,
    segment: Arc<Segment>,
    reports: mpsc::UnboundedSender<PathReport>,
) {
    let kind = processor.kind();
    let segment_id = segment.id;
    let work = tokio::spawn(async move { processor.process(segment).await });

    tokio::spawn(async move {
        let outcome = match work.await {
            Ok(Ok(result)) => PathOutcome::Done(result),
            Ok(Err(VoxbridgeError::Queue(e))) if e.is_transient() => {
                tracing::warn!(segment = segment_id, path = %kind, error = %e, "path failed, continuing");
                PathOutcome::failed(e.to_string())
            }
            Ok(Err(e)) => {
                tracing::error!(segment = segment_id, path = %kind, error = %e, "path failed");
                PathOutcome::failed(e.to_string())
            }
            Err(e) => {
                tracing::error!(segment = segment_id, path = %kind, error = %e, "path task aborted");
                PathOutcome::failed(format!("path task aborted: {e}"))
            }
        };
        if reports
            .send(PathReport {
                segment_id,
                kind,
                outcome,
            })
            .is_err()
        {
            tracing::debug!(segment = segment_id, path = %kind, "orchestrator gone, report dropped");
        }
    });
}
