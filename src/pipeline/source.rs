//! Frame sources feeding the orchestrator.

use crate::audio::frame::AudioFrame;
use crate::audio::wav::WavFrames;
use crate::clock::Clock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Plays a decoded WAV file into a channel at capture speed.
///
/// One frame is sent per frame duration and stamped with `clock` at send
/// time, so downstream timers see the same spacing a live capture would
/// produce. The channel closes after the last frame.
pub fn spawn_wav_source(
    mut wav: WavFrames,
    clock: Arc<dyn Clock>,
    capacity: usize,
) -> (mpsc::Receiver<AudioFrame>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(wav.frame_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut sent = 0u64;
        loop {
            ticker.tick().await;
            let Some(frame) = wav.next_frame(clock.now()) else {
                break;
            };
            if tx.send(frame).await.is_err() {
                tracing::debug!(sent, "frame receiver closed, stopping source");
                return;
            }
            sent += 1;
        }
        tracing::debug!(sent, "audio source exhausted");
    });
    (rx, task)
}
