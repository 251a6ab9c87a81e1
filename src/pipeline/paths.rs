//! Text and voice path processors.
//!
//! Each path turns one segment into one generation request on the shared
//! response queue. The two paths for a segment run independently; neither
//! knows about the other.

use crate::defaults;
use crate::error::{Result, VoxbridgeError};
use crate::response::protocol::{ResponseId, ResponseRequest};
use crate::response::queue::{QueueError, ResponseQueueHandle};
use crate::segment::types::{PathKind, PathResult, Segment};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Consumer of dispatched segments.
///
/// This trait allows swapping implementations (queue-backed vs mock).
#[async_trait]
pub trait PathProcessor: Send + Sync {
    /// Which of the two paths this is.
    fn kind(&self) -> PathKind;

    /// Processes one segment to completion.
    async fn process(&self, segment: Arc<Segment>) -> Result<PathResult>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    /// Language the speech is translated into.
    pub target_language: String,
    /// Synthesized voice for the voice path.
    pub voice: String,
    /// Enqueue attempts before a refused admission fails the path.
    pub max_admission_attempts: u32,
    /// First pause after a refused admission; doubles on every retry.
    pub admission_backoff: Duration,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            target_language: defaults::TARGET_LANGUAGE.to_string(),
            voice: defaults::VOICE.to_string(),
            max_admission_attempts: defaults::MAX_ADMISSION_ATTEMPTS,
            admission_backoff: Duration::from_millis(defaults::ADMISSION_BACKOFF_MS),
        }
    }
}

/// Enqueues `request`, retrying while the queue refuses admission.
///
/// Any other outcome, success or failure, is returned as is.
async fn request_with_admission(
    queue: &ResponseQueueHandle,
    request: ResponseRequest,
    config: &PathConfig,
    kind: PathKind,
) -> std::result::Result<ResponseId, QueueError> {
    let attempts = config.max_admission_attempts.max(1);
    let mut backoff = config.admission_backoff;
    let mut attempt = 1;
    loop {
        match queue.enqueue(request.clone()).await {
            Err(QueueError::CannotCreateResponse { state }) if attempt < attempts => {
                tracing::debug!(path = %kind, attempt, %state, "admission refused, backing off");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Translated transcript delivery.
#[derive(Debug, Clone)]
pub struct TextPath {
    queue: ResponseQueueHandle,
    config: PathConfig,
}

impl TextPath {
    pub fn new(queue: ResponseQueueHandle, config: PathConfig) -> Self {
        Self { queue, config }
    }

    pub fn request_for(&self, segment: &Segment) -> ResponseRequest {
        ResponseRequest::text(format!(
            "Transcribe the speech and translate it into {}. Reply with the translation only.",
            self.config.target_language
        ))
        .with_segment(segment)
    }
}

#[async_trait]
impl PathProcessor for TextPath {
    fn kind(&self) -> PathKind {
        PathKind::Text
    }

    async fn process(&self, segment: Arc<Segment>) -> Result<PathResult> {
        let started = tokio::time::Instant::now();
        let request = self.request_for(&segment);
        let response_id =
            request_with_admission(&self.queue, request, &self.config, PathKind::Text).await?;
        Ok(PathResult {
            kind: PathKind::Text,
            response_id,
            elapsed: started.elapsed(),
        })
    }
}

/// Synthesized translated voice delivery.
#[derive(Debug, Clone)]
pub struct VoicePath {
    queue: ResponseQueueHandle,
    config: PathConfig,
}

impl VoicePath {
    pub fn new(queue: ResponseQueueHandle, config: PathConfig) -> Self {
        Self { queue, config }
    }

    pub fn request_for(&self, segment: &Segment) -> ResponseRequest {
        ResponseRequest::voice(
            format!(
                "Translate the speech into {} and speak the translation.",
                self.config.target_language
            ),
            self.config.voice.clone(),
        )
        .with_segment(segment)
    }
}

#[async_trait]
impl PathProcessor for VoicePath {
    fn kind(&self) -> PathKind {
        PathKind::Voice
    }

    async fn process(&self, segment: Arc<Segment>) -> Result<PathResult> {
        let started = tokio::time::Instant::now();
        let request = self.request_for(&segment);
        let response_id =
            request_with_admission(&self.queue, request, &self.config, PathKind::Voice).await?;
        Ok(PathResult {
            kind: PathKind::Voice,
            response_id,
            elapsed: started.elapsed(),
        })
    }
}

/// Mock path for testing.
#[derive(Debug, Clone)]
pub struct MockPath {
    kind: PathKind,
    delay: Duration,
    should_fail: bool,
    should_panic: bool,
}

impl MockPath {
    pub fn new(kind: PathKind) -> Self {
        Self {
            kind,
            delay: Duration::ZERO,
            should_fail: false,
            should_panic: false,
        }
    }

    /// Configure the mock to take `delay` per segment
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Configure the mock to fail every segment
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Configure the mock to panic while processing
    pub fn with_panic(mut self) -> Self {
        self.should_panic = true;
        self
    }
}

#[async_trait]
impl PathProcessor for MockPath {
    fn kind(&self) -> PathKind {
        self.kind
    }

    async fn process(&self, segment: Arc<Segment>) -> Result<PathResult> {
        tokio::time::sleep(self.delay).await;
        if self.should_panic {
            panic!("mock {} path panicked", self.kind);
        }
        if self.should_fail {
            return Err(VoxbridgeError::Other(format!(
                "mock {} path failure",
                self.kind
            )));
        }
        Ok(PathResult {
            kind: self.kind,
            response_id: format!("mock-{}-{}", self.kind, segment.id),
            elapsed: self.delay,
        })
    }
}
