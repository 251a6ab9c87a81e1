//! JSON message protocol between the response queue and the remote service.
//!
//! Outbound messages are generation requests; inbound events report the
//! remote's view of its single generation slot and audio buffer.

use crate::segment::types::Segment;
use serde::{Deserialize, Serialize};

/// Identifier the remote service assigns to a generation.
pub type ResponseId = String;

/// Output channels requested from the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Audio,
}

/// Utterance audio attached to a request, as 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub sample_rate: u32,
    pub pcm16: Vec<i16>,
}

/// Parameters for one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRequest {
    pub modalities: Vec<Modality>,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioPayload>,
}

impl ResponseRequest {
    /// Text-only generation.
    pub fn text(instructions: impl Into<String>) -> Self {
        Self {
            modalities: vec![Modality::Text],
            instructions: instructions.into(),
            voice: None,
            segment_id: None,
            audio: None,
        }
    }

    /// Spoken generation with a transcript.
    pub fn voice(instructions: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            modalities: vec![Modality::Audio, Modality::Text],
            instructions: instructions.into(),
            voice: Some(voice.into()),
            segment_id: None,
            audio: None,
        }
    }

    /// Attaches a segment's audio.
    pub fn with_segment(mut self, segment: &Segment) -> Self {
        self.segment_id = Some(segment.id);
        self.audio = Some(AudioPayload {
            sample_rate: segment.sample_rate,
            pcm16: segment.to_pcm16(),
        });
        self
    }

    pub fn wants_audio(&self) -> bool {
        self.modalities.contains(&Modality::Audio)
    }
}

/// Messages sent to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Ask for a new generation. `request_id` is local bookkeeping only.
    CreateResponse {
        request_id: u64,
        request: ResponseRequest,
    },
}

impl OutboundMessage {
    /// Serialize message to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Events received from the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseEvent {
    /// A generation started.
    Created { response_id: ResponseId },
    /// A generation finished.
    Done { response_id: ResponseId },
    /// The remote rejected or aborted something.
    Error {
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
    /// The remote started accumulating input audio.
    AudioBufferStarted,
    /// The remote committed its input audio buffer.
    AudioBufferCommitted,
    /// The remote discarded its input audio buffer.
    AudioBufferCleared,
}

impl ResponseEvent {
    /// Serialize event to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
