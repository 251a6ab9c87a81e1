//! Error types for voxbridge.

use crate::response::queue::QueueError;
use crate::response::state::StateError;
use crate::segment::dispatch::DispatchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxbridgeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio input errors
    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormatMismatch { expected: String, actual: String },

    #[error("Failed to read audio: {message}")]
    AudioRead { message: String },

    // Remote service plumbing
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Response queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Response state error: {0}")]
    State(#[from] StateError),

    #[error("Segment dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxbridgeError>;
