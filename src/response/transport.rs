//! Outbound transport seam.
//!
//! The queue only needs fire-and-forget delivery of structured requests.
//! Whether the bytes travel over a socket, an IPC bridge or a long-poll is
//! the implementation's business.

use crate::error::{Result, VoxbridgeError};
use crate::response::protocol::OutboundMessage;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

pub trait Transport: Send + Sync {
    /// Hands a message to the channel without waiting for the remote.
    fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Transport name for diagnostics.
    fn name(&self) -> &'static str {
        "transport"
    }
}

/// In-process transport backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| VoxbridgeError::Transport {
            message: "remote endpoint closed".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Writes each message as one JSON line.
pub struct JsonLinesTransport<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Transport for JsonLinesTransport<W> {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        let json = message.to_json().map_err(|e| VoxbridgeError::Transport {
            message: format!("failed to encode message: {}", e),
        })?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json-lines"
    }
}

/// Records every message; can be switched to fail sends.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, oldest first.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Makes subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }
}

impl Transport for RecordingTransport {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(VoxbridgeError::Transport {
                message: "recording transport set to fail".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
