//! Single-flight response control: state machine, request queue, wire
//! protocol and transports.

pub mod protocol;
pub mod queue;
pub mod simulator;
pub mod state;
pub mod transport;

pub use protocol::{Modality, OutboundMessage, ResponseEvent, ResponseId, ResponseRequest};
pub use queue::{QueueError, QueueStats, ResponseQueueConfig, ResponseQueueHandle, ResponseRequestQueue};
pub use simulator::{SimulatedService, SimulatorConfig, SimulatorStats};
pub use state::{ResponseState, ResponseStateManager, StateChange, StateError};
pub use transport::{ChannelTransport, JsonLinesTransport, RecordingTransport, Transport};
