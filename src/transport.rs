//! MIDI transport abstraction
//!
//! The protocol engine talks to the device through [`Transport`], so the
//! same sync logic runs against real midir ports or the in-memory mock
//! used by tests.

pub mod device;
pub mod mock;

pub use device::MidirTransport;
pub use mock::MockTransport;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{direction} port '{pattern}' not found")]
    PortNotFound {
        direction: &'static str,
        pattern: String,
    },

    #[error("Failed to initialise MIDI client: {0}")]
    Init(String),

    #[error("Failed to connect to {direction} port '{port}': {message}")]
    ConnectFailed {
        direction: &'static str,
        port: String,
        message: String,
    },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport not open")]
    NotOpen,
}

/// Names of the ports a transport actually connected to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenPorts {
    pub input: String,
    pub output: String,
}

/// Available port names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Bidirectional byte pipe to the device
///
/// Inbound messages are delivered as complete MIDI messages on the channel
/// handed to [`open`](Transport::open); senders must never block.
pub trait Transport: Send {
    /// Connect to ports matching the given name patterns
    fn open(
        &mut self,
        input: &str,
        output: &str,
        inbound: mpsc::Sender<Vec<u8>>,
    ) -> Result<OpenPorts, TransportError>;

    /// Write raw bytes to the output port
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Drop both connections; a no-op when already closed
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Enumerate ports visible to this transport
    fn list_ports(&self) -> Result<PortList, TransportError>;
}
