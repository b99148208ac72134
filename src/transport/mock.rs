//! In-memory transport for exercising the engine without hardware
//!
//! Clones share state, so a test keeps one clone to inject inbound bytes and
//! inspect the write log while the engine owns the other.

use super::{OpenPorts, PortList, Transport, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct MockState {
    write_log: Vec<Vec<u8>>,
    inbound: Option<mpsc::Sender<Vec<u8>>>,
    open: bool,
    open_count: usize,
    fail_open: bool,
    fail_send: bool,
    ports: PortList,
}

/// Mock transport recording every write
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_ports(vec!["M300 In".to_string()], vec!["M300 Out".to_string()])
    }

    pub fn with_ports(inputs: Vec<String>, outputs: Vec<String>) -> Self {
        let mock = Self::default();
        mock.state.lock().ports = PortList { inputs, outputs };
        mock
    }

    /// All captured writes
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Captured writes, clearing the log
    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.lock().write_log)
    }

    /// Deliver bytes as if the device sent them
    ///
    /// Returns false when the transport is closed or the channel is full.
    pub fn inject(&self, data: &[u8]) -> bool {
        let state = self.state.lock();
        match (&state.inbound, state.open) {
            (Some(tx), true) => tx.try_send(data.to_vec()).is_ok(),
            _ => false,
        }
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.state.lock().fail_send = fail;
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }
}

impl Transport for MockTransport {
    fn open(
        &mut self,
        input: &str,
        output: &str,
        inbound: mpsc::Sender<Vec<u8>>,
    ) -> Result<OpenPorts, TransportError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(TransportError::PortNotFound {
                direction: "Input",
                pattern: input.to_string(),
            });
        }
        state.inbound = Some(inbound);
        state.open = true;
        state.open_count += 1;
        Ok(OpenPorts {
            input: input.to_string(),
            output: output.to_string(),
        })
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if state.fail_send {
            return Err(TransportError::SendFailed("mock send failure".to_string()));
        }
        state.write_log.push(data.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.open = false;
        state.inbound = None;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn list_ports(&self) -> Result<PortList, TransportError> {
        Ok(self.state.lock().ports.clone())
    }
}
