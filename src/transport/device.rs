//! midir-backed transport for real hardware

use super::{OpenPorts, PortList, Transport, TransportError};
use crate::midi::{find_input_port, find_output_port, format_hex};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

const CLIENT_NAME: &str = "M300-GW";

/// Transport over a pair of system MIDI ports
#[derive(Default)]
pub struct MidirTransport {
    input_conn: Option<MidiInputConnection<()>>,
    output_conn: Option<MidiOutputConnection>,
}

// midir connections hold platform handles that are only touched from the
// engine task that owns this transport
unsafe impl Send for MidirTransport {}

impl MidirTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for MidirTransport {
    fn open(
        &mut self,
        input: &str,
        output: &str,
        inbound: mpsc::Sender<Vec<u8>>,
    ) -> Result<OpenPorts, TransportError> {
        self.close();

        info!("Connecting to M300 - Input: '{}', Output: '{}'", input, output);

        let mut midi_in = MidiInput::new(&format!("{}-Input", CLIENT_NAME))
            .map_err(|e| TransportError::Init(e.to_string()))?;
        // SysEx must not be filtered
        midi_in.ignore(Ignore::TimeAndActiveSense);

        let (in_port, in_name) =
            find_input_port(&midi_in, input).ok_or_else(|| TransportError::PortNotFound {
                direction: "Input",
                pattern: input.to_string(),
            })?;

        let input_conn = midi_in
            .connect(
                &in_port,
                CLIENT_NAME,
                move |_timestamp, data, _| {
                    trace!("RX <- {}", format_hex(data));
                    if let Err(e) = inbound.try_send(data.to_vec()) {
                        warn!("Dropping inbound MIDI ({} bytes): {}", data.len(), e);
                    }
                },
                (),
            )
            .map_err(|e| TransportError::ConnectFailed {
                direction: "input",
                port: in_name.clone(),
                message: e.to_string(),
            })?;

        let midi_out = MidiOutput::new(&format!("{}-Output", CLIENT_NAME))
            .map_err(|e| TransportError::Init(e.to_string()))?;

        let (out_port, out_name) =
            find_output_port(&midi_out, output).ok_or_else(|| TransportError::PortNotFound {
                direction: "Output",
                pattern: output.to_string(),
            })?;

        let output_conn =
            midi_out
                .connect(&out_port, CLIENT_NAME)
                .map_err(|e| TransportError::ConnectFailed {
                    direction: "output",
                    port: out_name.clone(),
                    message: e.to_string(),
                })?;

        self.input_conn = Some(input_conn);
        self.output_conn = Some(output_conn);

        info!("M300 connected (in: {}, out: {})", in_name, out_name);
        Ok(OpenPorts {
            input: in_name,
            output: out_name,
        })
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let conn = self.output_conn.as_mut().ok_or(TransportError::NotOpen)?;
        conn.send(data)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        debug!("TX -> {}", format_hex(data));
        Ok(())
    }

    fn close(&mut self) {
        if self.input_conn.is_some() || self.output_conn.is_some() {
            info!("M300 ports closed");
        }
        if let Some(conn) = self.input_conn.take() {
            conn.close();
        }
        if let Some(conn) = self.output_conn.take() {
            conn.close();
        }
    }

    fn is_open(&self) -> bool {
        self.input_conn.is_some() && self.output_conn.is_some()
    }

    fn list_ports(&self) -> Result<PortList, TransportError> {
        let inputs = crate::midi::list_input_ports().map_err(|e| TransportError::Init(e.to_string()))?;
        let outputs =
            crate::midi::list_output_ports().map_err(|e| TransportError::Init(e.to_string()))?;
        Ok(PortList { inputs, outputs })
    }
}
