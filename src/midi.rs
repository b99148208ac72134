//! MIDI utilities and message types
//!
//! Classifies raw inbound MIDI into the shapes the engine cares about and
//! provides midir port lookup helpers.

use anyhow::{Context, Result};
use midir::{MidiInput, MidiInputPort, MidiOutput, MidiOutputPort};
use std::fmt;
use tracing::debug;

/// Inbound MIDI message, as far as the gateway needs to distinguish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Complete System Exclusive frame, including F0 and F7
    SysEx { data: Vec<u8> },

    /// Any other channel voice message
    Channel { status: u8, channel: u8 },

    /// System common or realtime message
    System { status: u8 },
}

impl MidiMessage {
    /// Parse a MIDI message from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        let &status = data.first()?;

        // Running status is not used by the device
        if status < 0x80 {
            return None;
        }

        if status == 0xF0 {
            let end = data.iter().position(|&b| b == 0xF7)?;
            return Some(MidiMessage::SysEx {
                data: data[..=end].to_vec(),
            });
        }

        if status >= 0xF0 {
            return Some(MidiMessage::System { status });
        }

        let channel = status & 0x0F;
        match status & 0xF0 {
            0xB0 => {
                if data.len() < 3 {
                    return None;
                }
                Some(MidiMessage::ControlChange {
                    channel,
                    cc: data[1] & 0x7F,
                    value: data[2] & 0x7F,
                })
            }
            0xC0 => {
                if data.len() < 2 {
                    return None;
                }
                Some(MidiMessage::ProgramChange {
                    channel,
                    program: data[1] & 0x7F,
                })
            }
            kind => Some(MidiMessage::Channel {
                status: kind,
                channel,
            }),
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::SysEx { data } => write!(f, "SysEx {} bytes", data.len()),
            MidiMessage::Channel { status, channel } => {
                write!(f, "Channel 0x{:02X} ch:{}", status, channel + 1)
            }
            MidiMessage::System { status } => write!(f, "System 0x{:02X}", status),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Find an input port by case-insensitive substring match
pub fn find_input_port(midi_in: &MidiInput, pattern: &str) -> Option<(MidiInputPort, String)> {
    let pattern = pattern.to_lowercase();
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            if name.to_lowercase().contains(&pattern) {
                debug!("Found input port '{}' matching '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}

/// Find an output port by case-insensitive substring match
pub fn find_output_port(midi_out: &MidiOutput, pattern: &str) -> Option<(MidiOutputPort, String)> {
    let pattern = pattern.to_lowercase();
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            if name.to_lowercase().contains(&pattern) {
                debug!("Found output port '{}' matching '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}

/// List available MIDI input port names
pub fn list_input_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new("M300-GW-Scanner").context("Failed to create MIDI input")?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect())
}

/// List available MIDI output port names
pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new("M300-GW-Scanner").context("Failed to create MIDI output")?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|port| midi_out.port_name(port).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_change() {
        let msg = MidiMessage::parse(&[0xB2, 99, 3]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::ControlChange {
                channel: 2,
                cc: 99,
                value: 3
            }
        );
    }

    #[test]
    fn test_sysex_keeps_envelope() {
        let bytes = [0xF0, 0x06, 0x03, 0x40, 0x02, 0x08, 0xF7];
        assert_eq!(
            MidiMessage::parse(&bytes),
            Some(MidiMessage::SysEx {
                data: bytes.to_vec()
            })
        );
    }

    #[test]
    fn test_unterminated_sysex() {
        assert_eq!(MidiMessage::parse(&[0xF0, 0x06, 0x03]), None);
    }

    #[test]
    fn test_truncated_cc() {
        assert_eq!(MidiMessage::parse(&[0xB0, 7]), None);
    }

    #[test]
    fn test_other_messages() {
        assert_eq!(
            MidiMessage::parse(&[0x91, 60, 100]),
            Some(MidiMessage::Channel {
                status: 0x90,
                channel: 1
            })
        );
        assert_eq!(
            MidiMessage::parse(&[0xFE]),
            Some(MidiMessage::System { status: 0xFE })
        );
        assert_eq!(MidiMessage::parse(&[0x40, 0x00]), None);
        assert_eq!(MidiMessage::parse(&[]), None);
    }

    #[test]
    fn test_display() {
        let msg = MidiMessage::ProgramChange {
            channel: 0,
            program: 5,
        };
        assert_eq!(msg.to_string(), "ProgramChange ch:1 p:5");
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0xF0, 0x06, 0xF7]), "F0 06 F7");
        assert_eq!(format_hex(&[]), "");
    }
}
