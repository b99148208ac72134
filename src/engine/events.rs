//! Notifications published by the protocol engine
//!
//! Serialized with the same `{"type", "payload"}` shape the relay speaks, so
//! observers can forward them unchanged.

use super::connection::ConnectionState;
use crate::preset::Preset;
use crate::state::PresetSlot;
use crate::sysex::RecordKind;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    #[serde(rename = "parameter_update")]
    ParameterChanged { domain: u8, param: u8, value: u16 },

    #[serde(rename = "preset_update")]
    PresetUpdated {
        kind: RecordKind,
        slot: PresetSlot,
        preset: Preset,
    },

    #[serde(rename = "error")]
    FrameError { source: String, message: String },

    #[serde(rename = "midi_status")]
    ConnectionChanged {
        state: ConnectionState,
        connected: bool,
        input: Option<String>,
        output: Option<String>,
    },
}
