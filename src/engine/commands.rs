//! Commands accepted by the protocol engine actor
//!
//! Every command carries a oneshot reply so callers learn whether the frame
//! actually went out.

use super::connection::ConnectionState;
use super::error::EngineError;
use super::events::EngineEvent;
use crate::preset::Preset;
use crate::state::{EffectSlot, FullState, PresetListing, PresetSlot};
use crate::transport::{OpenPorts, PortList};
use serde::Deserialize;
use tokio::sync::oneshot;

/// Reply channel for a command
pub type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Where an outbound parameter change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// A relay client; the device echo updates the mirror and notifies
    Client,
    /// Gateway-internal; the mirror is updated as soon as the frame is sent
    #[default]
    Local,
}

pub enum EngineCommand {
    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------
    /// Open the device ports; `None` keeps the configured pattern
    Connect {
        input: Option<String>,
        output: Option<String>,
        reply: Reply<OpenPorts>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    ListPorts {
        reply: Reply<PortList>,
    },
    GetConnectionState {
        reply: Reply<ConnectionState>,
    },
    /// Current state as a `midi_status` notification
    GetStatus {
        reply: Reply<EngineEvent>,
    },

    // -------------------------------------------------------------------------
    // Device requests
    // -------------------------------------------------------------------------
    /// Queue requests for the active setup and both active effects
    RequestActiveState {
        reply: Reply<()>,
    },
    RequestStoredSetup {
        index: u8,
        reply: Reply<()>,
    },
    RequestStoredEffect {
        index: u8,
        reply: Reply<()>,
    },
    RequestAllStoredSetups {
        reply: Reply<()>,
    },
    RequestAllStoredEffects {
        reply: Reply<()>,
    },
    RequestParameterValue {
        domain: u8,
        param: u8,
        reply: Reply<()>,
    },

    // -------------------------------------------------------------------------
    // Outbound changes
    // -------------------------------------------------------------------------
    SendParameterChange {
        domain: u8,
        param: u8,
        value: u16,
        origin: ChangeOrigin,
        reply: Reply<()>,
    },
    SendPresetToActive {
        preset: Preset,
        slot: EffectSlot,
        reply: Reply<PresetSlot>,
    },
    SavePresetToRegister {
        preset: Preset,
        index: u8,
        reply: Reply<PresetSlot>,
    },

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------
    GetFullState {
        reply: Reply<FullState>,
    },
    GetParameter {
        domain: u8,
        param: u8,
        reply: Reply<Option<u16>>,
    },
    GetPreset {
        slot: PresetSlot,
        reply: Reply<Option<Preset>>,
    },
    ListPresets {
        reply: Reply<Vec<PresetListing>>,
    },

    /// Drain pending input, close the transport and stop
    Shutdown {
        done: oneshot::Sender<()>,
    },
}
