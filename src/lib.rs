//! M300 GW - Lexicon M300 SysEx codec and device sync
//!
//! Library crate behind the `m300-gw` binary: the SysEx and preset codecs,
//! the device state mirror, and the protocol engine that keeps it in sync.

pub mod api;
pub mod config;
pub mod engine;
pub mod midi;
pub mod nrpn;
pub mod preset;
pub mod sniffer;
pub mod state;
pub mod sysex;
pub mod transport;
