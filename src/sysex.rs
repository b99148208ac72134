//! Lexicon M300 SysEx protocol
//!
//! Every device frame shares the same envelope:
//!
//! ```text
//! F0 06 03 <class<<4 | channel-1> <type> ...payload... F7
//! ```
//!
//! The submodules split the codec into the 8-bit/7-bit nibble layer, frame
//! parsing, and frame construction.

pub mod builder;
pub mod error;
pub mod frame;
pub mod nibble;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use builder::{build_bulk_frame, build_parameter_frame, build_request_frame, RequestOpcode};
pub use error::FrameError;
pub use frame::{is_device_frame, parse_frame, BulkRecord, BulkWarning, Frame, ParameterChange};
pub use nibble::{checksum, nibblize, unnibblize};

/// SysEx start byte
pub const SYSEX_START: u8 = 0xF0;
/// SysEx end byte
pub const SYSEX_END: u8 = 0xF7;
/// Lexicon manufacturer ID
pub const LEXICON_ID: u8 = 0x06;
/// M300 device ID
pub const M300_ID: u8 = 0x03;

/// Flag bytes trailing every nibblized bulk record
pub const BULK_FLAGS: [u8; 4] = [0x0B, 0x09, 0x06, 0x0D];

/// Number of stored registers per preset kind
pub const STORED_BANK_SIZE: u8 = 50;

/// Largest 14-bit value carried by parameter frames
pub const MAX_PARAM_VALUE: u16 = 16383;

/// Highest valid parameter domain
pub const MAX_DOMAIN: u8 = 6;

pub const DOMAIN_UTILITY: u8 = 0;
pub const DOMAIN_RUN: u8 = 1;
pub const DOMAIN_SETUP: u8 = 2;
pub const DOMAIN_EFFECT_A: u8 = 3;
pub const DOMAIN_EFFECT_B: u8 = 4;
pub const DOMAIN_MOD_A: u8 = 5;
pub const DOMAIN_MOD_B: u8 = 6;

/// Human-readable domain name, `None` outside 0-6
pub fn domain_name(domain: u8) -> Option<&'static str> {
    match domain {
        DOMAIN_UTILITY => Some("Utility"),
        DOMAIN_RUN => Some("Run"),
        DOMAIN_SETUP => Some("Setup"),
        DOMAIN_EFFECT_A => Some("Effect A"),
        DOMAIN_EFFECT_B => Some("Effect B"),
        DOMAIN_MOD_A => Some("Mod A"),
        DOMAIN_MOD_B => Some("Mod B"),
        _ => None,
    }
}

/// Message class carried in the high bits of the class/channel byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    ActiveBulk,
    StoredBulk,
    Parameter,
    Event,
    Request,
    Response,
    Display,
    Reserved,
}

impl MessageClass {
    /// Decode the 3-bit class field
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => MessageClass::ActiveBulk,
            1 => MessageClass::StoredBulk,
            2 => MessageClass::Parameter,
            3 => MessageClass::Event,
            4 => MessageClass::Request,
            5 => MessageClass::Response,
            6 => MessageClass::Display,
            _ => MessageClass::Reserved,
        }
    }

    /// Encode as the 3-bit class field
    pub fn bits(self) -> u8 {
        match self {
            MessageClass::ActiveBulk => 0,
            MessageClass::StoredBulk => 1,
            MessageClass::Parameter => 2,
            MessageClass::Event => 3,
            MessageClass::Request => 4,
            MessageClass::Response => 5,
            MessageClass::Display => 6,
            MessageClass::Reserved => 7,
        }
    }

    pub fn is_bulk(self) -> bool {
        matches!(self, MessageClass::ActiveBulk | MessageClass::StoredBulk)
    }
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageClass::ActiveBulk => "active-bulk",
            MessageClass::StoredBulk => "stored-bulk",
            MessageClass::Parameter => "parameter",
            MessageClass::Event => "event",
            MessageClass::Request => "request",
            MessageClass::Response => "response",
            MessageClass::Display => "display",
            MessageClass::Reserved => "reserved",
        };
        write!(f, "{}", label)
    }
}

/// Which record layout a bulk frame carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Setup,
    Effect,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Setup => write!(f, "setup"),
            RecordKind::Effect => write!(f, "effect"),
        }
    }
}

/// Known bulk dump types
///
/// The same type byte can mean different things under different message
/// classes, so lookups always go through `(class, type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkType {
    ActiveSetup,
    ActiveEffectA,
    ActiveEffectB,
    StoredSetup,
    StoredEffect,
    PresetSetup,
    PresetEffect,
}

impl BulkType {
    pub const ALL: [BulkType; 7] = [
        BulkType::ActiveSetup,
        BulkType::ActiveEffectA,
        BulkType::ActiveEffectB,
        BulkType::StoredSetup,
        BulkType::StoredEffect,
        BulkType::PresetSetup,
        BulkType::PresetEffect,
    ];

    /// Look up a bulk type by message class and type byte
    pub fn lookup(class: MessageClass, type_byte: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.message_class() == class && t.type_byte() == type_byte)
    }

    /// Look up by type byte alone, for outbound frames
    pub fn from_type_byte(type_byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.type_byte() == type_byte)
    }

    pub fn type_byte(self) -> u8 {
        match self {
            BulkType::ActiveSetup => 0x32,
            BulkType::ActiveEffectA => 0x33,
            BulkType::ActiveEffectB => 0x34,
            BulkType::StoredSetup => 0x20,
            BulkType::StoredEffect => 0x30,
            BulkType::PresetSetup => 0x40,
            BulkType::PresetEffect => 0x50,
        }
    }

    pub fn message_class(self) -> MessageClass {
        match self {
            BulkType::ActiveSetup | BulkType::ActiveEffectA | BulkType::ActiveEffectB => {
                MessageClass::ActiveBulk
            }
            _ => MessageClass::StoredBulk,
        }
    }

    pub fn record_kind(self) -> RecordKind {
        match self {
            BulkType::ActiveSetup | BulkType::StoredSetup | BulkType::PresetSetup => {
                RecordKind::Setup
            }
            _ => RecordKind::Effect,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BulkType::ActiveSetup => "Active Setup",
            BulkType::ActiveEffectA => "Active Effect A",
            BulkType::ActiveEffectB => "Active Effect B",
            BulkType::StoredSetup => "Stored Setup",
            BulkType::StoredEffect => "Stored Effect",
            BulkType::PresetSetup => "Preset Setup",
            BulkType::PresetEffect => "Preset Effect",
        }
    }
}

impl fmt::Display for BulkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Build the class/channel byte. `channel` is 1-based.
pub fn class_channel_byte(class: MessageClass, channel: u8) -> u8 {
    ((class.bits() & 0x07) << 4) | (channel.wrapping_sub(1) & 0x0F)
}

/// Frame header up to and including the class/channel byte
pub(crate) fn header(class: MessageClass, channel: u8) -> [u8; 4] {
    [SYSEX_START, LEXICON_ID, M300_ID, class_channel_byte(class, channel)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_channel_byte() {
        assert_eq!(class_channel_byte(MessageClass::Request, 1), 0x40);
        assert_eq!(class_channel_byte(MessageClass::Parameter, 16), 0x2F);
        assert_eq!(class_channel_byte(MessageClass::StoredBulk, 3), 0x12);
    }

    #[test]
    fn test_bulk_type_lookup_depends_on_class() {
        assert_eq!(
            BulkType::lookup(MessageClass::ActiveBulk, 0x33),
            Some(BulkType::ActiveEffectA)
        );
        assert_eq!(BulkType::lookup(MessageClass::StoredBulk, 0x33), None);
        assert_eq!(BulkType::lookup(MessageClass::ActiveBulk, 0x20), None);
        assert_eq!(
            BulkType::lookup(MessageClass::StoredBulk, 0x50),
            Some(BulkType::PresetEffect)
        );
    }

    #[test]
    fn test_bulk_type_classification() {
        assert_eq!(BulkType::ActiveEffectB.message_class(), MessageClass::ActiveBulk);
        assert_eq!(BulkType::PresetSetup.message_class(), MessageClass::StoredBulk);
        assert_eq!(BulkType::StoredEffect.record_kind(), RecordKind::Effect);
        assert_eq!(BulkType::ActiveSetup.label(), "Active Setup");
    }

    #[test]
    fn test_message_class_bits_roundtrip() {
        for bits in 0..8 {
            assert_eq!(MessageClass::from_bits(bits).bits(), bits);
        }
    }

    #[test]
    fn test_domain_names() {
        assert_eq!(domain_name(DOMAIN_EFFECT_B), Some("Effect B"));
        assert_eq!(domain_name(7), None);
    }
}
