//! Frame construction for outbound requests, parameter changes and bulk dumps

use super::error::FrameError;
use super::frame::Frame;
use super::nibble::{checksum, nibblize};
use super::{header, BulkType, MessageClass, BULK_FLAGS, SYSEX_END};
use std::fmt;
use tracing::warn;

/// Largest variable payload the 7-bit byte-count field can describe
const MAX_BULK_BYTE_COUNT: usize = 127;

/// Request opcodes understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOpcode {
    AllPresetSetups,
    AllPresetEffects,
    AllStoredSetups,
    AllStoredEffects,
    PresetSetup,
    PresetEffect,
    StoredSetup,
    StoredEffect,
    ActiveSetup,
    ActiveEffectA,
    ActiveEffectB,
    /// Sub byte is replaced by the requested parameter's domain
    ParameterValue,
}

impl RequestOpcode {
    pub const ALL: [RequestOpcode; 12] = [
        RequestOpcode::AllPresetSetups,
        RequestOpcode::AllPresetEffects,
        RequestOpcode::AllStoredSetups,
        RequestOpcode::AllStoredEffects,
        RequestOpcode::PresetSetup,
        RequestOpcode::PresetEffect,
        RequestOpcode::StoredSetup,
        RequestOpcode::StoredEffect,
        RequestOpcode::ActiveSetup,
        RequestOpcode::ActiveEffectA,
        RequestOpcode::ActiveEffectB,
        RequestOpcode::ParameterValue,
    ];

    /// `(subclass_or_domain, opcode, requires_value)`
    pub fn triple(self) -> (u8, u8, bool) {
        match self {
            RequestOpcode::AllPresetSetups => (0x00, 0x00, false),
            RequestOpcode::AllPresetEffects => (0x00, 0x01, false),
            RequestOpcode::AllStoredSetups => (0x00, 0x02, false),
            RequestOpcode::AllStoredEffects => (0x00, 0x03, false),
            RequestOpcode::PresetSetup => (0x00, 0x04, true),
            RequestOpcode::PresetEffect => (0x00, 0x05, true),
            RequestOpcode::StoredSetup => (0x00, 0x06, true),
            RequestOpcode::StoredEffect => (0x00, 0x07, true),
            RequestOpcode::ActiveSetup => (0x02, 0x08, false),
            RequestOpcode::ActiveEffectA => (0x03, 0x09, false),
            RequestOpcode::ActiveEffectB => (0x04, 0x09, false),
            RequestOpcode::ParameterValue => (0x00, 0x0E, true),
        }
    }

    pub fn requires_value(self) -> bool {
        self.triple().2
    }

    pub fn name(self) -> &'static str {
        match self {
            RequestOpcode::AllPresetSetups => "all-preset-setups",
            RequestOpcode::AllPresetEffects => "all-preset-effects",
            RequestOpcode::AllStoredSetups => "all-stored-setups",
            RequestOpcode::AllStoredEffects => "all-stored-effects",
            RequestOpcode::PresetSetup => "preset-setup",
            RequestOpcode::PresetEffect => "preset-effect",
            RequestOpcode::StoredSetup => "stored-setup",
            RequestOpcode::StoredEffect => "stored-effect",
            RequestOpcode::ActiveSetup => "active-setup",
            RequestOpcode::ActiveEffectA => "active-effect-a",
            RequestOpcode::ActiveEffectB => "active-effect-b",
            RequestOpcode::ParameterValue => "parameter-value",
        }
    }

    /// Recover the opcode of a parsed request frame
    ///
    /// The sub byte occupies the type-byte position and the opcode is the
    /// first payload byte.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        if frame.class != MessageClass::Request {
            return None;
        }
        let op = *frame.payload.first()?;
        if op == 0x0E {
            return Some(RequestOpcode::ParameterValue);
        }
        Self::ALL.into_iter().find(|r| {
            let (sub, code, _) = r.triple();
            sub == frame.type_byte && code == op
        })
    }
}

impl fmt::Display for RequestOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn checked_channel(channel: u8) -> u8 {
    if (1..=16).contains(&channel) {
        channel
    } else {
        warn!("Invalid MIDI channel {}, defaulting to 1", channel);
        1
    }
}

/// Build a request frame
///
/// `value` is the register index or parameter number for opcodes that take
/// one, sent LSB first. `domain` is only consulted for
/// [`RequestOpcode::ParameterValue`].
pub fn build_request_frame(
    opcode: RequestOpcode,
    value: Option<u16>,
    domain: Option<u8>,
    channel: u8,
) -> Result<Vec<u8>, FrameError> {
    let (mut sub, op, requires_value) = opcode.triple();

    if opcode == RequestOpcode::ParameterValue {
        let domain = domain.ok_or(FrameError::MissingDomain(opcode.name()))?;
        sub = domain & 0x0F;
    }

    let mut out = header(MessageClass::Request, checked_channel(channel)).to_vec();
    out.push(sub);
    out.push(op);

    if requires_value {
        let value = value.ok_or(FrameError::MissingValue(opcode.name()))?;
        out.push((value & 0x7F) as u8);
        out.push(((value >> 7) & 0x7F) as u8);
    }

    out.push(SYSEX_END);
    Ok(out)
}

/// Build a single parameter change frame
pub fn build_parameter_frame(domain: u8, param: u8, value: u16, channel: u8) -> Vec<u8> {
    let mut out = header(MessageClass::Parameter, checked_channel(channel)).to_vec();
    out.extend_from_slice(&[
        domain & 0x0F,
        param & 0x7F,
        (value & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        SYSEX_END,
    ]);
    out
}

/// Build a bulk dump frame for an 8-bit record
pub fn build_bulk_frame(
    record: &[u8],
    bulk_type: u8,
    index: u8,
    channel: u8,
) -> Result<Vec<u8>, FrameError> {
    let class = BulkType::from_type_byte(bulk_type)
        .ok_or(FrameError::UnknownBulkType(bulk_type))?
        .message_class();

    let mut variable = nibblize(record);
    variable.extend_from_slice(&BULK_FLAGS);
    let sum = checksum(&variable);
    variable.push(sum);

    if variable.len() > MAX_BULK_BYTE_COUNT {
        return Err(FrameError::PayloadTooLarge(variable.len()));
    }

    let mut out = header(class, checked_channel(channel)).to_vec();
    out.reserve(variable.len() + 4);
    out.push(bulk_type & 0x7F);
    out.push(index & 0x7F);
    out.push(variable.len() as u8);
    out.extend_from_slice(&variable);
    out.push(SYSEX_END);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysex::frame::{parse_frame, BulkRecord, ParameterChange};

    #[test]
    fn test_active_setup_request_roundtrip() {
        let bytes = build_request_frame(RequestOpcode::ActiveSetup, None, None, 1).unwrap();
        assert_eq!(bytes, vec![0xF0, 0x06, 0x03, 0x40, 0x02, 0x08, 0xF7]);

        let frame = parse_frame(&bytes).unwrap();
        assert_eq!(frame.class, MessageClass::Request);
        assert_eq!(frame.channel, 1);
        assert_eq!(RequestOpcode::from_frame(&frame), Some(RequestOpcode::ActiveSetup));
    }

    #[test]
    fn test_every_opcode_is_recoverable() {
        for opcode in RequestOpcode::ALL {
            let bytes = build_request_frame(opcode, Some(3), Some(4), 9).unwrap();
            let frame = parse_frame(&bytes).unwrap();
            assert_eq!(frame.channel, 9);
            assert_eq!(RequestOpcode::from_frame(&frame), Some(opcode), "{}", opcode);
        }
    }

    #[test]
    fn test_indexed_request_encodes_value_lsb_first() {
        let bytes = build_request_frame(RequestOpcode::StoredEffect, Some(200), None, 1).unwrap();
        assert_eq!(bytes, vec![0xF0, 0x06, 0x03, 0x40, 0x00, 0x07, 0x48, 0x01, 0xF7]);
    }

    #[test]
    fn test_request_missing_value() {
        assert_eq!(
            build_request_frame(RequestOpcode::StoredSetup, None, None, 1),
            Err(FrameError::MissingValue("stored-setup"))
        );
    }

    #[test]
    fn test_parameter_value_request_uses_domain() {
        let bytes =
            build_request_frame(RequestOpcode::ParameterValue, Some(12), Some(3), 1).unwrap();
        assert_eq!(bytes, vec![0xF0, 0x06, 0x03, 0x40, 0x03, 0x0E, 0x0C, 0x00, 0xF7]);

        assert_eq!(
            build_request_frame(RequestOpcode::ParameterValue, Some(12), None, 1),
            Err(FrameError::MissingDomain("parameter-value"))
        );
    }

    #[test]
    fn test_domain_ignored_for_other_opcodes() {
        let bytes = build_request_frame(RequestOpcode::ActiveEffectB, None, Some(6), 1).unwrap();
        assert_eq!(bytes[4], 0x04);
    }

    #[test]
    fn test_invalid_channel_defaults_to_one() {
        let bytes = build_request_frame(RequestOpcode::ActiveSetup, None, None, 0).unwrap();
        assert_eq!(bytes[3], 0x40);
    }

    #[test]
    fn test_parameter_frame() {
        let bytes = build_parameter_frame(3, 5, 996, 2);
        assert_eq!(bytes, vec![0xF0, 0x06, 0x03, 0x21, 0x03, 0x05, 0x64, 0x07, 0xF7]);

        let change = ParameterChange::from_frame(&parse_frame(&bytes).unwrap()).unwrap();
        assert_eq!((change.domain, change.param, change.value), (3, 5, 996));
    }

    #[test]
    fn test_bulk_frame_layout() {
        let bytes = build_bulk_frame(&[0x21, 0x43], 0x20, 4, 1).unwrap();
        // header, type, index, count
        assert_eq!(&bytes[..7], &[0xF0, 0x06, 0x03, 0x10, 0x20, 0x04, 9]);
        // nibbles, flags, checksum, terminator
        assert_eq!(
            &bytes[7..],
            &[0x01, 0x02, 0x03, 0x04, 0x0B, 0x09, 0x06, 0x0D, 0x0D, 0xF7]
        );
    }

    #[test]
    fn test_bulk_frame_active_class() {
        let bytes = build_bulk_frame(&[0u8; 36], 0x33, 0, 1).unwrap();
        let record = BulkRecord::from_frame(&parse_frame(&bytes).unwrap()).unwrap();
        assert_eq!(record.bulk_type, Some(BulkType::ActiveEffectA));
        assert_eq!(record.data, vec![0u8; 36]);
    }

    #[test]
    fn test_bulk_frame_unknown_type() {
        assert_eq!(
            build_bulk_frame(&[0x00], 0x21, 0, 1),
            Err(FrameError::UnknownBulkType(0x21))
        );
    }

    #[test]
    fn test_bulk_frame_too_large() {
        // 102 bytes nibblize to 204, plus flags and checksum
        assert_eq!(
            build_bulk_frame(&[0u8; 102], 0x30, 0, 1),
            Err(FrameError::PayloadTooLarge(209))
        );
        assert!(build_bulk_frame(&[0u8; 61], 0x30, 0, 1).is_ok());
        assert!(build_bulk_frame(&[0u8; 62], 0x30, 0, 1).is_err());
    }
}
