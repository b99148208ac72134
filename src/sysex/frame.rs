//! Frame parsing
//!
//! [`parse_frame`] splits the envelope; [`ParameterChange`] and [`BulkRecord`]
//! interpret the payload of the two message classes the engine consumes.

use super::error::FrameError;
use super::nibble::{checksum, unnibblize};
use super::{BulkType, MessageClass, BULK_FLAGS, LEXICON_ID, M300_ID, SYSEX_END, SYSEX_START};
use std::fmt;

/// Header (4) + type byte + terminator
const MIN_FRAME_LEN: usize = 6;

/// Checksum byte plus the four flag bytes
const MIN_BULK_BYTE_COUNT: usize = 5;

/// A parsed device frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub class: MessageClass,
    /// MIDI channel, 1-16
    pub channel: u8,
    pub type_byte: u8,
    /// Bytes between the type byte and the terminator
    pub payload: Vec<u8>,
}

/// Cheap pre-filter: does this look like an M300 SysEx frame?
pub fn is_device_frame(bytes: &[u8]) -> bool {
    bytes.len() > 4
        && bytes[0] == SYSEX_START
        && bytes[1] == LEXICON_ID
        && bytes[2] == M300_ID
        && bytes[bytes.len() - 1] == SYSEX_END
}

/// Parse the SysEx envelope into a [`Frame`]
pub fn parse_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort {
            len: bytes.len(),
            min: MIN_FRAME_LEN,
        });
    }
    if bytes[0] != SYSEX_START || bytes[bytes.len() - 1] != SYSEX_END {
        return Err(FrameError::MalformedFrame(
            "missing SysEx start or terminator".to_string(),
        ));
    }
    if bytes[1] != LEXICON_ID || bytes[2] != M300_ID {
        return Err(FrameError::MalformedFrame(format!(
            "unexpected manufacturer/device ID {:02X} {:02X}",
            bytes[1], bytes[2]
        )));
    }

    let class_channel = bytes[3];
    Ok(Frame {
        class: MessageClass::from_bits(class_channel >> 4),
        channel: (class_channel & 0x0F) + 1,
        type_byte: bytes[4] & 0x7F,
        payload: bytes[5..bytes.len() - 1].to_vec(),
    })
}

/// Single parameter update carried by a Parameter-class frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterChange {
    pub domain: u8,
    pub param: u8,
    pub value: u16,
}

impl ParameterChange {
    /// Decode `[param, value_lsb, value_msb]`; the domain sits in the type byte
    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        let p = &frame.payload;
        if p.len() < 3 {
            return Err(FrameError::IncompletePayload {
                expected: 3,
                actual: p.len(),
            });
        }

        Ok(Self {
            domain: frame.type_byte & 0x0F,
            param: p[0] & 0x7F,
            value: (((p[2] & 0x7F) as u16) << 7) | (p[1] & 0x7F) as u16,
        })
    }
}

/// Non-fatal findings while decoding a bulk frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkWarning {
    FlagMismatch { received: [u8; 4] },
    ChecksumMismatch { received: u8, computed: u8 },
    UnknownBulkType { class: MessageClass, type_byte: u8 },
}

impl fmt::Display for BulkWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkWarning::FlagMismatch { received } => {
                write!(f, "Unexpected flag bytes: {:02X?}", received)
            }
            BulkWarning::ChecksumMismatch { received, computed } => write!(
                f,
                "Checksum mismatch: received 0x{:02X}, computed 0x{:02X}",
                received, computed
            ),
            BulkWarning::UnknownBulkType { class, type_byte } => {
                write!(f, "Unknown bulk type 0x{:02X} for class {}", type_byte, class)
            }
        }
    }
}

/// Decoded bulk dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRecord {
    pub class: MessageClass,
    pub type_byte: u8,
    /// `None` when `(class, type_byte)` is not in the bulk type table
    pub bulk_type: Option<BulkType>,
    pub index: u8,
    pub declared_byte_count: usize,
    pub raw_payload: Vec<u8>,
    pub checksum_received: u8,
    pub checksum_computed: u8,
    pub flag_bytes: [u8; 4],
    /// The reconstructed 8-bit record
    pub data: Vec<u8>,
    pub warnings: Vec<BulkWarning>,
}

impl BulkRecord {
    /// Decode `[index, byte_count, ...nibbles, flags(4), checksum]`
    ///
    /// Flag and checksum mismatches become warnings, the record is still
    /// returned.
    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        let p = &frame.payload;
        if p.len() < 3 {
            return Err(FrameError::IncompletePayload {
                expected: 3,
                actual: p.len(),
            });
        }

        let index = p[0] & 0x7F;
        let declared = p[1] as usize;
        let variable = &p[2..];

        if variable.len() != declared {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: variable.len(),
            });
        }
        if declared < MIN_BULK_BYTE_COUNT {
            return Err(FrameError::TooShortForChecksum { declared });
        }

        let (body, checksum_byte) = variable.split_at(declared - 1);
        let (nibbles, flags) = body.split_at(body.len() - 4);
        let checksum_received = checksum_byte[0];
        let checksum_computed = checksum(body);
        let flag_bytes = [flags[0], flags[1], flags[2], flags[3]];
        let data = unnibblize(nibbles)?;

        let bulk_type = BulkType::lookup(frame.class, frame.type_byte);

        let mut warnings = Vec::new();
        if flag_bytes != BULK_FLAGS {
            warnings.push(BulkWarning::FlagMismatch {
                received: flag_bytes,
            });
        }
        if checksum_received != checksum_computed {
            warnings.push(BulkWarning::ChecksumMismatch {
                received: checksum_received,
                computed: checksum_computed,
            });
        }
        if bulk_type.is_none() {
            warnings.push(BulkWarning::UnknownBulkType {
                class: frame.class,
                type_byte: frame.type_byte,
            });
        }

        Ok(Self {
            class: frame.class,
            type_byte: frame.type_byte,
            bulk_type,
            index,
            declared_byte_count: declared,
            raw_payload: variable.to_vec(),
            checksum_received,
            checksum_computed,
            flag_bytes,
            data,
            warnings,
        })
    }

    pub fn checksum_ok(&self) -> bool {
        self.checksum_received == self.checksum_computed
    }

    pub fn flags_ok(&self) -> bool {
        self.flag_bytes == BULK_FLAGS
    }

    pub fn label(&self) -> &'static str {
        self.bulk_type.map(BulkType::label).unwrap_or("Unknown")
    }
}
