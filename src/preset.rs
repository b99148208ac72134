//! Preset record formats
//!
//! The device stores two kinds of presets as fixed-layout binary records:
//! 36-byte setups and 102-byte effects. Both go through the same capability
//! set: decode from a raw record, encode back, validate before sending, and
//! project to/from the JSON form used by the preset file and relay clients.

pub mod algorithm;
pub mod effect;
pub mod setup;

use crate::sysex::RecordKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use algorithm::Algorithm;
pub use effect::EffectPreset;
pub use setup::SetupPreset;

/// Length of the name field shared by both record kinds
pub const NAME_LEN: usize = 12;

/// Default preset name
pub const DEFAULT_NAME: &str = "Untitled";

/// Pre-send validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Preset name is required")]
    EmptyName,

    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Parameter {field} value {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("Invalid preset data: {0}")]
    InvalidData(String),
}

/// Capabilities shared by setup and effect records
pub trait PresetRecord: Default + Clone + Serialize + DeserializeOwned {
    /// Size of the 8-bit record on the wire
    const RECORD_LEN: usize;

    /// Overwrite fields from a raw record; shorter input leaves `self` untouched
    fn parse_bytes(&mut self, data: &[u8]);

    /// Encode into exactly `RECORD_LEN` bytes
    fn to_bytes(&self) -> Vec<u8>;

    fn validate(&self) -> Result<(), ValidationError>;

    /// Decode a fresh record from raw bytes
    fn decode(data: &[u8]) -> Self {
        let mut record = Self::default();
        record.parse_bytes(data);
        record
    }

    fn to_dict(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn from_dict(value: &Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value.clone()).map_err(|e| ValidationError::InvalidData(e.to_string()))
    }
}

/// Either kind of preset
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Preset {
    Setup(SetupPreset),
    Effect(EffectPreset),
}

impl Preset {
    /// Decode a raw record of the given kind
    pub fn decode(kind: RecordKind, data: &[u8]) -> Self {
        match kind {
            RecordKind::Setup => Preset::Setup(SetupPreset::decode(data)),
            RecordKind::Effect => Preset::Effect(EffectPreset::decode(data)),
        }
    }

    pub fn from_dict(kind: RecordKind, value: &Value) -> Result<Self, ValidationError> {
        Ok(match kind {
            RecordKind::Setup => Preset::Setup(SetupPreset::from_dict(value)?),
            RecordKind::Effect => Preset::Effect(EffectPreset::from_dict(value)?),
        })
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Preset::Setup(_) => RecordKind::Setup,
            Preset::Effect(_) => RecordKind::Effect,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Preset::Setup(p) => &p.name,
            Preset::Effect(p) => &p.name,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Preset::Setup(p) => p.to_bytes(),
            Preset::Effect(p) => p.to_bytes(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Preset::Setup(p) => p.validate(),
            Preset::Effect(p) => p.validate(),
        }
    }

    pub fn to_dict(&self) -> Value {
        match self {
            Preset::Setup(p) => p.to_dict(),
            Preset::Effect(p) => p.to_dict(),
        }
    }
}

impl From<SetupPreset> for Preset {
    fn from(preset: SetupPreset) -> Self {
        Preset::Setup(preset)
    }
}

impl From<EffectPreset> for Preset {
    fn from(preset: EffectPreset) -> Self {
        Preset::Effect(preset)
    }
}

/// Decode the null-padded name field
pub(crate) fn decode_name(field: &[u8]) -> String {
    let field = &field[..field.len().min(NAME_LEN)];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    field[..end]
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Encode a name as 12 null-padded ASCII bytes, non-ASCII characters become `?`
pub(crate) fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut out = [0u8; NAME_LEN];
    let bytes = name
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' });
    for (slot, byte) in out.iter_mut().zip(bytes) {
        *slot = byte;
    }
    out
}

pub(crate) fn check_range(
    field: &str,
    value: u32,
    min: u32,
    max: u32,
) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_name_roundtrip() {
        let encoded = encode_name("Big Hall");
        assert_eq!(&encoded[..8], b"Big Hall");
        assert_eq!(&encoded[8..], &[0, 0, 0, 0]);
        assert_eq!(decode_name(&encoded), "Big Hall");
    }

    #[test]
    fn test_name_truncates_at_twelve() {
        let encoded = encode_name("A Very Long Preset Name");
        assert_eq!(&encoded, b"A Very Long ");
        assert_eq!(decode_name(&encoded), "A Very Long");
    }

    #[test]
    fn test_name_replaces_non_ascii() {
        assert_eq!(decode_name(&encode_name("Café")), "Caf?");
        let encoded = encode_name("Über Große Hall");
        assert_eq!(&encoded, b"?ber Gro?e H");
    }

    #[test]
    fn test_decode_name_stops_at_first_null() {
        assert_eq!(decode_name(b"Room\0junk\0\0\0"), "Room");
    }

    #[test]
    fn test_preset_kind_dispatch() {
        let setup = Preset::decode(RecordKind::Setup, &[]);
        assert_eq!(setup.kind(), RecordKind::Setup);
        assert_eq!(setup.name(), DEFAULT_NAME);

        let effect = Preset::from_dict(RecordKind::Effect, &json!({"name": "Verb"})).unwrap();
        assert_eq!(effect.kind(), RecordKind::Effect);
        assert_eq!(effect.name(), "Verb");
        assert_eq!(effect.to_bytes().len(), EffectPreset::RECORD_LEN);
    }

    #[test]
    fn test_validation_error_message() {
        let err = check_range("size", 200, 0, 127).unwrap_err();
        assert_eq!(err.to_string(), "Parameter size value 200 out of range [0, 127]");
    }
}
