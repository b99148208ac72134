//! Setup record (36 bytes)
//!
//! ```text
//!  0-11  name (null padded)        12  reserved
//!    13  effect A number           14  effect B number
//!    15  mc<<6 | lfo shape<<4 | left meter<<2 | right meter
//!    16  softknob                  17  LFO rate (full 8 bits)
//! 18-23  IO levels 1-6
//! 24-28  patch 1: src, dest, scale msb, threshold, scale lsb
//!    29  reserved
//! 30-34  patch 2, same layout      35  reserved
//! ```

use super::{check_range, decode_name, encode_name, PresetRecord, ValidationError, DEFAULT_NAME};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// M300 setup preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupPreset {
    pub name: String,
    pub machine_config: u8,
    pub effect_a_num: u8,
    pub effect_b_num: u8,
    pub lfo_shape: u8,
    pub lfo_rate: u8,
    pub softknob: u8,
    pub io_level1: u8,
    pub io_level2: u8,
    pub io_level3: u8,
    pub io_level4: u8,
    pub io_level5: u8,
    pub io_level6: u8,
    pub patch1_src: u8,
    pub patch1_dest: u8,
    pub patch1_scale: u16,
    pub patch1_thresh: u8,
    pub patch2_src: u8,
    pub patch2_dest: u8,
    pub patch2_scale: u16,
    pub patch2_thresh: u8,
    pub left_meter_assign: u8,
    pub right_meter_assign: u8,
}

impl Default for SetupPreset {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            machine_config: 0,
            effect_a_num: 101,
            effect_b_num: 0,
            lfo_shape: 0,
            lfo_rate: 0,
            softknob: 64,
            io_level1: 0,
            io_level2: 64,
            io_level3: 0,
            io_level4: 64,
            io_level5: 127,
            io_level6: 0,
            patch1_src: 65,
            patch1_dest: 2,
            patch1_scale: 1000,
            patch1_thresh: 0,
            patch2_src: 66,
            patch2_dest: 0,
            patch2_scale: 500,
            patch2_thresh: 64,
            left_meter_assign: 0,
            right_meter_assign: 0,
        }
    }
}

/// Upper bound of every numeric field, in `field_values` order. All minimums are 0.
const FIELD_LIMITS: [(&str, u32); 22] = [
    ("machine_config", 3),
    ("effect_a_num", 127),
    ("effect_b_num", 127),
    ("lfo_shape", 3),
    ("lfo_rate", 255),
    ("softknob", 127),
    ("io_level1", 127),
    ("io_level2", 127),
    ("io_level3", 127),
    ("io_level4", 127),
    ("io_level5", 127),
    ("io_level6", 127),
    ("patch1_src", 72),
    ("patch1_dest", 33),
    ("patch1_scale", 16383),
    ("patch1_thresh", 127),
    ("patch2_src", 72),
    ("patch2_dest", 33),
    ("patch2_scale", 16383),
    ("patch2_thresh", 127),
    ("left_meter_assign", 3),
    ("right_meter_assign", 3),
];

impl SetupPreset {
    fn field_values(&self) -> [u32; 22] {
        [
            self.machine_config as u32,
            self.effect_a_num as u32,
            self.effect_b_num as u32,
            self.lfo_shape as u32,
            self.lfo_rate as u32,
            self.softknob as u32,
            self.io_level1 as u32,
            self.io_level2 as u32,
            self.io_level3 as u32,
            self.io_level4 as u32,
            self.io_level5 as u32,
            self.io_level6 as u32,
            self.patch1_src as u32,
            self.patch1_dest as u32,
            self.patch1_scale as u32,
            self.patch1_thresh as u32,
            self.patch2_src as u32,
            self.patch2_dest as u32,
            self.patch2_scale as u32,
            self.patch2_thresh as u32,
            self.left_meter_assign as u32,
            self.right_meter_assign as u32,
        ]
    }

    fn io_levels(&self) -> [u8; 6] {
        [
            self.io_level1,
            self.io_level2,
            self.io_level3,
            self.io_level4,
            self.io_level5,
            self.io_level6,
        ]
    }
}

/// Write a patch block: src, dest, scale msb, threshold, scale lsb, reserved
fn write_patch(out: &mut [u8], src: u8, dest: u8, scale: u16, thresh: u8) {
    out[0] = src & 0x7F;
    out[1] = dest & 0x7F;
    out[2] = ((scale >> 7) & 0x7F) as u8;
    out[3] = thresh & 0x7F;
    out[4] = (scale & 0x7F) as u8;
    out[5] = 0;
}

/// Returns `(src, dest, scale, thresh)`
fn read_patch(data: &[u8]) -> (u8, u8, u16, u8) {
    let scale = (((data[2] & 0x7F) as u16) << 7) | (data[4] & 0x7F) as u16;
    (data[0] & 0x7F, data[1] & 0x7F, scale, data[3] & 0x7F)
}

impl PresetRecord for SetupPreset {
    const RECORD_LEN: usize = 36;

    fn parse_bytes(&mut self, data: &[u8]) {
        if data.len() < Self::RECORD_LEN {
            warn!(
                "Setup record too short: expected {} bytes, got {}",
                Self::RECORD_LEN,
                data.len()
            );
            return;
        }

        self.name = decode_name(&data[0..12]);
        self.effect_a_num = data[13] & 0x7F;
        self.effect_b_num = data[14] & 0x7F;

        let packed = data[15];
        self.machine_config = (packed >> 6) & 0x03;
        self.lfo_shape = (packed >> 4) & 0x03;
        self.left_meter_assign = (packed >> 2) & 0x03;
        self.right_meter_assign = packed & 0x03;

        self.softknob = data[16] & 0x7F;
        self.lfo_rate = data[17];

        self.io_level1 = data[18] & 0x7F;
        self.io_level2 = data[19] & 0x7F;
        self.io_level3 = data[20] & 0x7F;
        self.io_level4 = data[21] & 0x7F;
        self.io_level5 = data[22] & 0x7F;
        self.io_level6 = data[23] & 0x7F;

        (self.patch1_src, self.patch1_dest, self.patch1_scale, self.patch1_thresh) =
            read_patch(&data[24..29]);
        (self.patch2_src, self.patch2_dest, self.patch2_scale, self.patch2_thresh) =
            read_patch(&data[30..35]);
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::RECORD_LEN];

        out[0..12].copy_from_slice(&encode_name(&self.name));
        out[13] = self.effect_a_num & 0x7F;
        out[14] = self.effect_b_num & 0x7F;
        out[15] = ((self.machine_config & 0x03) << 6)
            | ((self.lfo_shape & 0x03) << 4)
            | ((self.left_meter_assign & 0x03) << 2)
            | (self.right_meter_assign & 0x03);
        out[16] = self.softknob & 0x7F;
        out[17] = self.lfo_rate;

        for (slot, level) in out[18..24].iter_mut().zip(self.io_levels()) {
            *slot = level & 0x7F;
        }

        write_patch(
            &mut out[24..30],
            self.patch1_src,
            self.patch1_dest,
            self.patch1_scale,
            self.patch1_thresh,
        );
        write_patch(
            &mut out[30..36],
            self.patch2_src,
            self.patch2_dest,
            self.patch2_scale,
            self.patch2_thresh,
        );

        out
    }

    /// Numeric fields are range-checked before deserializing, so a value too
    /// wide for its storage type reports the field instead of a type error.
    fn from_dict(value: &Value) -> Result<Self, ValidationError> {
        if let Some(map) = value.as_object() {
            for (field, max) in FIELD_LIMITS {
                if let Some(raw) = map.get(field).and_then(Value::as_u64) {
                    check_range(field, u32::try_from(raw).unwrap_or(u32::MAX), 0, max)?;
                }
            }
        }
        serde_json::from_value(value.clone()).map_err(|e| ValidationError::InvalidData(e.to_string()))
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }

        for ((field, max), value) in FIELD_LIMITS.into_iter().zip(self.field_values()) {
            check_range(field, value, 0, max)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_test_setup_bytes() -> Vec<u8> {
        let mut data = b"Test Setup\0\0".to_vec();
        data.push(0x00); // reserved
        data.push(101); // effect A
        data.push(0); // effect B
        data.push(0x00); // packed config
        data.push(64); // softknob
        data.push(0); // LFO rate
        data.extend_from_slice(&[0, 64, 0, 64, 127, 0]);
        data.extend_from_slice(&[65, 2, (1000 >> 7) as u8, 0, (1000 & 0x7F) as u8, 0]);
        data.extend_from_slice(&[66, 0, (500 >> 7) as u8, 64, (500 & 0x7F) as u8, 0]);
        data
    }

    #[test]
    fn test_parse_reference_setup() {
        let data = make_test_setup_bytes();
        assert_eq!(data.len(), 36);

        let setup = SetupPreset::decode(&data);
        assert_eq!(setup.name, "Test Setup");
        assert_eq!(setup.effect_a_num, 101);
        assert_eq!(setup.softknob, 64);
        assert_eq!(setup.io_level5, 127);
        assert_eq!(setup.patch1_scale, 1000);
        assert_eq!(setup.patch2_scale, 500);
        assert_eq!(setup.patch2_thresh, 64);
    }

    #[test]
    fn test_reference_setup_reencodes_identically() {
        let data = make_test_setup_bytes();
        assert_eq!(SetupPreset::decode(&data).to_bytes(), data);
    }

    #[test]
    fn test_short_record_keeps_defaults() {
        let mut setup = SetupPreset::default();
        setup.parse_bytes(&make_test_setup_bytes()[..35]);
        assert_eq!(setup, SetupPreset::default());
    }

    #[test]
    fn test_roundtrip_all_fields() {
        let setup = SetupPreset {
            name: "Live Vox".to_string(),
            machine_config: 2,
            effect_a_num: 17,
            effect_b_num: 99,
            lfo_shape: 3,
            lfo_rate: 0xC8,
            softknob: 12,
            io_level1: 1,
            io_level2: 2,
            io_level3: 3,
            io_level4: 4,
            io_level5: 5,
            io_level6: 6,
            patch1_src: 70,
            patch1_dest: 33,
            patch1_scale: 16383,
            patch1_thresh: 100,
            patch2_src: 0,
            patch2_dest: 1,
            patch2_scale: 129,
            patch2_thresh: 7,
            left_meter_assign: 1,
            right_meter_assign: 2,
        };

        let bytes = setup.to_bytes();
        assert_eq!(bytes.len(), 36);
        // LFO rate keeps its top bit, unlike every other field
        assert_eq!(bytes[17], 0xC8);
        assert_eq!(bytes[15], (2 << 6) | (3 << 4) | (1 << 2) | 2);
        assert_eq!(SetupPreset::decode(&bytes), setup);
    }

    #[test]
    fn test_seven_bit_fields_are_masked() {
        let setup = SetupPreset {
            softknob: 200,
            lfo_rate: 200,
            ..Default::default()
        };
        let decoded = SetupPreset::decode(&setup.to_bytes());
        assert_eq!(decoded.softknob, 200 & 0x7F);
        assert_eq!(decoded.lfo_rate, 200);
    }

    #[test]
    fn test_reserved_bytes_written_as_zero() {
        let bytes = SetupPreset::default().to_bytes();
        assert_eq!(bytes[12], 0);
        assert_eq!(bytes[29], 0);
        assert_eq!(bytes[35], 0);
    }

    #[test]
    fn test_validate() {
        assert!(SetupPreset::default().validate().is_ok());

        let unnamed = SetupPreset {
            name: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(unnamed.validate(), Err(ValidationError::EmptyName));

        let bad_dest = SetupPreset {
            patch1_dest: 40,
            ..Default::default()
        };
        assert_eq!(
            bad_dest.validate().unwrap_err().to_string(),
            "Parameter patch1_dest value 40 out of range [0, 33]"
        );
    }

    #[test]
    fn test_dict_projection() {
        let dict = SetupPreset::default().to_dict();
        assert_eq!(dict["name"], "Untitled");
        assert_eq!(dict["patch1_scale"], 1000);
        assert_eq!(dict["right_meter_assign"], 0);

        let parsed = SetupPreset::from_dict(&json!({
            "name": "From UI",
            "softknob": 10,
            "unknown_key": true
        }))
        .unwrap();
        assert_eq!(parsed.name, "From UI");
        assert_eq!(parsed.softknob, 10);
        assert_eq!(parsed.effect_a_num, 101);
    }

    #[test]
    fn test_from_dict_rejects_wrong_types() {
        assert!(matches!(
            SetupPreset::from_dict(&json!({"softknob": "loud"})),
            Err(ValidationError::InvalidData(_))
        ));
    }

    #[test]
    fn test_from_dict_oversized_field_names_the_field() {
        assert_eq!(
            SetupPreset::from_dict(&json!({"softknob": 300})),
            Err(ValidationError::OutOfRange {
                field: "softknob".to_string(),
                value: 300,
                min: 0,
                max: 127,
            })
        );

        let err = SetupPreset::from_dict(&json!({"patch2_scale": 70000})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Parameter patch2_scale value 70000 out of range [0, 16383]"
        );

        // In the storage type but over the device range
        assert!(matches!(
            SetupPreset::from_dict(&json!({"machine_config": 9})),
            Err(ValidationError::OutOfRange { ref field, .. }) if field == "machine_config"
        ));
    }
}
