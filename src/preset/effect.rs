//! Effect record (102 bytes)
//!
//! ```text
//!   0-11  name (null padded)
//!     12  reserved
//!     13  algorithm ID
//!  14-81  parameter block: 34 big-endian slots, slot N at 14 + 2N
//! 82-101  modulation patch region, kept verbatim
//! ```
//!
//! The meaning of each parameter slot depends on the algorithm, see
//! [`Algorithm::param_map`]. Values not covered by the current algorithm's
//! map are kept across decodes so switching algorithms does not lose edits.

use super::algorithm::{clamp_param, is_known_param, param_range, Algorithm, DEFAULT_VALUES};
use super::{check_range, decode_name, encode_name, PresetRecord, ValidationError, DEFAULT_NAME};
use crate::sysex::MAX_PARAM_VALUE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

const PARAM_BLOCK_START: usize = 14;
const PATCH_REGION_START: usize = 82;
/// Bytes in the modulation patch region
pub const PATCH_REGION_LEN: usize = 20;

const UNKNOWN_ALGO_PREFIX: &str = "UnknownAlgoID_";

const DEFAULT_AUTHOR: &str = "User";

/// M300 effect preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "EffectDict", from = "EffectDict")]
pub struct EffectPreset {
    pub name: String,
    /// Algorithm display name, or `UnknownAlgoID_<id>` for unrecognised IDs
    pub algorithm: String,
    pub tags: Vec<String>,
    pub description: String,
    pub author: String,
    pub created_date: String,
    params: BTreeMap<String, u16>,
    patch_region: [u8; PATCH_REGION_LEN],
}

impl Default for EffectPreset {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            algorithm: Algorithm::RandomHall.name().to_string(),
            tags: Vec::new(),
            description: String::new(),
            author: DEFAULT_AUTHOR.to_string(),
            created_date: String::new(),
            params: DEFAULT_VALUES
                .iter()
                .map(|&(name, value)| (name.to_string(), value))
                .collect(),
            patch_region: [0; PATCH_REGION_LEN],
        }
    }
}

impl EffectPreset {
    pub fn with_algorithm(algorithm: Algorithm) -> Self {
        Self {
            algorithm: algorithm.name().to_string(),
            ..Default::default()
        }
    }

    /// Recognised algorithm, if any
    pub fn algorithm(&self) -> Option<Algorithm> {
        Algorithm::from_name(&self.algorithm)
    }

    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        self.algorithm = algorithm.name().to_string();
    }

    /// Current value of a named parameter; unset parameters read as 0
    pub fn param(&self, name: &str) -> u16 {
        self.params.get(name).copied().unwrap_or(0)
    }

    /// Set a named parameter without clamping; `validate` checks ranges
    pub fn set_param(&mut self, name: &str, value: u16) {
        self.params.insert(name.to_string(), value);
    }

    /// Parameters mapped by the current algorithm, in slot order
    pub fn mapped_params(&self) -> Vec<(&'static str, u16)> {
        match self.algorithm() {
            Some(algorithm) => algorithm
                .param_names()
                .map(|(_, name)| (name, self.param(name)))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn patch_region(&self) -> &[u8; PATCH_REGION_LEN] {
        &self.patch_region
    }

    /// Algorithm byte to write back, including unrecognised IDs read from the device
    fn algorithm_id(&self) -> u8 {
        if let Some(algorithm) = self.algorithm() {
            return algorithm.id();
        }
        self.algorithm
            .strip_prefix(UNKNOWN_ALGO_PREFIX)
            .and_then(|id| id.parse::<u8>().ok())
            .unwrap_or(0)
    }
}

impl PresetRecord for EffectPreset {
    const RECORD_LEN: usize = 102;

    fn parse_bytes(&mut self, data: &[u8]) {
        if data.len() < Self::RECORD_LEN {
            warn!(
                "Effect record too short: expected {} bytes, got {}",
                Self::RECORD_LEN,
                data.len()
            );
            return;
        }

        self.name = decode_name(&data[0..12]);

        let id = data[13];
        match Algorithm::from_id(id) {
            Some(algorithm) => {
                self.algorithm = algorithm.name().to_string();
                for (number, name) in algorithm.param_names() {
                    let offset = PARAM_BLOCK_START + number * 2;
                    if offset + 1 >= PATCH_REGION_START {
                        warn!("Parameter slot {} ({}) outside parameter block", number, name);
                        continue;
                    }
                    let raw = u16::from_be_bytes([data[offset], data[offset + 1]]);
                    self.params.insert(name.to_string(), clamp_param(name, raw));
                }
            }
            None => {
                warn!("Unknown algorithm ID {} in effect record", id);
                self.algorithm = format!("{}{}", UNKNOWN_ALGO_PREFIX, id);
            }
        }

        self.patch_region
            .copy_from_slice(&data[PATCH_REGION_START..PATCH_REGION_START + PATCH_REGION_LEN]);
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::RECORD_LEN];

        out[0..12].copy_from_slice(&encode_name(&self.name));
        out[13] = self.algorithm_id();

        if let Some(algorithm) = self.algorithm() {
            for (number, name) in algorithm.param_names() {
                let offset = PARAM_BLOCK_START + number * 2;
                if offset + 1 >= PATCH_REGION_START {
                    continue;
                }
                let value = clamp_param(name, self.param(name));
                out[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
            }
        }

        out[PATCH_REGION_START..].copy_from_slice(&self.patch_region);
        out
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.algorithm().is_none() {
            return Err(ValidationError::UnknownAlgorithm(self.algorithm.clone()));
        }
        for (name, &value) in &self.params {
            let (lo, hi) = param_range(name).unwrap_or((0, MAX_PARAM_VALUE));
            check_range(name, value as u32, lo as u32, hi as u32)?;
        }
        Ok(())
    }
}

/// JSON projection of an effect preset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct EffectDict {
    name: String,
    algorithm: String,
    tags: Vec<String>,
    description: String,
    author: String,
    created_date: String,
    parameters: BTreeMap<String, Value>,
    patch_region: Vec<u8>,
}

impl Default for EffectDict {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            algorithm: Algorithm::RandomHall.name().to_string(),
            tags: Vec::new(),
            description: String::new(),
            author: DEFAULT_AUTHOR.to_string(),
            created_date: String::new(),
            parameters: BTreeMap::new(),
            patch_region: Vec::new(),
        }
    }
}

impl From<EffectPreset> for EffectDict {
    fn from(preset: EffectPreset) -> Self {
        let parameters = preset
            .mapped_params()
            .into_iter()
            .map(|(name, value)| (name.to_string(), Value::from(value)))
            .collect();

        Self {
            name: preset.name,
            algorithm: preset.algorithm,
            tags: preset.tags,
            description: preset.description,
            author: preset.author,
            created_date: preset.created_date,
            parameters,
            patch_region: preset.patch_region.to_vec(),
        }
    }
}

impl From<EffectDict> for EffectPreset {
    fn from(dict: EffectDict) -> Self {
        let mut preset = EffectPreset {
            name: dict.name,
            algorithm: dict.algorithm,
            tags: dict.tags,
            description: dict.description,
            author: dict.author,
            created_date: dict.created_date,
            ..Default::default()
        };

        for (name, value) in dict.parameters {
            if !is_known_param(&name) {
                warn!("Ignoring unknown effect parameter '{}'", name);
                continue;
            }
            match value.as_i64() {
                Some(v) => {
                    let v = v.clamp(0, i64::from(u16::MAX)) as u16;
                    preset.set_param(&name, clamp_param(&name, v));
                }
                None => warn!("Could not set parameter '{}' from value {}", name, value),
            }
        }

        match dict.patch_region.len() {
            0 => {}
            PATCH_REGION_LEN => preset.patch_region.copy_from_slice(&dict.patch_region),
            n => warn!("Ignoring patch region of {} bytes (expected {})", n, PATCH_REGION_LEN),
        }

        preset
    }
}
