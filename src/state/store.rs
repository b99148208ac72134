//! DeviceState - In-memory mirror of the M300
//!
//! Holds the parameter table populated from NRPN and parameter-change
//! traffic, the active setup and effects, and the two stored banks.
//! Owned by the protocol engine; nothing here is shared across tasks.

use super::types::{FullState, PresetListing, PresetSlot};
use crate::preset::{EffectPreset, Preset, SetupPreset};
use crate::sysex::{BulkRecord, RecordKind, MAX_DOMAIN, MAX_PARAM_VALUE, STORED_BANK_SIZE};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Highest addressable parameter number in a domain
pub const MAX_PARAM_NUMBER: u8 = 127;

/// Local mirror of device state
#[derive(Debug, Default, Clone)]
pub struct DeviceState {
    parameters: BTreeMap<(u8, u8), u16>,
    active_setup: Option<SetupPreset>,
    active_effect_a: Option<EffectPreset>,
    active_effect_b: Option<EffectPreset>,
    stored_setups: BTreeMap<u8, SetupPreset>,
    stored_effects: BTreeMap<u8, EffectPreset>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parameter value
    ///
    /// Returns true only when the stored value changed. Out-of-range
    /// addresses or values are rejected and leave the table untouched.
    pub fn set_parameter(&mut self, domain: u8, param: u8, value: u16) -> bool {
        if domain > MAX_DOMAIN || param > MAX_PARAM_NUMBER || value > MAX_PARAM_VALUE {
            warn!(
                "Rejected parameter update domain={} param={} value={}",
                domain, param, value
            );
            return false;
        }
        self.parameters.insert((domain, param), value) != Some(value)
    }

    /// Stored value, `None` for an invalid domain or an unseen parameter
    pub fn get_parameter(&self, domain: u8, param: u8) -> Option<u16> {
        if domain > MAX_DOMAIN {
            return None;
        }
        self.parameters.get(&(domain, param)).copied()
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Store a preset in the given slot
    ///
    /// Returns false when the preset kind does not match the slot or the
    /// stored index is out of the bank.
    pub fn store_preset(&mut self, slot: PresetSlot, preset: Preset) -> bool {
        match (slot, preset) {
            (PresetSlot::ActiveSetup, Preset::Setup(p)) => self.active_setup = Some(p),
            (PresetSlot::ActiveEffectA, Preset::Effect(p)) => self.active_effect_a = Some(p),
            (PresetSlot::ActiveEffectB, Preset::Effect(p)) => self.active_effect_b = Some(p),
            (PresetSlot::StoredSetup(i), Preset::Setup(p)) if i < STORED_BANK_SIZE => {
                self.stored_setups.insert(i, p);
            }
            (PresetSlot::StoredEffect(i), Preset::Effect(p)) if i < STORED_BANK_SIZE => {
                self.stored_effects.insert(i, p);
            }
            (slot, preset) => {
                warn!("Cannot store {} preset in {}", preset.kind(), slot);
                return false;
            }
        }
        true
    }

    /// Decode a bulk dump and store it in the slot it addresses
    ///
    /// Unknown bulk types, factory presets and out-of-bank indices are
    /// ignored and return `None`.
    pub fn apply_bulk_record(&mut self, record: &BulkRecord) -> Option<(PresetSlot, Preset)> {
        let bulk_type = record.bulk_type?;
        let Some(slot) = PresetSlot::from_bulk(bulk_type, record.index) else {
            debug!(
                "Bulk {} index {} has no mirror slot",
                bulk_type, record.index
            );
            return None;
        };

        let preset = Preset::decode(bulk_type.record_kind(), &record.data);
        if self.store_preset(slot, preset.clone()) {
            debug!("Stored '{}' in {}", preset.name(), slot);
            Some((slot, preset))
        } else {
            None
        }
    }

    /// Preset currently held in a slot
    pub fn preset(&self, slot: PresetSlot) -> Option<Preset> {
        match slot {
            PresetSlot::ActiveSetup => self.active_setup.clone().map(Preset::from),
            PresetSlot::ActiveEffectA => self.active_effect_a.clone().map(Preset::from),
            PresetSlot::ActiveEffectB => self.active_effect_b.clone().map(Preset::from),
            PresetSlot::StoredSetup(i) => self.stored_setups.get(&i).cloned().map(Preset::from),
            PresetSlot::StoredEffect(i) => self.stored_effects.get(&i).cloned().map(Preset::from),
        }
    }

    pub fn active_setup(&self) -> Option<&SetupPreset> {
        self.active_setup.as_ref()
    }

    pub fn active_effect_a(&self) -> Option<&EffectPreset> {
        self.active_effect_a.as_ref()
    }

    pub fn active_effect_b(&self) -> Option<&EffectPreset> {
        self.active_effect_b.as_ref()
    }

    pub fn stored_setups(&self) -> &BTreeMap<u8, SetupPreset> {
        &self.stored_setups
    }

    pub fn stored_effects(&self) -> &BTreeMap<u8, EffectPreset> {
        &self.stored_effects
    }

    /// Actives plus the parameter table grouped by domain
    pub fn full_state(&self, connected: bool) -> FullState {
        let mut param_values: BTreeMap<u8, BTreeMap<u8, u16>> = BTreeMap::new();
        for (&(domain, param), &value) in &self.parameters {
            param_values.entry(domain).or_default().insert(param, value);
        }

        FullState {
            active_setup: self.active_setup.clone(),
            active_effect_a: self.active_effect_a.clone(),
            active_effect_b: self.active_effect_b.clone(),
            param_values,
            connected,
        }
    }

    /// Every stored preset, setups first, ordered by index
    pub fn list_stored(&self) -> Vec<PresetListing> {
        let setups = self.stored_setups.iter().map(|(&id, p)| PresetListing {
            id,
            name: p.name.clone(),
            kind: RecordKind::Setup,
            tags: Vec::new(),
            author: String::new(),
            description: String::new(),
            source: "device",
        });
        let effects = self.stored_effects.iter().map(|(&id, p)| PresetListing {
            id,
            name: p.name.clone(),
            kind: RecordKind::Effect,
            tags: p.tags.clone(),
            author: p.author.clone(),
            description: p.description.clone(),
            source: "device",
        });
        setups.chain(effects).collect()
    }
}
