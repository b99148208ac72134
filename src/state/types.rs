//! Core types for the device state mirror

use crate::preset::{EffectPreset, SetupPreset};
use crate::sysex::{BulkType, RecordKind, STORED_BANK_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Effect slot on the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectSlot {
    #[default]
    A,
    B,
}

/// Where a preset lives in the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "slot", content = "index", rename_all = "snake_case")]
pub enum PresetSlot {
    ActiveSetup,
    ActiveEffectA,
    ActiveEffectB,
    StoredSetup(u8),
    StoredEffect(u8),
}

impl PresetSlot {
    /// Slot addressed by an inbound bulk dump
    ///
    /// Factory preset dumps and out-of-bank indices have no slot.
    pub fn from_bulk(bulk_type: BulkType, index: u8) -> Option<Self> {
        match bulk_type {
            BulkType::ActiveSetup => Some(PresetSlot::ActiveSetup),
            BulkType::ActiveEffectA => Some(PresetSlot::ActiveEffectA),
            BulkType::ActiveEffectB => Some(PresetSlot::ActiveEffectB),
            BulkType::StoredSetup if index < STORED_BANK_SIZE => Some(PresetSlot::StoredSetup(index)),
            BulkType::StoredEffect if index < STORED_BANK_SIZE => {
                Some(PresetSlot::StoredEffect(index))
            }
            _ => None,
        }
    }

    pub fn active_effect(slot: EffectSlot) -> Self {
        match slot {
            EffectSlot::A => PresetSlot::ActiveEffectA,
            EffectSlot::B => PresetSlot::ActiveEffectB,
        }
    }

    /// Bulk type used to send a preset into this slot
    pub fn bulk_type(self) -> BulkType {
        match self {
            PresetSlot::ActiveSetup => BulkType::ActiveSetup,
            PresetSlot::ActiveEffectA => BulkType::ActiveEffectA,
            PresetSlot::ActiveEffectB => BulkType::ActiveEffectB,
            PresetSlot::StoredSetup(_) => BulkType::StoredSetup,
            PresetSlot::StoredEffect(_) => BulkType::StoredEffect,
        }
    }

    /// Index byte for bulk frames targeting this slot
    pub fn index(self) -> u8 {
        match self {
            PresetSlot::ActiveSetup | PresetSlot::ActiveEffectA => 0,
            PresetSlot::ActiveEffectB => 1,
            PresetSlot::StoredSetup(i) | PresetSlot::StoredEffect(i) => i,
        }
    }

    pub fn kind(self) -> RecordKind {
        self.bulk_type().record_kind()
    }
}

impl fmt::Display for PresetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresetSlot::ActiveSetup => write!(f, "active setup"),
            PresetSlot::ActiveEffectA => write!(f, "active effect A"),
            PresetSlot::ActiveEffectB => write!(f, "active effect B"),
            PresetSlot::StoredSetup(i) => write!(f, "stored setup {}", i),
            PresetSlot::StoredEffect(i) => write!(f, "stored effect {}", i),
        }
    }
}

/// Snapshot for newly joined observers
///
/// Stored banks are fetched separately.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullState {
    pub active_setup: Option<SetupPreset>,
    pub active_effect_a: Option<EffectPreset>,
    pub active_effect_b: Option<EffectPreset>,
    /// domain → parameter → value
    pub param_values: BTreeMap<u8, BTreeMap<u8, u16>>,
    pub connected: bool,
}

/// Summary entry for preset listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetListing {
    pub id: u8,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub tags: Vec<String>,
    pub author: String,
    pub description: String,
    pub source: &'static str,
}
