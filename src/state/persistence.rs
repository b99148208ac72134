//! Preset persistence to JSON snapshots
//!
//! Keeps the preset library across restarts. Each preset is stored as its
//! dictionary projection; stored banks are keyed by the decimal index.

use super::store::DeviceState;
use super::types::PresetSlot;
use crate::preset::Preset;
use crate::sysex::{RecordKind, STORED_BANK_SIZE};
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Preset library snapshot for JSON serialization
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PresetSnapshot {
    pub active_setup: Option<Value>,
    pub active_effect_a: Option<Value>,
    pub active_effect_b: Option<Value>,
    pub stored_setups: BTreeMap<String, Value>,
    pub stored_effects: BTreeMap<String, Value>,
}

impl PresetSnapshot {
    /// Capture the presets currently held in a DeviceState
    pub fn from_state(state: &DeviceState) -> Self {
        let project = |slot| state.preset(slot).map(|p: Preset| p.to_dict());

        Self {
            active_setup: project(PresetSlot::ActiveSetup),
            active_effect_a: project(PresetSlot::ActiveEffectA),
            active_effect_b: project(PresetSlot::ActiveEffectB),
            stored_setups: state
                .stored_setups()
                .iter()
                .map(|(i, p)| (i.to_string(), Preset::from(p.clone()).to_dict()))
                .collect(),
            stored_effects: state
                .stored_effects()
                .iter()
                .map(|(i, p)| (i.to_string(), Preset::from(p.clone()).to_dict()))
                .collect(),
        }
    }

    /// Load snapshot into a DeviceState
    ///
    /// Entries with a bad index or an undecodable body are skipped with a
    /// warning. Returns the number of presets restored.
    pub fn load_into(&self, state: &mut DeviceState) -> usize {
        let mut restored = 0;
        let mut restore = |slot: PresetSlot, value: &Value| {
            match Preset::from_dict(slot.kind(), value) {
                Ok(preset) => {
                    if state.store_preset(slot, preset) {
                        restored += 1;
                    }
                }
                Err(e) => warn!("Skipping saved {}: {}", slot, e),
            }
        };

        if let Some(v) = &self.active_setup {
            restore(PresetSlot::ActiveSetup, v);
        }
        if let Some(v) = &self.active_effect_a {
            restore(PresetSlot::ActiveEffectA, v);
        }
        if let Some(v) = &self.active_effect_b {
            restore(PresetSlot::ActiveEffectB, v);
        }

        for (kind, bank) in [
            (RecordKind::Setup, &self.stored_setups),
            (RecordKind::Effect, &self.stored_effects),
        ] {
            for (key, value) in bank {
                let Some(index) = parse_bank_index(key) else {
                    warn!("Skipping saved {} with invalid index '{}'", kind, key);
                    continue;
                };
                let slot = match kind {
                    RecordKind::Setup => PresetSlot::StoredSetup(index),
                    RecordKind::Effect => PresetSlot::StoredEffect(index),
                };
                restore(slot, value);
            }
        }

        debug!("Restored {} presets from snapshot", restored);
        restored
    }

    pub fn is_empty(&self) -> bool {
        self.active_setup.is_none()
            && self.active_effect_a.is_none()
            && self.active_effect_b.is_none()
            && self.stored_setups.is_empty()
            && self.stored_effects.is_empty()
    }

    /// Save snapshot to JSON file
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize preset snapshot")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        fs::write(path, json)
            .await
            .context("Failed to write preset snapshot to file")?;
        Ok(())
    }

    /// Load snapshot from JSON file
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .await
            .context("Failed to read preset snapshot file")?;

        let snapshot: PresetSnapshot =
            serde_json::from_str(&json).context("Failed to parse preset snapshot JSON")?;

        debug!(
            "Preset snapshot loaded ({} setups, {} effects)",
            snapshot.stored_setups.len(),
            snapshot.stored_effects.len()
        );

        Ok(snapshot)
    }
}

fn parse_bank_index(key: &str) -> Option<u8> {
    key.parse::<u8>().ok().filter(|&i| i < STORED_BANK_SIZE)
}

impl DeviceState {
    /// Load presets from JSON file
    pub async fn load_snapshot(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let snapshot = PresetSnapshot::load_from_file(path).await?;
        Ok(snapshot.load_into(self))
    }
}
