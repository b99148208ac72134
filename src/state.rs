//! Device state module - local mirror of the M300
//!
//! Tracks the parameter table, the active setup and effects, and both
//! stored banks, and persists the preset library to a JSON file between
//! runs.

mod persistence;
pub mod persistence_actor;
mod store;
mod types;

pub use persistence::PresetSnapshot;
pub use persistence_actor::{PersistenceActor, PersistenceActorHandle, DEFAULT_DEBOUNCE_MS};
pub use store::{DeviceState, MAX_PARAM_NUMBER};
pub use types::{EffectSlot, FullState, PresetListing, PresetSlot};
