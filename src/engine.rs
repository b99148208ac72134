//! Protocol engine - device sync over the M300 transport
//!
//! Runs as a single actor task that owns the transport and the
//! [`DeviceState`](crate::state::DeviceState) mirror. Callers interact
//! through [`EngineHandle`] and observe changes via [`EngineEvent`]s.

mod actor;
mod commands;
mod connection;
mod error;
mod events;
mod handle;

pub use actor::{EngineOptions, ProtocolEngine};
pub use commands::ChangeOrigin;
pub use connection::{ConnectionManager, ConnectionState, ReconnectPolicy};
pub use error::EngineError;
pub use events::EngineEvent;
pub use handle::EngineHandle;
