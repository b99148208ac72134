//! Errors returned by engine commands

use crate::preset::ValidationError;
use crate::sysex::FrameError;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Not connected to the device")]
    NotConnected,

    #[error("Stored preset index {0} out of range (0-49)")]
    InvalidIndex(u8),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{0} is not supported yet")]
    Unsupported(&'static str),

    #[error("Protocol engine has shut down")]
    Closed,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
