//! Codec errors

use thiserror::Error;

/// Errors produced while parsing or building SysEx frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Structural violation: wrong envelope, manufacturer or device ID
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame shorter than the fixed header plus terminator
    #[error("frame too short: {len} bytes (minimum {min})")]
    TooShort { len: usize, min: usize },

    /// Payload shorter than the sub-parser requires
    #[error("incomplete payload: expected at least {expected} bytes, got {actual}")]
    IncompletePayload { expected: usize, actual: usize },

    /// Bulk variable payload length disagrees with the declared byte count
    #[error("bulk length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Bulk byte count cannot hold the flag bytes and checksum
    #[error("bulk byte count {declared} too short for flags and checksum")]
    TooShortForChecksum { declared: usize },

    /// Nibble stream with an odd number of values
    #[error("odd nibble count: {0}")]
    OddNibbleCount(usize),

    /// Request opcode needs an index or parameter value
    #[error("request {0} requires a value")]
    MissingValue(&'static str),

    /// Parameter-value request issued without a domain
    #[error("request {0} requires a domain")]
    MissingDomain(&'static str),

    /// Variable payload exceeds the 7-bit byte-count field
    #[error("bulk payload too large: {0} bytes (max 127)")]
    PayloadTooLarge(usize),

    /// Type byte is not a known bulk dump type
    #[error("unknown bulk type: 0x{0:02X}")]
    UnknownBulkType(u8),
}
