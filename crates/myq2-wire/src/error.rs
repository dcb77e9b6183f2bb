// error.rs — failures raised by the message codec

use thiserror::Error;

/// Decode or encode failure. Mid-buffer variants carry the byte offset at
/// which reading stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Not a recognizable container or message layout.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("unexpected end of buffer at offset {offset}: needed {needed} bytes, {remaining} left")]
    UnexpectedEndOfBuffer {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// Bytes that parse but break a protocol rule (bad entity number,
    /// unknown temp entity, missing server data, ...).
    #[error("protocol violation at offset {offset}: {reason}")]
    ProtocolViolation { offset: usize, reason: String },

    #[error("unsupported protocol version {found} (expected {expected})")]
    UnsupportedProtocolVersion { found: i32, expected: i32 },
}

pub type WireResult<T> = Result<T, WireError>;

impl WireError {
    pub fn violation(offset: usize, reason: impl Into<String>) -> Self {
        WireError::ProtocolViolation {
            offset,
            reason: reason.into(),
        }
    }

    /// Offset into the message buffer, when the failure has one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            WireError::UnexpectedEndOfBuffer { offset, .. }
            | WireError::ProtocolViolation { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}
