//! Codec error types and error kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while building, serializing or parsing messages.
///
/// No variant carries partial output: a caller receiving any of these must
/// treat the destination buffer or message as invalid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("message already holds the maximum of {max} TLV entries")]
    TooManyEntries { max: usize },

    #[error("arena exhausted: requested {requested} bytes, {available} available")]
    ArenaExhausted { requested: usize, available: usize },

    #[error("TLV value too long: {len} bytes (max {max})")]
    ValueTooLong { len: usize, max: usize },

    #[error("destination buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("unsupported protocol version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("{field} mismatch: declared {declared}, actual {actual}")]
    LengthMismatch {
        field: &'static str,
        declared: usize,
        actual: usize,
    },

    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("malformed TLV at offset {offset}: {reason}")]
    MalformedTlv { offset: usize, reason: &'static str },

    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("unknown value format: {0:#04x}")]
    UnknownValueFormat(u8),

    #[error("message type {0} has no wire shape in this direction")]
    UnsupportedMessageType(crate::MessageType),

    #[error("TLV {tlv_type} not found")]
    NotFound { tlv_type: u8 },

    #[error("character {0:?} is not representable in ISO-8859-1")]
    NotLatin1(char),
}

impl CodecError {
    /// Returns the coarse error class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::TooManyEntries { .. }
            | CodecError::ArenaExhausted { .. }
            | CodecError::ValueTooLong { .. }
            | CodecError::BufferTooSmall { .. } => ErrorKind::CapacityExceeded,
            CodecError::UnsupportedVersion(_)
            | CodecError::ChecksumMismatch { .. }
            | CodecError::LengthMismatch { .. }
            | CodecError::Truncated { .. }
            | CodecError::MalformedTlv { .. }
            | CodecError::UnknownMessageType(_)
            | CodecError::UnknownValueFormat(_)
            | CodecError::UnsupportedMessageType(_) => ErrorKind::Malformed,
            CodecError::NotFound { .. } => ErrorKind::NotFound,
            CodecError::NotLatin1(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Returns true for frame-level validation failures.
    pub fn is_malformed(&self) -> bool {
        self.kind() == ErrorKind::Malformed
    }
}

/// Stable error classes shared by every nbiot crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// TLV count, arena, or destination buffer overflow.
    CapacityExceeded,
    /// Checksum, version, or length-field mismatch on deserialize.
    Malformed,
    /// Requested TLV absent or of a different shape.
    NotFound,
    /// Session send-ready or response-ready window elapsed.
    Timeout,
    /// A command was issued while another one was in flight.
    ProtocolViolation,
    /// The serial transport failed to transmit.
    Transport,
    /// The caller supplied an unusable argument.
    InvalidArgument,
    /// Unrecoverable configuration or framing failure.
    Fatal,
}

impl ErrorKind {
    /// Returns whether the caller can reasonably retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Transport)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::CapacityExceeded => write!(f, "CAPACITY_EXCEEDED"),
            ErrorKind::Malformed => write!(f, "MALFORMED"),
            ErrorKind::NotFound => write!(f, "NOT_FOUND"),
            ErrorKind::Timeout => write!(f, "TIMEOUT"),
            ErrorKind::ProtocolViolation => write!(f, "PROTOCOL_VIOLATION"),
            ErrorKind::Transport => write!(f, "TRANSPORT"),
            ErrorKind::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorKind::Fatal => write!(f, "FATAL"),
        }
    }
}
