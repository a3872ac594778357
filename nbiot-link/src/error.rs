//! Link error types.

use nbiot_at::{AtError, AtState};
use nbiot_codec::{CodecError, ErrorKind};
use thiserror::Error;

/// Errors raised by the bridge and command dispatch.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("AT session error: {0}")]
    Session(#[from] AtError),

    #[error("invalid hex payload: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("command handler registry full ({capacity} slots)")]
    RegistryFull { capacity: usize },

    #[error("module answered {command} with {state}")]
    Rejected { command: String, state: AtState },
}

impl LinkError {
    /// Returns the coarse error class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::Codec(e) => e.kind(),
            LinkError::Session(e) => at_error_kind(e),
            LinkError::Hex(_) => ErrorKind::Malformed,
            LinkError::RegistryFull { .. } => ErrorKind::Fatal,
            LinkError::Rejected { .. } => ErrorKind::Transport,
        }
    }

    /// Returns whether the link must be reconfigured before further use.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Maps a session error onto the shared error classes.
pub fn at_error_kind(e: &AtError) -> ErrorKind {
    match e {
        AtError::Io(_) => ErrorKind::Transport,
        AtError::Timeout { .. } => ErrorKind::Timeout,
        AtError::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
        AtError::MissingParameter { .. } | AtError::CommandTooLong { .. } => ErrorKind::InvalidArgument,
        AtError::LineOverflow { .. } => ErrorKind::Fatal,
    }
}
