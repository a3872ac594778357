//! Session error types.

use crate::session::AtState;
use std::fmt;
use thiserror::Error;

/// Which polling wait expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    /// Waiting for the previous command to leave `Sent`.
    SendReady,
    /// Waiting for `OK` or `ERROR`.
    Response,
}

impl fmt::Display for WaitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitPhase::SendReady => write!(f, "send-ready"),
            WaitPhase::Response => write!(f, "response"),
        }
    }
}

/// AT session errors.
#[derive(Debug, Error)]
pub enum AtError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{phase} wait timed out after {elapsed_ms} ms")]
    Timeout { phase: WaitPhase, elapsed_ms: u64 },

    #[error("cannot issue a command while the channel is in state {state}")]
    ProtocolViolation { state: AtState },

    #[error("command {command:?} needs a parameter for a set action")]
    MissingParameter { command: String },

    #[error("command too long: {len} bytes (max {max})")]
    CommandTooLong { len: usize, max: usize },

    #[error("received line of {len} bytes exceeds the {max} byte line buffer")]
    LineOverflow { len: usize, max: usize },
}

impl AtError {
    /// Returns whether the channel framing contract was broken.
    ///
    /// A fatal error leaves the receive cursors unusable; the session must
    /// be rebuilt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AtError::LineOverflow { .. })
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AtError::Io(_) | AtError::Timeout { .. })
    }
}
