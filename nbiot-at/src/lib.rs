//! # nbiot-at
//!
//! AT command session engine for serial-attached NB-IoT modules.
//!
//! This crate provides:
//! - A circular receive buffer with wrap-aware line extraction
//! - Command formatting for base, set, read and test actions
//! - A single-flight command state machine with send and response timeouts
//! - Prefix routing for unsolicited result codes
//! - Transport adapters for serial writers, reader threads and scripted tests

pub mod clock;
pub mod command;
pub mod error;
pub mod report;
pub mod ring;
pub mod session;
pub mod transport;

pub use clock::{Clock, StepClock, SystemClock};
pub use command::{format_command, AtAction, AtCommand, AT_TERMINATOR};
pub use error::{AtError, WaitPhase};
pub use report::{ReportHandler, ReportTable};
pub use ring::{LineExtractor, RxBuffer, RxHandle};
pub use session::{AtInfo, AtSession, AtState, SessionConfig};
pub use transport::{spawn_reader, ScriptedTransport, SerialTransport, WriteTransport};

/// Receive ring size in bytes.
pub const RX_BUFFER_SIZE: usize = session::DEFAULT_RX_BUFFER_SIZE;

/// Longest command, terminator included.
pub const TX_BUFFER_SIZE: usize = session::DEFAULT_TX_BUFFER_SIZE;

/// Send-ready window in milliseconds.
pub const SEND_TIMEOUT_MS: u64 = 5_000;

/// Response window in milliseconds.
pub const RESPONSE_TIMEOUT_MS: u64 = 10_000;
