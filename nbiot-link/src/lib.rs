//! # nbiot-link
//!
//! Glue between the NB-IoT frame codec and the AT session engine.
//!
//! This crate provides:
//! - Hex transport of frames over the module's data send command
//! - Decoding and dispatch of inbound command frames by message id
//! - Module status tracking from the default unsolicited report table
//! - YAML and environment configuration for the whole stack

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod status;

pub use bridge::{decode_payload, hex_payload, Bridge, BridgeConfig};
pub use config::{Config, ConfigError};
pub use dispatch::{DispatchOutcome, Dispatcher, Route, COMMAND_MAX_HANDLER};
pub use error::LinkError;
pub use status::{install_default_reports, install_status_reports, ModuleStatus, SharedStatus, ACTIVE_REPORTS};
