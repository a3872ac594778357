//! # nbiot-codec
//!
//! Application message codec for NB-IoT terminals.
//!
//! This crate provides:
//! - Host/wire byte-order conversion for TLV values
//! - A bump allocator for fixed-memory message construction
//! - Bounded TLV messages with typed accessors
//! - Uplink and command frame serialization with additive checksums
//! - Command request and uplink acknowledgement parsing

pub mod arena;
pub mod byteorder;
pub mod device;
pub mod error;
pub mod frame;
pub mod message;
pub mod tlv;

pub use arena::{Arena, Span};
pub use byteorder::{EnumValue, WireValue};
pub use device::{DeviceContext, DEVICE_ID_LEN};
pub use error::{CodecError, ErrorKind};
pub use frame::{checksum, FrameCodec, TagOrder};
pub use message::{Message, MessageType, MESSAGE_MAX_TLV};
pub use tlv::{LookupError, TlvEntry, ValueFormat};

/// Protocol version byte carried by every frame.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Scratch size used when a frame is built outside a message arena.
pub const MAX_FRAME_SIZE: usize = 512;
