//! TLV entries.
//!
//! On the wire every entry is `type(1) | length(2, big-endian) | value`.
//! In memory an entry also remembers the format it was written with, or
//! [`ValueFormat::Unknown`] if it came off the wire and has not been
//! interpreted yet.

use crate::byteorder::{self, WireValue};
use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of the `type | length` head preceding every TLV value.
pub const TLV_HEAD_SIZE: usize = 3;

/// Interpretation of a TLV value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ValueFormat {
    Byte = 0x01,
    Short = 0x02,
    Int32 = 0x03,
    Long64 = 0x04,
    Float = 0x05,
    Double = 0x06,
    Bool = 0x07,
    Enum = 0x08,
    /// ISO-8859-1 text without terminator.
    StringLatin1 = 0x09,
    /// Opaque binary.
    StringHex = 0x0A,
    /// Parsed off the wire, not yet interpreted.
    Unknown = 0x0B,
}

impl ValueFormat {
    /// Encoded width for fixed-width formats.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ValueFormat::Byte | ValueFormat::Bool | ValueFormat::Enum => Some(1),
            ValueFormat::Short => Some(2),
            ValueFormat::Int32 | ValueFormat::Float => Some(4),
            ValueFormat::Long64 | ValueFormat::Double => Some(8),
            ValueFormat::StringLatin1 | ValueFormat::StringHex | ValueFormat::Unknown => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for ValueFormat {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ValueFormat::Byte),
            0x02 => Ok(ValueFormat::Short),
            0x03 => Ok(ValueFormat::Int32),
            0x04 => Ok(ValueFormat::Long64),
            0x05 => Ok(ValueFormat::Float),
            0x06 => Ok(ValueFormat::Double),
            0x07 => Ok(ValueFormat::Bool),
            0x08 => Ok(ValueFormat::Enum),
            0x09 => Ok(ValueFormat::StringLatin1),
            0x0A => Ok(ValueFormat::StringHex),
            0x0B => Ok(ValueFormat::Unknown),
            _ => Err(CodecError::UnknownValueFormat(value)),
        }
    }
}

impl fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueFormat::Byte => "byte",
            ValueFormat::Short => "short",
            ValueFormat::Int32 => "int32",
            ValueFormat::Long64 => "long64",
            ValueFormat::Float => "float",
            ValueFormat::Double => "double",
            ValueFormat::Bool => "bool",
            ValueFormat::Enum => "enum",
            ValueFormat::StringLatin1 => "string",
            ValueFormat::StringHex => "hex",
            ValueFormat::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Why a typed read of an entry failed.
///
/// [`Message::get`](crate::Message::get) folds all of these into
/// [`CodecError::NotFound`]; [`Message::lookup`](crate::Message::lookup)
/// returns them as-is.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    #[error("no TLV with type {0}")]
    Absent(u8),

    #[error("TLV {tlv_type} has length {actual}, expected {expected}")]
    LengthMismatch {
        tlv_type: u8,
        expected: usize,
        actual: usize,
    },

    #[error("TLV {tlv_type} holds {stored}, requested {requested}")]
    FormatMismatch {
        tlv_type: u8,
        stored: ValueFormat,
        requested: ValueFormat,
    },
}

impl LookupError {
    pub fn tlv_type(&self) -> u8 {
        match self {
            LookupError::Absent(t) => *t,
            LookupError::LengthMismatch { tlv_type, .. }
            | LookupError::FormatMismatch { tlv_type, .. } => *tlv_type,
        }
    }
}

impl From<LookupError> for CodecError {
    fn from(err: LookupError) -> Self {
        CodecError::NotFound {
            tlv_type: err.tlv_type(),
        }
    }
}

/// Borrowed view of one TLV entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvEntry<'a> {
    pub tlv_type: u8,
    pub format: ValueFormat,
    /// Host-native bytes for typed entries, wire bytes for `Unknown`.
    pub value: &'a [u8],
}

impl<'a> TlvEntry<'a> {
    pub fn length(&self) -> u16 {
        self.value.len() as u16
    }

    /// Bytes this entry occupies inside a frame body.
    pub fn encoded_len(&self) -> usize {
        TLV_HEAD_SIZE + self.value.len()
    }

    /// Writes the value in wire byte order into `out`.
    pub fn write_wire_value(&self, out: &mut [u8]) {
        byteorder::host_to_wire(self.format, self.value, out)
    }

    /// Value in wire byte order.
    pub fn wire_value(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.value.len()];
        self.write_wire_value(&mut out);
        out
    }

    /// Checks that this entry can be read as `requested`.
    fn check(&self, requested: ValueFormat) -> Result<(), LookupError> {
        if let Some(width) = requested.fixed_width() {
            if width != self.value.len() {
                return Err(LookupError::LengthMismatch {
                    tlv_type: self.tlv_type,
                    expected: width,
                    actual: self.value.len(),
                });
            }
        }
        if self.format != ValueFormat::Unknown && self.format != requested {
            return Err(LookupError::FormatMismatch {
                tlv_type: self.tlv_type,
                stored: self.format,
                requested,
            });
        }
        Ok(())
    }

    /// Interprets the value as `T`, reordering wire bytes if needed.
    pub fn read<T: WireValue>(&self) -> Result<T, LookupError> {
        self.check(T::FORMAT)?;
        let parsed = if self.format == ValueFormat::Unknown {
            T::from_wire_bytes(self.value)
        } else {
            T::from_host_bytes(self.value)
        };
        parsed.ok_or(LookupError::LengthMismatch {
            tlv_type: self.tlv_type,
            expected: T::FORMAT.fixed_width().unwrap_or(0),
            actual: self.value.len(),
        })
    }

    /// Interprets the value as ISO-8859-1 text.
    pub fn read_string(&self) -> Result<String, LookupError> {
        self.check(ValueFormat::StringLatin1)?;
        Ok(decode_latin1(self.value))
    }

    /// Returns the value as opaque binary.
    pub fn read_binary(&self) -> Result<&'a [u8], LookupError> {
        self.check(ValueFormat::StringHex)?;
        Ok(self.value)
    }
}

/// Encodes text as ISO-8859-1, rejecting characters above U+00FF.
pub fn encode_latin1(text: &str) -> Result<Vec<u8>, CodecError> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| CodecError::NotLatin1(c)))
        .collect()
}

pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
