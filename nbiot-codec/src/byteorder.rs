//! Host/wire byte-order conversion.
//!
//! Every fixed-width numeric field travels big-endian. Values are stored
//! host-native inside a locally built [`Message`](crate::Message) and only
//! reordered when they cross the wire boundary, in either direction.
//! Strings and binary payloads are never reordered.

use crate::tlv::ValueFormat;

/// Copies `src` into `dst`, reordering bytes for fixed-width formats.
///
/// The transform is its own inverse, so it serves both directions. Signed
/// integers and IEEE values are handled as raw bit patterns. `src` and `dst`
/// must have the same length.
pub fn reorder(format: ValueFormat, src: &[u8], dst: &mut [u8]) {
    debug_assert_eq!(src.len(), dst.len());
    if needs_swap(format, src.len()) {
        for (d, s) in dst.iter_mut().zip(src.iter().rev()) {
            *d = *s;
        }
    } else {
        dst.copy_from_slice(src);
    }
}

/// Converts host-native value bytes into their wire representation.
pub fn host_to_wire(format: ValueFormat, host: &[u8], wire: &mut [u8]) {
    reorder(format, host, wire)
}

/// Converts wire value bytes into host-native representation.
pub fn wire_to_host(format: ValueFormat, wire: &[u8], host: &mut [u8]) {
    reorder(format, wire, host)
}

fn needs_swap(format: ValueFormat, len: usize) -> bool {
    cfg!(target_endian = "little") && len > 1 && format.fixed_width() == Some(len)
}

/// A fixed-width value that can be carried in a TLV entry.
pub trait WireValue: Copy + Sized {
    /// Format tag written for locally constructed entries.
    const FORMAT: ValueFormat;

    /// Host-native byte image of the value.
    fn to_host_bytes(self) -> Vec<u8>;

    /// Rebuilds the value from its host-native byte image.
    ///
    /// Returns `None` when `bytes` has the wrong width.
    fn from_host_bytes(bytes: &[u8]) -> Option<Self>;

    /// Big-endian wire image of the value.
    fn to_wire_bytes(self) -> Vec<u8> {
        let host = self.to_host_bytes();
        let mut wire = vec![0u8; host.len()];
        host_to_wire(Self::FORMAT, &host, &mut wire);
        wire
    }

    /// Rebuilds the value from its wire image.
    fn from_wire_bytes(bytes: &[u8]) -> Option<Self> {
        let mut host = vec![0u8; bytes.len()];
        wire_to_host(Self::FORMAT, bytes, &mut host);
        Self::from_host_bytes(&host)
    }
}

macro_rules! impl_wire_value {
    ($($ty:ty => $format:ident),* $(,)?) => {
        $(
            impl WireValue for $ty {
                const FORMAT: ValueFormat = ValueFormat::$format;

                fn to_host_bytes(self) -> Vec<u8> {
                    self.to_ne_bytes().to_vec()
                }

                fn from_host_bytes(bytes: &[u8]) -> Option<Self> {
                    bytes.try_into().ok().map(<$ty>::from_ne_bytes)
                }
            }
        )*
    };
}

impl_wire_value!(
    i8 => Byte,
    u8 => Byte,
    i16 => Short,
    i32 => Int32,
    i64 => Long64,
    f32 => Float,
    f64 => Double,
);

impl WireValue for bool {
    const FORMAT: ValueFormat = ValueFormat::Bool;

    fn to_host_bytes(self) -> Vec<u8> {
        vec![self as u8]
    }

    fn from_host_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b] => Some(*b != 0),
            _ => None,
        }
    }
}

/// Application-defined enumeration value, carried as a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumValue(pub u8);

impl WireValue for EnumValue {
    const FORMAT: ValueFormat = ValueFormat::Enum;

    fn to_host_bytes(self) -> Vec<u8> {
        vec![self.0]
    }

    fn from_host_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b] => Some(EnumValue(*b)),
            _ => None,
        }
    }
}
