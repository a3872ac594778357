//! Application messages.
//!
//! A [`Message`] is a header (type, id, correlation tag) plus at most
//! [`MESSAGE_MAX_TLV`] TLV entries. Entry values live either on the heap or
//! inside an [`Arena`] carved from a caller buffer. In arena mode the first
//! [`MESSAGE_HEADER_SIZE`] bytes of that buffer hold a header record:
//!
//! ```text
//! +----------+--------+-----------------+-------------+----------+
//! | msg_type | msg_id | correlation_tag | entry_count | reserved |
//! | 1 byte   | 1 byte | 2 bytes (LE)    | 1 byte      | 3 bytes  |
//! +----------+--------+-----------------+-------------+----------+
//! ```

use crate::arena::{Arena, Span};
use crate::byteorder::{EnumValue, WireValue};
use crate::error::CodecError;
use crate::tlv::{encode_latin1, LookupError, TlvEntry, ValueFormat, TLV_HEAD_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of TLV entries per message.
pub const MESSAGE_MAX_TLV: usize = 5;

/// Bytes reserved at the front of an arena-backed message.
pub const MESSAGE_HEADER_SIZE: usize = 8;

/// Message type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MessageType {
    /// Sensor report, device to platform.
    UserUp = 0xF0,
    /// Platform acknowledgement of an uplink.
    UserUpAck = 0xF1,
    /// Command, platform to device.
    UserCmdReq = 0xF2,
    /// Command result, device to platform.
    UserCmdRsp = 0xF3,
    SysConfReq = 0xF4,
    SysConfRsp = 0xF5,
    SysQueryReq = 0xF6,
    SysQueryRsp = 0xF7,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0xF0 => Ok(MessageType::UserUp),
            0xF1 => Ok(MessageType::UserUpAck),
            0xF2 => Ok(MessageType::UserCmdReq),
            0xF3 => Ok(MessageType::UserCmdRsp),
            0xF4 => Ok(MessageType::SysConfReq),
            0xF5 => Ok(MessageType::SysConfRsp),
            0xF6 => Ok(MessageType::SysQueryReq),
            0xF7 => Ok(MessageType::SysQueryRsp),
            _ => Err(CodecError::UnknownMessageType(value)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::UserUp => "user_up",
            MessageType::UserUpAck => "user_up_ack",
            MessageType::UserCmdReq => "user_cmd_req",
            MessageType::UserCmdRsp => "user_cmd_rsp",
            MessageType::SysConfReq => "sys_conf_req",
            MessageType::SysConfRsp => "sys_conf_rsp",
            MessageType::SysQueryReq => "sys_query_req",
            MessageType::SysQueryRsp => "sys_query_rsp",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Store {
    Heap(Vec<u8>),
    Arena(Span),
}

#[derive(Debug)]
struct Slot {
    tlv_type: u8,
    format: ValueFormat,
    store: Store,
}

#[derive(Debug)]
enum Backing<'a> {
    Heap,
    Arena(Arena<'a>),
}

/// Read-only view over a message's entries.
///
/// Split out of [`Message`] so a frame can be encoded into the free tail of
/// the message's own arena while the entries are being read.
#[derive(Debug, Clone, Copy)]
pub struct EntryView<'b> {
    slots: &'b [Option<Slot>],
    arena: &'b [u8],
}

impl<'b> EntryView<'b> {
    pub fn iter(&self) -> impl Iterator<Item = TlvEntry<'b>> + 'b {
        let arena = self.arena;
        self.slots.iter().flatten().map(move |slot| TlvEntry {
            tlv_type: slot.tlv_type,
            format: slot.format,
            value: match &slot.store {
                Store::Heap(bytes) => bytes.as_slice(),
                Store::Arena(span) => &arena[span.range()],
            },
        })
    }

    /// First entry with the given type.
    pub fn find(&self, tlv_type: u8) -> Option<TlvEntry<'b>> {
        self.iter().find(|e| e.tlv_type == tlv_type)
    }

    /// Sum of `3 + length` over all entries.
    pub fn body_len(&self) -> usize {
        self.iter().map(|e| e.encoded_len()).sum()
    }
}

/// An application message.
#[derive(Debug)]
pub struct Message<'a> {
    msg_type: MessageType,
    msg_id: u8,
    correlation_tag: u16,
    slots: [Option<Slot>; MESSAGE_MAX_TLV],
    len: usize,
    backing: Backing<'a>,
}

impl Message<'static> {
    /// Creates a heap-backed message.
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            msg_id: 0,
            correlation_tag: 0,
            slots: Default::default(),
            len: 0,
            backing: Backing::Heap,
        }
    }
}

impl<'a> Message<'a> {
    /// Creates a message whose entry values are allocated from `buf`.
    ///
    /// The buffer is zeroed first.
    pub fn in_arena(buf: &'a mut [u8], msg_type: MessageType) -> Result<Self, CodecError> {
        let mut arena = Arena::new(buf, MESSAGE_HEADER_SIZE)?;
        arena.reset();
        let mut msg = Self {
            msg_type,
            msg_id: 0,
            correlation_tag: 0,
            slots: Default::default(),
            len: 0,
            backing: Backing::Arena(arena),
        };
        msg.sync_header();
        Ok(msg)
    }

    pub fn with_msg_id(mut self, msg_id: u8) -> Self {
        self.set_msg_id(msg_id);
        self
    }

    pub fn with_correlation_tag(mut self, tag: u16) -> Self {
        self.set_correlation_tag(tag);
        self
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn msg_id(&self) -> u8 {
        self.msg_id
    }

    pub fn correlation_tag(&self) -> u16 {
        self.correlation_tag
    }

    pub fn set_msg_type(&mut self, msg_type: MessageType) {
        self.msg_type = msg_type;
        self.sync_header();
    }

    pub fn set_msg_id(&mut self, msg_id: u8) {
        self.msg_id = msg_id;
        self.sync_header();
    }

    pub fn set_correlation_tag(&mut self, tag: u16) {
        self.correlation_tag = tag;
        self.sync_header();
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == MESSAGE_MAX_TLV
    }

    pub fn is_arena_backed(&self) -> bool {
        matches!(self.backing, Backing::Arena(_))
    }

    /// Arena cursor and capacity, for arena-backed messages.
    pub fn arena_usage(&self) -> Option<(usize, usize)> {
        match &self.backing {
            Backing::Arena(arena) => Some((arena.offset(), arena.capacity())),
            Backing::Heap => None,
        }
    }

    pub fn view(&self) -> EntryView<'_> {
        EntryView {
            slots: &self.slots,
            arena: match &self.backing {
                Backing::Arena(arena) => arena.get(Span {
                    offset: 0,
                    len: arena.offset(),
                }),
                Backing::Heap => &[],
            },
        }
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = TlvEntry<'_>> + '_ {
        self.view().iter()
    }

    /// Splits the message into its entries and the unallocated arena tail.
    ///
    /// Heap-backed messages have no tail.
    pub(crate) fn split_tail(&mut self) -> (EntryView<'_>, &mut [u8]) {
        match &mut self.backing {
            Backing::Arena(arena) => {
                let (head, tail) = arena.split_at_cursor();
                (
                    EntryView {
                        slots: &self.slots,
                        arena: head,
                    },
                    tail,
                )
            }
            Backing::Heap => (
                EntryView {
                    slots: &self.slots,
                    arena: &[],
                },
                Default::default(),
            ),
        }
    }

    pub(crate) fn clear_tail(&mut self) {
        if let Backing::Arena(arena) = &mut self.backing {
            arena.clear_tail();
        }
    }

    /// Appends an entry holding `value` verbatim.
    ///
    /// Returns the number of bytes the entry adds to a frame body. On
    /// failure the message is left unchanged.
    pub fn append(
        &mut self,
        tlv_type: u8,
        format: ValueFormat,
        value: &[u8],
    ) -> Result<usize, CodecError> {
        if self.is_full() {
            return Err(CodecError::TooManyEntries {
                max: MESSAGE_MAX_TLV,
            });
        }
        if value.len() > u16::MAX as usize {
            return Err(CodecError::ValueTooLong {
                len: value.len(),
                max: u16::MAX as usize,
            });
        }
        let store = match &mut self.backing {
            Backing::Heap => Store::Heap(value.to_vec()),
            Backing::Arena(arena) => Store::Arena(arena.alloc_copy(value)?),
        };
        self.slots[self.len] = Some(Slot {
            tlv_type,
            format,
            store,
        });
        self.len += 1;
        self.sync_header();
        Ok(TLV_HEAD_SIZE + value.len())
    }

    /// Appends a fixed-width value.
    pub fn add<T: WireValue>(&mut self, tlv_type: u8, value: T) -> Result<usize, CodecError> {
        self.append(tlv_type, T::FORMAT, &value.to_host_bytes())
    }

    pub fn add_enum(&mut self, tlv_type: u8, value: u8) -> Result<usize, CodecError> {
        self.add(tlv_type, EnumValue(value))
    }

    /// Appends ISO-8859-1 text, without terminator.
    pub fn add_string(&mut self, tlv_type: u8, text: &str) -> Result<usize, CodecError> {
        let bytes = encode_latin1(text)?;
        self.append(tlv_type, ValueFormat::StringLatin1, &bytes)
    }

    /// Appends opaque binary.
    pub fn add_binary(&mut self, tlv_type: u8, bytes: &[u8]) -> Result<usize, CodecError> {
        self.append(tlv_type, ValueFormat::StringHex, bytes)
    }

    /// Reads the first entry of `tlv_type` as `T`, reporting why it failed.
    pub fn lookup<T: WireValue>(&self, tlv_type: u8) -> Result<T, LookupError> {
        self.find(tlv_type)?.read()
    }

    /// Reads the first entry of `tlv_type` as `T`.
    ///
    /// An absent entry and an entry of the wrong shape both yield
    /// [`CodecError::NotFound`].
    pub fn get<T: WireValue>(&self, tlv_type: u8) -> Result<T, CodecError> {
        Ok(self.lookup(tlv_type)?)
    }

    pub fn get_enum(&self, tlv_type: u8) -> Result<u8, CodecError> {
        self.get::<EnumValue>(tlv_type).map(|v| v.0)
    }

    pub fn get_string(&self, tlv_type: u8) -> Result<String, CodecError> {
        Ok(self.find(tlv_type)?.read_string()?)
    }

    pub fn get_binary(&self, tlv_type: u8) -> Result<&[u8], CodecError> {
        Ok(self.find(tlv_type)?.read_binary()?)
    }

    fn find(&self, tlv_type: u8) -> Result<TlvEntry<'_>, LookupError> {
        self.view()
            .find(tlv_type)
            .ok_or(LookupError::Absent(tlv_type))
    }

    /// Releases the message. Arena-backed buffers are zeroed for reuse.
    pub fn release(self) {
        if let Backing::Arena(mut arena) = self.backing {
            arena.reset();
        }
    }

    fn sync_header(&mut self) {
        if let Backing::Arena(arena) = &mut self.backing {
            let tag = self.correlation_tag.to_le_bytes();
            let header = arena.header_mut();
            header[0] = self.msg_type as u8;
            header[1] = self.msg_id;
            header[2] = tag[0];
            header[3] = tag[1];
            header[4] = self.len as u8;
        }
    }
}
