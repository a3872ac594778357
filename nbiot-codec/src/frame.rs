//! Frame serialization and parsing.
//!
//! Uplink (`UserUp`) frame:
//!
//! ```text
//! +---------+------+-----------+-----+---------+--------+--------+--------+-----------+
//! | version | type | total_len | tag | battery | signal |  IMEI  |  IMSI  | timestamp |
//! | 1 byte  |  1   |  2 (BE)   |  2  |    1    | 4 (BE) |   15   |   15   |   8 (BE)  |
//! +---------+------+-----------+-----+---------+--------+--------+--------+-----------+
//! | body                                                                   | checksum  |
//! +------------------------------------------------------------------------+-----------+
//! ```
//!
//! Command (`UserCmdReq` / `UserCmdRsp`) frame:
//!
//! ```text
//! +---------+------+-----------+-----+------+----------+
//! | version | type | total_len | tag | body | checksum |
//! | 1 byte  |  1   |  2 (BE)   |  2  |      |    1     |
//! +---------+------+-----------+-----+------+----------+
//! ```
//!
//! Body: `msg_id(1) | body_len(2, BE) | TLV*`, where `body_len` counts only
//! the TLVs. `total_len` is the frame length minus 4. The checksum is the
//! sum of all preceding bytes modulo 256. The tag byte order is set by
//! [`TagOrder`].

use crate::device::{DeviceContext, DEVICE_ID_LEN};
use crate::error::CodecError;
use crate::message::{EntryView, Message, MessageType};
use crate::tlv::{TlvEntry, ValueFormat, TLV_HEAD_SIZE};
use crate::PROTOCOL_VERSION;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Fixed uplink header size, up to and including the timestamp.
pub const UPLINK_HEADER_SIZE: usize = 1 + 1 + 2 + 2 + 1 + 4 + 2 * DEVICE_ID_LEN + 8;

/// Fixed command header size (version, type, total_len, tag).
pub const COMMAND_HEADER_SIZE: usize = 6;

/// `msg_id | body_len` preceding the TLVs.
pub const BODY_HEAD_SIZE: usize = 3;

pub const CHECKSUM_SIZE: usize = 1;

/// Bytes not covered by `total_len`.
pub const TOTAL_LEN_BIAS: usize = 4;

/// Smallest frame that carries a full command header and checksum.
pub const MIN_FRAME_SIZE: usize = COMMAND_HEADER_SIZE + CHECKSUM_SIZE;

/// Smallest command request (header, body head, checksum).
pub const MIN_COMMAND_FRAME_SIZE: usize = COMMAND_HEADER_SIZE + BODY_HEAD_SIZE + CHECKSUM_SIZE;

/// Byte order of the correlation tag on the wire.
///
/// Deployed platforms write the tag in the little-endian host order of their
/// MCU while every other field is big-endian; `LittleEndian` keeps wire
/// compatibility with them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

impl TagOrder {
    pub fn encode(&self, tag: u16) -> [u8; 2] {
        match self {
            TagOrder::LittleEndian => tag.to_le_bytes(),
            TagOrder::BigEndian => tag.to_be_bytes(),
        }
    }

    pub fn decode(&self, bytes: [u8; 2]) -> u16 {
        match self {
            TagOrder::LittleEndian => u16::from_le_bytes(bytes),
            TagOrder::BigEndian => u16::from_be_bytes(bytes),
        }
    }
}

/// Sum of `bytes` modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encoder and decoder for application frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    tag_order: TagOrder,
}

impl FrameCodec {
    pub fn new(tag_order: TagOrder) -> Self {
        Self { tag_order }
    }

    pub fn tag_order(&self) -> TagOrder {
        self.tag_order
    }

    /// Exact frame length for `msg`, computed before anything is written.
    pub fn encoded_len(&self, msg: &Message<'_>) -> Result<usize, CodecError> {
        frame_len(msg.msg_type(), &msg.view())
    }

    /// Serializes `msg` into the front of `dst`, returning the frame length.
    ///
    /// Nothing is written if `dst` is too small.
    pub fn encode_into(
        &self,
        msg: &Message<'_>,
        device: &DeviceContext,
        dst: &mut [u8],
    ) -> Result<usize, CodecError> {
        let header = Header::of(msg);
        self.write_frame(header, &msg.view(), device, dst)
    }

    /// Serializes `msg` into a freshly allocated buffer.
    pub fn encode(&self, msg: &Message<'_>, device: &DeviceContext) -> Result<BytesMut, CodecError> {
        let len = self.encoded_len(msg)?;
        let mut buf = BytesMut::zeroed(len);
        self.encode_into(msg, device, &mut buf)?;
        Ok(buf)
    }

    /// Serializes an arena-backed `msg` into the free tail of its own arena
    /// and hands the frame to `f`.
    ///
    /// The cursor does not move and the tail is zeroed afterwards. Heap
    /// messages have no tail and fail with `BufferTooSmall`.
    pub fn encode_in_place<R>(
        &self,
        msg: &mut Message<'_>,
        device: &DeviceContext,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, CodecError> {
        let header = Header::of(msg);
        let result = {
            let (view, tail) = msg.split_tail();
            let len = self.write_frame(header, &view, device, tail)?;
            f(&tail[..len])
        };
        msg.clear_tail();
        Ok(result)
    }

    fn write_frame(
        &self,
        header: Header,
        view: &EntryView<'_>,
        device: &DeviceContext,
        dst: &mut [u8],
    ) -> Result<usize, CodecError> {
        let total = frame_len(header.msg_type, view)?;
        if dst.len() < total {
            return Err(CodecError::BufferTooSmall {
                needed: total,
                available: dst.len(),
            });
        }
        let body_len = view.body_len();

        {
            let mut buf = &mut dst[..total - CHECKSUM_SIZE];

            // Version (1 byte)
            buf.put_u8(PROTOCOL_VERSION);

            // Type (1 byte)
            buf.put_u8(header.msg_type as u8);

            // Total length minus 4 (2 bytes)
            buf.put_u16((total - TOTAL_LEN_BIAS) as u16);

            // Correlation tag (2 bytes)
            buf.put_slice(&self.tag_order.encode(header.correlation_tag));

            if header.msg_type == MessageType::UserUp {
                buf.put_u8(device.battery());
                buf.put_i32(device.signal());
                buf.put_slice(device.imei());
                buf.put_slice(device.imsi());
                buf.put_u64(device.timestamp());
            }

            // Body head (3 bytes)
            buf.put_u8(header.msg_id);
            buf.put_u16(body_len as u16);

            for entry in view.iter() {
                buf.put_u8(entry.tlv_type);
                buf.put_u16(entry.length());
                put_wire_value(&mut buf, &entry);
            }
        }

        dst[total - CHECKSUM_SIZE] = checksum(&dst[..total - CHECKSUM_SIZE]);
        trace!(msg_type = %header.msg_type, len = total, "encoded frame");
        Ok(total)
    }

    /// Parses a downlink frame into a heap-backed message.
    pub fn decode(&self, frame: &[u8]) -> Result<Message<'static>, CodecError> {
        self.decode_into(frame, Message::new(MessageType::UserCmdReq))
    }

    /// Parses a downlink frame, allocating entry values from `arena`.
    ///
    /// On failure the arena is zeroed again.
    pub fn decode_in<'a>(&self, frame: &[u8], arena: &'a mut [u8]) -> Result<Message<'a>, CodecError> {
        self.decode_into(frame, Message::in_arena(arena, MessageType::UserCmdReq)?)
    }

    fn decode_into<'a>(&self, frame: &[u8], mut msg: Message<'a>) -> Result<Message<'a>, CodecError> {
        match self.parse(frame, &mut msg) {
            Ok(()) => {
                debug!(
                    msg_type = %msg.msg_type(),
                    msg_id = msg.msg_id(),
                    entries = msg.len(),
                    "decoded frame"
                );
                Ok(msg)
            }
            Err(e) => {
                msg.release();
                Err(e)
            }
        }
    }

    fn parse(&self, frame: &[u8], msg: &mut Message<'_>) -> Result<(), CodecError> {
        let len = frame.len();
        let Some(&version) = frame.first() else {
            return Err(CodecError::Truncated {
                needed: MIN_FRAME_SIZE,
                available: 0,
            });
        };
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        if len < MIN_FRAME_SIZE {
            return Err(CodecError::Truncated {
                needed: MIN_FRAME_SIZE,
                available: len,
            });
        }

        let expected = checksum(&frame[..len - CHECKSUM_SIZE]);
        let actual = frame[len - CHECKSUM_SIZE];
        if expected != actual {
            return Err(CodecError::ChecksumMismatch { expected, actual });
        }

        let total_len = u16::from_be_bytes([frame[2], frame[3]]) as usize;
        if total_len + TOTAL_LEN_BIAS != len {
            return Err(CodecError::LengthMismatch {
                field: "total_len",
                declared: total_len,
                actual: len - TOTAL_LEN_BIAS,
            });
        }

        let msg_type = MessageType::try_from(frame[1])?;
        let tag = self.tag_order.decode([frame[4], frame[5]]);
        msg.set_msg_type(msg_type);

        match msg_type {
            MessageType::UserCmdReq => {
                if len < MIN_COMMAND_FRAME_SIZE {
                    return Err(CodecError::Truncated {
                        needed: MIN_COMMAND_FRAME_SIZE,
                        available: len,
                    });
                }
                msg.set_correlation_tag(tag);
                msg.set_msg_id(frame[6]);

                let body_len = u16::from_be_bytes([frame[7], frame[8]]) as usize;
                if body_len != len - MIN_COMMAND_FRAME_SIZE {
                    return Err(CodecError::LengthMismatch {
                        field: "body_len",
                        declared: body_len,
                        actual: len - MIN_COMMAND_FRAME_SIZE,
                    });
                }
                let start = COMMAND_HEADER_SIZE + BODY_HEAD_SIZE;
                parse_entries(&frame[start..len - CHECKSUM_SIZE], start, msg)
            }
            MessageType::UserUpAck => {
                msg.set_correlation_tag(tag);
                Ok(())
            }
            other => Err(CodecError::UnsupportedMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    msg_type: MessageType,
    msg_id: u8,
    correlation_tag: u16,
}

impl Header {
    fn of(msg: &Message<'_>) -> Self {
        Self {
            msg_type: msg.msg_type(),
            msg_id: msg.msg_id(),
            correlation_tag: msg.correlation_tag(),
        }
    }
}

fn frame_len(msg_type: MessageType, view: &EntryView<'_>) -> Result<usize, CodecError> {
    let fixed = match msg_type {
        MessageType::UserUp => UPLINK_HEADER_SIZE,
        MessageType::UserCmdReq | MessageType::UserCmdRsp => COMMAND_HEADER_SIZE,
        other => return Err(CodecError::UnsupportedMessageType(other)),
    };
    let body_len = view.body_len();
    let total = fixed + BODY_HEAD_SIZE + body_len + CHECKSUM_SIZE;
    if total - TOTAL_LEN_BIAS > u16::MAX as usize {
        return Err(CodecError::ValueTooLong {
            len: total - TOTAL_LEN_BIAS,
            max: u16::MAX as usize,
        });
    }
    Ok(total)
}

fn put_wire_value(buf: &mut impl BufMut, entry: &TlvEntry<'_>) {
    match entry.format.fixed_width() {
        Some(width) if width == entry.value.len() => {
            let mut scratch = [0u8; 8];
            entry.write_wire_value(&mut scratch[..width]);
            buf.put_slice(&scratch[..width]);
        }
        _ => buf.put_slice(entry.value),
    }
}

/// Walks a TLV sequence; `base` is the offset of `body` within the frame.
fn parse_entries(body: &[u8], base: usize, msg: &mut Message<'_>) -> Result<(), CodecError> {
    let mut pos = 0;
    while pos < body.len() {
        let left = body.len() - pos;
        if left < TLV_HEAD_SIZE {
            return Err(CodecError::MalformedTlv {
                offset: base + pos,
                reason: "truncated TLV head",
            });
        }
        let tlv_type = body[pos];
        let length = u16::from_be_bytes([body[pos + 1], body[pos + 2]]) as usize;
        if length > left - TLV_HEAD_SIZE {
            return Err(CodecError::MalformedTlv {
                offset: base + pos,
                reason: "value overruns body",
            });
        }
        let value = &body[pos + TLV_HEAD_SIZE..pos + TLV_HEAD_SIZE + length];
        msg.append(tlv_type, ValueFormat::Unknown, value)?;
        pos += TLV_HEAD_SIZE + length;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MESSAGE_MAX_TLV;
    use proptest::prelude::*;

    fn device() -> DeviceContext {
        DeviceContext::new("861234567890123", "460001234567890")
            .with_battery(|| 87)
            .with_signal(|| -95)
            .with_timestamp(|| 0x0102_0304_0506_0708)
    }

    fn command_request() -> Message<'static> {
        let mut msg = Message::new(MessageType::UserCmdReq)
            .with_msg_id(2)
            .with_correlation_tag(0x0007);
        msg.add(3, 1u8).unwrap();
        msg
    }

    #[test]
    fn test_command_request_scenario() {
        let codec = FrameCodec::default();
        let frame = codec.encode(&command_request(), &DeviceContext::default()).unwrap();

        assert_eq!(
            &frame[..],
            &[0x01, 0xF2, 0x00, 0x0A, 0x07, 0x00, 0x02, 0x00, 0x04, 0x03, 0x00, 0x01, 0x01, 0x0F]
        );
        assert_eq!(frame[frame.len() - 1], checksum(&frame[..frame.len() - 1]));

        let msg = codec.decode(&frame).unwrap();
        assert_eq!(msg.msg_type(), MessageType::UserCmdReq);
        assert_eq!(msg.correlation_tag(), 7);
        assert_eq!(msg.msg_id(), 2);
        assert_eq!(msg.len(), 1);
        let entry = msg.entries().next().unwrap();
        assert_eq!(entry.tlv_type, 3);
        assert_eq!(entry.format, ValueFormat::Unknown);
        assert_eq!(entry.value, &[1]);
        assert_eq!(msg.get::<u8>(3).unwrap(), 1);
    }

    #[test]
    fn test_big_endian_tag_order() {
        let codec = FrameCodec::new(TagOrder::BigEndian);
        let frame = codec.encode(&command_request(), &DeviceContext::default()).unwrap();
        assert_eq!(&frame[4..6], &[0x00, 0x07]);
        assert_eq!(codec.decode(&frame).unwrap().correlation_tag(), 7);

        // A little-endian peer reads the same bytes differently.
        let le = FrameCodec::new(TagOrder::LittleEndian);
        assert_eq!(le.decode(&frame).unwrap().correlation_tag(), 0x0700);
    }

    #[test]
    fn test_uplink_layout() {
        let mut msg = Message::new(MessageType::UserUp)
            .with_msg_id(1)
            .with_correlation_tag(0x1234);
        msg.add(1, -2i16).unwrap();
        msg.add_string(2, "ok").unwrap();

        let codec = FrameCodec::default();
        let frame = codec.encode(&msg, &device()).unwrap();

        assert_eq!(frame.len(), 50 + 3 + 5 + 5);
        assert_eq!(codec.encoded_len(&msg).unwrap(), frame.len());
        assert_eq!(frame[0], PROTOCOL_VERSION);
        assert_eq!(frame[1], 0xF0);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]) as usize, frame.len() - 4);
        assert_eq!(&frame[4..6], &[0x34, 0x12]);
        assert_eq!(frame[6], 87);
        assert_eq!(&frame[7..11], &(-95i32).to_be_bytes());
        assert_eq!(&frame[11..26], b"861234567890123");
        assert_eq!(&frame[26..41], b"460001234567890");
        assert_eq!(&frame[41..49], &[1, 2, 3, 4, 5, 6, 7, 8]);
        // Body head
        assert_eq!(&frame[49..52], &[0x01, 0x00, 0x0A]);
        // TLV 1: big-endian short
        assert_eq!(&frame[52..57], &[0x01, 0x00, 0x02, 0xFF, 0xFE]);
        // TLV 2: string copied verbatim
        assert_eq!(&frame[57..62], &[0x02, 0x00, 0x02, b'o', b'k']);
        assert_eq!(frame[62], checksum(&frame[..62]));
    }

    #[test]
    fn test_command_response_layout() {
        let mut msg = Message::new(MessageType::UserCmdRsp)
            .with_msg_id(5)
            .with_correlation_tag(0xABCD);
        msg.add(1, 0x01020304i32).unwrap();

        let frame = FrameCodec::default().encode(&msg, &DeviceContext::default()).unwrap();
        assert_eq!(frame.len(), 7 + 3 + 7);
        assert_eq!(&frame[4..6], &[0xCD, 0xAB]);
        assert_eq!(&frame[6..9], &[0x05, 0x00, 0x07]);
        assert_eq!(&frame[9..16], &[0x01, 0x00, 0x04, 1, 2, 3, 4]);
    }

    #[test]
    fn test_encode_into_small_buffer_fails() {
        let codec = FrameCodec::default();
        let msg = command_request();
        let mut dst = [0xAAu8; 13];

        let err = codec.encode_into(&msg, &DeviceContext::default(), &mut dst).unwrap_err();
        assert_eq!(
            err,
            CodecError::BufferTooSmall {
                needed: 14,
                available: 13
            }
        );
        assert_eq!(dst, [0xAAu8; 13]);
    }

    #[test]
    fn test_unsupported_encode_types() {
        let codec = FrameCodec::default();
        for t in [MessageType::UserUpAck, MessageType::SysConfReq, MessageType::SysQueryRsp] {
            let msg = Message::new(t);
            assert_eq!(
                codec.encode(&msg, &DeviceContext::default()).unwrap_err(),
                CodecError::UnsupportedMessageType(t)
            );
        }
    }

    #[test]
    fn test_encode_in_place() {
        let mut buf = [0u8; 64];
        let mut msg = Message::in_arena(&mut buf, MessageType::UserCmdRsp)
            .unwrap()
            .with_msg_id(2)
            .with_correlation_tag(7);
        msg.add(3, 1u8).unwrap();

        let codec = FrameCodec::default();
        let expected = codec.encode(&msg, &DeviceContext::default()).unwrap();
        let frame = codec
            .encode_in_place(&mut msg, &DeviceContext::default(), |f| f.to_vec())
            .unwrap();
        assert_eq!(frame, expected.to_vec());

        // The tail was zeroed and the cursor did not move.
        assert_eq!(msg.arena_usage(), Some((12, 64)));
        drop(msg);
        assert!(buf[12..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_in_place_needs_arena() {
        let mut msg = command_request();
        let err = FrameCodec::default()
            .encode_in_place(&mut msg, &DeviceContext::default(), |_| ())
            .unwrap_err();
        assert!(matches!(err, CodecError::BufferTooSmall { .. }));
    }

    #[test]
    fn test_decode_rejects_version() {
        let mut frame = FrameCodec::default()
            .encode(&command_request(), &DeviceContext::default())
            .unwrap();
        frame[0] = 0x02;
        assert_eq!(
            FrameCodec::default().decode(&frame).unwrap_err(),
            CodecError::UnsupportedVersion(0x02)
        );
    }

    #[test]
    fn test_decode_rejects_checksum() {
        let mut frame = FrameCodec::default()
            .encode(&command_request(), &DeviceContext::default())
            .unwrap();
        let last = frame.len() - 1;
        frame[last] = frame[last].wrapping_add(1);
        assert!(matches!(
            FrameCodec::default().decode(&frame).unwrap_err(),
            CodecError::ChecksumMismatch { .. }
        ));
    }

    /// Rewrites the checksum so later validation steps are reached.
    fn reseal(frame: &mut [u8]) {
        let last = frame.len() - 1;
        frame[last] = checksum(&frame[..last]);
    }

    #[test]
    fn test_decode_rejects_total_len() {
        let mut frame = FrameCodec::default()
            .encode(&command_request(), &DeviceContext::default())
            .unwrap();
        frame[3] += 1;
        reseal(&mut frame);
        assert!(matches!(
            FrameCodec::default().decode(&frame).unwrap_err(),
            CodecError::LengthMismatch {
                field: "total_len",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_rejects_body_len() {
        let mut frame = FrameCodec::default()
            .encode(&command_request(), &DeviceContext::default())
            .unwrap();
        frame[8] += 1;
        reseal(&mut frame);
        assert!(matches!(
            FrameCodec::default().decode(&frame).unwrap_err(),
            CodecError::LengthMismatch {
                field: "body_len",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_rejects_overrunning_tlv() {
        let mut frame = FrameCodec::default()
            .encode(&command_request(), &DeviceContext::default())
            .unwrap();
        // TLV length 1 -> 2, past the end of the body.
        frame[11] = 2;
        reseal(&mut frame);
        assert!(matches!(
            FrameCodec::default().decode(&frame).unwrap_err(),
            CodecError::MalformedTlv { offset: 9, .. }
        ));
    }

    #[test]
    fn test_decode_rejects_short_tlv_head() {
        // Body of two bytes cannot hold a TLV head.
        let mut frame = vec![0x01, 0xF2, 0x00, 0x08, 0x00, 0x00, 0x01, 0x00, 0x02, 0x03, 0x00, 0x00];
        reseal(&mut frame);
        assert!(matches!(
            FrameCodec::default().decode(&frame).unwrap_err(),
            CodecError::MalformedTlv { offset: 9, .. }
        ));
    }

    #[test]
    fn test_decode_empty_command_body() {
        let mut frame = vec![0x01, 0xF2, 0x00, 0x06, 0x09, 0x00, 0x04, 0x00, 0x00, 0x00];
        reseal(&mut frame);
        let msg = FrameCodec::default().decode(&frame).unwrap();
        assert_eq!(msg.msg_id(), 4);
        assert_eq!(msg.correlation_tag(), 9);
        assert!(msg.is_empty());
    }

    #[test]
    fn test_decode_too_many_tlvs() {
        let mut body = Vec::new();
        for t in 0..=MESSAGE_MAX_TLV as u8 {
            body.extend_from_slice(&[t, 0x00, 0x01, 0xAA]);
        }
        let mut frame = vec![0x01, 0xF2];
        frame.extend_from_slice(&((6 + 3 + body.len() + 1 - 4) as u16).to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x00, 0x01]);
        frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
        frame.extend_from_slice(&body);
        frame.push(0);
        reseal(&mut frame);

        assert_eq!(
            FrameCodec::default().decode(&frame).unwrap_err(),
            CodecError::TooManyEntries { max: MESSAGE_MAX_TLV }
        );
    }

    #[test]
    fn test_decode_uplink_ack() {
        let mut frame = vec![0x01, 0xF1, 0x00, 0x03, 0x2A, 0x00, 0x00];
        reseal(&mut frame);
        let msg = FrameCodec::default().decode(&frame).unwrap();
        assert_eq!(msg.msg_type(), MessageType::UserUpAck);
        assert_eq!(msg.correlation_tag(), 42);
        assert!(msg.is_empty());
    }

    #[test]
    fn test_decode_rejects_other_types() {
        let mut frame = vec![0x01, 0xF4, 0x00, 0x03, 0x00, 0x00, 0x00];
        reseal(&mut frame);
        assert_eq!(
            FrameCodec::default().decode(&frame).unwrap_err(),
            CodecError::UnsupportedMessageType(MessageType::SysConfReq)
        );

        frame[1] = 0x10;
        reseal(&mut frame);
        assert_eq!(
            FrameCodec::default().decode(&frame).unwrap_err(),
            CodecError::UnknownMessageType(0x10)
        );
    }

    #[test]
    fn test_decode_truncated() {
        let codec = FrameCodec::default();
        assert!(matches!(codec.decode(&[]), Err(CodecError::Truncated { .. })));
        assert!(matches!(codec.decode(&[0x01, 0xF2]), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_decode_in_arena() {
        let frame = FrameCodec::default()
            .encode(&command_request(), &DeviceContext::default())
            .unwrap();
        let mut arena = [0u8; 32];
        let msg = FrameCodec::default().decode_in(&frame, &mut arena).unwrap();
        assert!(msg.is_arena_backed());
        assert_eq!(msg.get::<u8>(3).unwrap(), 1);
    }

    #[test]
    fn test_decode_in_arena_failure_zeroes_buffer() {
        let mut frame = FrameCodec::default()
            .encode(&command_request(), &DeviceContext::default())
            .unwrap();
        frame[5] = 0xFF;
        let mut arena = [0x55u8; 32];
        assert!(FrameCodec::default().decode_in(&frame, &mut arena).is_err());
        assert_eq!(arena, [0u8; 32]);
    }

    fn arb_entry() -> impl Strategy<Value = (u8, Vec<u8>)> {
        (any::<u8>(), prop::collection::vec(any::<u8>(), 0..24))
    }

    proptest! {
        #[test]
        fn prop_roundtrip_reconstructs_entries(
            msg_id: u8,
            tag: u16,
            entries in prop::collection::vec(arb_entry(), 0..=MESSAGE_MAX_TLV),
        ) {
            let mut msg = Message::new(MessageType::UserCmdReq)
                .with_msg_id(msg_id)
                .with_correlation_tag(tag);
            for (t, v) in &entries {
                msg.add_binary(*t, v).unwrap();
            }

            let codec = FrameCodec::default();
            let frame = codec.encode(&msg, &DeviceContext::default()).unwrap();
            let back = codec.decode(&frame).unwrap();

            prop_assert_eq!(back.msg_id(), msg_id);
            prop_assert_eq!(back.correlation_tag(), tag);
            let originals: Vec<_> = msg.entries().map(|e| (e.tlv_type, e.length(), e.wire_value())).collect();
            let decoded: Vec<_> = back.entries().map(|e| (e.tlv_type, e.length(), e.value.to_vec())).collect();
            prop_assert_eq!(originals, decoded);
        }

        #[test]
        fn prop_typed_values_survive_the_wire(a: i32, b: i64, c: f32, d: i16) {
            let mut msg = Message::new(MessageType::UserCmdReq);
            msg.add(1, a).unwrap();
            msg.add(2, b).unwrap();
            msg.add(3, c).unwrap();
            msg.add(4, d).unwrap();

            let codec = FrameCodec::default();
            let back = codec.decode(&codec.encode(&msg, &DeviceContext::default()).unwrap()).unwrap();
            prop_assert_eq!(back.get::<i32>(1).unwrap(), a);
            prop_assert_eq!(back.get::<i64>(2).unwrap(), b);
            prop_assert_eq!(back.get::<f32>(3).unwrap().to_bits(), c.to_bits());
            prop_assert_eq!(back.get::<i16>(4).unwrap(), d);
        }

        #[test]
        fn prop_checksum_is_sum_of_prior_bytes(
            entries in prop::collection::vec(arb_entry(), 0..=MESSAGE_MAX_TLV),
            uplink: bool,
        ) {
            let msg_type = if uplink { MessageType::UserUp } else { MessageType::UserCmdRsp };
            let mut msg = Message::new(msg_type);
            for (t, v) in &entries {
                msg.add_binary(*t, v).unwrap();
            }
            let frame = FrameCodec::default().encode(&msg, &device()).unwrap();
            let sum = frame[..frame.len() - 1].iter().map(|&b| b as u32).sum::<u32>() % 256;
            prop_assert_eq!(frame[frame.len() - 1] as u32, sum);
        }

        #[test]
        fn prop_single_byte_corruption_rejected(
            entries in prop::collection::vec(arb_entry(), 1..=MESSAGE_MAX_TLV),
            index: prop::sample::Index,
            delta in 1u8..=255,
        ) {
            let mut msg = Message::new(MessageType::UserCmdReq).with_msg_id(2);
            for (t, v) in &entries {
                msg.add_binary(*t, v).unwrap();
            }
            let codec = FrameCodec::default();
            let mut frame = codec.encode(&msg, &DeviceContext::default()).unwrap();
            let i = index.index(frame.len());
            frame[i] = frame[i].wrapping_add(delta);

            let err = codec.decode(&frame).unwrap_err();
            prop_assert!(err.is_malformed(), "unexpected error {:?}", err);
        }
    }
}
