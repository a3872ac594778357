//! Hex bridge between the frame codec and the AT session.
//!
//! Outbound frames are rendered as uppercase ASCII hex and sent with the
//! module's data command:
//!
//! ```text
//! AT+M2MCLISEND=01F3000A07000200040300010110\r\n
//! ```
//!
//! Inbound frames arrive as an unsolicited report with the same encoding:
//!
//! ```text
//! +M2MCLIRECV:01F2000A0700020004030001010F
//! ```
//!
//! Decoded command requests are dispatched by `msg_id`. Replies cannot be
//! sent while the session is routing a report, so they are queued until
//! [`Bridge::flush_replies`].

use crate::dispatch::{DispatchOutcome, Dispatcher, COMMAND_MAX_HANDLER};
use crate::error::LinkError;
use nbiot_at::{AtAction, AtSession, AtState, Clock, SerialTransport};
use nbiot_codec::{CodecError, DeviceContext, FrameCodec, Message};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Vendor command carrying outbound payloads.
pub const DEFAULT_SEND_COMMAND: &str = "+M2MCLISEND";

/// Unsolicited report carrying inbound payloads.
pub const DEFAULT_RECEIVE_PREFIX: &str = "+M2MCLIRECV";

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Mnemonic of the send-data command.
    pub send_command: String,
    /// Report prefix of received data.
    pub receive_prefix: String,
    /// Append a `0` nibble to payloads with an odd byte count.
    pub pad_odd_payload: bool,
    /// Command handler slots.
    pub max_handlers: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            send_command: DEFAULT_SEND_COMMAND.to_string(),
            receive_prefix: DEFAULT_RECEIVE_PREFIX.to_string(),
            pad_odd_payload: true,
            max_handlers: COMMAND_MAX_HANDLER,
        }
    }
}

/// Renders `frame` as uppercase hex.
///
/// With `pad_odd`, a frame with an odd byte count gets one trailing `0`
/// nibble.
pub fn hex_payload(frame: &[u8], pad_odd: bool) -> String {
    let mut payload = hex::encode_upper(frame);
    if pad_odd && frame.len() % 2 == 1 {
        payload.push('0');
    }
    payload
}

/// Decodes a hex payload, dropping the pad nibble of an odd-length one.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(strip_pad(payload))
}

fn strip_pad(payload: &str) -> &str {
    if payload.len() % 2 == 1 && payload.ends_with('0') {
        &payload[..payload.len() - 1]
    } else {
        payload
    }
}

struct Shared {
    config: BridgeConfig,
    codec: FrameCodec,
    device: DeviceContext,
    dispatcher: Mutex<Dispatcher>,
    replies: Mutex<VecDeque<Message<'static>>>,
}

/// Cloneable handle to the bridge state.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, codec: FrameCodec, device: DeviceContext) -> Self {
        let dispatcher = Dispatcher::with_capacity(config.max_handlers);
        Self {
            shared: Arc::new(Shared {
                config,
                codec,
                device,
                dispatcher: Mutex::new(dispatcher),
                replies: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn codec(&self) -> FrameCodec {
        self.shared.codec
    }

    pub fn device(&self) -> &DeviceContext {
        &self.shared.device
    }

    /// Registers a command handler. See [`Dispatcher::register`].
    ///
    /// Handlers run with the registry unlocked, so a handler may register
    /// further handlers through a clone of the bridge.
    pub fn register(
        &self,
        msg_id: u8,
        handler: impl FnMut(&Message<'_>) -> Option<Message<'static>> + Send + 'static,
    ) -> Result<(), LinkError> {
        self.shared.dispatcher.lock().register(msg_id, handler)
    }

    pub fn set_ack_handler(&self, handler: impl FnMut(&Message<'_>) + Send + 'static) {
        self.shared.dispatcher.lock().set_ack_handler(handler);
    }

    /// Adds the receive-prefix route to the session's report table.
    ///
    /// The table is first-match; install after any route whose prefix is a
    /// longer form of another.
    pub fn install<T: SerialTransport, C: Clock>(&self, session: &mut AtSession<T, C>) {
        let prefix = self.shared.config.receive_prefix.clone();
        session.reports_mut().register(prefix, self.report_handler());
    }

    /// Report handler decoding and dispatching inbound payloads.
    pub fn report_handler(&self) -> impl FnMut(&str) + 'static {
        let bridge = self.clone();
        move |line| bridge.on_report(line)
    }

    /// Serializes `msg` and sends it through the session.
    pub fn push_message<T: SerialTransport, C: Clock>(
        &self,
        session: &mut AtSession<T, C>,
        msg: &Message<'_>,
    ) -> Result<(), LinkError> {
        let frame = self.shared.codec.encode(msg, &self.shared.device)?;
        let payload = hex_payload(&frame, self.shared.config.pad_odd_payload);
        self.send_payload(session, &payload)
    }

    /// Serializes an arena-backed `msg` into its own arena tail and sends it.
    ///
    /// The arena cursor is unchanged and the tail is zeroed afterwards.
    pub fn push_in_place<T: SerialTransport, C: Clock>(
        &self,
        session: &mut AtSession<T, C>,
        msg: &mut Message<'_>,
    ) -> Result<(), LinkError> {
        let pad = self.shared.config.pad_odd_payload;
        let payload = self
            .shared
            .codec
            .encode_in_place(msg, &self.shared.device, |frame| hex_payload(frame, pad))?;
        self.send_payload(session, &payload)
    }

    fn send_payload<T: SerialTransport, C: Clock>(
        &self,
        session: &mut AtSession<T, C>,
        payload: &str,
    ) -> Result<(), LinkError> {
        let command = self.shared.config.send_command.as_str();
        debug!(command, bytes = payload.len() / 2, "pushing frame");
        match session.send(command, AtAction::Set, Some(payload))? {
            AtState::Ok => Ok(()),
            state => {
                warn!(command, %state, "module rejected frame");
                Err(LinkError::Rejected {
                    command: command.to_string(),
                    state,
                })
            }
        }
    }

    /// Extracts the hex payload from a receive report.
    pub fn payload_of<'l>(&self, line: &'l str) -> Option<&'l str> {
        let rest = line.strip_prefix(self.shared.config.receive_prefix.as_str())?;
        let payload = rest.trim_start().trim_start_matches(':').trim();
        (!payload.is_empty()).then_some(payload)
    }

    /// Decodes a hex payload and dispatches the resulting message.
    pub fn hex_input(&self, payload: &str) -> Result<DispatchOutcome, LinkError> {
        let frame = decode_payload(payload)?;
        let msg = self.shared.codec.decode(&frame)?;
        Ok(self.dispatch(msg))
    }

    /// Like [`hex_input`](Self::hex_input), without heap allocation.
    ///
    /// The frame is decoded into the front of `buf` and the message arena
    /// is carved from the rest. `buf` is zeroed again before returning.
    pub fn hex_input_in(&self, payload: &str, buf: &mut [u8]) -> Result<DispatchOutcome, LinkError> {
        let payload = strip_pad(payload);
        let frame_len = payload.len() / 2;
        if frame_len > buf.len() {
            return Err(CodecError::BufferTooSmall {
                needed: frame_len,
                available: buf.len(),
            }
            .into());
        }

        let (frame, arena) = buf.split_at_mut(frame_len);
        let result = match hex::decode_to_slice(payload, &mut *frame) {
            Ok(()) => self
                .shared
                .codec
                .decode_in(frame, arena)
                .map(|msg| self.dispatch(msg))
                .map_err(LinkError::from),
            Err(e) => Err(e.into()),
        };
        frame.fill(0);
        result
    }

    fn dispatch(&self, msg: Message<'_>) -> DispatchOutcome {
        let route = self.shared.dispatcher.lock().route(&msg);
        route.run(msg)
    }

    /// Handles one receive report. Failures are logged.
    pub fn on_report(&self, line: &str) {
        let Some(payload) = self.payload_of(line) else {
            warn!(line, "receive report without payload");
            return;
        };
        match self.hex_input(payload) {
            Ok(DispatchOutcome::Handled {
                msg_id,
                reply: Some(reply),
            }) => {
                debug!(msg_id, "queued command reply");
                self.shared.replies.lock().push_back(reply);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, kind = %e.kind(), "dropping inbound frame"),
        }
    }

    pub fn pending_replies(&self) -> usize {
        self.shared.replies.lock().len()
    }

    /// Sends every queued reply in order.
    ///
    /// Stops at the first failure, leaving that reply at the head of the
    /// queue. Returns the number sent.
    pub fn flush_replies<T: SerialTransport, C: Clock>(
        &self,
        session: &mut AtSession<T, C>,
    ) -> Result<usize, LinkError> {
        let mut sent = 0;
        loop {
            // Not held across the send: polling may route new reports here.
            let Some(reply) = self.shared.replies.lock().pop_front() else {
                break;
            };
            if let Err(e) = self.push_message(session, &reply) {
                self.shared.replies.lock().push_front(reply);
                return Err(e);
            }
            sent += 1;
        }
        if sent > 0 {
            info!(sent, "flushed command replies");
        }
        Ok(sent)
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.shared.config)
            .field("codec", &self.shared.codec)
            .field("pending_replies", &self.pending_replies())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbiot_at::{RxHandle, ScriptedTransport, SessionConfig, StepClock};
    use nbiot_codec::MessageType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REQUEST_HEX: &str = "01F2000A0700020004030001010F";
    const RESPONSE_HEX: &str = "01F3000A07000200040300010110";

    fn session() -> AtSession<ScriptedTransport, StepClock> {
        let config = SessionConfig::default().with_tx_buffer_size(512);
        let rx = RxHandle::new(config.rx_buffer_size);
        let transport = ScriptedTransport::new(rx.clone());
        AtSession::with_rx(config, rx, transport, StepClock::new(10))
    }

    fn bridge() -> Bridge {
        let device = DeviceContext::new("861234567890123", "460001234567890");
        Bridge::new(BridgeConfig::default(), FrameCodec::default(), device)
    }

    fn echo_handler(req: &Message<'_>) -> Option<Message<'static>> {
        let mut rsp = Message::new(MessageType::UserCmdRsp).with_msg_id(req.msg_id());
        rsp.add(3, req.get::<u8>(3).ok()?).ok()?;
        Some(rsp)
    }

    #[test]
    fn test_hex_payload_padding() {
        assert_eq!(hex_payload(&[0x01, 0xAB], true), "01AB");
        assert_eq!(hex_payload(&[0x01, 0xAB, 0x0F], true), "01AB0F0");
        assert_eq!(hex_payload(&[0x01, 0xAB, 0x0F], false), "01AB0F");
        assert_eq!(strip_pad("01AB0F0"), "01AB0F");
        assert_eq!(strip_pad("01AB0F"), "01AB0F");
        assert_eq!(decode_payload("01AB0F0").unwrap(), vec![0x01, 0xAB, 0x0F]);
    }

    #[test]
    fn test_push_message() {
        let bridge = bridge();
        let mut s = session();
        s.transport_mut().reply("OK\r\n");

        let mut rsp = Message::new(MessageType::UserCmdRsp)
            .with_msg_id(2)
            .with_correlation_tag(7);
        rsp.add(3, 1u8).unwrap();
        bridge.push_message(&mut s, &rsp).unwrap();

        assert_eq!(
            s.transport().sent_lines(),
            vec![format!("AT+M2MCLISEND={RESPONSE_HEX}\r\n")]
        );
    }

    #[test]
    fn test_push_rejected() {
        let bridge = bridge();
        let mut s = session();
        s.transport_mut().reply("ERROR\r\n");

        let rsp = Message::new(MessageType::UserCmdRsp);
        let err = bridge.push_message(&mut s, &rsp).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Rejected {
                state: AtState::Error,
                ..
            }
        ));
    }

    #[test]
    fn test_push_uplink_odd_frame_padded() {
        let bridge = bridge();
        let mut s = session();
        s.transport_mut().reply("OK\r\n");

        // 49-byte header, 3-byte body head, one 4-byte entry, checksum.
        let mut up = Message::new(MessageType::UserUp).with_msg_id(1);
        up.add(1, 80u8).unwrap();
        let frame_len = bridge.codec().encoded_len(&up).unwrap();
        assert_eq!(frame_len % 2, 1);

        bridge.push_message(&mut s, &up).unwrap();
        let line = &s.transport().sent_lines()[0];
        let payload = line
            .strip_prefix("AT+M2MCLISEND=")
            .unwrap()
            .trim_end();
        assert_eq!(payload.len(), frame_len * 2 + 1);
        assert!(payload.ends_with('0'));
    }

    #[test]
    fn test_push_in_place() {
        let bridge = bridge();
        let mut s = session();
        s.transport_mut().reply("OK\r\n");

        let mut buf = [0u8; 128];
        let mut rsp = Message::in_arena(&mut buf, MessageType::UserCmdRsp)
            .unwrap()
            .with_msg_id(2)
            .with_correlation_tag(7);
        rsp.add(3, 1u8).unwrap();
        let before = rsp.arena_usage();

        bridge.push_in_place(&mut s, &mut rsp).unwrap();
        assert_eq!(rsp.arena_usage(), before);
        assert_eq!(
            s.transport().sent_lines(),
            vec![format!("AT+M2MCLISEND={RESPONSE_HEX}\r\n")]
        );
        rsp.release();
    }

    #[test]
    fn test_payload_of() {
        let bridge = bridge();
        assert_eq!(bridge.payload_of("+M2MCLIRECV:0102"), Some("0102"));
        assert_eq!(bridge.payload_of("+M2MCLIRECV: 0102 "), Some("0102"));
        assert_eq!(bridge.payload_of("+M2MCLIRECV:"), None);
        assert_eq!(bridge.payload_of("+M2MCLI:register success"), None);
    }

    #[test]
    fn test_hex_input_dispatches() {
        let bridge = bridge();
        bridge.register(2, echo_handler).unwrap();

        match bridge.hex_input(REQUEST_HEX).unwrap() {
            DispatchOutcome::Handled {
                msg_id: 2,
                reply: Some(reply),
            } => assert_eq!(reply.correlation_tag(), 7),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_hex_input_rejects_garbage() {
        let bridge = bridge();
        assert!(matches!(
            bridge.hex_input("01ZZ").unwrap_err(),
            LinkError::Hex(_)
        ));

        // Last byte flipped: checksum no longer matches.
        let err = bridge.hex_input("01F2000A0700020004030001010E").unwrap_err();
        assert!(matches!(err, LinkError::Codec(ref e) if e.is_malformed()));
    }

    #[test]
    fn test_hex_input_in_caller_buffer() {
        let bridge = bridge();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bridge
            .register(2, move |req| {
                assert!(req.is_arena_backed());
                assert_eq!(req.get::<u8>(3).unwrap(), 1);
                counter.fetch_add(1, Ordering::SeqCst);
                None
            })
            .unwrap();

        let mut buf = [0u8; 64];
        let outcome = bridge.hex_input_in(REQUEST_HEX, &mut buf).unwrap();
        assert!(outcome.is_handled());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(buf.iter().all(|&b| b == 0));

        let mut tiny = [0u8; 8];
        let err = bridge.hex_input_in(REQUEST_HEX, &mut tiny).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Codec(CodecError::BufferTooSmall { needed: 14, .. })
        ));
    }

    #[test]
    fn test_receive_report_round_trip() {
        let bridge = bridge();
        bridge.register(2, echo_handler).unwrap();
        let mut s = session();
        bridge.install(&mut s);

        s.transport().inject(format!("+M2MCLIRECV:{REQUEST_HEX}\r\n"));
        s.poll().unwrap();
        assert_eq!(bridge.pending_replies(), 1);

        s.transport_mut().reply("OK\r\n");
        assert_eq!(bridge.flush_replies(&mut s).unwrap(), 1);
        assert_eq!(bridge.pending_replies(), 0);
        assert_eq!(
            s.transport().sent_lines(),
            vec![format!("AT+M2MCLISEND={RESPONSE_HEX}\r\n")]
        );
    }

    #[test]
    fn test_failed_flush_keeps_reply() {
        let bridge = bridge();
        bridge.register(2, echo_handler).unwrap();
        let mut s = session();
        bridge.install(&mut s);

        s.transport().inject(format!("+M2MCLIRECV:{REQUEST_HEX}\r\n"));
        s.poll().unwrap();

        s.transport_mut().fail_next();
        assert!(bridge.flush_replies(&mut s).is_err());
        assert_eq!(bridge.pending_replies(), 1);
    }

    #[test]
    fn test_handler_registers_from_inside_dispatch() {
        let bridge = bridge();
        let registrar = bridge.clone();
        bridge
            .register(2, move |req| {
                registrar.register(3, |_| None).ok()?;
                echo_handler(req)
            })
            .unwrap();

        assert!(bridge.hex_input(REQUEST_HEX).unwrap().is_handled());
        assert_eq!(bridge.shared.dispatcher.lock().len(), 2);
    }

    #[test]
    fn test_request_encoded_locally_decodes() {
        let bridge = bridge();
        let mut req = Message::new(MessageType::UserCmdReq)
            .with_msg_id(2)
            .with_correlation_tag(7);
        req.add(3, 1u8).unwrap();
        let frame = bridge.codec().encode(&req, bridge.device()).unwrap();
        assert_eq!(hex_payload(&frame, true), REQUEST_HEX);
    }
}
