//! Command execution.

use nbiot_at::{format_command, AtAction, AtSession, RxHandle, ScriptedTransport, SystemClock};
use nbiot_codec::{CodecError, EnumValue, Message, MessageType};
use nbiot_link::{decode_payload, hex_payload, install_default_reports, Bridge, Config};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// One `TYPE:FORMAT:VALUE` entry given on the command line.
#[derive(Debug, Clone)]
pub struct TlvArg {
    pub tlv_type: u8,
    pub value: TlvValue,
}

#[derive(Debug, Clone)]
pub enum TlvValue {
    U8(u8),
    I8(i8),
    Short(i16),
    Int32(i32),
    Long64(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Enum(u8),
    Text(String),
    Binary(Vec<u8>),
}

/// Parses `TYPE:FORMAT:VALUE`, e.g. `3:byte:1` or `9:string:hello`.
pub fn parse_tlv(s: &str) -> Result<TlvArg, String> {
    let mut parts = s.splitn(3, ':');
    let (Some(tlv_type), Some(format), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected TYPE:FORMAT:VALUE, got {s:?}"));
    };
    let tlv_type = tlv_type
        .parse::<u8>()
        .map_err(|e| format!("bad TLV type {tlv_type:?}: {e}"))?;

    let bad = |e: &dyn std::fmt::Display| format!("bad {format} value {value:?}: {e}");
    let value = match format.to_lowercase().as_str() {
        "byte" => match value.parse::<u8>() {
            Ok(v) => TlvValue::U8(v),
            Err(_) => TlvValue::I8(value.parse().map_err(|e| bad(&e))?),
        },
        "short" => TlvValue::Short(value.parse().map_err(|e| bad(&e))?),
        "int32" | "int" => TlvValue::Int32(value.parse().map_err(|e| bad(&e))?),
        "long64" | "long" => TlvValue::Long64(value.parse().map_err(|e| bad(&e))?),
        "float" => TlvValue::Float(value.parse().map_err(|e| bad(&e))?),
        "double" => TlvValue::Double(value.parse().map_err(|e| bad(&e))?),
        "bool" => TlvValue::Bool(value.parse().map_err(|e| bad(&e))?),
        "enum" => TlvValue::Enum(value.parse().map_err(|e| bad(&e))?),
        "string" | "latin1" => TlvValue::Text(value.to_string()),
        "hex" | "binary" => TlvValue::Binary(hex::decode(value).map_err(|e| bad(&e))?),
        other => return Err(format!("unknown TLV format {other:?}")),
    };
    Ok(TlvArg { tlv_type, value })
}

impl TlvArg {
    /// Appends this entry to `msg`.
    pub fn add_to(&self, msg: &mut Message<'_>) -> Result<usize, CodecError> {
        let t = self.tlv_type;
        match &self.value {
            TlvValue::U8(v) => msg.add(t, *v),
            TlvValue::I8(v) => msg.add(t, *v),
            TlvValue::Short(v) => msg.add(t, *v),
            TlvValue::Int32(v) => msg.add(t, *v),
            TlvValue::Long64(v) => msg.add(t, *v),
            TlvValue::Float(v) => msg.add(t, *v),
            TlvValue::Double(v) => msg.add(t, *v),
            TlvValue::Bool(v) => msg.add(t, *v),
            TlvValue::Enum(v) => msg.add(t, EnumValue(*v)),
            TlvValue::Text(v) => msg.add_string(t, v),
            TlvValue::Binary(v) => msg.add_binary(t, v),
        }
    }
}

/// Decodes a downlink frame given as hex and renders it as JSON.
pub fn decode(config: &Config, payload: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let frame = decode_payload(payload.trim())?;
    let mut arena = vec![0u8; config.codec.arena_size];
    let msg = config.codec.frame_codec().decode_in(&frame, &mut arena)?;

    let entries: Vec<Value> = msg
        .entries()
        .map(|e| {
            json!({
                "type": e.tlv_type,
                "format": e.format,
                "length": e.length(),
                "value": hex::encode_upper(e.value),
            })
        })
        .collect();

    let value = json!({
        "msg_type": msg.msg_type(),
        "msg_id": msg.msg_id(),
        "correlation_tag": msg.correlation_tag(),
        "frame_len": frame.len(),
        "entries": entries,
    });
    msg.release();
    Ok(value)
}

/// Options of the `uplink` command.
#[derive(Debug, Clone, Default)]
pub struct UplinkOptions {
    pub msg_id: u8,
    pub tag: u16,
    pub response: bool,
    pub battery: Option<u8>,
    pub signal: Option<i32>,
    pub at_command: bool,
}

/// Builds a frame from command-line entries and renders it as hex.
pub fn uplink(
    config: &Config,
    opts: &UplinkOptions,
    tlvs: &[TlvArg],
) -> Result<String, Box<dyn std::error::Error>> {
    let msg_type = if opts.response {
        MessageType::UserCmdRsp
    } else {
        MessageType::UserUp
    };
    let mut msg = Message::new(msg_type)
        .with_msg_id(opts.msg_id)
        .with_correlation_tag(opts.tag);
    for tlv in tlvs {
        tlv.add_to(&mut msg)?;
    }

    let battery = opts.battery.unwrap_or(0);
    let signal = opts.signal.unwrap_or(0);
    let device = config
        .device
        .device_context()
        .with_battery(move || battery)
        .with_signal(move || signal)
        .with_timestamp(|| chrono::Utc::now().timestamp().max(0) as u64);

    let frame = config.codec.frame_codec().encode(&msg, &device)?;
    debug!(msg_type = %msg_type, len = frame.len(), "built frame");
    let payload = hex_payload(&frame, config.link.pad_odd_payload);

    if opts.at_command {
        let line = format_command(&config.link.send_command, AtAction::Set, Some(&payload))?;
        Ok(line.trim_end().to_string())
    } else {
        Ok(payload)
    }
}

/// Replays captured module output through the session's report routing.
pub fn replay(config: &Config, path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let data = std::fs::read(path)?;

    let session_config = config.session.session_config();
    let rx = RxHandle::new(session_config.rx_buffer_size);
    let transport = ScriptedTransport::new(rx.clone());
    let mut session = AtSession::with_rx(session_config, rx.clone(), transport, SystemClock::new());

    let bridge = Bridge::new(
        config.link.bridge_config(),
        config.codec.frame_codec(),
        config.device.device_context(),
    );
    let acks = Arc::new(AtomicUsize::new(0));
    let ack_count = acks.clone();
    bridge.set_ack_handler(move |msg| {
        info!(tag = msg.correlation_tag(), "uplink acknowledged");
        ack_count.fetch_add(1, Ordering::Relaxed);
    });
    let status = install_default_reports(&mut session, Some(&bridge));

    let unknown = Arc::new(AtomicUsize::new(0));
    let unknown_count = unknown.clone();
    session.reports_mut().set_fallback(move |line| {
        debug!(line, "unrouted line");
        unknown_count.fetch_add(1, Ordering::Relaxed);
    });

    let mut lines = 0;
    for chunk in data.chunks(nbiot_at::session::MIN_RX_BUFFER_SIZE) {
        rx.fill(chunk);
        lines += session.poll()?;
    }
    info!(bytes = data.len(), lines, "replay finished");

    let status = *status.lock();
    Ok(json!({
        "bytes": data.len(),
        "lines": lines,
        "unrouted": unknown.load(Ordering::Relaxed),
        "acks": acks.load(Ordering::Relaxed),
        "status": status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_tlv() {
        let arg = parse_tlv("3:byte:1").unwrap();
        assert_eq!(arg.tlv_type, 3);
        assert!(matches!(arg.value, TlvValue::U8(1)));

        assert!(matches!(parse_tlv("3:byte:-5").unwrap().value, TlvValue::I8(-5)));
        assert!(matches!(parse_tlv("4:int32:-7").unwrap().value, TlvValue::Int32(-7)));
        assert!(matches!(
            parse_tlv("9:string:a:b").unwrap().value,
            TlvValue::Text(ref s) if s == "a:b"
        ));
        assert!(matches!(
            parse_tlv("9:hex:0aff").unwrap().value,
            TlvValue::Binary(ref b) if b == &[0x0A, 0xFF]
        ));

        assert!(parse_tlv("3:byte").is_err());
        assert!(parse_tlv("300:byte:1").is_err());
        assert!(parse_tlv("3:quad:1").is_err());
        assert!(parse_tlv("3:short:99999").is_err());
    }

    #[test]
    fn test_decode_scenario_frame() {
        let config = Config::default();
        let out = decode(&config, "01F2000A0700020004030001010F").unwrap();
        assert_eq!(out["msg_type"], "user_cmd_req");
        assert_eq!(out["msg_id"], 2);
        assert_eq!(out["correlation_tag"], 7);
        assert_eq!(out["entries"][0]["type"], 3);
        assert_eq!(out["entries"][0]["format"], "unknown");
        assert_eq!(out["entries"][0]["value"], "01");
    }

    #[test]
    fn test_response_frame_as_hex() {
        let config = Config::default();
        let opts = UplinkOptions {
            msg_id: 2,
            tag: 7,
            response: true,
            ..UplinkOptions::default()
        };
        let tlvs = [parse_tlv("3:byte:1").unwrap()];
        assert_eq!(uplink(&config, &opts, &tlvs).unwrap(), "01F3000A07000200040300010110");

        let opts = UplinkOptions {
            at_command: true,
            ..opts
        };
        assert_eq!(
            uplink(&config, &opts, &tlvs).unwrap(),
            "AT+M2MCLISEND=01F3000A07000200040300010110"
        );
    }

    #[test]
    fn test_replay_capture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"\r\n*MATREADY: 1\r\n\r\n+CFUN: 1\r\n\r\n+CPIN: READY\r\n\r\n+IP: 10.0.0.2\r\n\
              +M2MCLI:register success\r\n+M2MCLI:observe success\r\n+SOMETHING\r\n",
        )
        .unwrap();

        let out = replay(&Config::default(), file.path()).unwrap();
        assert_eq!(out["lines"], 7);
        assert_eq!(out["unrouted"], 1);
        assert_eq!(out["status"]["ready"], true);
        assert_eq!(out["status"]["ipv4"], true);
        assert_eq!(out["status"]["observed"], true);
    }
}
