//! Terminal configuration.
//!
//! Built-in defaults, overlaid by an optional YAML file, overlaid by
//! `NBIOT_*` environment variables. A variable that is set but does not
//! parse is an error.

use crate::bridge::{BridgeConfig, DEFAULT_RECEIVE_PREFIX, DEFAULT_SEND_COMMAND};
use crate::dispatch::COMMAND_MAX_HANDLER;
use nbiot_at::SessionConfig;
use nbiot_codec::{DeviceContext, FrameCodec, TagOrder, DEVICE_ID_LEN, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Terminal configuration, one section per layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionSection,
    pub codec: CodecSection,
    pub device: DeviceSection,
    pub link: LinkSection,
}

impl Config {
    /// Uses the file named by `NBIOT_CONFIG`, if any. See [`load_from`](Self::load_from).
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("NBIOT_CONFIG").map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Defaults or the YAML at `path`, then environment overrides, then
    /// [`validate`](Self::validate).
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Yaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.session.apply_env_overrides()?;
        self.codec.apply_env_overrides()?;
        self.device.apply_env_overrides();
        Ok(())
    }

    /// Checks that the sections are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        self.codec.validate()?;
        self.device.validate()?;
        self.link.validate()
    }

    /// Writes the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = serde_yaml::to_string(self).map_err(|e| ConfigError::Yaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Overwrites `slot` with the parsed value of `var`, when it is set.
fn env_override<T: FromStr>(var: &'static str, slot: &mut T) -> Result<(), ConfigError> {
    let Ok(value) = std::env::var(var) else {
        return Ok(());
    };
    match value.trim().parse() {
        Ok(parsed) => {
            *slot = parsed;
            Ok(())
        }
        Err(_) => Err(ConfigError::Env { var, value }),
    }
}

fn parse_tag_order(value: &str) -> Option<TagOrder> {
    match value.trim().to_ascii_lowercase().as_str() {
        "little_endian" | "littleendian" | "le" => Some(TagOrder::LittleEndian),
        "big_endian" | "bigendian" | "be" => Some(TagOrder::BigEndian),
        _ => None,
    }
}

/// AT session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Send-ready window in milliseconds.
    pub send_timeout_ms: u64,
    /// Response window in milliseconds.
    pub response_timeout_ms: u64,
    /// Receive ring size in bytes.
    pub rx_buffer_size: usize,
    /// Longest received line, terminator included.
    pub line_buffer_size: usize,
    /// Longest command, terminator included.
    pub tx_buffer_size: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            send_timeout_ms: nbiot_at::SEND_TIMEOUT_MS,
            response_timeout_ms: nbiot_at::RESPONSE_TIMEOUT_MS,
            rx_buffer_size: nbiot_at::RX_BUFFER_SIZE,
            line_buffer_size: nbiot_at::RX_BUFFER_SIZE,
            tx_buffer_size: nbiot_at::TX_BUFFER_SIZE,
        }
    }
}

impl SessionSection {
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        env_override("NBIOT_SEND_TIMEOUT_MS", &mut self.send_timeout_ms)?;
        env_override("NBIOT_RESPONSE_TIMEOUT_MS", &mut self.response_timeout_ms)?;
        env_override("NBIOT_RX_BUFFER_SIZE", &mut self.rx_buffer_size)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.send_timeout_ms == 0 || self.response_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "session timeouts must be non-zero".to_string(),
            ));
        }
        if self.rx_buffer_size < nbiot_at::session::MIN_RX_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "rx_buffer_size must be at least {}",
                nbiot_at::session::MIN_RX_BUFFER_SIZE
            )));
        }
        if self.line_buffer_size == 0 || self.line_buffer_size > self.rx_buffer_size {
            return Err(ConfigError::Invalid(
                "line_buffer_size must be non-zero and no larger than rx_buffer_size".to_string(),
            ));
        }
        if self.tx_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "tx_buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the send-ready window as Duration.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Returns the response window as Duration.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Builds the session configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_send_timeout(self.send_timeout())
            .with_response_timeout(self.response_timeout())
            .with_rx_buffer_size(self.rx_buffer_size)
            .with_line_buffer_size(self.line_buffer_size)
            .with_tx_buffer_size(self.tx_buffer_size)
    }
}

/// Frame codec configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecSection {
    /// Wire byte order of the correlation tag.
    pub tag_order: TagOrder,
    /// Size of fixed-memory message buffers.
    pub arena_size: usize,
}

impl Default for CodecSection {
    fn default() -> Self {
        Self {
            tag_order: TagOrder::default(),
            arena_size: MAX_FRAME_SIZE,
        }
    }
}

impl CodecSection {
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        match std::env::var("NBIOT_TAG_ORDER") {
            Ok(value) => self.set_tag_order(value),
            Err(_) => Ok(()),
        }
    }

    /// Accepts `little_endian`/`le` or `big_endian`/`be`, case-insensitively.
    fn set_tag_order(&mut self, value: String) -> Result<(), ConfigError> {
        match parse_tag_order(&value) {
            Some(order) => {
                self.tag_order = order;
                Ok(())
            }
            None => Err(ConfigError::Env {
                var: "NBIOT_TAG_ORDER",
                value,
            }),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.arena_size <= nbiot_codec::message::MESSAGE_HEADER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "arena_size must exceed the {} byte message header",
                nbiot_codec::message::MESSAGE_HEADER_SIZE
            )));
        }
        Ok(())
    }

    pub fn frame_codec(&self) -> FrameCodec {
        FrameCodec::new(self.tag_order)
    }
}

/// Device identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Module IMEI.
    pub imei: String,
    /// SIM IMSI.
    pub imsi: String,
}

impl DeviceSection {
    fn apply_env_overrides(&mut self) {
        if let Ok(imei) = std::env::var("NBIOT_IMEI") {
            self.imei = imei;
        }
        if let Ok(imsi) = std::env::var("NBIOT_IMSI") {
            self.imsi = imsi;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (label, value) in [("imei", &self.imei), ("imsi", &self.imsi)] {
            if !value.is_empty() && value.len() != DEVICE_ID_LEN {
                return Err(ConfigError::Invalid(format!(
                    "{label} must be {DEVICE_ID_LEN} characters, got {}",
                    value.len()
                )));
            }
        }
        Ok(())
    }

    /// Builds a device context without sensors.
    pub fn device_context(&self) -> DeviceContext {
        DeviceContext::new(&self.imei, &self.imsi)
    }
}

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    /// Send-data command mnemonic.
    pub send_command: String,
    /// Receive report prefix.
    pub receive_prefix: String,
    /// Pad odd-length payloads with a `0` nibble.
    pub pad_odd_payload: bool,
    /// Command handler slots.
    pub max_handlers: usize,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            send_command: DEFAULT_SEND_COMMAND.to_string(),
            receive_prefix: DEFAULT_RECEIVE_PREFIX.to_string(),
            pad_odd_payload: true,
            max_handlers: COMMAND_MAX_HANDLER,
        }
    }
}

impl LinkSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.send_command.is_empty() || self.receive_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "send_command and receive_prefix must be set".to_string(),
            ));
        }
        if self.max_handlers == 0 {
            return Err(ConfigError::Invalid(
                "max_handlers must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            send_command: self.send_command.clone(),
            receive_prefix: self.receive_prefix.clone(),
            pad_odd_payload: self.pad_odd_payload,
            max_handlers: self.max_handlers,
        }
    }
}

/// Failure to build a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad YAML in {}: {message}", .path.display())]
    Yaml { path: PathBuf, message: String },

    #[error("{var}={value:?} cannot be parsed")]
    Env { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
