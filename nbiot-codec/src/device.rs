//! Device identity and sensor accessors used by uplink frames.

use std::fmt;
use tracing::warn;

/// Length of the IMEI and IMSI fields in an uplink header.
pub const DEVICE_ID_LEN: usize = 15;

/// Upper bound of the battery percentage field.
pub const BATTERY_MAX: u8 = 100;

type Sensor<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Identity and sensor readings stamped into every uplink.
///
/// Sensors are optional. A missing sensor reads as zero and is logged.
#[derive(Default)]
pub struct DeviceContext {
    imei: [u8; DEVICE_ID_LEN],
    imsi: [u8; DEVICE_ID_LEN],
    battery: Option<Sensor<u8>>,
    signal: Option<Sensor<i32>>,
    timestamp: Option<Sensor<u64>>,
}

impl DeviceContext {
    /// Creates a context from the module's IMEI and the SIM's IMSI.
    ///
    /// An identifier that is not exactly [`DEVICE_ID_LEN`] bytes long is
    /// rejected with a warning and left zero-filled.
    pub fn new(imei: &str, imsi: &str) -> Self {
        Self {
            imei: device_id("IMEI", imei),
            imsi: device_id("IMSI", imsi),
            ..Self::default()
        }
    }

    pub fn with_battery(mut self, f: impl Fn() -> u8 + Send + Sync + 'static) -> Self {
        self.battery = Some(Box::new(f));
        self
    }

    pub fn with_signal(mut self, f: impl Fn() -> i32 + Send + Sync + 'static) -> Self {
        self.signal = Some(Box::new(f));
        self
    }

    pub fn with_timestamp(mut self, f: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.timestamp = Some(Box::new(f));
        self
    }

    pub fn imei(&self) -> &[u8; DEVICE_ID_LEN] {
        &self.imei
    }

    pub fn imsi(&self) -> &[u8; DEVICE_ID_LEN] {
        &self.imsi
    }

    /// Battery level in percent, clamped to [`BATTERY_MAX`].
    pub fn battery(&self) -> u8 {
        let Some(f) = &self.battery else {
            warn!("no battery sensor installed, reporting 0");
            return 0;
        };
        let level = f();
        if level > BATTERY_MAX {
            warn!(level, "battery level out of range, clamping");
            return BATTERY_MAX;
        }
        level
    }

    /// Signal strength as reported by the module.
    pub fn signal(&self) -> i32 {
        match &self.signal {
            Some(f) => f(),
            None => {
                warn!("no signal sensor installed, reporting 0");
                0
            }
        }
    }

    /// Sample time, in whatever epoch the platform expects.
    pub fn timestamp(&self) -> u64 {
        match &self.timestamp {
            Some(f) => f(),
            None => {
                warn!("no timestamp source installed, reporting 0");
                0
            }
        }
    }
}

fn device_id(label: &str, value: &str) -> [u8; DEVICE_ID_LEN] {
    let mut id = [0u8; DEVICE_ID_LEN];
    match value.as_bytes().try_into() {
        Ok(bytes) => id = bytes,
        Err(_) => warn!(
            id = label,
            len = value.len(),
            expected = DEVICE_ID_LEN,
            "device identifier has wrong length, leaving it blank"
        ),
    }
    id
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("imei", &String::from_utf8_lossy(&self.imei))
            .field("imsi", &String::from_utf8_lossy(&self.imsi))
            .field("battery", &self.battery.is_some())
            .field("signal", &self.signal.is_some())
            .field("timestamp", &self.timestamp.is_some())
            .finish()
    }
}
