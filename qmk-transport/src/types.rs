//! Common types for transport layer

use std::fmt;
use std::time::Duration;

use crate::protocol::{device, timing};

/// Stable identity of one HID interface (the hidraw path on Linux)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A HID usage: page in the high half, id in the low half
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Usage {
    pub page: u16,
    pub id: u16,
}

impl Usage {
    pub const fn new(page: u16, id: u16) -> Self {
        Self { page, id }
    }

    /// Application usage of the QMK raw HID collection
    pub const QMK_RAW_HID: Self = Self::new(device::USAGE_PAGE, device::USAGE);

    /// Split an extended (32-bit) usage
    pub fn from_extended(value: u32) -> Self {
        Self::new((value >> 16) as u16, (value & 0xFFFF) as u16)
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.page, self.id)
    }
}

/// Device identification information for a candidate interface
#[derive(Debug, Clone)]
pub struct CandidateDevice {
    pub id: DeviceId,
    /// USB Vendor ID
    pub vid: u16,
    /// USB Product ID
    pub pid: u16,
    /// Top-level application usages declared by the interface
    pub applications: Vec<Usage>,
    pub product_name: Option<String>,
    pub serial: Option<String>,
}

impl CandidateDevice {
    /// Name used for the LED endpoint
    pub fn display_name(&self) -> String {
        match &self.product_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{:04x}:{:04x}", self.vid, self.pid),
        }
    }
}

/// How replies are fetched from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Blocking GET_REPORT control request (HIDIOCGINPUT)
    #[default]
    GetReport,
    /// Interrupt IN endpoint with a timeout
    Interrupt,
}

/// Per-device transport tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub read_timeout: Duration,
    pub read_mode: ReadMode,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(timing::READ_TIMEOUT_MS),
            read_mode: ReadMode::default(),
        }
    }
}

/// Hot-plug events from a lifecycle feed
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A device appeared (or was present at startup)
    Attached(CandidateDevice),
    /// A device went away
    Detached(DeviceId),
}
