//! Transport layer for QMK keyboards speaking VIA over raw HID
//!
//! ```text
//! [HidRawDevice / MockReportDevice]   ← implements ReportDevice (raw I/O)
//!                |
//!       [ReportTransport]             ← framing, echo matching, read retries
//!                |
//!      [QmkKeyboard / Backlight]
//! ```
//!
//! Discovery and hot-plug live here too: `DeviceBus` enumerates and opens
//! interfaces, `LifecycleFeed` reports attach/detach.

pub mod command;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod exchange;
pub mod hotplug;
pub mod mock;
pub mod protocol;
pub mod types;

mod hid_raw;

pub use command::{
    GetProtocolVersion, ProtocolVersion, QueryRgbMatrix, RgbMatrixStatus, SetRgbBrightness,
    SetRgbColor, SetRgbEffect, ViaCommand, ViaResponse,
};
pub use descriptor::{ReportDescriptor, ReportInfo, ReportKind};
pub use discovery::{is_qmk_raw_hid, DeviceBus, HidBus};
pub use error::{ProtocolError, TransportError};
pub use exchange::ReportTransport;
pub use hid_raw::HidRawDevice;
pub use hotplug::{FeedHandle, LifecycleFeed, LifecycleSink, PollingFeed};
#[cfg(all(target_os = "linux", feature = "hotplug"))]
pub use hotplug::UdevFeed;
pub use types::{
    CandidateDevice, DeviceId, LifecycleEvent, ReadMode, TransportConfig, Usage,
};

use std::sync::Arc;
use std::time::Duration;

/// Raw report channel of one HID interface
///
/// Implementors only move bytes; correlation and retries belong to
/// [`ReportTransport`].
pub trait ReportDevice: Send + Sync {
    /// Identity of the interface
    fn id(&self) -> &DeviceId;

    /// Negotiated output report payload length (report id excluded)
    fn output_report_len(&self) -> usize;

    /// Negotiated input report payload length (report id excluded)
    fn input_report_len(&self) -> usize;

    /// Write one output report. `data[0]` is the report id.
    fn write_report(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Blocking read of one input report, including the leading report id
    fn read_report(&self, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

/// Type alias for a shared device handle
pub type DeviceHandle = Arc<dyn ReportDevice>;
