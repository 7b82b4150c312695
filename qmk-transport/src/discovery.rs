//! Device discovery for QMK raw HID interfaces

use std::sync::Arc;

use hidapi::HidApi;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::hid_raw::HidRawDevice;
use crate::types::{CandidateDevice, DeviceId, TransportConfig, Usage};
use crate::DeviceHandle;

/// Bus binding machinery: enumerate present interfaces and open them
pub trait DeviceBus: Send + Sync {
    /// List every HID interface currently present (qualifying or not)
    fn enumerate(&self) -> Result<Vec<CandidateDevice>, TransportError>;

    /// Open a report channel to a candidate
    fn open(
        &self,
        candidate: &CandidateDevice,
        config: &TransportConfig,
    ) -> Result<DeviceHandle, TransportError>;
}

/// Check if a candidate declares the raw HID application collection
pub fn is_qmk_raw_hid(candidate: &CandidateDevice) -> bool {
    candidate.applications.contains(&Usage::QMK_RAW_HID)
}

/// hidapi-backed bus
///
/// hidapi reports one entry per top-level collection, so the usage pair of
/// each entry is the application usage of that interface.
pub struct HidBus {
    api: Mutex<HidApi>,
}

impl HidBus {
    pub fn new() -> Result<Self, TransportError> {
        let api = HidApi::new()?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }
}

impl DeviceBus for HidBus {
    fn enumerate(&self) -> Result<Vec<CandidateDevice>, TransportError> {
        let mut api = self.api.lock();
        api.refresh_devices()?;

        let mut devices: Vec<CandidateDevice> = Vec::new();
        for info in api.device_list() {
            let id = DeviceId::new(info.path().to_string_lossy());
            let usage = Usage::new(info.usage_page(), info.usage());

            // Some backends list one path several times, once per collection
            if let Some(existing) = devices.iter_mut().find(|d| d.id == id) {
                if !existing.applications.contains(&usage) {
                    existing.applications.push(usage);
                }
                continue;
            }

            devices.push(CandidateDevice {
                id,
                vid: info.vendor_id(),
                pid: info.product_id(),
                applications: vec![usage],
                product_name: info.product_string().map(|s| s.to_string()),
                serial: info.serial_number().map(|s| s.to_string()),
            });
        }

        let qualifying = devices.iter().filter(|d| is_qmk_raw_hid(d)).count();
        debug!(
            "Enumerated {} HID interfaces, {} raw HID",
            devices.len(),
            qualifying
        );
        Ok(devices)
    }

    fn open(
        &self,
        candidate: &CandidateDevice,
        config: &TransportConfig,
    ) -> Result<DeviceHandle, TransportError> {
        let api = self.api.lock();
        let device = HidRawDevice::open(&api, &candidate.id, config.read_mode)?;
        info!(
            "Opened {:04X}:{:04X} at {}",
            candidate.vid, candidate.pid, candidate.id
        );
        Ok(Arc::new(device))
    }
}
