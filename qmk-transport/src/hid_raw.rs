//! hidapi-backed report channel for a raw HID interface

use std::ffi::CString;
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::descriptor::{ReportDescriptor, ReportKind};
use crate::error::TransportError;
use crate::protocol::{DEFAULT_REPORT_LEN, REPORT_ID};
use crate::types::{DeviceId, ReadMode, Usage};
use crate::ReportDevice;

/// Largest descriptor the kernel hands out (HID_MAX_DESCRIPTOR_SIZE)
const MAX_DESCRIPTOR_SIZE: usize = 4096;

/// Raw HID interface opened through hidapi
pub struct HidRawDevice {
    device: Mutex<HidDevice>,
    id: DeviceId,
    input_len: usize,
    output_len: usize,
    read_mode: ReadMode,
}

impl HidRawDevice {
    /// Open an interface by path and negotiate report lengths from its descriptor
    pub fn open(api: &HidApi, id: &DeviceId, read_mode: ReadMode) -> Result<Self, TransportError> {
        let path = CString::new(id.as_str())
            .map_err(|_| TransportError::Internal(format!("invalid device path {id}")))?;
        let device = api.open_path(&path)?;

        let (input_len, output_len) = match read_descriptor(&device) {
            Some(desc) => {
                if !desc.has_input_application(Usage::QMK_RAW_HID) {
                    debug!("{}: descriptor has no raw HID input report", id);
                }
                (
                    desc.report_len(ReportKind::Input, REPORT_ID)
                        .unwrap_or(DEFAULT_REPORT_LEN),
                    desc.report_len(ReportKind::Output, REPORT_ID)
                        .unwrap_or(DEFAULT_REPORT_LEN),
                )
            }
            None => {
                warn!(
                    "{}: report descriptor unavailable, assuming {} byte reports",
                    id, DEFAULT_REPORT_LEN
                );
                (DEFAULT_REPORT_LEN, DEFAULT_REPORT_LEN)
            }
        };

        debug!(
            "Opened {} (input {} bytes, output {} bytes, {:?})",
            id, input_len, output_len, read_mode
        );

        Ok(Self {
            device: Mutex::new(device),
            id: id.clone(),
            input_len,
            output_len,
            read_mode,
        })
    }
}

fn read_descriptor(device: &HidDevice) -> Option<ReportDescriptor> {
    let mut buf = vec![0u8; MAX_DESCRIPTOR_SIZE];
    match device.get_report_descriptor(&mut buf) {
        Ok(len) if len > 0 => Some(ReportDescriptor::parse(&buf[..len])),
        Ok(_) => None,
        Err(e) => {
            debug!("get_report_descriptor failed: {}", e);
            None
        }
    }
}

impl ReportDevice for HidRawDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn output_report_len(&self) -> usize {
        self.output_len
    }

    fn input_report_len(&self) -> usize {
        self.input_len
    }

    fn write_report(&self, data: &[u8]) -> Result<(), TransportError> {
        let device = self.device.lock();
        device.write(data)?;
        Ok(())
    }

    fn read_report(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let device = self.device.lock();
        let mut buf = vec![0u8; self.input_len + 1];
        match self.read_mode {
            ReadMode::GetReport => {
                // Bounded by the kernel's control transfer timeout
                buf[0] = REPORT_ID;
                let len = device.get_input_report(&mut buf)?;
                buf.truncate(len);
            }
            ReadMode::Interrupt => {
                let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
                let len = device.read_timeout(&mut buf[1..], millis)?;
                if len == 0 {
                    return Err(TransportError::Timeout);
                }
                buf[0] = REPORT_ID;
                buf.truncate(len + 1);
            }
        }
        Ok(buf)
    }
}
