//! In-memory devices for tests and dry runs
//!
//! `MockReportDevice` emulates the VIA side of QMK firmware: it echoes every
//! frame, answers the protocol version query, reports whether the RGB matrix
//! is compiled in, and remembers the RGB matrix values it was given. Queued
//! replies take priority over the emulated ones, which is how tests inject
//! stale or mismatched reports.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::discovery::DeviceBus;
use crate::error::TransportError;
use crate::protocol::{cmd, via, MIN_REPORT_LEN};
use crate::types::{CandidateDevice, DeviceId, TransportConfig, Usage};
use crate::{DeviceHandle, ReportDevice};

/// RGB matrix state as seen by the emulated firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareState {
    pub protocol_version: u16,
    pub rgb_matrix_enabled: bool,
    pub brightness: u8,
    pub effect: u8,
    pub hue: u8,
    pub saturation: u8,
}

impl Default for FirmwareState {
    fn default() -> Self {
        Self {
            protocol_version: via::PROTOCOL_VERSION,
            rgb_matrix_enabled: true,
            brightness: 0x80,
            effect: 0,
            hue: 0,
            saturation: 0,
        }
    }
}

/// Scriptable raw HID interface
pub struct MockReportDevice {
    id: DeviceId,
    report_len: usize,
    replies: Mutex<VecDeque<Vec<u8>>>,
    writes: Mutex<Vec<Vec<u8>>>,
    firmware: Mutex<FirmwareState>,
    reads: AtomicUsize,
    fail_writes: AtomicBool,
    connected: AtomicBool,
    read_delay: Mutex<Duration>,
}

impl MockReportDevice {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_report_len(id, MIN_REPORT_LEN)
    }

    pub fn with_report_len(id: impl Into<String>, report_len: usize) -> Self {
        Self {
            id: DeviceId::new(id),
            report_len,
            replies: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
            firmware: Mutex::new(FirmwareState::default()),
            reads: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            read_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Candidate descriptor for this device on the raw HID usage
    pub fn candidate(&self, product: &str) -> CandidateDevice {
        CandidateDevice {
            id: self.id.clone(),
            vid: 0xFEED,
            pid: 0x0001,
            applications: vec![Usage::QMK_RAW_HID],
            product_name: Some(product.to_string()),
            serial: None,
        }
    }

    pub fn set_protocol_version(&self, version: u16) {
        self.firmware.lock().protocol_version = version;
    }

    pub fn set_rgb_matrix_enabled(&self, enabled: bool) {
        self.firmware.lock().rgb_matrix_enabled = enabled;
    }

    /// Sleep this long inside every read
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    /// Queue a raw reply (report id included) ahead of the emulated ones
    pub fn queue_reply(&self, reply: Vec<u8>) {
        self.replies.lock().push_back(reply);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Every frame written so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// Command id and the first `n` argument bytes of every write
    pub fn commands(&self, n: usize) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .iter()
            .map(|frame| frame[1..(2 + n).min(frame.len())].to_vec())
            .collect()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn firmware(&self) -> FirmwareState {
        *self.firmware.lock()
    }

    fn apply(&self, frame: &[u8]) {
        if frame.len() < 5 || frame[1] != cmd::CUSTOM_SET_VALUE {
            return;
        }
        if frame[2] != via::CHANNEL_RGB_MATRIX {
            return;
        }
        let mut fw = self.firmware.lock();
        if !fw.rgb_matrix_enabled {
            return;
        }
        match frame[3] {
            via::RGB_MATRIX_BRIGHTNESS => fw.brightness = frame[4],
            via::RGB_MATRIX_EFFECT => fw.effect = frame[4],
            via::RGB_MATRIX_COLOR => {
                fw.hue = frame[4];
                fw.saturation = frame.get(5).copied().unwrap_or(0);
            }
            _ => {}
        }
    }

    fn emulate(&self, frame: &[u8]) -> Vec<u8> {
        let mut reply = frame.to_vec();
        reply.resize(self.report_len + 1, 0);
        let fw = self.firmware();
        match reply[1] {
            cmd::GET_PROTOCOL_VERSION => {
                reply[2..4].copy_from_slice(&fw.protocol_version.to_be_bytes());
            }
            cmd::CUSTOM_GET_VALUE | cmd::CUSTOM_SET_VALUE
                if reply[2] == via::CHANNEL_RGB_MATRIX && !fw.rgb_matrix_enabled =>
            {
                reply[1] = cmd::UNHANDLED;
            }
            cmd::CUSTOM_GET_VALUE if reply[2] == via::CHANNEL_RGB_MATRIX => {
                if reply[3] == via::RGB_MATRIX_BRIGHTNESS {
                    reply[4] = fw.brightness;
                }
            }
            _ => {}
        }
        reply
    }
}

impl ReportDevice for MockReportDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn output_report_len(&self) -> usize {
        self.report_len
    }

    fn input_report_len(&self) -> usize {
        self.report_len
    }

    fn write_report(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::HidError("write failed".into()));
        }
        self.writes.lock().push(data.to_vec());
        self.apply(data);
        Ok(())
    }

    fn read_report(&self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.reads.fetch_add(1, Ordering::SeqCst);

        if let Some(reply) = self.replies.lock().pop_front() {
            return Ok(reply);
        }
        let last = self.writes.lock().last().cloned();
        match last {
            Some(frame) => Ok(self.emulate(&frame)),
            None => Err(TransportError::Timeout),
        }
    }
}

/// Bus with devices plugged in and out by the test
#[derive(Default)]
pub struct MockBus {
    devices: Mutex<HashMap<DeviceId, (CandidateDevice, Arc<MockReportDevice>)>>,
    opens: AtomicUsize,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plug(&self, candidate: CandidateDevice, device: Arc<MockReportDevice>) {
        self.devices
            .lock()
            .insert(candidate.id.clone(), (candidate, device));
    }

    pub fn unplug(&self, id: &DeviceId) -> Option<Arc<MockReportDevice>> {
        let (_, device) = self.devices.lock().remove(id)?;
        device.disconnect();
        Some(device)
    }

    /// Number of successful `open` calls
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl DeviceBus for MockBus {
    fn enumerate(&self) -> Result<Vec<CandidateDevice>, TransportError> {
        let mut list: Vec<_> = self
            .devices
            .lock()
            .values()
            .map(|(candidate, _)| candidate.clone())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    fn open(
        &self,
        candidate: &CandidateDevice,
        _config: &TransportConfig,
    ) -> Result<DeviceHandle, TransportError> {
        let devices = self.devices.lock();
        let (_, device) = devices
            .get(&candidate.id)
            .ok_or_else(|| TransportError::DeviceNotFound(candidate.id.to_string()))?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(device.clone() as DeviceHandle)
    }
}
