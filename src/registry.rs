//! Live backlight registrations, keyed by device
//!
//! Membership changes happen under the map lock; probing, registration and
//! teardown never do. A device is reserved with a `Probing` slot while its
//! handshake runs so a second attach cannot probe it again, and a detach that
//! lands mid-probe removes the reservation so the finished probe is torn
//! down instead of inserted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use qmk_keyboard::{BacklightError, MulticolorLedClass, QmkKeyboard, Registration};
use qmk_transport::{
    is_qmk_raw_hid, CandidateDevice, DeviceBus, DeviceId, LifecycleEvent, LifecycleSink,
    ProtocolError, ReportTransport, TransportConfig, TransportError,
};

enum Slot {
    /// Handshake in flight; the number identifies this attach attempt
    Probing(u64),
    Live(Registration),
}

/// Result of a successful attach call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// New endpoint registered under this name
    Registered(String),
    /// Device already has a registration or a probe in flight
    AlreadyPresent,
    /// Not a raw HID interface
    NotQualifying,
    /// Device detached while it was being probed
    Cancelled,
}

/// One candidate seen by [`BacklightRegistry::scan`]
#[derive(Debug)]
pub struct ScanEntry {
    pub candidate: CandidateDevice,
    pub outcome: Result<AttachOutcome, BacklightError>,
}

pub struct BacklightRegistry {
    bus: Arc<dyn DeviceBus>,
    led_class: Arc<dyn MulticolorLedClass>,
    config: TransportConfig,
    slots: Mutex<HashMap<DeviceId, Slot>>,
    next_attempt: AtomicU64,
}

impl BacklightRegistry {
    pub fn new(
        bus: Arc<dyn DeviceBus>,
        led_class: Arc<dyn MulticolorLedClass>,
        config: TransportConfig,
    ) -> Self {
        Self {
            bus,
            led_class,
            config,
            slots: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(1),
        }
    }

    pub fn bus(&self) -> &Arc<dyn DeviceBus> {
        &self.bus
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` has a live registration
    pub fn contains(&self, id: &DeviceId) -> bool {
        matches!(self.slots.lock().get(id), Some(Slot::Live(_)))
    }

    /// Endpoint names of every live registration, sorted by device
    pub fn names(&self) -> Vec<String> {
        let slots = self.slots.lock();
        let mut live: Vec<(&DeviceId, &Registration)> = slots
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Live(reg) => Some((id, reg)),
                Slot::Probing(_) => None,
            })
            .collect();
        live.sort_by(|a, b| a.0.cmp(b.0));
        live.into_iter().map(|(_, reg)| reg.name().to_string()).collect()
    }

    /// Probe and register one candidate
    ///
    /// Skips (`IncompatibleDevice`, `FeatureDisabled`) come back as errors so
    /// the caller can report them; they leave no trace in the registry.
    pub fn attach(&self, candidate: &CandidateDevice) -> Result<AttachOutcome, BacklightError> {
        if !is_qmk_raw_hid(candidate) {
            return Ok(AttachOutcome::NotQualifying);
        }

        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        {
            let mut slots = self.slots.lock();
            if slots.contains_key(&candidate.id) {
                return Ok(AttachOutcome::AlreadyPresent);
            }
            slots
                .try_reserve(1)
                .map_err(|e| BacklightError::ResourceExhausted(format!("registry slot: {e}")))?;
            slots.insert(candidate.id.clone(), Slot::Probing(attempt));
        }

        let result = self.register(candidate);

        let mut slots = self.slots.lock();
        let reserved = matches!(
            slots.get(&candidate.id),
            Some(Slot::Probing(a)) if *a == attempt
        );
        match result {
            Ok(registration) if reserved => {
                let name = registration.name().to_string();
                slots.insert(candidate.id.clone(), Slot::Live(registration));
                info!("{}: registered {}", candidate.id, name);
                Ok(AttachOutcome::Registered(name))
            }
            Ok(registration) => {
                drop(slots);
                debug!("{}: detached while probing, unregistering", candidate.id);
                registration.unregister();
                Ok(AttachOutcome::Cancelled)
            }
            Err(e) => {
                if reserved {
                    slots.remove(&candidate.id);
                }
                Err(e)
            }
        }
    }

    fn register(&self, candidate: &CandidateDevice) -> Result<Registration, BacklightError> {
        let device = self
            .bus
            .open(candidate, &self.config)
            .map_err(|e| BacklightError::Protocol(ProtocolError::Transport(e)))?;
        let transport = ReportTransport::new(device, self.config)?;
        Registration::create(
            QmkKeyboard::new(transport),
            &candidate.display_name(),
            Arc::clone(&self.led_class),
        )
    }

    /// Unregister whatever is bound to `id`
    ///
    /// Returns `true` if a live registration was torn down.
    pub fn detach(&self, id: &DeviceId) -> bool {
        let slot = self.slots.lock().remove(id);
        match slot {
            Some(Slot::Live(registration)) => {
                registration.unregister();
                info!("{}: unregistered {}", id, registration.name());
                true
            }
            Some(Slot::Probing(_)) => {
                debug!("{}: detached during probe", id);
                false
            }
            None => false,
        }
    }

    /// Attach every interface currently on the bus
    ///
    /// A failing candidate is logged and skipped; the scan always covers
    /// the whole list.
    pub fn scan(&self) -> Result<Vec<ScanEntry>, TransportError> {
        let candidates = self.bus.enumerate()?;
        let mut entries = Vec::new();

        for candidate in candidates {
            if !is_qmk_raw_hid(&candidate) {
                continue;
            }
            let outcome = self.attach(&candidate);
            log_attach(&candidate, &outcome);
            entries.push(ScanEntry { candidate, outcome });
        }

        debug!("Scan done: {} raw HID candidates", entries.len());
        Ok(entries)
    }

    /// Tear down every registration
    pub fn shutdown(&self) {
        let drained: Vec<(DeviceId, Slot)> = self.slots.lock().drain().collect();
        let mut count = 0;
        for (id, slot) in drained {
            if let Slot::Live(registration) = slot {
                registration.unregister();
                debug!("{}: unregistered {}", id, registration.name());
                count += 1;
            }
        }
        if count > 0 {
            info!("Unregistered {} backlight(s)", count);
        }
    }
}

impl Drop for BacklightRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl LifecycleSink for BacklightRegistry {
    fn on_event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Attached(candidate) => {
                if is_qmk_raw_hid(&candidate) {
                    let outcome = self.attach(&candidate);
                    log_attach(&candidate, &outcome);
                }
            }
            LifecycleEvent::Detached(id) => {
                self.detach(&id);
            }
        }
    }
}

fn log_attach(candidate: &CandidateDevice, outcome: &Result<AttachOutcome, BacklightError>) {
    match outcome {
        Ok(_) => {}
        Err(e) if e.is_skip() => info!(
            "{} ({}): skipped: {}",
            candidate.id,
            candidate.display_name(),
            e
        ),
        Err(e) => warn!(
            "{} ({}): probe failed: {}",
            candidate.id,
            candidate.display_name(),
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::led_class::LocalLedClass;
    use qmk_transport::mock::{MockBus, MockReportDevice};
    use qmk_transport::Usage;

    fn setup() -> (Arc<MockBus>, Arc<LocalLedClass>, BacklightRegistry) {
        let bus = Arc::new(MockBus::new());
        let leds = Arc::new(LocalLedClass::new());
        let registry = BacklightRegistry::new(bus.clone(), leds.clone(), TransportConfig::default());
        (bus, leds, registry)
    }

    fn plug(bus: &MockBus, path: &str, product: &str) -> Arc<MockReportDevice> {
        let device = Arc::new(MockReportDevice::new(path));
        bus.plug(device.candidate(product), device.clone());
        device
    }

    #[test]
    fn test_attach_registers_once() {
        let (bus, leds, registry) = setup();
        let device = plug(&bus, "/dev/hidraw1", "Planck");
        let candidate = device.candidate("Planck");

        assert_eq!(
            registry.attach(&candidate).unwrap(),
            AttachOutcome::Registered("Planck:backlight".into())
        );
        assert_eq!(
            registry.attach(&candidate).unwrap(),
            AttachOutcome::AlreadyPresent
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(leds.names(), vec!["Planck:backlight"]);
        assert_eq!(bus.open_count(), 1);
    }

    #[test]
    fn test_non_raw_hid_ignored() {
        let (bus, _leds, registry) = setup();
        let device = plug(&bus, "/dev/hidraw1", "Mouse");
        let mut candidate = device.candidate("Mouse");
        candidate.applications = vec![Usage::new(0x0001, 0x0002)];

        assert_eq!(
            registry.attach(&candidate).unwrap(),
            AttachOutcome::NotQualifying
        );
        assert!(device.writes().is_empty());
    }

    #[test]
    fn test_failed_probe_frees_slot() {
        let (bus, _leds, registry) = setup();
        let device = plug(&bus, "/dev/hidraw1", "Planck");
        device.set_protocol_version(0x0009);
        let candidate = device.candidate("Planck");

        assert!(registry.attach(&candidate).unwrap_err().is_skip());
        assert!(registry.is_empty());

        // firmware update, replug
        device.set_protocol_version(0x000C);
        assert!(matches!(
            registry.attach(&candidate).unwrap(),
            AttachOutcome::Registered(_)
        ));
    }

    #[test]
    fn test_detach_unregisters() {
        let (bus, leds, registry) = setup();
        let device = plug(&bus, "/dev/hidraw1", "Planck");
        registry.attach(&device.candidate("Planck")).unwrap();

        let id = DeviceId::new("/dev/hidraw1");
        assert!(registry.detach(&id));
        assert!(!registry.detach(&id));
        assert!(!registry.contains(&id));
        assert!(leds.names().is_empty());
    }

    #[test]
    fn test_led_class_full_is_resource_exhausted() {
        let bus = Arc::new(MockBus::new());
        let leds = Arc::new(LocalLedClass::with_capacity(1));
        let registry = BacklightRegistry::new(bus.clone(), leds.clone(), TransportConfig::default());
        let first = plug(&bus, "/dev/hidraw1", "Planck");
        let second = plug(&bus, "/dev/hidraw2", "Preonic");

        registry.attach(&first.candidate("Planck")).unwrap();
        let err = registry.attach(&second.candidate("Preonic")).unwrap_err();
        assert!(matches!(err, BacklightError::ResourceExhausted(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(leds.names(), vec!["Planck:backlight"]);
    }

    #[test]
    fn test_shutdown_drains() {
        let (bus, leds, registry) = setup();
        plug(&bus, "/dev/hidraw1", "Planck");
        plug(&bus, "/dev/hidraw2", "Preonic");
        registry.scan().unwrap();
        assert_eq!(
            registry.names(),
            vec!["Planck:backlight", "Preonic:backlight"]
        );

        registry.shutdown();
        assert!(registry.is_empty());
        assert!(leds.names().is_empty());
    }
}
