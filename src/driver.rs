//! Driver load/unload
//!
//! `load` scans what is already present and starts a lifecycle feed that
//! keeps the registry in sync; `unload` stops the feed before tearing the
//! registrations down.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use qmk_keyboard::MulticolorLedClass;
use qmk_transport::protocol::timing;
use qmk_transport::{
    DeviceBus, FeedHandle, LifecycleFeed, PollingFeed, TransportConfig, TransportError,
};

use crate::registry::{AttachOutcome, BacklightRegistry, ScanEntry};

/// Where attach/detach events come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedKind {
    /// Periodic enumeration
    #[default]
    Poll,
    /// udev `hidraw` events (Linux, `hotplug` feature)
    Udev,
    /// Load-time scan only
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    pub transport: TransportConfig,
    pub poll_interval: Duration,
    pub feed: FeedKind,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            poll_interval: Duration::from_millis(timing::POLL_INTERVAL_MS),
            feed: FeedKind::default(),
        }
    }
}

pub struct Driver {
    registry: Arc<BacklightRegistry>,
    feed: Option<FeedHandle>,
    loaded: Vec<ScanEntry>,
}

impl Driver {
    /// Register every present keyboard and start following hot-plug
    pub fn load(
        bus: Arc<dyn DeviceBus>,
        led_class: Arc<dyn MulticolorLedClass>,
        config: DriverConfig,
    ) -> Result<Self, TransportError> {
        let registry = Arc::new(BacklightRegistry::new(
            Arc::clone(&bus),
            led_class,
            config.transport,
        ));

        let (loaded, feed) = match config.feed {
            FeedKind::Poll => {
                let loaded = registry.scan()?;
                let feed = PollingFeed::new(Arc::clone(&bus), config.poll_interval)
                    .with_known(loaded.iter().map(|e| e.candidate.id.clone()));
                let handle = feed.start(registry.clone())?;
                (loaded, Some(handle))
            }
            FeedKind::Udev => {
                // listen first so nothing plugged during the scan is lost
                let handle = start_udev(&bus, &registry, config.poll_interval)?;
                (registry.scan()?, Some(handle))
            }
            FeedKind::None => (registry.scan()?, None),
        };

        let registered = loaded
            .iter()
            .filter(|e| matches!(e.outcome, Ok(AttachOutcome::Registered(_))))
            .count();
        info!(
            "Driver loaded: {} of {} raw HID device(s) registered, feed {:?}",
            registered,
            loaded.len(),
            config.feed
        );

        Ok(Self {
            registry,
            feed,
            loaded,
        })
    }

    pub fn registry(&self) -> &Arc<BacklightRegistry> {
        &self.registry
    }

    /// Per-candidate results of the load-time scan
    pub fn scan_results(&self) -> &[ScanEntry] {
        &self.loaded
    }

    pub fn is_following(&self) -> bool {
        self.feed.as_ref().is_some_and(|f| f.is_running())
    }

    /// Stop the feed, then unregister everything; safe to call twice
    pub fn unload(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            feed.stop();
        }
        self.registry.shutdown();
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(all(target_os = "linux", feature = "hotplug"))]
fn start_udev(
    bus: &Arc<dyn DeviceBus>,
    registry: &Arc<BacklightRegistry>,
    _fallback_interval: Duration,
) -> Result<FeedHandle, TransportError> {
    qmk_transport::UdevFeed::new(Arc::clone(bus)).start(registry.clone())
}

#[cfg(not(all(target_os = "linux", feature = "hotplug")))]
fn start_udev(
    bus: &Arc<dyn DeviceBus>,
    registry: &Arc<BacklightRegistry>,
    fallback_interval: Duration,
) -> Result<FeedHandle, TransportError> {
    tracing::warn!("Built without udev support, polling instead");
    PollingFeed::new(Arc::clone(bus), fallback_interval).start(registry.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::led_class::LocalLedClass;
    use qmk_transport::mock::{MockBus, MockReportDevice};

    #[test]
    fn test_load_scan_only() {
        let bus = Arc::new(MockBus::new());
        let device = Arc::new(MockReportDevice::new("/dev/hidraw0"));
        bus.plug(device.candidate("Planck"), device.clone());
        let leds = Arc::new(LocalLedClass::new());

        let config = DriverConfig {
            feed: FeedKind::None,
            ..DriverConfig::default()
        };
        let mut driver = Driver::load(bus, leds.clone(), config).unwrap();
        assert_eq!(driver.registry().len(), 1);
        assert_eq!(driver.scan_results().len(), 1);
        assert!(!driver.is_following());

        driver.unload();
        driver.unload();
        assert!(leds.is_empty());
    }
}
