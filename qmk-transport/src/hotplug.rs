//! Device lifecycle feeds (attach/detach)
//!
//! Two sources produce the same `LifecycleEvent`s: periodic enumeration
//! (`PollingFeed`, works everywhere hidapi does) and udev `hidraw` events
//! (`UdevFeed`, Linux with the `hotplug` feature).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::discovery::DeviceBus;
use crate::error::TransportError;
use crate::types::{DeviceId, LifecycleEvent};

/// Receiver of lifecycle events; called on the feed's thread
pub trait LifecycleSink: Send + Sync {
    fn on_event(&self, event: LifecycleEvent);
}

/// A source of attach/detach events
pub trait LifecycleFeed: Send + Sync {
    /// Start delivering events to `sink` until the handle is stopped
    fn start(&self, sink: Arc<dyn LifecycleSink>) -> Result<FeedHandle, TransportError>;
}

/// Running feed; stops and joins its thread on drop
pub struct FeedHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FeedHandle {
    fn new(shutdown: Arc<AtomicBool>, thread: JoinHandle<()>) -> Self {
        Self {
            shutdown,
            thread: Some(thread),
        }
    }

    /// Signal the feed thread and wait for it to exit
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                warn!("Lifecycle feed thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Enumerates the bus every `interval` and reports the differences
///
/// The first pass reports every present interface not already known as
/// attached.
pub struct PollingFeed {
    bus: Arc<dyn DeviceBus>,
    interval: Duration,
    known: Vec<DeviceId>,
}

impl PollingFeed {
    pub fn new(bus: Arc<dyn DeviceBus>, interval: Duration) -> Self {
        Self {
            bus,
            interval,
            known: Vec::new(),
        }
    }

    /// Treat these interfaces as already reported (e.g. by a load-time scan)
    pub fn with_known(mut self, known: impl IntoIterator<Item = DeviceId>) -> Self {
        self.known = known.into_iter().collect();
        self
    }
}

impl LifecycleFeed for PollingFeed {
    fn start(&self, sink: Arc<dyn LifecycleSink>) -> Result<FeedHandle, TransportError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let bus = Arc::clone(&self.bus);
        let interval = self.interval;
        let known: HashSet<DeviceId> = self.known.iter().cloned().collect();

        let thread = std::thread::Builder::new()
            .name("hid-lifecycle-poll".into())
            .spawn(move || run_poll_loop(bus, sink, known, shutdown_clone, interval))
            .map_err(|e| TransportError::Internal(format!("spawn poll thread: {e}")))?;

        Ok(FeedHandle::new(shutdown, thread))
    }
}

fn run_poll_loop(
    bus: Arc<dyn DeviceBus>,
    sink: Arc<dyn LifecycleSink>,
    mut known: HashSet<DeviceId>,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
) {
    debug!("Lifecycle poll thread started ({:?})", interval);

    while !shutdown.load(Ordering::SeqCst) {
        match bus.enumerate() {
            Ok(devices) => {
                let present: HashSet<DeviceId> = devices.iter().map(|d| d.id.clone()).collect();

                let gone: Vec<DeviceId> = known.difference(&present).cloned().collect();
                for id in gone {
                    known.remove(&id);
                    sink.on_event(LifecycleEvent::Detached(id));
                }

                for device in devices {
                    if known.insert(device.id.clone()) {
                        sink.on_event(LifecycleEvent::Attached(device));
                    }
                }
            }
            Err(e) => warn!("Enumeration failed: {}", e),
        }

        std::thread::park_timeout(interval);
    }

    debug!("Lifecycle poll thread exiting");
}

// ============================================================================
// udev
// ============================================================================

#[cfg(all(target_os = "linux", feature = "hotplug"))]
pub use udev_feed::UdevFeed;

#[cfg(all(target_os = "linux", feature = "hotplug"))]
mod udev_feed {
    use super::*;

    use futures::StreamExt;
    use tokio::sync::oneshot;
    use tokio_udev::{AsyncMonitorSocket, EventType, MonitorBuilder};
    use tracing::info;

    /// How often the event loop checks the shutdown flag when idle
    const SHUTDOWN_CHECK: Duration = Duration::from_millis(250);

    /// udev `hidraw` add/remove events
    ///
    /// Added nodes are looked up on the bus so the sink gets full candidate
    /// info; removals only need the node path.
    pub struct UdevFeed {
        bus: Arc<dyn DeviceBus>,
    }

    impl UdevFeed {
        pub fn new(bus: Arc<dyn DeviceBus>) -> Self {
            Self { bus }
        }
    }

    impl LifecycleFeed for UdevFeed {
        fn start(&self, sink: Arc<dyn LifecycleSink>) -> Result<FeedHandle, TransportError> {
            let shutdown = Arc::new(AtomicBool::new(false));
            let shutdown_clone = Arc::clone(&shutdown);
            let bus = Arc::clone(&self.bus);
            let (ready_tx, ready_rx) = oneshot::channel();

            let thread = std::thread::Builder::new()
                .name("hid-lifecycle-udev".into())
                .spawn(move || {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_io()
                        .enable_time()
                        .build()
                    {
                        Ok(rt) => rt,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    runtime.block_on(run_udev_loop(bus, sink, shutdown_clone, ready_tx));
                })
                .map_err(|e| TransportError::Internal(format!("spawn udev thread: {e}")))?;

            let handle = FeedHandle::new(shutdown, thread);
            match ready_rx.blocking_recv() {
                Ok(Ok(())) => Ok(handle),
                Ok(Err(msg)) => Err(TransportError::Internal(format!("udev monitor: {msg}"))),
                Err(_) => Err(TransportError::Internal("udev thread exited".into())),
            }
        }
    }

    async fn run_udev_loop(
        bus: Arc<dyn DeviceBus>,
        sink: Arc<dyn LifecycleSink>,
        shutdown: Arc<AtomicBool>,
        ready: oneshot::Sender<Result<(), String>>,
    ) {
        let monitor = MonitorBuilder::new()
            .and_then(|b| b.match_subsystem("hidraw"))
            .and_then(|b| b.listen())
            .and_then(AsyncMonitorSocket::new);
        let mut monitor = match monitor {
            Ok(m) => {
                let _ = ready.send(Ok(()));
                m
            }
            Err(e) => {
                let _ = ready.send(Err(e.to_string()));
                return;
            }
        };
        info!("udev hidraw monitor started");

        while !shutdown.load(Ordering::SeqCst) {
            let event = match tokio::time::timeout(SHUTDOWN_CHECK, monitor.next()).await {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    warn!("udev monitor error: {}", e);
                    continue;
                }
                Ok(Some(Ok(event))) => event,
            };

            let Some(node) = event
                .device()
                .devnode()
                .map(|p| p.to_string_lossy().into_owned())
            else {
                continue;
            };
            let id = DeviceId::new(node);

            match event.event_type() {
                EventType::Add => match bus.enumerate() {
                    Ok(devices) => {
                        if let Some(device) = devices.into_iter().find(|d| d.id == id) {
                            sink.on_event(LifecycleEvent::Attached(device));
                        } else {
                            debug!("{}: added but not visible on the bus", id);
                        }
                    }
                    Err(e) => warn!("Enumeration after add failed: {}", e),
                },
                EventType::Remove => sink.on_event(LifecycleEvent::Detached(id)),
                _ => {}
            }
        }

        debug!("udev hidraw monitor exiting");
    }
}
