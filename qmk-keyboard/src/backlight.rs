//! Backlight state machine
//!
//! ```text
//! Unprobed -> Probed(version) -> RgbMatrixConfirmed -> Registered
//!          -> Active <-> Updating -> Unregistering -> Removed
//! ```
//!
//! The LED class calls back through a `Weak<Backlight>`, so a callback that
//! races teardown either finishes its exchanges before the transport is
//! released or sees the liveness flag down and returns `DeviceGone`.
//! Teardown unregisters the endpoint before it takes the I/O gate, so an LED
//! class that drains running callbacks in `unregister` cannot deadlock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use qmk_transport::{DeviceId, ProtocolVersion, RgbMatrixStatus};

use crate::error::BacklightError;
use crate::led::{RgbColor, RgbMatrixEffect};
use crate::led_class::{
    BrightnessSetFn, Intensities, LedEndpoint, LedHandle, MulticolorLedClass, CHANNEL_COUNT,
    MAX_BRIGHTNESS,
};
use crate::QmkKeyboard;

/// Lifecycle of one backlight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklightState {
    Unprobed,
    Probed(u16),
    RgbMatrixConfirmed,
    Registered,
    Active,
    Updating,
    Unregistering,
    Removed,
}

impl fmt::Display for BacklightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unprobed => write!(f, "unprobed"),
            Self::Probed(v) => write!(f, "probed (0x{v:04X})"),
            Self::RgbMatrixConfirmed => write!(f, "rgb matrix confirmed"),
            Self::Registered => write!(f, "registered"),
            Self::Active => write!(f, "active"),
            Self::Updating => write!(f, "updating"),
            Self::Unregistering => write!(f, "unregistering"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// One keyboard's RGB matrix exposed as a multi-color light
pub struct Backlight {
    id: DeviceId,
    name: String,
    intensities: Intensities,
    alive: AtomicBool,
    state: Mutex<BacklightState>,
    /// I/O gate; `None` once the transport has been released
    io: Mutex<Option<QmkKeyboard>>,
    endpoint: Mutex<Option<(Arc<dyn MulticolorLedClass>, LedHandle)>>,
}

impl Backlight {
    /// `product` names the endpoint `"<product>:backlight"`
    pub fn new(keyboard: QmkKeyboard, product: &str) -> Self {
        Self {
            id: keyboard.device_id().clone(),
            name: format!("{product}:backlight"),
            intensities: Arc::new(Mutex::new(RgbColor::default())),
            alive: AtomicBool::new(false),
            state: Mutex::new(BacklightState::Unprobed),
            io: Mutex::new(Some(keyboard)),
            endpoint: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BacklightState {
        *self.state.lock()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Intensities as last written by the LED class
    pub fn color(&self) -> RgbColor {
        *self.intensities.lock()
    }

    fn transition(&self, next: BacklightState) {
        let mut state = self.state.lock();
        trace!("{}: {} -> {}", self.id, *state, next);
        *state = next;
    }

    /// Like `transition`, but only out of `from`
    fn transition_from(&self, from: BacklightState, next: BacklightState) {
        let mut state = self.state.lock();
        if *state == from {
            trace!("{}: {} -> {}", self.id, *state, next);
            *state = next;
        }
    }

    /// Check the VIA protocol version and that the RGB matrix is compiled in
    ///
    /// Any failure to read a supported version is `IncompatibleDevice`.
    pub fn probe(&self) -> Result<ProtocolVersion, BacklightError> {
        let io = self.io.lock();
        let keyboard = io.as_ref().ok_or(BacklightError::DeviceGone)?;

        let version = match keyboard.protocol_version() {
            Ok(v) => v,
            Err(e) => {
                debug!("{}: protocol version query failed: {}", self.id, e);
                return Err(BacklightError::IncompatibleDevice { version: None });
            }
        };
        if !version.is_supported() {
            return Err(BacklightError::IncompatibleDevice {
                version: Some(version.0),
            });
        }
        self.transition(BacklightState::Probed(version.0));

        match keyboard.rgb_matrix_status()? {
            RgbMatrixStatus::Disabled => Err(BacklightError::FeatureDisabled),
            RgbMatrixStatus::Enabled { brightness } => {
                debug!("{}: RGB matrix brightness {}", self.id, brightness);
                self.transition(BacklightState::RgbMatrixConfirmed);
                Ok(version)
            }
        }
    }

    /// Hand a multi-color endpoint to the LED class and go live
    pub fn register(
        self: &Arc<Self>,
        led_class: Arc<dyn MulticolorLedClass>,
    ) -> Result<LedHandle, BacklightError> {
        let weak = Arc::downgrade(self);
        let on_brightness_set: BrightnessSetFn =
            Arc::new(move |brightness: u8| match weak.upgrade() {
                Some(backlight) => backlight.brightness_set(brightness),
                None => Err(BacklightError::DeviceGone),
            });

        let endpoint = LedEndpoint {
            name: self.name.clone(),
            channel_count: CHANNEL_COUNT,
            max_brightness: MAX_BRIGHTNESS,
            brightness: MAX_BRIGHTNESS,
            intensities: Arc::clone(&self.intensities),
            on_brightness_set,
        };

        let handle = led_class
            .register(endpoint)
            .map_err(|e| BacklightError::ResourceExhausted(e.to_string()))?;
        *self.endpoint.lock() = Some((led_class, handle));
        self.transition(BacklightState::Registered);

        self.alive.store(true, Ordering::Release);
        self.transition(BacklightState::Active);
        Ok(handle)
    }

    /// Push the stored intensities to the keyboard
    ///
    /// Three exchanges in fixed order: value, solid effect, hue/saturation.
    /// The first failure aborts; the next successful call rewrites all three.
    pub fn brightness_set(&self, brightness: u8) -> Result<(), BacklightError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(BacklightError::DeviceGone);
        }
        let io = self.io.lock();
        // teardown may have won the gate
        let Some(keyboard) = io.as_ref() else {
            return Err(BacklightError::DeviceGone);
        };
        if !self.alive.load(Ordering::Acquire) {
            return Err(BacklightError::DeviceGone);
        }

        // teardown may have started after the check; it owns the state then
        self.transition_from(BacklightState::Active, BacklightState::Updating);
        let color = self.color();
        let hsv = color.to_hsv();
        debug!(
            "{}: set brightness {} color {} -> h={} s={} v={}",
            self.id, brightness, color, hsv.h, hsv.s, hsv.v
        );

        let result = keyboard
            .set_rgb_brightness(hsv.v)
            .and_then(|()| keyboard.set_rgb_effect(RgbMatrixEffect::SolidColor))
            .and_then(|()| keyboard.set_rgb_color(hsv.h, hsv.s));
        self.transition_from(BacklightState::Updating, BacklightState::Active);

        if let Err(ref e) = result {
            warn!("{}: error setting RGB brightness: {}", self.id, e);
        }
        result.map_err(BacklightError::from)
    }

    /// Stop callbacks, remove the endpoint, wait out an in-flight callback,
    /// then release the transport
    ///
    /// Returns `false` if teardown already happened.
    fn teardown(&self) -> bool {
        self.alive.store(false, Ordering::Release);
        {
            let mut state = self.state.lock();
            if matches!(
                *state,
                BacklightState::Unregistering | BacklightState::Removed
            ) {
                return false;
            }
            trace!("{}: {} -> {}", self.id, *state, BacklightState::Unregistering);
            *state = BacklightState::Unregistering;
        }

        // no lock held here: the LED class may wait for a running callback
        let endpoint = self.endpoint.lock().take();
        if let Some((led_class, handle)) = endpoint {
            led_class.unregister(handle);
        }

        self.io.lock().take();
        self.transition(BacklightState::Removed);
        true
    }
}

impl fmt::Debug for Backlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backlight")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// A probed and registered backlight; tears itself down on drop
#[derive(Debug)]
pub struct Registration {
    backlight: Arc<Backlight>,
}

impl Registration {
    /// Probe, then register with the LED class
    ///
    /// On failure nothing stays registered and the transport is dropped.
    pub fn create(
        keyboard: QmkKeyboard,
        product: &str,
        led_class: Arc<dyn MulticolorLedClass>,
    ) -> Result<Self, BacklightError> {
        let backlight = Arc::new(Backlight::new(keyboard, product));
        let version = backlight.probe()?;
        backlight.register(led_class)?;
        debug!(
            "{}: registered {} (VIA 0x{:04X})",
            backlight.id, backlight.name, version.0
        );
        Ok(Self { backlight })
    }

    pub fn backlight(&self) -> &Arc<Backlight> {
        &self.backlight
    }

    pub fn device_id(&self) -> &DeviceId {
        self.backlight.device_id()
    }

    pub fn name(&self) -> &str {
        self.backlight.name()
    }

    /// Idempotent; safe to call while a callback is running
    pub fn unregister(&self) {
        if self.backlight.teardown() {
            debug!("{}: unregistered {}", self.backlight.id, self.backlight.name);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedError;
    use qmk_transport::mock::MockReportDevice;
    use qmk_transport::{ProtocolError, ReportTransport, TransportConfig};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct TestLedClass {
        endpoints: Mutex<HashMap<LedHandle, LedEndpoint>>,
        next: AtomicU64,
        reject: AtomicBool,
        /// Sleep inside `unregister` after removing the endpoint
        unregister_delay: Mutex<Duration>,
        unregistering: AtomicBool,
        /// Callbacks started through `call` and not yet returned
        in_flight: AtomicUsize,
        /// Make `unregister` wait for `in_flight` to drain, like the kernel core
        drain_on_unregister: AtomicBool,
        drain_timed_out: AtomicBool,
    }

    impl TestLedClass {
        fn endpoint(&self) -> Option<LedEndpoint> {
            self.endpoints.lock().values().next().cloned()
        }

        fn call(&self, endpoint: &LedEndpoint, brightness: u8) -> Result<(), BacklightError> {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let result = (endpoint.on_brightness_set)(brightness);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    impl MulticolorLedClass for TestLedClass {
        fn register(&self, endpoint: LedEndpoint) -> Result<LedHandle, LedError> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(LedError::Rejected("out of memory".into()));
            }
            let handle = LedHandle(self.next.fetch_add(1, Ordering::SeqCst));
            self.endpoints.lock().insert(handle, endpoint);
            Ok(handle)
        }

        fn unregister(&self, handle: LedHandle) {
            self.endpoints.lock().remove(&handle);
            self.unregistering.store(true, Ordering::SeqCst);

            if self.drain_on_unregister.load(Ordering::SeqCst) {
                let deadline = Instant::now() + Duration::from_secs(2);
                while self.in_flight.load(Ordering::SeqCst) > 0 {
                    if Instant::now() > deadline {
                        self.drain_timed_out.store(true, Ordering::SeqCst);
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            std::thread::sleep(*self.unregister_delay.lock());
        }
    }

    fn keyboard(device: &Arc<MockReportDevice>) -> QmkKeyboard {
        let transport = ReportTransport::new(device.clone(), TransportConfig::default()).unwrap();
        QmkKeyboard::new(transport)
    }

    fn registered(device: &Arc<MockReportDevice>) -> (Registration, Arc<TestLedClass>) {
        let class = Arc::new(TestLedClass::default());
        let reg = Registration::create(keyboard(device), "Planck", class.clone()).unwrap();
        (reg, class)
    }

    #[test]
    fn test_register_exposes_endpoint() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        let (reg, class) = registered(&device);

        let endpoint = class.endpoint().unwrap();
        assert_eq!(endpoint.name, "Planck:backlight");
        assert_eq!(endpoint.channel_count, 3);
        assert_eq!(endpoint.max_brightness, 255);
        assert_eq!(endpoint.brightness, 255);
        assert_eq!(reg.backlight().state(), BacklightState::Active);
        assert!(reg.backlight().is_alive());
    }

    #[test]
    fn test_incompatible_version_skips() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        device.set_protocol_version(0x000B);
        let class = Arc::new(TestLedClass::default());

        let err = Registration::create(keyboard(&device), "Planck", class.clone()).unwrap_err();
        assert!(matches!(
            err,
            BacklightError::IncompatibleDevice {
                version: Some(0x000B)
            }
        ));
        assert!(class.endpoint().is_none());
        // feature query never sent
        assert_eq!(device.commands(0), vec![vec![0x01]]);
    }

    #[test]
    fn test_unanswered_version_is_incompatible() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        device.fail_writes(true);
        let class = Arc::new(TestLedClass::default());

        let err = Registration::create(keyboard(&device), "Planck", class).unwrap_err();
        assert!(matches!(
            err,
            BacklightError::IncompatibleDevice { version: None }
        ));
    }

    #[test]
    fn test_disabled_rgb_matrix_skips() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        device.set_rgb_matrix_enabled(false);
        let class = Arc::new(TestLedClass::default());

        let err = Registration::create(keyboard(&device), "Planck", class.clone()).unwrap_err();
        assert!(matches!(err, BacklightError::FeatureDisabled));
        assert!(class.endpoint().is_none());
    }

    #[test]
    fn test_unhandled_channel_reply_skips() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        let mut version = vec![0u8; 33];
        version[1..4].copy_from_slice(&[0x01, 0x00, 0x0C]);
        device.queue_reply(version);
        // RGB matrix compiled out: command id replaced, request echoed
        let mut unhandled = vec![0u8; 33];
        unhandled[1..4].copy_from_slice(&[0xFF, 0x03, 0x01]);
        device.queue_reply(unhandled);
        let class = Arc::new(TestLedClass::default());

        let err = Registration::create(keyboard(&device), "Planck", class.clone()).unwrap_err();
        assert!(matches!(err, BacklightError::FeatureDisabled));
        assert!(class.endpoint().is_none());
        assert_eq!(device.read_count(), 2);
    }

    #[test]
    fn test_rejected_endpoint_is_resource_exhausted() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        let class = Arc::new(TestLedClass::default());
        class.reject.store(true, Ordering::SeqCst);

        let err = Registration::create(keyboard(&device), "Planck", class.clone()).unwrap_err();
        assert!(matches!(err, BacklightError::ResourceExhausted(_)));
        assert!(class.endpoint().is_none());
    }

    #[test]
    fn test_brightness_set_sends_three_exchanges() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        let (_reg, class) = registered(&device);
        let endpoint = class.endpoint().unwrap();
        let before = device.writes().len();

        *endpoint.intensities.lock() = RgbColor::new(0, 255, 0);
        (endpoint.on_brightness_set)(255).unwrap();

        let sent = device.commands(4)[before..].to_vec();
        assert_eq!(
            sent,
            vec![
                vec![0x07, 0x03, 0x01, 0xFF, 0x00],
                vec![0x07, 0x03, 0x02, 0x01, 0x00],
                vec![0x07, 0x03, 0x04, 85, 0xFF],
            ]
        );
    }

    #[test]
    fn test_brightness_set_stops_at_first_failure() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        let (reg, _class) = registered(&device);
        let before = device.writes().len();

        // stale replies for every read of the first exchange
        for _ in 0..10 {
            let mut stale = vec![0u8; 33];
            stale[1] = 0x02;
            device.queue_reply(stale);
        }
        let err = reg.backlight().brightness_set(255).unwrap_err();
        assert!(matches!(
            err,
            BacklightError::Protocol(ProtocolError::ExhaustedRetries { cmd: 0x07, .. })
        ));
        assert_eq!(device.writes().len() - before, 1);
        assert_eq!(reg.backlight().state(), BacklightState::Active);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        let (reg, class) = registered(&device);
        let endpoint = class.endpoint().unwrap();

        reg.unregister();
        reg.unregister();

        assert_eq!(reg.backlight().state(), BacklightState::Removed);
        assert!(class.endpoint().is_none());
        let writes = device.writes().len();
        assert!(matches!(
            (endpoint.on_brightness_set)(255),
            Err(BacklightError::DeviceGone)
        ));
        assert_eq!(device.writes().len(), writes);
    }

    #[test]
    fn test_callback_after_drop_is_device_gone() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        let (reg, class) = registered(&device);
        let endpoint = class.endpoint().unwrap();
        drop(reg);

        assert!(class.endpoint().is_none());
        assert!(matches!(
            (endpoint.on_brightness_set)(255),
            Err(BacklightError::DeviceGone)
        ));
    }

    #[test]
    fn test_unregister_waits_for_inflight_callback() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        let (reg, _class) = registered(&device);
        device.set_read_delay(Duration::from_millis(30));
        let before = device.writes().len();

        let backlight = Arc::clone(reg.backlight());
        let worker = std::thread::spawn(move || backlight.brightness_set(255));

        // wait until the callback is inside its first exchange
        while device.writes().len() == before {
            std::thread::sleep(Duration::from_millis(1));
        }
        reg.unregister();

        // teardown could only proceed once all three exchanges were done
        assert_eq!(device.writes().len() - before, 3);
        assert_eq!(reg.backlight().state(), BacklightState::Removed);
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn test_callback_during_teardown_is_device_gone() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        let (reg, class) = registered(&device);
        *class.unregister_delay.lock() = Duration::from_millis(50);
        let endpoint = class.endpoint().unwrap();
        let backlight = Arc::clone(reg.backlight());
        let before = device.writes().len();

        let teardown = std::thread::spawn(move || reg.unregister());
        while !class.unregistering.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }

        // teardown is still inside the LED class
        assert!(matches!(
            (endpoint.on_brightness_set)(255),
            Err(BacklightError::DeviceGone)
        ));
        teardown.join().unwrap();
        assert_eq!(device.writes().len(), before);
        assert_eq!(backlight.state(), BacklightState::Removed);
    }

    #[test]
    fn test_draining_led_class_does_not_deadlock() {
        let device = Arc::new(MockReportDevice::new("/dev/hidraw2"));
        let (reg, class) = registered(&device);
        class.drain_on_unregister.store(true, Ordering::SeqCst);
        device.set_read_delay(Duration::from_millis(30));
        let endpoint = class.endpoint().unwrap();
        let before = device.writes().len();

        let worker = {
            let class = Arc::clone(&class);
            std::thread::spawn(move || class.call(&endpoint, 255))
        };
        while device.writes().len() == before {
            std::thread::sleep(Duration::from_millis(1));
        }
        reg.unregister();

        assert!(!class.drain_timed_out.load(Ordering::SeqCst));
        assert!(worker.join().unwrap().is_ok());
        assert_eq!(device.writes().len() - before, 3);
        assert_eq!(reg.backlight().state(), BacklightState::Removed);
    }
}
