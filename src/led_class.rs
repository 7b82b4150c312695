//! In-process multi-color LED class
//!
//! Hosts endpoints the way the kernel LED core would: unique names (a
//! clashing name gets `_1`, `_2`, ... appended), writable channel
//! intensities and a brightness setter that calls back into the driver.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use qmk_keyboard::{
    BacklightError, LedEndpoint, LedError, LedHandle, MulticolorLedClass, RgbColor,
};

/// Errors from driving an endpoint
#[derive(Error, Debug)]
pub enum SetColorError {
    #[error(transparent)]
    Led(#[from] LedError),

    #[error(transparent)]
    Backlight(#[from] BacklightError),
}

struct Entry {
    name: String,
    endpoint: LedEndpoint,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<LedHandle, Entry>,
    next: u64,
}

#[derive(Default)]
pub struct LocalLedClass {
    inner: Mutex<Inner>,
    capacity: Option<usize>,
}

impl LocalLedClass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse registrations beyond `capacity` endpoints
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::default(),
            capacity: Some(capacity),
        }
    }

    /// Registered endpoint names, sorted
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner.entries.values().map(|e| e.name.clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current channel intensities of an endpoint
    pub fn color(&self, name: &str) -> Option<RgbColor> {
        let inner = self.inner.lock();
        inner
            .entries
            .values()
            .find(|e| e.name == name)
            .map(|e| *e.endpoint.intensities.lock())
    }

    /// Write the channel intensities, then apply them at full brightness
    ///
    /// The callback runs without the class lock held.
    pub fn set_color(&self, name: &str, color: RgbColor) -> Result<(), SetColorError> {
        let endpoint = {
            let inner = self.inner.lock();
            inner
                .entries
                .values()
                .find(|e| e.name == name)
                .map(|e| e.endpoint.clone())
                .ok_or_else(|| LedError::NotFound(name.to_string()))?
        };

        *endpoint.intensities.lock() = color;
        (endpoint.on_brightness_set)(endpoint.brightness)?;
        Ok(())
    }

    fn unique_name(inner: &Inner, base: &str) -> String {
        let taken = |candidate: &str| inner.entries.values().any(|e| e.name == candidate);
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !taken(candidate.as_str()))
            .unwrap_or_else(|| base.to_string())
    }
}

impl MulticolorLedClass for LocalLedClass {
    fn register(&self, endpoint: LedEndpoint) -> Result<LedHandle, LedError> {
        let mut inner = self.inner.lock();
        if self.capacity.is_some_and(|cap| inner.entries.len() >= cap) {
            return Err(LedError::Rejected(format!(
                "no room for {} ({} endpoints)",
                endpoint.name,
                inner.entries.len()
            )));
        }

        let name = Self::unique_name(&inner, &endpoint.name);
        let handle = LedHandle(inner.next);
        inner.next += 1;
        debug!(
            "LED class: registered {} ({} channels, max {})",
            name, endpoint.channel_count, endpoint.max_brightness
        );
        inner.entries.insert(handle, Entry { name, endpoint });
        Ok(handle)
    }

    fn unregister(&self, handle: LedHandle) {
        if let Some(entry) = self.inner.lock().entries.remove(&handle) {
            debug!("LED class: unregistered {}", entry.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn endpoint(name: &str, calls: Arc<AtomicUsize>) -> LedEndpoint {
        LedEndpoint {
            name: name.to_string(),
            channel_count: 3,
            max_brightness: 255,
            brightness: 255,
            intensities: Arc::new(Mutex::new(RgbColor::default())),
            on_brightness_set: Arc::new(move |_: u8| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        }
    }

    #[test]
    fn test_duplicate_names_get_suffix() {
        let class = LocalLedClass::new();
        let calls = Arc::new(AtomicUsize::new(0));
        class.register(endpoint("Planck:backlight", calls.clone())).unwrap();
        let second = class.register(endpoint("Planck:backlight", calls.clone())).unwrap();
        class.register(endpoint("Planck:backlight", calls)).unwrap();

        assert_eq!(
            class.names(),
            vec!["Planck:backlight", "Planck:backlight_1", "Planck:backlight_2"]
        );

        class.unregister(second);
        assert_eq!(class.names(), vec!["Planck:backlight", "Planck:backlight_2"]);
    }

    #[test]
    fn test_set_color_runs_callback() {
        let class = LocalLedClass::new();
        let calls = Arc::new(AtomicUsize::new(0));
        class.register(endpoint("Corne:backlight", calls.clone())).unwrap();

        class.set_color("Corne:backlight", RgbColor::new(1, 2, 3)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(class.color("Corne:backlight"), Some(RgbColor::new(1, 2, 3)));

        assert!(matches!(
            class.set_color("Lily58:backlight", RgbColor::default()),
            Err(SetColorError::Led(LedError::NotFound(_)))
        ));
    }

    #[test]
    fn test_capacity() {
        let class = LocalLedClass::with_capacity(1);
        let calls = Arc::new(AtomicUsize::new(0));
        class.register(endpoint("a:backlight", calls.clone())).unwrap();
        assert!(matches!(
            class.register(endpoint("b:backlight", calls)),
            Err(LedError::Rejected(_))
        ));
        assert_eq!(class.len(), 1);
    }
}
