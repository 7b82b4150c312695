//! Multi-color LED class interface
//!
//! The host LED subsystem is a collaborator: it owns named endpoints, holds
//! the channel intensities users write, and calls back into the driver when
//! brightness is set.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{BacklightError, LedError};
use crate::led::RgbColor;

/// Red, green, blue
pub const CHANNEL_COUNT: usize = 3;

/// Full scale for brightness and per-channel intensity
pub const MAX_BRIGHTNESS: u8 = 255;

/// Brightness-set callback handed to the LED class
pub type BrightnessSetFn = Arc<dyn Fn(u8) -> Result<(), BacklightError> + Send + Sync>;

/// Channel intensities shared between the LED class and the driver
pub type Intensities = Arc<Mutex<RgbColor>>;

/// Everything the LED class needs to expose one RGB light
#[derive(Clone)]
pub struct LedEndpoint {
    pub name: String,
    pub channel_count: usize,
    pub max_brightness: u8,
    pub brightness: u8,
    pub intensities: Intensities,
    pub on_brightness_set: BrightnessSetFn,
}

impl fmt::Debug for LedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedEndpoint")
            .field("name", &self.name)
            .field("channel_count", &self.channel_count)
            .field("max_brightness", &self.max_brightness)
            .field("brightness", &self.brightness)
            .field("intensities", &*self.intensities.lock())
            .finish()
    }
}

/// Opaque token for a registered endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LedHandle(pub u64);

/// Registration primitive of the host LED subsystem
pub trait MulticolorLedClass: Send + Sync {
    fn register(&self, endpoint: LedEndpoint) -> Result<LedHandle, LedError>;

    /// Remove an endpoint; the callback is never invoked afterwards
    ///
    /// May block until a callback already running on the endpoint returns.
    fn unregister(&self, handle: LedHandle);
}
