//! RGB matrix backlight control for QMK keyboards
//!
//! [`QmkKeyboard`] wraps a [`ReportTransport`] with the handful of VIA
//! requests the backlight needs. [`backlight`] builds the probe/register/
//! teardown state machine on top of it and hands a multi-color endpoint to
//! a [`MulticolorLedClass`].

pub mod backlight;
pub mod error;
pub mod led;
pub mod led_class;

pub use backlight::{Backlight, BacklightState, Registration};
pub use error::{BacklightError, LedError};
pub use led::{rgb_to_hsv, Hsv, RgbColor, RgbMatrixEffect};
pub use led_class::{
    BrightnessSetFn, Intensities, LedEndpoint, LedHandle, MulticolorLedClass, CHANNEL_COUNT,
    MAX_BRIGHTNESS,
};

use qmk_transport::{
    DeviceId, GetProtocolVersion, ProtocolError, ProtocolVersion, QueryRgbMatrix,
    ReportTransport, RgbMatrixStatus, SetRgbBrightness, SetRgbColor, SetRgbEffect,
};

/// VIA requests for one keyboard
#[derive(Debug)]
pub struct QmkKeyboard {
    transport: ReportTransport,
}

impl QmkKeyboard {
    pub fn new(transport: ReportTransport) -> Self {
        Self { transport }
    }

    pub fn device_id(&self) -> &DeviceId {
        self.transport.device_id()
    }

    pub fn transport(&self) -> &ReportTransport {
        &self.transport
    }

    pub fn protocol_version(&self) -> Result<ProtocolVersion, ProtocolError> {
        self.transport.query(&GetProtocolVersion)
    }

    /// Query the RGB matrix brightness, or learn that the feature is absent
    pub fn rgb_matrix_status(&self) -> Result<RgbMatrixStatus, ProtocolError> {
        match self.transport.query(&QueryRgbMatrix) {
            Err(ProtocolError::Unhandled { .. }) => Ok(RgbMatrixStatus::Disabled),
            other => other,
        }
    }

    pub fn set_rgb_brightness(&self, value: u8) -> Result<(), ProtocolError> {
        self.transport.send(&SetRgbBrightness::new(value))?;
        Ok(())
    }

    pub fn set_rgb_effect(&self, effect: RgbMatrixEffect) -> Result<(), ProtocolError> {
        self.transport.send(&SetRgbEffect::new(effect.as_u8()))?;
        Ok(())
    }

    pub fn set_rgb_color(&self, hue: u8, saturation: u8) -> Result<(), ProtocolError> {
        self.transport.send(&SetRgbColor::new(hue, saturation))?;
        Ok(())
    }
}
