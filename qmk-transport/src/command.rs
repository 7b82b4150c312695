//! Type-safe VIA command builders and reply parsers
//!
//! Wire layouts (after the report id):
//!
//! | command               | bytes                    |
//! |-----------------------|--------------------------|
//! | get protocol version  | `01`                     |
//! | query rgb matrix      | `08 03 01`               |
//! | set brightness        | `07 03 01 v`             |
//! | set effect            | `07 03 02 effect`        |
//! | set color             | `07 03 04 hue sat`       |

use crate::protocol::{cmd, via};

// =============================================================================
// Core Traits
// =============================================================================

/// A command that can be serialized to a VIA frame
pub trait ViaCommand {
    /// Command byte (first payload byte)
    const CMD: u8;

    /// Payload bytes the caller wants back after the echoed command id
    const REPLY_LEN: usize;

    /// Arguments following the command byte
    fn to_args(&self) -> Vec<u8>;
}

/// A reply decoded from the payload after the echoed command id
pub trait ViaResponse: Sized {
    fn from_payload(payload: &[u8]) -> Self;
}

// =============================================================================
// Queries
// =============================================================================

/// Ask the firmware which VIA protocol revision it speaks
#[derive(Debug, Clone, Copy, Default)]
pub struct GetProtocolVersion;

impl ViaCommand for GetProtocolVersion {
    const CMD: u8 = cmd::GET_PROTOCOL_VERSION;
    const REPLY_LEN: usize = 2;

    fn to_args(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Protocol version reply (big-endian on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub fn is_supported(&self) -> bool {
        self.0 == via::PROTOCOL_VERSION
    }
}

impl ViaResponse for ProtocolVersion {
    fn from_payload(payload: &[u8]) -> Self {
        let hi = payload.first().copied().unwrap_or(0);
        let lo = payload.get(1).copied().unwrap_or(0);
        Self(u16::from_be_bytes([hi, lo]))
    }
}

/// Read the RGB matrix brightness; doubles as a feature probe
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryRgbMatrix;

impl ViaCommand for QueryRgbMatrix {
    const CMD: u8 = cmd::CUSTOM_GET_VALUE;
    const REPLY_LEN: usize = 3;

    fn to_args(&self) -> Vec<u8> {
        vec![via::CHANNEL_RGB_MATRIX, via::RGB_MATRIX_BRIGHTNESS]
    }
}

/// Reply to [`QueryRgbMatrix`]
///
/// A firmware without the RGB matrix channel answers with the unhandled
/// marker, which surfaces as `ProtocolError::Unhandled` before any payload
/// is parsed; callers map that to `Disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgbMatrixStatus {
    Disabled,
    Enabled { brightness: u8 },
}

impl ViaResponse for RgbMatrixStatus {
    /// Payload is `[channel, value id, brightness]`
    fn from_payload(payload: &[u8]) -> Self {
        Self::Enabled {
            brightness: payload.get(2).copied().unwrap_or(0),
        }
    }
}

// =============================================================================
// RGB matrix setters
// =============================================================================

/// Set RGB matrix value (brightness)
#[derive(Debug, Clone, Copy)]
pub struct SetRgbBrightness {
    pub value: u8,
}

impl SetRgbBrightness {
    pub fn new(value: u8) -> Self {
        Self { value }
    }
}

impl ViaCommand for SetRgbBrightness {
    const CMD: u8 = cmd::CUSTOM_SET_VALUE;
    const REPLY_LEN: usize = 3;

    fn to_args(&self) -> Vec<u8> {
        vec![
            via::CHANNEL_RGB_MATRIX,
            via::RGB_MATRIX_BRIGHTNESS,
            self.value,
        ]
    }
}

/// Select an RGB matrix effect by its firmware id
#[derive(Debug, Clone, Copy)]
pub struct SetRgbEffect {
    pub effect: u8,
}

impl SetRgbEffect {
    pub fn new(effect: u8) -> Self {
        Self { effect }
    }
}

impl ViaCommand for SetRgbEffect {
    const CMD: u8 = cmd::CUSTOM_SET_VALUE;
    const REPLY_LEN: usize = 3;

    fn to_args(&self) -> Vec<u8> {
        vec![via::CHANNEL_RGB_MATRIX, via::RGB_MATRIX_EFFECT, self.effect]
    }
}

/// Set RGB matrix hue and saturation
#[derive(Debug, Clone, Copy)]
pub struct SetRgbColor {
    pub hue: u8,
    pub saturation: u8,
}

impl SetRgbColor {
    pub fn new(hue: u8, saturation: u8) -> Self {
        Self { hue, saturation }
    }
}

impl ViaCommand for SetRgbColor {
    const CMD: u8 = cmd::CUSTOM_SET_VALUE;
    const REPLY_LEN: usize = 4;

    fn to_args(&self) -> Vec<u8> {
        vec![
            via::CHANNEL_RGB_MATRIX,
            via::RGB_MATRIX_COLOR,
            self.hue,
            self.saturation,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setter_layouts() {
        assert_eq!(SetRgbBrightness::new(200).to_args(), vec![0x03, 0x01, 200]);
        assert_eq!(SetRgbEffect::new(1).to_args(), vec![0x03, 0x02, 0x01]);
        assert_eq!(SetRgbColor::new(85, 255).to_args(), vec![0x03, 0x04, 85, 255]);
        assert_eq!(QueryRgbMatrix.to_args(), vec![0x03, 0x01]);
        assert!(GetProtocolVersion.to_args().is_empty());
    }

    #[test]
    fn test_protocol_version_is_big_endian() {
        let v = ProtocolVersion::from_payload(&[0x00, 0x0C]);
        assert_eq!(v, ProtocolVersion(0x000C));
        assert!(v.is_supported());

        let v = ProtocolVersion::from_payload(&[0x0C, 0x00]);
        assert_eq!(v, ProtocolVersion(0x0C00));
        assert!(!v.is_supported());
    }

    #[test]
    fn test_rgb_matrix_status() {
        assert_eq!(
            RgbMatrixStatus::from_payload(&[0x03, 0x01, 0x96]),
            RgbMatrixStatus::Enabled { brightness: 0x96 }
        );
        // 0xFF is a legal brightness, not a marker
        assert_eq!(
            RgbMatrixStatus::from_payload(&[0x03, 0x01, 0xFF]),
            RgbMatrixStatus::Enabled { brightness: 0xFF }
        );
    }
}
