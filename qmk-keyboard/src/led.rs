//! RGB color types and conversion to the firmware's HSV encoding

use std::fmt;
use std::str::FromStr;

use crate::error::LedError;

/// RGB color value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    /// Create a new RGB color
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert to the 8-bit HSV triple QMK expects
    pub fn to_hsv(self) -> Hsv {
        let (h, s, v) = rgb_to_hsv(self.r, self.g, self.b);
        Hsv { h, s, v }
    }
}

impl FromStr for RgbColor {
    type Err = LedError;

    /// Parse `RRGGBB`, optionally prefixed with `#`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(LedError::InvalidColor(s.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| LedError::InvalidColor(s.to_string()))
        };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for RgbColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Hue/saturation/value, each scaled to 0-255
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

/// RGB matrix effect ids (QMK `RGB_MATRIX_*` mode numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RgbMatrixEffect {
    SolidColor = 1,
}

impl RgbMatrixEffect {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Integer RGB to HSV with the hue circle split in thirds of 85
///
/// Must stay bit-exact: the result is what the firmware displays.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));

    let v = r.max(g).max(b);
    if v == 0 {
        return (0, 0, 0);
    }

    let diff = v - r.min(g).min(b);
    let s = (255 * diff + v / 2) / v;
    if s == 0 {
        return (0, 0, v as u8);
    }

    let (third, secondary_diff) = if r == v {
        (0, g - b)
    } else if g == v {
        (85, b - r)
    } else {
        (170, r - g)
    };
    // i32 division truncates toward zero, negative hues wrap through the mask
    let h = ((secondary_diff * 42 + diff / 2) / diff + third) & 0xFF;

    (h as u8, s as u8, v as u8)
}
