//! Transport error types

use thiserror::Error;

/// Errors from the raw report channel
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Communication timeout")]
    Timeout,

    /// Reply shorter (or longer) than the negotiated input report
    #[error("Short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    // HID-specific errors
    #[error("HID error: {0}")]
    HidError(String),

    #[error("HID permission denied: {0}")]
    HidPermissionDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") {
            TransportError::HidPermissionDenied(msg)
        } else {
            TransportError::HidError(msg)
        }
    }
}

/// Errors from a request/response exchange
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Underlying write or read failed; never retried
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Reply did not echo the request's command id
    #[error("Protocol mismatch: expected cmd 0x{expected:02X}, got 0x{actual:02X}")]
    Mismatch { expected: u8, actual: u8 },

    /// Firmware answered with the unhandled marker in place of the command id
    #[error("Firmware did not handle cmd 0x{cmd:02X}")]
    Unhandled { cmd: u8 },

    /// Every read attempt returned a mismatched reply
    #[error("No matching reply for cmd 0x{cmd:02X} after {attempts} reads")]
    ExhaustedRetries { cmd: u8, attempts: usize },

    /// Device reports are too small to carry a VIA frame
    #[error("Unsupported device: report length {report_len} below minimum {min}")]
    UnsupportedDevice { report_len: usize, min: usize },
}
