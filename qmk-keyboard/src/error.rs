//! Keyboard and backlight error types

use qmk_transport::ProtocolError;
use thiserror::Error;

/// Errors from probing and driving a backlight
#[derive(Error, Debug)]
pub enum BacklightError {
    /// Exchange failed (transport, exhausted retries, unsupported report size)
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Device does not answer with a supported VIA protocol version
    #[error("Incompatible device (protocol version {})", fmt_version(.version))]
    IncompatibleDevice { version: Option<u16> },

    /// Firmware was built without RGB matrix support
    #[error("RGB matrix is disabled in firmware")]
    FeatureDisabled,

    /// Registry slot or LED endpoint could not be allocated
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Callback arrived after teardown started
    #[error("Device is gone")]
    DeviceGone,
}

impl BacklightError {
    /// Probe outcomes that mean "not ours", as opposed to failures
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::IncompatibleDevice { .. } | Self::FeatureDisabled)
    }
}

fn fmt_version(version: &Option<u16>) -> String {
    match version {
        Some(v) => format!("0x{v:04X}"),
        None => "unknown".to_string(),
    }
}

/// Errors from the multi-color LED class
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedError {
    #[error("LED class rejected endpoint: {0}")]
    Rejected(String),

    #[error("No LED endpoint named {0}")]
    NotFound(String),

    #[error("Invalid color: {0}")]
    InvalidColor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incompatible_display() {
        let err = BacklightError::IncompatibleDevice {
            version: Some(0x000B),
        };
        assert_eq!(
            err.to_string(),
            "Incompatible device (protocol version 0x000B)"
        );
        let err = BacklightError::IncompatibleDevice { version: None };
        assert_eq!(err.to_string(), "Incompatible device (protocol version unknown)");
    }

    #[test]
    fn test_skip_classification() {
        assert!(BacklightError::FeatureDisabled.is_skip());
        assert!(BacklightError::IncompatibleDevice { version: None }.is_skip());
        assert!(!BacklightError::DeviceGone.is_skip());
        assert!(!BacklightError::ResourceExhausted("slot".into()).is_skip());
    }
}
