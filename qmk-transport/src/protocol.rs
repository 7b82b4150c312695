//! Protocol constants and framing for the VIA raw HID interface

/// VIA command ids (first payload byte)
pub mod cmd {
    pub const GET_PROTOCOL_VERSION: u8 = 0x01;
    pub const CUSTOM_SET_VALUE: u8 = 0x07;
    pub const CUSTOM_GET_VALUE: u8 = 0x08;

    /// Firmware reply when a command id is not handled
    pub const UNHANDLED: u8 = 0xFF;

    /// Get human-readable name for command byte
    pub fn name(cmd: u8) -> &'static str {
        match cmd {
            GET_PROTOCOL_VERSION => "GET_PROTOCOL_VERSION",
            CUSTOM_SET_VALUE => "CUSTOM_SET_VALUE",
            CUSTOM_GET_VALUE => "CUSTOM_GET_VALUE",
            UNHANDLED => "UNHANDLED",
            _ => "UNKNOWN",
        }
    }
}

/// VIA "custom value" channels and the RGB matrix value ids
pub mod via {
    /// Protocol version this driver speaks
    pub const PROTOCOL_VERSION: u16 = 0x000C;

    /// Channel id for RGB matrix values
    pub const CHANNEL_RGB_MATRIX: u8 = 0x03;

    /// RGB matrix value ids
    pub const RGB_MATRIX_BRIGHTNESS: u8 = 0x01;
    pub const RGB_MATRIX_EFFECT: u8 = 0x02;
    pub const RGB_MATRIX_COLOR: u8 = 0x04;
}

/// HID identification of the raw HID interface
pub mod device {
    /// Vendor-defined usage page for QMK raw HID
    pub const USAGE_PAGE: u16 = 0xFF60;
    /// Application usage of the raw HID collection
    pub const USAGE: u16 = 0x61;
}

/// Minimum payload length a device must offer for one frame
pub const MIN_REPORT_LEN: usize = 32;

/// Payload length assumed when the report descriptor cannot be read
pub const DEFAULT_REPORT_LEN: usize = 32;

/// Report id for output reports (the interface does not number its reports)
pub const REPORT_ID: u8 = 0x00;

/// HID communication timing constants
pub mod timing {
    /// Total reads per exchange before giving up on mismatched replies
    pub const READ_ATTEMPTS: usize = 10;
    /// Default read timeout per attempt (ms)
    pub const READ_TIMEOUT_MS: u64 = 500;
    /// Default interval between bus enumerations (ms)
    pub const POLL_INTERVAL_MS: u64 = 1000;
}

/// Build an output frame
///
/// Format: `[report_id=0] [cmd] [args...] [zero padding]`, `report_len + 1` bytes.
/// Args that would overflow the frame are truncated.
pub fn build_frame(cmd: u8, args: &[u8], report_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; report_len + 1];
    buf[0] = REPORT_ID;
    buf[1] = cmd;
    let len = std::cmp::min(args.len(), report_len.saturating_sub(1));
    buf[2..2 + len].copy_from_slice(&args[..len]);
    buf
}

/// Copy the reply payload after the command id into a buffer of `expected_len`
///
/// `reply` includes the leading report id. Missing bytes are zero.
pub fn reply_payload(reply: &[u8], expected_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; expected_len];
    let body = reply.get(2..).unwrap_or(&[]);
    let len = std::cmp::min(body.len(), expected_len);
    out[..len].copy_from_slice(&body[..len]);
    out
}
