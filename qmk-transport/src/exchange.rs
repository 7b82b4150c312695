//! Request/response correlation on top of a raw `ReportDevice`
//!
//! The device may hand back stale or interleaved input reports, so one
//! mismatched reply is expected. Only the read is repeated: re-sending a
//! command is not safe, re-reading always is.

use tracing::{debug, warn};

use crate::command::{ViaCommand, ViaResponse};
use crate::error::{ProtocolError, TransportError};
use crate::protocol::{self, cmd, timing, MIN_REPORT_LEN};
use crate::types::{DeviceId, TransportConfig};
use crate::DeviceHandle;

/// Exchange channel bound to one device
pub struct ReportTransport {
    device: DeviceHandle,
    config: TransportConfig,
}

impl std::fmt::Debug for ReportTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportTransport")
            .field("device", self.device.id())
            .field("config", &self.config)
            .finish()
    }
}

impl ReportTransport {
    /// Bind to a device, rejecting report lengths too small for a frame
    pub fn new(device: DeviceHandle, config: TransportConfig) -> Result<Self, ProtocolError> {
        let report_len = std::cmp::min(device.output_report_len(), device.input_report_len());
        if report_len < MIN_REPORT_LEN {
            return Err(ProtocolError::UnsupportedDevice {
                report_len,
                min: MIN_REPORT_LEN,
            });
        }
        Ok(Self { device, config })
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn device_id(&self) -> &DeviceId {
        self.device.id()
    }

    /// Write one command, then read until a reply echoes its command id
    ///
    /// Returns the `expected_len` bytes after the echoed command id.
    pub fn exchange(
        &self,
        command: u8,
        args: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        let frame = protocol::build_frame(command, args, self.device.output_report_len());
        debug!(
            "{}: sending {} (0x{:02X}): {:02X?}",
            self.device.id(),
            cmd::name(command),
            command,
            &frame[..frame.len().min(8)]
        );
        self.device.write_report(&frame)?;

        let expected = self.device.input_report_len() + 1;
        for attempt in 1..=timing::READ_ATTEMPTS {
            let reply = self.device.read_report(self.config.read_timeout)?;
            match validate_reply(command, &reply, expected) {
                Ok(()) => {
                    debug!(
                        "{}: reply for 0x{:02X}: {:02X?}",
                        self.device.id(),
                        command,
                        &reply[..reply.len().min(8)]
                    );
                    return Ok(protocol::reply_payload(&reply, expected_len));
                }
                Err(ProtocolError::Mismatch { expected, actual }) => {
                    warn!(
                        "{}: reply not matching request, got 0x{:02X} but expected 0x{:02X}; {} retries remaining",
                        self.device.id(),
                        actual,
                        expected,
                        timing::READ_ATTEMPTS - attempt
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProtocolError::ExhaustedRetries {
            cmd: command,
            attempts: timing::READ_ATTEMPTS,
        })
    }

    /// Send a typed command and return its raw reply payload
    pub fn send<C: ViaCommand>(&self, command: &C) -> Result<Vec<u8>, ProtocolError> {
        self.exchange(C::CMD, &command.to_args(), C::REPLY_LEN)
    }

    /// Send a typed command and parse its reply
    pub fn query<C, R>(&self, command: &C) -> Result<R, ProtocolError>
    where
        C: ViaCommand,
        R: ViaResponse,
    {
        let payload = self.send(command)?;
        Ok(R::from_payload(&payload))
    }
}

/// Check length and command echo of a reply (report id included)
///
/// The firmware overwrites the command id with `0xFF` for requests it does
/// not handle; that reply is final and is not re-read.
fn validate_reply(command: u8, reply: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if reply.len() != expected {
        return Err(TransportError::ShortRead {
            expected,
            got: reply.len(),
        }
        .into());
    }
    if reply[1] == cmd::UNHANDLED && command != cmd::UNHANDLED {
        return Err(ProtocolError::Unhandled { cmd: command });
    }
    if reply[1] != command {
        return Err(ProtocolError::Mismatch {
            expected: command,
            actual: reply[1],
        });
    }
    Ok(())
}
