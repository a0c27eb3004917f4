//! # ZYD Error Handling
//!
//! This module defines the ZydError enum, which represents the different error
//! types that can occur in the zyd-rs crate.

use thiserror::Error;

/// Represents the different error types that can occur in the ZYD crate.
#[derive(Debug, Error)]
pub enum ZydError {
    /// Indicates that no usable Bluetooth adapter was found or it is disabled.
    #[error("Bluetooth transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Indicates the platform refused Bluetooth access.
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    /// Indicates a failure between connect and notification setup.
    #[error("Connection failed during {phase}: {reason}")]
    ConnectionFailed { phase: &'static str, reason: String },

    /// Indicates an error raised by the underlying BLE transport.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Indicates an error when parsing a ZYD packet.
    #[error("Error parsing ZYD packet: {0}")]
    PacketParseError(String),

    /// Indicates a CRC16 mismatch.
    #[error("Invalid CRC16: expected {expected:#06x}, calculated {calculated:#06x}")]
    InvalidCrc { expected: u16, calculated: u16 },

    /// Indicates no (or a late) response to a specific command.
    #[error("Timed out waiting for 0x{command:02X} response after {millis}ms")]
    ProtocolTimeout { command: u8, millis: u64 },

    /// Indicates the device echoed a non-zero status byte.
    #[error("Device rejected 0x{command:02X} with status 0x{status:02X}")]
    ProtocolNack { command: u8, status: u8 },

    /// Indicates a firmware image outside the accepted size bounds.
    #[error("Firmware image size {size} bytes out of range ({min}..={max})")]
    ImageSizeInvalid { size: usize, min: usize, max: usize },

    /// Indicates the link dropped while a firmware upload was active.
    #[error("Connection lost during upload")]
    LinkLostDuringUpload,

    /// Indicates a second upload was started while one is active.
    #[error("Firmware upload already in progress")]
    UploadInProgress,

    /// Indicates a cooperative cancellation by the caller.
    #[error("Cancelled by user")]
    Cancelled,

    /// Indicates an operation that requires a ready session.
    #[error("Session not ready: {0}")]
    NotReady(String),

    /// Indicates an invalid hexadecimal string was provided.
    #[error("Invalid hexadecimal string")]
    InvalidHexString,

    /// A catch-all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}
