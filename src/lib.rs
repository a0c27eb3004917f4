//! # zyd-rs - A Rust Crate for ZYD E-Scooter BLE Protocol Communication
//!
//! The zyd-rs crate provides a Rust-based implementation of the ZYD
//! scooter-controller BLE protocol, used by electric scooters built around
//! ZYD controllers for telemetry, configuration and firmware upload.
//!
//! ## Features
//!
//! - Scan for ZYD controllers and connect over BLE
//! - Drive the full connection pipeline: MTU negotiation, service discovery,
//!   notification setup and the sequential Device-Information reads
//! - Build and parse the vendor packet format with CRC16 (MODBUS) checksums,
//!   including automatic 0xF0/0xAB header-variant detection
//! - Decode version, configuration, running-data and BMS telemetry packets
//! - Upload firmware images through the acknowledged D0-D3 chunk protocol
//!   with progress reporting and cooperative cancellation
//! - Support for logging and error handling
//!
//! ## Usage
//!
//! To use the zyd-rs crate in your Rust project, add the following to your
//! Cargo.toml file:
//!
//! ```toml
//! [dependencies]
//! zyd-rs = "0.1.0"
//! ```
//!
//! Then, in your Rust code, you can import the necessary modules and
//! functions:
//!
//! ```rust
//! use zyd_rs::{
//!     scan, connect, ConnectionSession, SessionEvent, ZydError,
//!     VersionInfo, RunningDataInfo, init_logger, log_info,
//! };
//! ```

pub mod ble;
pub mod constants;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod telemetry;
pub mod upload;
pub mod util;

pub use crate::error::ZydError;
pub use crate::logging::{init_logger, log_info};

// Core session types
pub use ble::session::{ConnectionSession, DeviceIdentity, SessionState};
pub use ble::transport::{Advertisement, BleTransport, DeviceInfoItem};
pub use ble::BtleplugTransport;

// Packet codec
pub use protocol::packet::{classify_packet, parse_packet, HeaderVariant, Packet, PacketKind};
pub use protocol::router::SessionEvent;
pub use protocol::crc16_modbus;

// Telemetry decoders
pub use telemetry::{BmsDataInfo, ConfigInfo, ControlFlags, RunningDataInfo, VersionInfo};

// Firmware upload
pub use upload::{run_upload, CancelHandle, FirmwareImage, UploadEvent, UploadLogLevel, UploadState};

use tokio::sync::mpsc;

/// Scan for ZYD controllers using the default system Bluetooth adapter.
///
/// # Returns
/// * `Ok(Vec<Advertisement>)` - Distinct controllers seen in the scan window
/// * `Err(ZydError)` - Adapter unavailable or scanning failed
pub async fn scan() -> Result<Vec<Advertisement>, ZydError> {
    let transport = BtleplugTransport::new().await?;
    let (mut session, _events) = ConnectionSession::new(transport);
    session.scan().await
}

/// Connect to a previously scanned controller and run the full setup
/// pipeline.
///
/// # Arguments
/// * `device` - Advertisement returned by [`scan`]
///
/// # Returns
/// * `Ok((session, events))` - Ready session plus its event stream
/// * `Err(ZydError)` - Connection failed
pub async fn connect(
    device: &Advertisement,
) -> Result<
    (
        ConnectionSession<BtleplugTransport>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ),
    ZydError,
> {
    let transport = BtleplugTransport::new().await?;
    let (mut session, events) = ConnectionSession::new(transport);
    session.connect(device).await?;
    Ok((session, events))
}
