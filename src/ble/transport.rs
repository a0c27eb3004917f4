//! Transport capability interface.
//!
//! The session depends on the platform BLE stack only through this trait:
//! scan, connect, MTU negotiation, service discovery, notification
//! subscription, characteristic reads and acknowledged writes. Every
//! operation is a single-outstanding-operation primitive: the caller must
//! not issue a second operation before the previous one resolved, which the
//! session guarantees by construction.

use crate::ZydError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

/// One advertisement observed during a scan window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advertisement {
    /// Advertised local name; empty when the peripheral does not advertise one.
    pub name: String,
    /// Platform address/identifier, unique per peripheral.
    pub address: String,
    /// Signal strength of the advertisement, if reported.
    pub rssi: Option<i16>,
}

/// Standard Device-Information characteristics the session reads after
/// notification setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceInfoItem {
    SerialNumber,
    ModelNumber,
    HardwareRevision,
    FirmwareRevision,
    SoftwareRevision,
    Manufacturer,
}

/// Fixed read order for the Device-Information characteristics. The
/// transport tolerates only one outstanding GATT read, so the session
/// consumes this list strictly one element per completed read.
pub const DEVICE_INFO_READ_ORDER: [DeviceInfoItem; 6] = [
    DeviceInfoItem::SerialNumber,
    DeviceInfoItem::ModelNumber,
    DeviceInfoItem::HardwareRevision,
    DeviceInfoItem::FirmwareRevision,
    DeviceInfoItem::SoftwareRevision,
    DeviceInfoItem::Manufacturer,
];

/// Platform BLE central operations, async and strictly sequential.
#[async_trait]
pub trait BleTransport: Send {
    /// Collects advertisements for the duration of `window` and returns every
    /// one observed, duplicates included. Filtering and de-duplication are
    /// the session's job.
    async fn scan(&mut self, window: Duration) -> Result<Vec<Advertisement>, ZydError>;

    /// Opens the physical link to the peripheral with the given address.
    async fn connect(&mut self, address: &str) -> Result<(), ZydError>;

    /// Closes the link and clears any cached characteristic handles.
    async fn disconnect(&mut self) -> Result<(), ZydError>;

    /// Requests a larger MTU. Returns the negotiated value; an error means
    /// the platform default stays in effect (non-fatal for the session).
    async fn request_mtu(&mut self, requested: u16) -> Result<u16, ZydError>;

    /// Locates the main data-exchange service and its control/notify
    /// characteristics. Fatal for the session when they are missing.
    async fn discover_services(&mut self) -> Result<(), ZydError>;

    /// Enables notification delivery on the notify characteristic and
    /// returns the stream of notification payloads. An absent
    /// client-characteristic-config descriptor is tolerated by the
    /// implementation, not reported as an error. The channel closing
    /// signals link loss.
    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, ZydError>;

    /// Reads one Device-Information characteristic. `Ok(None)` when the
    /// characteristic is absent or unreadable.
    async fn read_device_info(&mut self, item: DeviceInfoItem) -> Result<Option<String>, ZydError>;

    /// Writes to the control characteristic with response; resolves once the
    /// peripheral acknowledged the write.
    async fn write(&mut self, data: &[u8]) -> Result<(), ZydError>;
}
