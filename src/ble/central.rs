//! btleplug-backed BLE central transport.
//!
//! Implements [`BleTransport`] on top of the cross-platform `btleplug`
//! crate: adapter lookup, scanning, characteristic discovery on the
//! vendor's fff0 service, notification forwarding and acknowledged writes.

use crate::ble::transport::{Advertisement, BleTransport, DeviceInfoItem};
use crate::constants::{
    CONTROL_CHAR_UUID, FIRMWARE_REV_UUID, HARDWARE_REV_UUID, MANUFACTURER_UUID,
    MODEL_NUMBER_UUID, NOTIFY_CHAR_UUID, SERIAL_NUMBER_UUID, SOFTWARE_REV_UUID,
};
use crate::ZydError;
use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, warn};
use once_cell::sync::Lazy;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

static CONTROL_UUID: Lazy<Uuid> = Lazy::new(|| parse_uuid(CONTROL_CHAR_UUID));
static NOTIFY_UUID: Lazy<Uuid> = Lazy::new(|| parse_uuid(NOTIFY_CHAR_UUID));

/// Parse a UUID string constant into uuid::Uuid
fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).expect("invalid UUID constant")
}

fn device_info_uuid(item: DeviceInfoItem) -> Uuid {
    parse_uuid(match item {
        DeviceInfoItem::SerialNumber => SERIAL_NUMBER_UUID,
        DeviceInfoItem::ModelNumber => MODEL_NUMBER_UUID,
        DeviceInfoItem::HardwareRevision => HARDWARE_REV_UUID,
        DeviceInfoItem::FirmwareRevision => FIRMWARE_REV_UUID,
        DeviceInfoItem::SoftwareRevision => SOFTWARE_REV_UUID,
        DeviceInfoItem::Manufacturer => MANUFACTURER_UUID,
    })
}

impl From<btleplug::Error> for ZydError {
    fn from(e: btleplug::Error) -> ZydError {
        match e {
            btleplug::Error::PermissionDenied => ZydError::PermissionDenied,
            other => ZydError::TransportError(other.to_string()),
        }
    }
}

/// Real BLE central on top of the platform Bluetooth stack.
pub struct BtleplugTransport {
    adapter: Adapter,
    peripheral: Option<Peripheral>,
    control: Option<Characteristic>,
    notify: Option<Characteristic>,
    forwarder: Option<JoinHandle<()>>,
}

impl BtleplugTransport {
    /// Binds to the first Bluetooth adapter on the system.
    pub async fn new() -> Result<BtleplugTransport, ZydError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| ZydError::TransportUnavailable("no Bluetooth adapter found".into()))?;
        Ok(BtleplugTransport {
            adapter,
            peripheral: None,
            control: None,
            notify: None,
            forwarder: None,
        })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, ZydError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string() == address {
                return Ok(peripheral);
            }
        }
        Err(ZydError::TransportError(format!(
            "no peripheral with address {address}; scan first"
        )))
    }

    fn connected(&self) -> Result<&Peripheral, ZydError> {
        self.peripheral
            .as_ref()
            .ok_or_else(|| ZydError::TransportError("not connected".into()))
    }

    fn find_characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.peripheral
            .as_ref()?
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn scan(&mut self, window: Duration) -> Result<Vec<Advertisement>, ZydError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(window).await;

        let mut adverts = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            if let Some(props) = peripheral.properties().await? {
                adverts.push(Advertisement {
                    name: props.local_name.unwrap_or_default(),
                    address: peripheral.address().to_string(),
                    rssi: props.rssi,
                });
            }
        }

        self.adapter.stop_scan().await?;
        Ok(adverts)
    }

    async fn connect(&mut self, address: &str) -> Result<(), ZydError> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral.connect().await?;
        self.peripheral = Some(peripheral);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ZydError> {
        // Cached handles are cleared even when the disconnect call fails.
        self.control = None;
        self.notify = None;
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(peripheral) = self.peripheral.take() {
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn request_mtu(&mut self, _requested: u16) -> Result<u16, ZydError> {
        // btleplug exposes no portable MTU negotiation; the platform stack
        // negotiates on its own. Reporting failure makes the session keep
        // the conservative default, which the chunked write path handles.
        Err(ZydError::TransportError(
            "MTU negotiation not exposed by platform adapter".into(),
        ))
    }

    async fn discover_services(&mut self) -> Result<(), ZydError> {
        self.connected()?.discover_services().await?;

        self.control = self.find_characteristic(*CONTROL_UUID);
        self.notify = self.find_characteristic(*NOTIFY_UUID);
        if self.control.is_none() || self.notify.is_none() {
            return Err(ZydError::TransportError(
                "required fff1/fff2 characteristics not found".into(),
            ));
        }
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, ZydError> {
        let peripheral = self.connected()?.clone();
        let notify = self
            .notify
            .clone()
            .ok_or_else(|| ZydError::TransportError("notify characteristic not set up".into()))?;

        // A peripheral without the client-characteristic-config descriptor
        // rejects the subscribe write; proceed without it rather than stall.
        if let Err(e) = peripheral.subscribe(&notify).await {
            warn!("notification subscribe failed ({e}), continuing without CCCD write");
        }

        let mut stream = peripheral.notifications().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != *NOTIFY_UUID {
                    continue;
                }
                if tx.send(notification.value).is_err() {
                    break;
                }
            }
            // Stream end drops the sender, signalling link loss upstream.
        }));
        Ok(rx)
    }

    async fn read_device_info(&mut self, item: DeviceInfoItem) -> Result<Option<String>, ZydError> {
        let characteristic = match self.find_characteristic(device_info_uuid(item)) {
            Some(c) => c,
            None => return Ok(None),
        };
        match self.connected()?.read(&characteristic).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).trim().to_string())),
            Err(e) => {
                debug!("device info read {item:?} failed: {e}");
                Ok(None)
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), ZydError> {
        let control = self
            .control
            .clone()
            .ok_or_else(|| ZydError::TransportError("control characteristic not set up".into()))?;
        self.connected()?
            .write(&control, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }
}
