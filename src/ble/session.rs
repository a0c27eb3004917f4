//! # Connection Session
//!
//! This module owns one physical BLE link to a ZYD controller and drives it
//! through the lifecycle
//!
//! ```text
//! Idle -> Scanning -> Connecting -> DiscoveringServices
//!      -> ConfiguringNotifications -> ReadingDeviceInfo -> Ready
//!      -> Disconnecting -> Disconnected
//! ```
//!
//! The transport tolerates exactly one outstanding operation at a time. All
//! session I/O goes through `&mut self` methods, so a second write cannot be
//! issued while one is awaiting its acknowledgment; the exclusive borrow is
//! the in-flight guard. Every await carries an explicit timeout.
//!
//! Notifications arrive on a dedicated pump task that latches the protocol
//! header variant, hands firmware responses to the upload engine while an
//! upload is active, and otherwise decodes telemetry and emits
//! [`SessionEvent`]s without blocking the stream.

use crate::ble::transport::{
    Advertisement, BleTransport, DeviceInfoItem, DEVICE_INFO_READ_ORDER,
};
use crate::constants::{
    ATT_OVERHEAD, CMD_BMS_DATA, CMD_FW_COMPLETE, CMD_FW_REQUEST, CMD_RUNNING_DATA,
    CMD_VERSION_INFO, CONNECT_TIMEOUT, DEFAULT_MTU, DEVICE_NAME_PREFIX, DISCONNECT_TIMEOUT,
    HEADER_ALTERNATE, HEADER_STANDARD, REQUESTED_MTU, SCAN_WINDOW, VERSION_REQUEST_RETRIES,
    VERSION_RETRY_DELAY, WRITE_TIMEOUT, A1_POLL_DELAY, B0_POLL_DELAY,
};
use crate::protocol::packet::{
    build_control_packet, build_poll_request, HeaderVariant, PacketKind,
};
use crate::protocol::router::{PacketRouter, SessionEvent};
use crate::telemetry::ControlFlags;
use crate::util::hex::format_hex_compact;
use crate::ZydError;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Lifecycle state of a connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    ConfiguringNotifications,
    ReadingDeviceInfo,
    Ready,
    Disconnecting,
    Disconnected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Identity of the connected controller, established during connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// Advertised device name.
    pub name: String,
    /// Platform address of the peripheral.
    pub address: String,
    /// MTU in effect for this link.
    pub mtu: u16,
    /// Protocol header byte detected at connect time.
    pub header: u8,
    /// Serial number from the 2A25 characteristic, or the advertised name
    /// when the characteristic was missing (`serial_is_fallback`).
    pub serial_number: String,
    pub serial_is_fallback: bool,
    pub model_number: String,
    pub hardware_revision: String,
    pub firmware_revision: String,
    pub software_revision: String,
    pub manufacturer: String,
}

/// State shared between the session, the notification pump and the upload
/// engine.
pub(crate) struct SessionShared {
    /// Latched protocol header byte (0xF0 until 0xAB is observed).
    pub(crate) header: AtomicU8,
    pub(crate) link_up: AtomicBool,
    /// Woken when the notification stream ends.
    pub(crate) link_down: Notify,
    /// Set by `disconnect()` before tearing the link down.
    expected_disconnect: AtomicBool,
    /// Ensures the Disconnected event fires exactly once per connection.
    disconnect_emitted: AtomicBool,
    /// While true, D0-D3 responses bypass the router and fulfil the waiter.
    pub(crate) upload_active: AtomicBool,
    /// Single-shot waiter for the next firmware response.
    pub(crate) fw_response: Mutex<Option<oneshot::Sender<Vec<u8>>>>,
    /// Set when a B0 version packet was decoded on this connection.
    version_seen: AtomicBool,
}

impl SessionShared {
    fn new() -> Self {
        SessionShared {
            header: AtomicU8::new(HEADER_STANDARD),
            link_up: AtomicBool::new(false),
            link_down: Notify::new(),
            expected_disconnect: AtomicBool::new(false),
            disconnect_emitted: AtomicBool::new(false),
            upload_active: AtomicBool::new(false),
            fw_response: Mutex::new(None),
            version_seen: AtomicBool::new(false),
        }
    }

    fn emit_disconnected(&self, events: &mpsc::UnboundedSender<SessionEvent>) {
        if !self.disconnect_emitted.swap(true, Ordering::SeqCst) {
            let expected = self.expected_disconnect.load(Ordering::SeqCst);
            let _ = events.send(SessionEvent::Disconnected { expected });
        }
    }
}

/// One session per physical device. Owned exclusively by the caller that
/// created it; destroyed on explicit disconnect or fatal link loss.
pub struct ConnectionSession<T: BleTransport> {
    transport: T,
    state: SessionState,
    mtu: u16,
    identity: Option<DeviceIdentity>,
    shared: Arc<SessionShared>,
    events: mpsc::UnboundedSender<SessionEvent>,
    pump: Option<JoinHandle<()>>,
}

impl<T: BleTransport> ConnectionSession<T> {
    /// Creates a session over the given transport. The returned receiver
    /// carries every [`SessionEvent`] for the lifetime of the session.
    pub fn new(transport: T) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            ConnectionSession {
                transport,
                state: SessionState::Idle,
                mtu: DEFAULT_MTU,
                identity: None,
                shared: Arc::new(SessionShared::new()),
                events,
                pump: None,
            },
            rx,
        )
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn negotiated_mtu(&self) -> u16 {
        self.mtu
    }

    /// Largest payload a single characteristic write can carry.
    pub fn max_write_size(&self) -> usize {
        self.mtu as usize - ATT_OVERHEAD
    }

    pub fn device_identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Protocol header variant currently in effect for outbound packets.
    pub fn header(&self) -> HeaderVariant {
        HeaderVariant::detect(self.shared.header.load(Ordering::SeqCst))
            .unwrap_or(HeaderVariant::Standard)
    }

    // ------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------

    /// Runs a 3-second discovery window and returns every distinct ZYD
    /// controller seen, strongest advertisement per address. An empty result
    /// is a valid outcome, not an error.
    pub async fn scan(&mut self) -> Result<Vec<Advertisement>, ZydError> {
        self.scan_with_window(SCAN_WINDOW).await
    }

    pub async fn scan_with_window(
        &mut self,
        window: Duration,
    ) -> Result<Vec<Advertisement>, ZydError> {
        if !matches!(self.state, SessionState::Idle | SessionState::Disconnected) {
            return Err(ZydError::NotReady(format!(
                "scan requires an idle session, state is {}",
                self.state
            )));
        }
        self.state = SessionState::Scanning;
        let result = self.transport.scan(window).await;
        self.state = SessionState::Idle;

        let raw = result?;
        let devices = filter_vendor_devices(raw);
        info!("scan completed - found {} ZYD devices", devices.len());
        Ok(devices)
    }

    // ------------------------------------------------------------------
    // Connection pipeline
    // ------------------------------------------------------------------

    /// Brings the link up and walks the full setup pipeline, returning the
    /// established identity once the session is `Ready`.
    pub async fn connect(&mut self, device: &Advertisement) -> Result<DeviceIdentity, ZydError> {
        if !matches!(self.state, SessionState::Idle | SessionState::Disconnected) {
            return Err(ZydError::NotReady(format!(
                "connect requires an idle session, state is {}",
                self.state
            )));
        }

        info!("connecting to {} ({})", device.name, device.address);
        self.state = SessionState::Connecting;
        self.shared.expected_disconnect.store(false, Ordering::SeqCst);
        self.shared.disconnect_emitted.store(false, Ordering::SeqCst);
        self.shared.version_seen.store(false, Ordering::SeqCst);

        if let Err(e) = timeout(CONNECT_TIMEOUT, self.transport.connect(&device.address))
            .await
            .map_err(|_| ZydError::TransportError("connect timed out".into()))
            .and_then(|r| r)
        {
            self.state = SessionState::Idle;
            return Err(ZydError::ConnectionFailed {
                phase: "connect",
                reason: e.to_string(),
            });
        }

        // MTU failure is non-fatal; the transport default stays in effect.
        self.mtu = match self.transport.request_mtu(REQUESTED_MTU).await {
            Ok(mtu) => {
                info!("MTU negotiated: {mtu} (usable payload: {} bytes)", mtu as usize - ATT_OVERHEAD);
                mtu
            }
            Err(e) => {
                warn!("MTU negotiation failed ({e}), using default");
                DEFAULT_MTU
            }
        };

        self.state = SessionState::DiscoveringServices;
        if let Err(e) = self.transport.discover_services().await {
            return self.fail_setup("service discovery", e).await;
        }

        self.state = SessionState::ConfiguringNotifications;
        let notifications = match self.transport.subscribe().await {
            Ok(rx) => rx,
            Err(e) => return self.fail_setup("notification setup", e).await,
        };

        self.shared.link_up.store(true, Ordering::SeqCst);
        self.spawn_pump(notifications);

        self.state = SessionState::ReadingDeviceInfo;
        let identity = self.read_device_information(device).await?;

        self.identity = Some(identity.clone());
        self.state = SessionState::Ready;
        info!("connected: {identity:?}");
        Ok(identity)
    }

    /// Tears the half-built link down after a fatal setup failure. The
    /// failure surfaces as `ConnectionFailed`; no Disconnected event fires
    /// for a link that never reached Ready.
    async fn fail_setup(
        &mut self,
        phase: &'static str,
        error: ZydError,
    ) -> Result<DeviceIdentity, ZydError> {
        self.shared.disconnect_emitted.store(true, Ordering::SeqCst);
        let _ = timeout(DISCONNECT_TIMEOUT, self.transport.disconnect()).await;
        self.force_cleanup();
        self.state = SessionState::Idle;
        Err(ZydError::ConnectionFailed {
            phase,
            reason: error.to_string(),
        })
    }

    /// Reads the Device-Information characteristics strictly one at a time;
    /// the next read is only issued after the previous one completed. A
    /// missing serial number degrades to the advertised name.
    async fn read_device_information(
        &mut self,
        device: &Advertisement,
    ) -> Result<DeviceIdentity, ZydError> {
        let mut identity = DeviceIdentity {
            name: device.name.clone(),
            address: device.address.clone(),
            mtu: self.mtu,
            header: self.shared.header.load(Ordering::SeqCst),
            ..DeviceIdentity::default()
        };

        for item in DEVICE_INFO_READ_ORDER {
            match self.transport.read_device_info(item).await {
                Ok(Some(value)) => {
                    debug!("device info {item:?} = '{value}'");
                    let value = value.trim().to_string();
                    match item {
                        DeviceInfoItem::SerialNumber => identity.serial_number = value,
                        DeviceInfoItem::ModelNumber => identity.model_number = value,
                        DeviceInfoItem::HardwareRevision => identity.hardware_revision = value,
                        DeviceInfoItem::FirmwareRevision => identity.firmware_revision = value,
                        DeviceInfoItem::SoftwareRevision => identity.software_revision = value,
                        DeviceInfoItem::Manufacturer => identity.manufacturer = value,
                    }
                }
                Ok(None) => debug!("device info {item:?} not present"),
                Err(e) => warn!("device info read {item:?} failed: {e}"),
            }
        }

        if identity.serial_number.is_empty() {
            // Identity falls back to the advertised device name.
            warn!("no serial number from device info, using device name");
            identity.serial_number = identity.name.clone();
            identity.serial_is_fallback = true;
        }
        Ok(identity)
    }

    fn spawn_pump(&mut self, mut notifications: mpsc::UnboundedReceiver<Vec<u8>>) {
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let router = PacketRouter::new(self.events.clone());

        self.pump = Some(tokio::spawn(async move {
            while let Some(data) = notifications.recv().await {
                if data.is_empty() {
                    continue;
                }
                debug!("raw BLE data: {}", format_hex_compact(&data));

                // Some devices switch to the 0xAB header; latch it for all
                // subsequent outbound packets. One-way, never reverted.
                if data[0] == HEADER_ALTERNATE
                    && shared.header.load(Ordering::SeqCst) != HEADER_ALTERNATE
                {
                    info!("detected 0xAB protocol header - switching to 0xAB mode");
                    shared.header.store(HEADER_ALTERNATE, Ordering::SeqCst);
                }

                // Firmware responses go straight to the upload engine.
                if shared.upload_active.load(Ordering::SeqCst)
                    && data.len() >= 2
                    && (data[0] == HEADER_STANDARD || data[0] == HEADER_ALTERNATE)
                    && (CMD_FW_REQUEST..=CMD_FW_COMPLETE).contains(&data[1])
                {
                    debug!("firmware response: {}", format_hex_compact(&data));
                    if let Some(waiter) = shared.fw_response.lock().unwrap().take() {
                        let _ = waiter.send(data);
                    }
                    continue;
                }

                if let Some(PacketKind::VersionInfo) = router.route(&data) {
                    shared.version_seen.store(true, Ordering::SeqCst);
                }
            }

            // Stream closed: the link is gone.
            shared.link_up.store(false, Ordering::SeqCst);
            shared.link_down.notify_waiters();
            shared.emit_disconnected(&events);
        }));
    }

    // ------------------------------------------------------------------
    // Disconnect
    // ------------------------------------------------------------------

    /// Initiates a clean disconnect. If no acknowledgment arrives within the
    /// timeout the session forces the same cleanup as an unexpected link
    /// loss, but still reports `expected = true`.
    pub async fn disconnect(&mut self) -> Result<(), ZydError> {
        self.state = SessionState::Disconnecting;
        self.shared.expected_disconnect.store(true, Ordering::SeqCst);

        if let Err(e) = timeout(DISCONNECT_TIMEOUT, self.transport.disconnect()).await {
            warn!("disconnect ack timed out, forcing cleanup: {e}");
        }

        self.force_cleanup();
        self.state = SessionState::Disconnected;
        Ok(())
    }

    /// Clears cached identity and link state. Emits the Disconnected event
    /// when the pump did not get the chance to.
    fn force_cleanup(&mut self) {
        self.shared.link_up.store(false, Ordering::SeqCst);
        self.shared.link_down.notify_waiters();
        self.identity = None;
        self.mtu = DEFAULT_MTU;
        self.shared.emit_disconnected(&self.events);
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }

    // ------------------------------------------------------------------
    // Writes and commands
    // ------------------------------------------------------------------

    /// Writes raw bytes to the control characteristic and waits for the
    /// acknowledgment, bounded by the write timeout. All multi-byte
    /// transfers are sequences of these calls; the exclusive borrow keeps a
    /// second write from being issued while one is outstanding.
    pub async fn write_and_wait(&mut self, data: &[u8]) -> Result<(), ZydError> {
        if !self.shared.link_up.load(Ordering::SeqCst) {
            return Err(ZydError::TransportError("link is down".into()));
        }
        timeout(WRITE_TIMEOUT, self.transport.write(data))
            .await
            .map_err(|_| ZydError::TransportError("write acknowledgment timed out".into()))?
    }

    async fn send_poll(&mut self, command: u8) -> Result<(), ZydError> {
        self.ensure_ready()?;
        let packet = build_poll_request(self.header(), command);
        debug!("sending {}: {}", PacketKind::name(command), format_hex_compact(&packet));
        self.write_and_wait(&packet).await
    }

    /// Requests running data (0xA0); also wakes up the protocol.
    pub async fn request_running_data(&mut self) -> Result<(), ZydError> {
        self.send_poll(CMD_RUNNING_DATA).await
    }

    /// Requests version info (0xB0).
    pub async fn request_version(&mut self) -> Result<(), ZydError> {
        self.send_poll(CMD_VERSION_INFO).await
    }

    /// Requests BMS data (0xA1).
    pub async fn request_bms_data(&mut self) -> Result<(), ZydError> {
        self.send_poll(CMD_BMS_DATA).await
    }

    /// Sends the 0xC0 control command with the given flag word and speeds.
    pub async fn send_control_command(
        &mut self,
        flags: ControlFlags,
        cruise_speed: u8,
        max_speed: u8,
    ) -> Result<(), ZydError> {
        self.ensure_ready()?;
        let packet = build_control_packet(self.header(), flags.bits(), cruise_speed, max_speed);
        debug!("sending control command: {}", format_hex_compact(&packet));
        self.write_and_wait(&packet).await
    }

    /// Sends the version/telemetry request sequence with bounded retries:
    /// up to three attempts, three seconds apart, each staggering the A0,
    /// B0 and A1 polls. Returns whether a version packet was decoded. Safe
    /// to retry because the polls are idempotent and side-effect-free.
    pub async fn request_version_with_retry(&mut self) -> Result<bool, ZydError> {
        self.shared.version_seen.store(false, Ordering::SeqCst);

        for attempt in 1..=VERSION_REQUEST_RETRIES {
            debug!("version request attempt {attempt}/{VERSION_REQUEST_RETRIES}");
            self.request_running_data().await?;
            tokio::time::sleep(B0_POLL_DELAY).await;
            self.request_version().await?;
            tokio::time::sleep(A1_POLL_DELAY - B0_POLL_DELAY).await;
            self.request_bms_data().await?;
            tokio::time::sleep(VERSION_RETRY_DELAY - A1_POLL_DELAY).await;

            if self.shared.version_seen.load(Ordering::SeqCst) {
                return Ok(true);
            }
            warn!("no B0 version response, retrying");
        }
        Ok(false)
    }

    fn ensure_ready(&self) -> Result<(), ZydError> {
        if self.state != SessionState::Ready {
            return Err(ZydError::NotReady(self.state.to_string()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Upload engine support
    // ------------------------------------------------------------------

    /// Marks an upload active; fails fast when one already is.
    pub(crate) fn begin_upload(&mut self) -> Result<(), ZydError> {
        self.ensure_ready()?;
        if self.shared.upload_active.swap(true, Ordering::SeqCst) {
            return Err(ZydError::UploadInProgress);
        }
        Ok(())
    }

    pub(crate) fn end_upload(&mut self) {
        self.shared.upload_active.store(false, Ordering::SeqCst);
        self.shared.fw_response.lock().unwrap().take();
    }

    /// Installs the single-shot waiter for the next firmware response. Must
    /// be armed before the command bytes go out.
    pub(crate) fn arm_firmware_response(&mut self) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        *self.shared.fw_response.lock().unwrap() = Some(tx);
        rx
    }

    pub(crate) fn shared(&self) -> Arc<SessionShared> {
        Arc::clone(&self.shared)
    }

    pub(crate) fn link_is_up(&self) -> bool {
        self.shared.link_up.load(Ordering::SeqCst)
    }
}

impl<T: BleTransport> Drop for ConnectionSession<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Keeps only ZYD-prefixed advertisements, de-duplicated by address with the
/// strongest signal winning.
pub fn filter_vendor_devices(raw: Vec<Advertisement>) -> Vec<Advertisement> {
    let mut devices: Vec<Advertisement> = Vec::new();
    for advert in raw {
        if !advert.name.starts_with(DEVICE_NAME_PREFIX) {
            continue;
        }
        match devices.iter_mut().find(|d| d.address == advert.address) {
            Some(existing) => {
                if advert.rssi.unwrap_or(i16::MIN) > existing.rssi.unwrap_or(i16::MIN) {
                    *existing = advert;
                }
            }
            None => devices.push(advert),
        }
    }
    devices
}
