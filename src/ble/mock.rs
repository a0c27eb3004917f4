//! Mock BLE transport for testing
//!
//! This module provides a scripted in-memory peripheral that can be used to
//! test the connection session and the firmware upload engine without any
//! Bluetooth hardware. The mock reassembles multi-write packets the same way
//! the controller firmware does and acknowledges firmware commands with
//! configurable status bytes.

use crate::ble::transport::{Advertisement, BleTransport, DeviceInfoItem};
use crate::constants::{
    CMD_BMS_DATA, CMD_CONTROL, CMD_FW_COMPLETE, CMD_FW_DATA, CMD_FW_ERASE, CMD_FW_REQUEST,
    CMD_RUNNING_DATA, CMD_VERSION_INFO, CONTROL_PACKET_LEN, FIRMWARE_PACKET_LEN,
    HEADER_ALTERNATE, HEADER_STANDARD, POLL_REQUEST_LEN, SHORT_REQUEST_LEN,
};
use crate::ZydError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct MockState {
    advertisements: Vec<Advertisement>,
    device_info: HashMap<DeviceInfoItem, String>,
    /// Complete commands the host sent, in order (sub-writes reassembled).
    commands: Vec<Vec<u8>>,
    /// Raw write payloads as issued, in order.
    writes: Vec<Vec<u8>>,
    /// Reassembly buffer for multi-write packets.
    rx: Vec<u8>,
    notify: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Negotiated MTU; `None` makes MTU negotiation fail.
    mtu: Option<u16>,
    /// Status byte echoed per firmware command (default 0x00).
    firmware_status: HashMap<u8, u8>,
    /// Firmware commands that get no response at all (timeout tests).
    silent: HashSet<u8>,
    /// Close the link after this many acknowledged D2 packets.
    drop_link_after: Option<usize>,
    /// Header byte used in mock responses.
    response_header: u8,
}

/// Shared half of the mock, kept by both the transport and the test handle.
struct MockShared {
    state: Mutex<MockState>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_discovery: AtomicBool,
    fail_writes: AtomicBool,
    auto_respond: AtomicBool,
    d2_acked: AtomicUsize,
}

/// Mock transport that simulates a ZYD peripheral.
pub struct MockTransport {
    shared: Arc<MockShared>,
}

/// Test-side handle to inspect and script the mock while the session owns
/// the transport itself.
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<MockShared>,
}

impl MockTransport {
    pub fn new() -> (MockTransport, MockHandle) {
        let shared = Arc::new(MockShared {
            state: Mutex::new(MockState {
                advertisements: vec![Advertisement {
                    name: "ZYD-TEST".into(),
                    address: "AA:BB:CC:DD:EE:FF".into(),
                    rssi: Some(-42),
                }],
                mtu: Some(247),
                response_header: HEADER_STANDARD,
                ..MockState::default()
            }),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_discovery: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            auto_respond: AtomicBool::new(true),
            d2_acked: AtomicUsize::new(0),
        });
        (
            MockTransport {
                shared: Arc::clone(&shared),
            },
            MockHandle { shared },
        )
    }
}

impl MockShared {
    /// Consume complete commands from the reassembly buffer and acknowledge
    /// firmware commands the way the controller does.
    fn process_rx(&self) {
        loop {
            let complete = {
                let mut state = self.state.lock().unwrap();
                if state.rx.len() < 2 {
                    return;
                }
                if state.rx[0] != HEADER_STANDARD && state.rx[0] != HEADER_ALTERNATE {
                    // Unrecognized leading byte; drop it so the buffer cannot jam.
                    state.rx.remove(0);
                    continue;
                }
                let total = match state.rx[1] {
                    CMD_FW_REQUEST | CMD_FW_ERASE | CMD_FW_COMPLETE => SHORT_REQUEST_LEN,
                    CMD_FW_DATA => FIRMWARE_PACKET_LEN,
                    CMD_RUNNING_DATA | CMD_BMS_DATA | CMD_VERSION_INFO => POLL_REQUEST_LEN,
                    CMD_CONTROL => CONTROL_PACKET_LEN,
                    _ => SHORT_REQUEST_LEN,
                };
                if state.rx.len() < total {
                    return;
                }
                let command: Vec<u8> = state.rx.drain(..total).collect();
                state.commands.push(command.clone());
                command
            };
            self.respond(&complete);
        }
    }

    fn respond(&self, command: &[u8]) {
        if !self.auto_respond.load(Ordering::SeqCst) {
            return;
        }
        let cmd = command[1];
        if !matches!(cmd, CMD_FW_REQUEST | CMD_FW_ERASE | CMD_FW_DATA) {
            // D3 gets no structured reply; telemetry replies are queued
            // explicitly by tests via MockHandle::notify.
            return;
        }

        let (response, drop_link) = {
            let state = self.state.lock().unwrap();
            if state.silent.contains(&cmd) {
                return;
            }
            let status = state.firmware_status.get(&cmd).copied().unwrap_or(0x00);
            let acked = if cmd == CMD_FW_DATA {
                self.d2_acked.fetch_add(1, Ordering::SeqCst) + 1
            } else {
                0
            };
            let drop_link = matches!(state.drop_link_after, Some(n) if cmd == CMD_FW_DATA && acked >= n);
            (vec![state.response_header, cmd, status], drop_link)
        };

        self.push_notification(&response);
        if drop_link {
            self.close_link();
        }
    }

    fn push_notification(&self, data: &[u8]) {
        let sender = self.state.lock().unwrap().notify.clone();
        if let Some(tx) = sender {
            let _ = tx.send(data.to_vec());
        }
    }

    fn close_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.fail_writes.store(true, Ordering::SeqCst);
        // Dropping the sender closes the notification stream, which is how
        // the session observes link loss.
        self.state.lock().unwrap().notify = None;
    }
}

impl MockHandle {
    /// Replace the scan results.
    pub fn set_advertisements(&self, adverts: Vec<Advertisement>) {
        self.shared.state.lock().unwrap().advertisements = adverts;
    }

    /// Set one Device-Information characteristic value.
    pub fn set_device_info(&self, item: DeviceInfoItem, value: &str) {
        self.shared
            .state
            .lock()
            .unwrap()
            .device_info
            .insert(item, value.to_string());
    }

    /// Make MTU negotiation fail (the session must keep the default MTU).
    pub fn fail_mtu(&self) {
        self.shared.state.lock().unwrap().mtu = None;
    }

    /// Set the MTU granted on negotiation.
    pub fn set_mtu(&self, mtu: u16) {
        self.shared.state.lock().unwrap().mtu = Some(mtu);
    }

    pub fn fail_connect(&self) {
        self.shared.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_discovery(&self) {
        self.shared.fail_discovery.store(true, Ordering::SeqCst);
    }

    /// Status byte the mock echoes for a firmware command (non-zero = NACK).
    pub fn set_firmware_status(&self, command: u8, status: u8) {
        self.shared
            .state
            .lock()
            .unwrap()
            .firmware_status
            .insert(command, status);
    }

    /// Suppress any response to the given firmware command.
    pub fn silence(&self, command: u8) {
        self.shared.state.lock().unwrap().silent.insert(command);
    }

    /// Use the alternate 0xAB header in mock responses.
    pub fn use_alternate_header(&self) {
        self.shared.state.lock().unwrap().response_header = HEADER_ALTERNATE;
    }

    /// Simulate link loss after `n` acknowledged D2 packets.
    pub fn drop_link_after_packets(&self, n: usize) {
        self.shared.state.lock().unwrap().drop_link_after = Some(n);
    }

    /// Simulate immediate, unexpected link loss.
    pub fn close_link(&self) {
        self.shared.close_link();
    }

    /// Push a notification to the session, as the device would.
    pub fn notify(&self, data: &[u8]) {
        self.shared.push_notification(data);
    }

    /// Raw write payloads as issued by the session.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().unwrap().writes.clone()
    }

    /// Complete reassembled commands received so far.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().unwrap().commands.clone()
    }

    /// Complete commands with the given command byte.
    pub fn commands_with(&self, command: u8) -> Vec<Vec<u8>> {
        self.commands()
            .into_iter()
            .filter(|c| c.len() >= 2 && c[1] == command)
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn scan(&mut self, _window: Duration) -> Result<Vec<Advertisement>, ZydError> {
        Ok(self.shared.state.lock().unwrap().advertisements.clone())
    }

    async fn connect(&mut self, address: &str) -> Result<(), ZydError> {
        if self.shared.fail_connect.load(Ordering::SeqCst) {
            return Err(ZydError::TransportError("connect refused".into()));
        }
        let known = self
            .shared
            .state
            .lock()
            .unwrap()
            .advertisements
            .iter()
            .any(|a| a.address == address);
        if !known {
            return Err(ZydError::TransportError(format!(
                "no peripheral with address {address}"
            )));
        }
        self.shared.connected.store(true, Ordering::SeqCst);
        self.shared.fail_writes.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ZydError> {
        self.shared.close_link();
        self.shared.fail_writes.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn request_mtu(&mut self, requested: u16) -> Result<u16, ZydError> {
        match self.shared.state.lock().unwrap().mtu {
            Some(granted) => Ok(requested.min(granted)),
            None => Err(ZydError::TransportError("MTU negotiation rejected".into())),
        }
    }

    async fn discover_services(&mut self) -> Result<(), ZydError> {
        if self.shared.fail_discovery.load(Ordering::SeqCst) {
            return Err(ZydError::TransportError("main service not found".into()));
        }
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, ZydError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.state.lock().unwrap().notify = Some(tx);
        Ok(rx)
    }

    async fn read_device_info(&mut self, item: DeviceInfoItem) -> Result<Option<String>, ZydError> {
        Ok(self.shared.state.lock().unwrap().device_info.get(&item).cloned())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), ZydError> {
        if self.shared.fail_writes.load(Ordering::SeqCst)
            || !self.shared.connected.load(Ordering::SeqCst)
        {
            return Err(ZydError::TransportError("write while link is down".into()));
        }
        {
            let mut state = self.shared.state.lock().unwrap();
            state.writes.push(data.to_vec());
            state.rx.extend_from_slice(data);
        }
        self.shared.process_rx();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{build_poll_request, build_short_request, HeaderVariant};

    #[tokio::test]
    async fn test_reassembles_subwrites_into_one_command() {
        let (mut mock, handle) = MockTransport::new();
        mock.connect("AA:BB:CC:DD:EE:FF").await.unwrap();
        let _rx = mock.subscribe().await.unwrap();

        let packet = build_short_request(HeaderVariant::Standard, CMD_FW_REQUEST);
        mock.write(&packet[..2]).await.unwrap();
        mock.write(&packet[2..]).await.unwrap();

        let commands = handle.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0], packet);
    }

    #[tokio::test]
    async fn test_acknowledges_firmware_commands() {
        let (mut mock, _handle) = MockTransport::new();
        mock.connect("AA:BB:CC:DD:EE:FF").await.unwrap();
        let mut rx = mock.subscribe().await.unwrap();

        mock.write(&build_short_request(HeaderVariant::Standard, CMD_FW_REQUEST))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), vec![0xF0, 0xD0, 0x00]);
    }

    #[tokio::test]
    async fn test_silenced_command_gets_no_response() {
        let (mut mock, handle) = MockTransport::new();
        handle.silence(CMD_FW_REQUEST);
        mock.connect("AA:BB:CC:DD:EE:FF").await.unwrap();
        let mut rx = mock.subscribe().await.unwrap();

        mock.write(&build_short_request(HeaderVariant::Standard, CMD_FW_REQUEST))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_polls_are_recorded_without_auto_response() {
        let (mut mock, handle) = MockTransport::new();
        mock.connect("AA:BB:CC:DD:EE:FF").await.unwrap();
        let _rx = mock.subscribe().await.unwrap();

        mock.write(&build_poll_request(HeaderVariant::Standard, CMD_VERSION_INFO))
            .await
            .unwrap();
        assert_eq!(handle.commands_with(CMD_VERSION_INFO).len(), 1);
    }

    #[tokio::test]
    async fn test_write_fails_after_link_close() {
        let (mut mock, handle) = MockTransport::new();
        mock.connect("AA:BB:CC:DD:EE:FF").await.unwrap();
        handle.close_link();
        let err = mock.write(&[0xF0, 0xD0]).await;
        assert!(err.is_err());
    }
}
