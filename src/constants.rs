//! ZYD Protocol Constants
//!
//! This module defines constants used in the ZYD scooter-controller BLE
//! protocol implementation: GATT identifiers, command bytes, packet geometry
//! and the timeouts mandated by the device.

use std::time::Duration;

// ----------------------------------------------------------------------------
// GATT identifiers (vendor-defined main service + standard Device Information)
// ----------------------------------------------------------------------------

/// Main data-exchange service.
pub const MAIN_SERVICE_UUID: &str = "0000fff0-0000-1000-8000-00805f9b34fb";
/// Control (write) characteristic.
pub const CONTROL_CHAR_UUID: &str = "0000fff1-0000-1000-8000-00805f9b34fb";
/// Notify characteristic.
pub const NOTIFY_CHAR_UUID: &str = "0000fff2-0000-1000-8000-00805f9b34fb";

/// Standard Device Information Service (0x180A).
pub const DEVICE_INFO_SERVICE_UUID: &str = "0000180a-0000-1000-8000-00805f9b34fb";
pub const MODEL_NUMBER_UUID: &str = "00002a24-0000-1000-8000-00805f9b34fb";
pub const SERIAL_NUMBER_UUID: &str = "00002a25-0000-1000-8000-00805f9b34fb";
pub const FIRMWARE_REV_UUID: &str = "00002a26-0000-1000-8000-00805f9b34fb";
pub const HARDWARE_REV_UUID: &str = "00002a27-0000-1000-8000-00805f9b34fb";
pub const SOFTWARE_REV_UUID: &str = "00002a28-0000-1000-8000-00805f9b34fb";
pub const MANUFACTURER_UUID: &str = "00002a29-0000-1000-8000-00805f9b34fb";

/// Client Characteristic Configuration descriptor (notification enable).
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: &str = "00002902-0000-1000-8000-00805f9b34fb";

/// Advertised-name prefix of ZYD controllers.
pub const DEVICE_NAME_PREFIX: &str = "ZYD";

// ----------------------------------------------------------------------------
// Protocol header bytes
// ----------------------------------------------------------------------------

/// Standard protocol header.
pub const HEADER_STANDARD: u8 = 0xF0;
/// Alternate header used by some controller firmwares.
pub const HEADER_ALTERNATE: u8 = 0xAB;

// ----------------------------------------------------------------------------
// Command bytes
// ----------------------------------------------------------------------------

/// Config/settings packet (device-initiated).
pub const CMD_CONFIG: u8 = 0x01;
/// Running-data request/response.
pub const CMD_RUNNING_DATA: u8 = 0xA0;
/// BMS-data request/response.
pub const CMD_BMS_DATA: u8 = 0xA1;
/// Trip-data packet (seen on the wire, not decoded).
pub const CMD_TRIP_DATA: u8 = 0xA2;
/// Version-info request/response.
pub const CMD_VERSION_INFO: u8 = 0xB0;
/// Control/lock command.
pub const CMD_CONTROL: u8 = 0xC0;
/// Firmware upgrade request.
pub const CMD_FW_REQUEST: u8 = 0xD0;
/// Firmware flash erase.
pub const CMD_FW_ERASE: u8 = 0xD1;
/// Firmware data chunk.
pub const CMD_FW_DATA: u8 = 0xD2;
/// Firmware upload complete.
pub const CMD_FW_COMPLETE: u8 = 0xD3;

// ----------------------------------------------------------------------------
// Packet geometry
// ----------------------------------------------------------------------------

/// Total length of a short firmware request (header, command, CRC16).
pub const SHORT_REQUEST_LEN: usize = 4;
/// Total length of a telemetry poll (header, command, length, CRC16).
pub const POLL_REQUEST_LEN: usize = 5;
/// Total length of a control command packet.
pub const CONTROL_PACKET_LEN: usize = 15;
/// Firmware payload chunk size.
pub const FIRMWARE_CHUNK_SIZE: usize = 128;
/// Total length of a D2 firmware data packet
/// (header, command, 2-byte index, 2 reserved, 128 data, CRC16).
pub const FIRMWARE_PACKET_LEN: usize = 136;
/// Reserved bytes following the D2 packet index.
pub const FIRMWARE_RESERVED: [u8; 2] = [0x00, 0x80];

/// Minimum accepted firmware image size.
pub const MIN_FIRMWARE_SIZE: usize = 1024;
/// Maximum accepted firmware image size.
pub const MAX_FIRMWARE_SIZE: usize = 512 * 1024;

// ----------------------------------------------------------------------------
// Transport parameters
// ----------------------------------------------------------------------------

/// Default ATT MTU before negotiation.
pub const DEFAULT_MTU: u16 = 23;
/// MTU requested at connect so a 136-byte D2 packet fits one write.
pub const REQUESTED_MTU: u16 = 512;
/// ATT protocol overhead per write; usable payload = MTU - 3.
pub const ATT_OVERHEAD: usize = 3;

// ----------------------------------------------------------------------------
// Timeouts and pacing
// ----------------------------------------------------------------------------

/// Scan window length.
pub const SCAN_WINDOW: Duration = Duration::from_secs(3);
/// Time allowed for the physical link to come up.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Time allowed for the disconnect acknowledgment before forced cleanup.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Per-write acknowledgment timeout.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// D0 upgrade-permission response timeout.
pub const D0_TIMEOUT: Duration = Duration::from_secs(10);
/// D1 erase response timeout (flash erase is slow).
pub const D1_TIMEOUT: Duration = Duration::from_secs(15);
/// D2 response timeout for the first few packets (flash warm-up).
pub const D2_INITIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// D2 response timeout after warm-up.
pub const D2_PACKET_TIMEOUT: Duration = Duration::from_secs(3);
/// Number of leading D2 packets that get the longer timeout.
pub const D2_INITIAL_PACKETS: usize = 5;
/// Settle time after D3 while the device reboots.
pub const D3_SETTLE: Duration = Duration::from_secs(5);
/// Pause after each acknowledged write, per device processing requirements.
pub const INTER_WRITE_PAUSE: Duration = Duration::from_millis(10);

/// Maximum telemetry/version request attempts.
pub const VERSION_REQUEST_RETRIES: u32 = 3;
/// Delay between telemetry/version request attempts.
pub const VERSION_RETRY_DELAY: Duration = Duration::from_secs(3);
/// Stagger between the A0 and B0 polls within one attempt.
pub const B0_POLL_DELAY: Duration = Duration::from_millis(300);
/// Stagger between the A0 and A1 polls within one attempt.
pub const A1_POLL_DELAY: Duration = Duration::from_millis(600);
