//! Version info (0xB0) decoder.
//!
//! Two B0 response layouts exist in the field and are selected from the
//! total length and the length byte alone:
//!
//! Format A, 25 bytes (standard protocol doc):
//! ```text
//! [0]=header [1]=0xB0 [2]=len(0x19) [3-4]=model
//! [5]=meter HW [6]=meter SW [7]=controller HW [8]=controller SW
//! [9]=BMS HW [10]=BMS SW [11-22]=reserved [23-24]=CRC
//! ```
//!
//! Format B, 32 bytes (some devices, embeds the serial number):
//! ```text
//! [0]=header [1]=0xB0 [2]=len(0x20) [3-4]=model
//! [5-17]=13-char ASCII serial [18-20]=reserved
//! [21]=meter HW [22]=meter SW [23]=controller HW [24]=controller SW
//! [25]=BMS HW [26]=BMS SW [27-29]=reserved [30-31]=CRC
//! ```
//!
//! Each version byte uses nibble encoding: high nibble = major, low = minor.

use super::{nibble_version, u16_be_at, u8_at};
use crate::constants::CMD_VERSION_INFO;
use serde::Serialize;

/// Parsed version data from the 0xB0 packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub controller_hw_version: String,
    pub controller_sw_version: String,
    pub meter_hw_version: String,
    pub meter_sw_version: String,
    pub bms_hw_version: String,
    pub bms_sw_version: String,
    pub model: u16,
    /// Only present in the 32-byte Format B.
    pub embedded_serial: String,
    /// Raw B0 packet bytes, kept for debugging.
    pub raw: Vec<u8>,
}

impl VersionInfo {
    /// Parses a 0xB0 version packet. Returns `None` for packets that are not
    /// B0 responses or are shorter than the smallest decodable layout.
    pub fn parse(data: &[u8]) -> Option<VersionInfo> {
        if data.len() < 11 || !super::has_command(data, CMD_VERSION_INFO) {
            return None;
        }

        let mut info = VersionInfo {
            model: u16_be_at(data, 3),
            raw: data.to_vec(),
            ..VersionInfo::default()
        };

        let len_field = u8_at(data, 2);
        if data.len() >= 27 && len_field >= 0x20 {
            // Format B: embedded serial at 5..18, versions shifted by +16.
            info.embedded_serial = String::from_utf8_lossy(&data[5..18]).trim().to_string();
            info.meter_hw_version = nibble_version(u8_at(data, 21));
            info.meter_sw_version = nibble_version(u8_at(data, 22));
            info.controller_hw_version = nibble_version(u8_at(data, 23));
            info.controller_sw_version = nibble_version(u8_at(data, 24));
            info.bms_hw_version = nibble_version(u8_at(data, 25));
            info.bms_sw_version = nibble_version(u8_at(data, 26));
        } else {
            // Format A: versions directly after the model word.
            info.meter_hw_version = nibble_version(u8_at(data, 5));
            info.meter_sw_version = nibble_version(u8_at(data, 6));
            info.controller_hw_version = nibble_version(u8_at(data, 7));
            info.controller_sw_version = nibble_version(u8_at(data, 8));
            info.bms_hw_version = nibble_version(u8_at(data, 9));
            info.bms_sw_version = nibble_version(u8_at(data, 10));
        }

        Some(info)
    }

    /// True when the packet carried an embedded serial number (Format B).
    pub fn has_embedded_serial(&self) -> bool {
        !self.embedded_serial.is_empty()
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Controller HW:{} SW:{} Meter HW:{} SW:{} BMS HW:{} SW:{}",
            self.controller_hw_version,
            self.controller_sw_version,
            self.meter_hw_version,
            self.meter_sw_version,
            self.bms_hw_version,
            self.bms_sw_version,
        )?;
        if self.has_embedded_serial() {
            write!(f, " SN:{}", self.embedded_serial)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::append_crc;

    fn format_a_packet() -> Vec<u8> {
        let mut pkt = vec![0xF0, 0xB0, 0x19, 0x12, 0x34];
        // meter HW/SW, controller HW/SW, BMS HW/SW
        pkt.extend_from_slice(&[0x11, 0x12, 0x23, 0x24, 0x10, 0x15]);
        pkt.extend_from_slice(&[0u8; 12]); // reserved
        append_crc(&mut pkt);
        assert_eq!(pkt.len(), 25);
        pkt
    }

    fn format_b_packet() -> Vec<u8> {
        let mut pkt = vec![0xAB, 0xB0, 0x20, 0x12, 0x34];
        pkt.extend_from_slice(b"ZYD1234567890"); // 13-char serial
        pkt.extend_from_slice(&[0x00, 0x00, 0x00]); // reserved
        pkt.extend_from_slice(&[0x11, 0x12, 0x23, 0x24, 0x10, 0x15]);
        pkt.extend_from_slice(&[0u8; 3]); // reserved
        append_crc(&mut pkt);
        assert_eq!(pkt.len(), 32);
        pkt
    }

    #[test]
    fn test_format_a_selected_for_25_bytes() {
        let info = VersionInfo::parse(&format_a_packet()).unwrap();
        assert!(!info.has_embedded_serial());
        assert_eq!(info.model, 0x1234);
        assert_eq!(info.meter_hw_version, "V1.1");
        assert_eq!(info.controller_hw_version, "V2.3");
        assert_eq!(info.controller_sw_version, "V2.4");
        assert_eq!(info.bms_sw_version, "V1.5");
    }

    #[test]
    fn test_format_b_selected_for_32_bytes_with_len_0x20() {
        let info = VersionInfo::parse(&format_b_packet()).unwrap();
        assert_eq!(info.embedded_serial, "ZYD1234567890");
        assert_eq!(info.controller_hw_version, "V2.3");
        assert_eq!(info.bms_hw_version, "V1.0");
    }

    #[test]
    fn test_rejects_wrong_command_or_short_packet() {
        assert!(VersionInfo::parse(&[0xF0, 0xA0, 0x19, 0, 0, 0, 0, 0, 0, 0, 0]).is_none());
        assert!(VersionInfo::parse(&[0xF0, 0xB0, 0x19]).is_none());
    }

    #[test]
    fn test_raw_bytes_retained() {
        let pkt = format_a_packet();
        let info = VersionInfo::parse(&pkt).unwrap();
        assert_eq!(info.raw, pkt);
    }
}
