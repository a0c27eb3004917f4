//! Running data (0xA0) decoder.
//!
//! Real-time telemetry: speed, distances, temperatures, fault bitmap, and
//! the control-function flag word. 25 bytes on the wire:
//!
//! ```text
//! [0]=header [1]=0xA0 [2]=len(0x19)
//! [3-4]=fault code (u16 BE bitmap) [5-6]=control flags (u16 BE)
//! [7]=cruise speed [8]=current speed [9]=max speed        (km/h)
//! [10]=trip distance [11-12]=total distance (BE) [13]=remaining range (km)
//! [14-15]=current limit (BE, 0.1A)
//! [16]=motor temp (i8) [17]=controller temp (i8)
//! [18-19]=motor RPM (BE) [20-22]=reserved [23-24]=CRC
//! ```
//!
//! Voltage, current and battery percent are not in this packet; they come
//! from the 0xA1 BMS packet.

use super::{i8_at, u16_be_at, u8_at};
use crate::constants::CMD_RUNNING_DATA;
use crate::util::hex::encode_hex;
use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Control-function flag word carried in bytes 5-6 of the 0xA0 packet
    /// and sent back to the device in the 0xC0 control command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlFlags: u16 {
        const GEAR_BIT0   = 0x0001;
        const GEAR_BIT1   = 0x0002;
        const HEADLIGHTS  = 0x0010;
        const CRUISE      = 0x0020;
        const LOCKED      = 0x0100;
        const UNIT_MILES  = 0x0200;
        const ZERO_START  = 0x0400;
    }
}

/// Fault names by bit position in the fault-code bitmap.
const FAULT_NAMES: [&str; 14] = [
    "E0: Motor Temp Out of Range",
    "E1: Brake Fault",
    "E2: Throttle Fault",
    "E3: Controller Fault",
    "E4: Communication Fault",
    "E5: Battery Fault",
    "E6: Hall Sensor Fault",
    "E7: Motor Phase Fault",
    "E8: MOS Fault",
    "E9: Over-Voltage",
    "E10: Under-Voltage",
    "E11: Over-Current",
    "E12: Controller Over-Temp",
    "E13: Battery Fault",
];

/// Real-time running data from instruction 0xA0.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunningDataInfo {
    /// Raw fault code bitmap (bit N = fault EN active).
    pub fault_code: u16,
    /// Raw control-function flag word.
    pub control_flags: u16,
    /// Gear level 1-4, from flag bits 0-1.
    pub gear_level: u8,
    pub headlights_on: bool,
    pub cruise_enabled: bool,
    pub device_locked: bool,
    /// false = km, true = miles.
    pub unit_is_miles: bool,
    /// false = glide start, true = zero start.
    pub zero_start: bool,

    /// Cruise speed in km/h.
    pub cruise_speed: u8,
    /// Current speed in km/h.
    pub current_speed: u8,
    /// Max speed setting in km/h.
    pub max_speed: u8,

    /// Trip distance in km.
    pub trip_distance: u8,
    /// Total odometer in km.
    pub total_distance: u16,
    /// Estimated remaining range in km.
    pub remaining_range: u8,

    /// Current limit in amps (0.1 A resolution on the wire).
    pub current_limit: f64,

    /// Motor temperature in °C.
    pub motor_temp: i8,
    /// Controller temperature in °C.
    pub controller_temp: i8,

    pub motor_rpm: u16,

    /// Derived: current speed above zero.
    pub is_moving: bool,

    /// Raw packet hex, kept for debugging.
    pub raw_hex: String,
}

impl RunningDataInfo {
    /// Parses a 0xA0 running data packet. Returns `None` when the packet is
    /// not an A0 response or shorter than the mandatory field region.
    pub fn parse(data: &[u8]) -> Option<RunningDataInfo> {
        if data.len() < 18 || !super::has_command(data, CMD_RUNNING_DATA) {
            return None;
        }

        let control_flags = u16_be_at(data, 5);
        let flags = ControlFlags::from_bits_truncate(control_flags);
        let current_speed = u8_at(data, 8);

        Some(RunningDataInfo {
            fault_code: u16_be_at(data, 3),
            control_flags,
            gear_level: (control_flags & 0x03) as u8 + 1,
            headlights_on: flags.contains(ControlFlags::HEADLIGHTS),
            cruise_enabled: flags.contains(ControlFlags::CRUISE),
            device_locked: flags.contains(ControlFlags::LOCKED),
            unit_is_miles: flags.contains(ControlFlags::UNIT_MILES),
            zero_start: flags.contains(ControlFlags::ZERO_START),
            cruise_speed: u8_at(data, 7),
            current_speed,
            max_speed: u8_at(data, 9),
            trip_distance: u8_at(data, 10),
            total_distance: u16_be_at(data, 11),
            remaining_range: u8_at(data, 13),
            current_limit: u16_be_at(data, 14) as f64 / 10.0,
            motor_temp: i8_at(data, 16),
            controller_temp: i8_at(data, 17),
            motor_rpm: u16_be_at(data, 18),
            is_moving: current_speed > 0,
            raw_hex: encode_hex(data),
        })
    }

    /// The control flag word as typed flags.
    pub fn flags(&self) -> ControlFlags {
        ControlFlags::from_bits_truncate(self.control_flags)
    }

    /// Human-readable names of the active faults.
    pub fn active_faults(&self) -> Vec<&'static str> {
        FAULT_NAMES
            .iter()
            .enumerate()
            .filter(|(i, _)| self.fault_code & (1 << i) != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

impl std::fmt::Display for RunningDataInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "speed={} km/h totalDist={} km tripDist={} km range={} km gear={} \
             motorTemp={}°C ctrlTemp={}°C rpm={} faults={:#06x}",
            self.current_speed,
            self.total_distance,
            self.trip_distance,
            self.remaining_range,
            self.gear_level,
            self.motor_temp,
            self.controller_temp,
            self.motor_rpm,
            self.fault_code,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::append_crc;

    fn a0_packet() -> Vec<u8> {
        let mut pkt = vec![
            0xF0, 0xA0, 0x19, // header, cmd, len
            0x00, 0x03, // faults: E0 + E1
            0x00, 0x31, // flags: gear bit0 + headlights + cruise
            18,   // cruise speed
            22,   // current speed
            25,   // max speed
            7,    // trip
            0x01, 0x2C, // total distance 300
            14,   // range
            0x00, 0x96, // current limit 15.0 A
            0xF6, // motor temp -10
            0x28, // controller temp 40
            0x0B, 0xB8, // rpm 3000
            0x00, 0x00, 0x00, // reserved
        ];
        append_crc(&mut pkt);
        assert_eq!(pkt.len(), 25);
        pkt
    }

    #[test]
    fn test_parse_full_packet() {
        let info = RunningDataInfo::parse(&a0_packet()).unwrap();
        assert_eq!(info.fault_code, 0x0003);
        assert_eq!(
            info.active_faults(),
            vec!["E0: Motor Temp Out of Range", "E1: Brake Fault"]
        );
        assert_eq!(info.gear_level, 2);
        assert!(info.headlights_on);
        assert!(info.cruise_enabled);
        assert!(!info.device_locked);
        assert_eq!(info.cruise_speed, 18);
        assert_eq!(info.current_speed, 22);
        assert!(info.is_moving);
        assert_eq!(info.total_distance, 300);
        assert_eq!(info.current_limit, 15.0);
        assert_eq!(info.motor_temp, -10);
        assert_eq!(info.controller_temp, 40);
        assert_eq!(info.motor_rpm, 3000);
    }

    #[test]
    fn test_truncated_packet_zero_fills_tail_fields() {
        // 18 bytes: ends right after the controller temperature.
        let info = RunningDataInfo::parse(&a0_packet()[..18]).unwrap();
        assert_eq!(info.controller_temp, 40);
        assert_eq!(info.motor_rpm, 0);
    }

    #[test]
    fn test_rejects_other_commands() {
        let mut pkt = a0_packet();
        pkt[1] = 0xA1;
        assert!(RunningDataInfo::parse(&pkt).is_none());
        assert!(RunningDataInfo::parse(&pkt[..10]).is_none());
    }
}
