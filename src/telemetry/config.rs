//! Configuration/settings (0x01) decoder.
//!
//! Device-initiated packet carrying speed limits per ride mode, fault flags,
//! display-panel selections and the controller's own software version.
//! 25 bytes on the wire.

use super::{u16_be_at, u8_at};
use crate::constants::CMD_CONFIG;
use crate::util::hex::encode_hex;
use serde::Serialize;

/// Configuration and settings data from instruction 0x01.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigInfo {
    /// Minimum speed for cruise control (byte 3).
    pub min_cruise_speed: u8,
    /// Energy-saving mode speed limit (byte 4).
    pub max_speed_eco: u8,
    /// Comfort mode speed limit (byte 5).
    pub max_speed_comfort: u8,
    /// Sport mode speed limit (byte 6).
    pub max_speed_sport: u8,

    /// Fault flag word (bytes 8-9).
    pub fault_flags: u16,
    /// Panel selection word (bytes 10-11).
    pub panel_flags: u16,

    /// Controller software version string, e.g. `"8025_01.00.01"`
    /// (bytes 18-22).
    pub software_version: String,

    /// Raw packet hex, kept for debugging.
    pub raw_hex: String,
}

impl ConfigInfo {
    /// Parses a 0x01 configuration packet. The packet must carry the full
    /// 25-byte layout.
    pub fn parse(data: &[u8]) -> Option<ConfigInfo> {
        if data.len() < 25 || !super::has_command(data, CMD_CONFIG) {
            return None;
        }

        Some(ConfigInfo {
            min_cruise_speed: u8_at(data, 3),
            max_speed_eco: u8_at(data, 4),
            max_speed_comfort: u8_at(data, 5),
            max_speed_sport: u8_at(data, 6),
            fault_flags: u16_be_at(data, 8),
            panel_flags: u16_be_at(data, 10),
            software_version: format!(
                "{:02X}{:02X}_{:02X}.{:02X}.{:02X}",
                u8_at(data, 18),
                u8_at(data, 19),
                u8_at(data, 20),
                u8_at(data, 21),
                u8_at(data, 22),
            ),
            raw_hex: encode_hex(data),
        })
    }

    pub fn fault_warning_enabled(&self) -> bool {
        self.fault_flags & 0x0001 != 0
    }
    pub fn brake_failure(&self) -> bool {
        self.fault_flags & 0x0002 != 0
    }
    pub fn throttle_fault(&self) -> bool {
        self.fault_flags & 0x0004 != 0
    }
    pub fn comm_disconnect(&self) -> bool {
        self.fault_flags & 0x0008 != 0
    }
    pub fn overcurrent(&self) -> bool {
        self.fault_flags & 0x0010 != 0
    }
    pub fn hall_fault(&self) -> bool {
        self.fault_flags & 0x0080 != 0
    }
    pub fn op_amp_bias(&self) -> bool {
        self.fault_flags & 0x0200 != 0
    }
    pub fn brake_not_reset(&self) -> bool {
        self.fault_flags & 0x0800 != 0
    }
    pub fn throttle_not_reset(&self) -> bool {
        self.fault_flags & 0x1000 != 0
    }

    pub fn sn_code_panel(&self) -> bool {
        self.panel_flags & 0x0001 != 0
    }
    pub fn mp3_panel(&self) -> bool {
        self.panel_flags & 0x0002 != 0
    }
    pub fn rgb_panel(&self) -> bool {
        self.panel_flags & 0x0004 != 0
    }
    pub fn bms_panel(&self) -> bool {
        self.panel_flags & 0x0008 != 0
    }

    /// Speed unit selected on the display: km/h or mph (panel bit 12).
    pub fn speed_unit(&self) -> &'static str {
        if self.panel_flags & 0x1000 != 0 {
            "mph"
        } else {
            "km/h"
        }
    }

    /// Human-readable summary of active faults.
    pub fn active_faults(&self) -> String {
        let mut faults = Vec::new();
        if self.brake_failure() {
            faults.push("E1: Brake failure");
        }
        if self.throttle_fault() {
            faults.push("E2: Throttle fault");
        }
        if self.comm_disconnect() {
            faults.push("E3: Communication disconnect");
        }
        if self.overcurrent() {
            faults.push("E4: Overcurrent");
        }
        if self.hall_fault() {
            faults.push("E7: Hall fault");
        }
        if self.op_amp_bias() {
            faults.push("E9: Op amp bias");
        }
        if self.brake_not_reset() {
            faults.push("F1: Brake not reset");
        }
        if self.throttle_not_reset() {
            faults.push("F2: Throttle not reset");
        }
        if faults.is_empty() {
            "No active faults".to_string()
        } else {
            faults.join("\n")
        }
    }
}

impl std::fmt::Display for ConfigInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "minCruise={} eco={} comfort={} sport={} ({}) sw='{}'",
            self.min_cruise_speed,
            self.max_speed_eco,
            self.max_speed_comfort,
            self.max_speed_sport,
            self.speed_unit(),
            self.software_version,
        )
    }
}
