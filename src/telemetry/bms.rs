//! BMS data (0xA1) decoder.
//!
//! Battery-management metrics: state of charge, health, cycle counts, pack
//! voltage/current, capacities and temperatures. Variable length, typically
//! 20-40 bytes:
//!
//! ```text
//! [0]=header [1]=0xA1 [2]=len
//! [3]=SOC % [4]=health %
//! [5-6]=charge cycles [7-8]=discharge cycles          (u16 BE)
//! [9-10]=pack voltage (0.01V) [11-12]=current (i16 BE, 0.01A)
//! [13-14]=remaining [15-16]=full [17-18]=design capacity (mAh)
//! [19]=avg temp [20]=max temp [21]=min temp           (i8, °C)
//! [22]=status flags [...]=reserved [last 2]=CRC
//! ```
//!
//! The exact layout varies between controller firmwares; all tail fields
//! degrade to zero on short packets.

use super::{i16_be_at, i8_at, u16_be_at, u8_at};
use crate::constants::CMD_BMS_DATA;
use crate::util::hex::encode_hex;
use serde::Serialize;

/// Battery Management System data from instruction 0xA1.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BmsDataInfo {
    /// State of charge, 0-100 %.
    pub battery_soc: u8,
    /// Battery health, 0-100 %.
    pub battery_health: u8,
    pub charge_cycles: u16,
    pub discharge_cycles: u16,
    /// Total pack voltage in volts.
    pub battery_voltage: f64,
    /// Pack current in amps; negative while discharging.
    pub battery_current: f64,
    /// Remaining capacity in mAh.
    pub remaining_capacity: u16,
    /// Full-charge capacity in mAh.
    pub full_capacity: u16,
    /// Design capacity in mAh.
    pub design_capacity: u16,
    /// Average temperature in °C.
    pub avg_temperature: i8,
    pub max_temperature: i8,
    pub min_temperature: i8,
    pub is_charging: bool,
    pub is_discharging: bool,
    pub is_balancing: bool,
    pub has_fault: bool,
    /// Raw packet hex, kept for debugging.
    pub raw_hex: String,
}

impl BmsDataInfo {
    /// Parses a 0xA1 BMS packet. Returns `None` when the packet is not an A1
    /// response or shorter than the mandatory field region.
    pub fn parse(data: &[u8]) -> Option<BmsDataInfo> {
        if data.len() < 15 || !super::has_command(data, CMD_BMS_DATA) {
            return None;
        }

        let status = u8_at(data, 22);

        Some(BmsDataInfo {
            battery_soc: u8_at(data, 3),
            battery_health: u8_at(data, 4),
            charge_cycles: u16_be_at(data, 5),
            discharge_cycles: u16_be_at(data, 7),
            battery_voltage: u16_be_at(data, 9) as f64 / 100.0,
            battery_current: i16_be_at(data, 11) as f64 / 100.0,
            remaining_capacity: u16_be_at(data, 13),
            full_capacity: u16_be_at(data, 15),
            design_capacity: u16_be_at(data, 17),
            avg_temperature: i8_at(data, 19),
            max_temperature: i8_at(data, 20),
            min_temperature: i8_at(data, 21),
            is_charging: status & 0x01 != 0,
            is_discharging: status & 0x02 != 0,
            is_balancing: status & 0x04 != 0,
            has_fault: status & 0x80 != 0,
            raw_hex: encode_hex(data),
        })
    }

    /// Instantaneous pack power in watts.
    pub fn power(&self) -> f64 {
        self.battery_voltage * self.battery_current.abs()
    }
}

impl std::fmt::Display for BmsDataInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SOC={}% health={}% chargeCycles={} voltage={:.2}V current={:.2}A \
             capacity={}/{} mAh temp={}°C (min:{} max:{})",
            self.battery_soc,
            self.battery_health,
            self.charge_cycles,
            self.battery_voltage,
            self.battery_current,
            self.remaining_capacity,
            self.full_capacity,
            self.avg_temperature,
            self.min_temperature,
            self.max_temperature,
        )
    }
}
