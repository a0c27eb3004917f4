//! Decoder tests for the version, running-data, BMS and config packets.

use zyd_rs::protocol::crc::append_crc;
use zyd_rs::telemetry::{BmsDataInfo, ConfigInfo, RunningDataInfo, VersionInfo};

fn finish(mut packet: Vec<u8>) -> Vec<u8> {
    append_crc(&mut packet);
    packet
}

fn b0_format_a() -> Vec<u8> {
    let mut pkt = vec![0xF0, 0xB0, 0x19, 0x80, 0x25];
    pkt.extend_from_slice(&[0x23, 0x24, 0x23, 0x11, 0x12, 0x13]);
    pkt.extend_from_slice(&[0u8; 12]);
    finish(pkt)
}

fn b0_format_b(serial: &[u8; 13]) -> Vec<u8> {
    let mut pkt = vec![0xF0, 0xB0, 0x20, 0x80, 0x25];
    pkt.extend_from_slice(serial);
    pkt.extend_from_slice(&[0, 0, 0]);
    pkt.extend_from_slice(&[0x23, 0x24, 0x23, 0x11, 0x12, 0x13]);
    pkt.extend_from_slice(&[0u8; 3]);
    finish(pkt)
}

#[test]
fn test_version_format_a_25_bytes() {
    let packet = b0_format_a();
    assert_eq!(packet.len(), 25);

    let info = VersionInfo::parse(&packet).unwrap();
    assert_eq!(info.model, 0x8025);
    // Nibble decoding: byte 0x23 reads as version 2.3.
    assert_eq!(info.meter_hw_version, "V2.3");
    assert_eq!(info.meter_sw_version, "V2.4");
    assert_eq!(info.controller_hw_version, "V2.3");
    assert_eq!(info.controller_sw_version, "V1.1");
    assert_eq!(info.bms_hw_version, "V1.2");
    assert_eq!(info.bms_sw_version, "V1.3");
    assert!(!info.has_embedded_serial());
}

#[test]
fn test_version_format_b_32_bytes_with_serial() {
    let packet = b0_format_b(b"S23ABCDE01234");
    assert_eq!(packet.len(), 32);

    let info = VersionInfo::parse(&packet).unwrap();
    assert_eq!(info.embedded_serial, "S23ABCDE01234");
    assert_eq!(info.embedded_serial.len(), 13);
    assert_eq!(info.meter_hw_version, "V2.3");
    assert_eq!(info.controller_sw_version, "V1.1");
}

/// A 32-byte buffer without the 0x20 length field still decodes as Format A:
/// the layout is chosen from length AND length field together.
#[test]
fn test_version_format_selection_needs_both_signals() {
    let mut pkt = vec![0xF0, 0xB0, 0x19, 0x80, 0x25];
    pkt.extend_from_slice(&[0x23, 0x24, 0x23, 0x11, 0x12, 0x13]);
    pkt.extend_from_slice(&[0u8; 19]);
    let packet = finish(pkt);
    assert_eq!(packet.len(), 32);

    let info = VersionInfo::parse(&packet).unwrap();
    assert!(!info.has_embedded_serial());
    assert_eq!(info.meter_hw_version, "V2.3");
}

#[test]
fn test_running_data_alternate_header() {
    let mut pkt = vec![
        0xAB, 0xA0, 0x19, 0x00, 0x00, // no faults
        0x01, 0x13, // flags: locked + headlights + gear 4
        0, 15, 25, 3, 0x00, 0x64, 10, 0x00, 0x78, 30, 35, 0x03, 0xE8, 0, 0, 0,
    ];
    append_crc(&mut pkt);

    let info = RunningDataInfo::parse(&pkt).unwrap();
    assert_eq!(info.gear_level, 4);
    assert!(info.headlights_on);
    assert!(info.device_locked);
    assert!(!info.cruise_enabled);
    assert_eq!(info.current_speed, 15);
    assert_eq!(info.total_distance, 100);
    assert_eq!(info.current_limit, 12.0);
    assert_eq!(info.motor_rpm, 1000);
    assert!(info.active_faults().is_empty());
}

#[test]
fn test_bms_truncation_leaves_zero_defaults() {
    // Delivery stopped after the current field: 15 bytes, no CRC trailer.
    let pkt = vec![
        0xF0, 0xA1, 0x19, 55, 90, 0x00, 0x10, 0x00, 0x20, 0x0E, 0x74, 0x01, 0x90, 0x00, 0x00,
    ];

    let info = BmsDataInfo::parse(&pkt).unwrap();
    assert_eq!(info.battery_soc, 55);
    assert_eq!(info.battery_voltage, 37.0);
    assert_eq!(info.battery_current, 4.0);
    // Fields past the received length stay at zero.
    assert_eq!(info.full_capacity, 0);
    assert_eq!(info.avg_temperature, 0);
    assert!(!info.has_fault);
}

#[test]
fn test_config_full_decode() {
    let mut pkt = vec![
        0xF0, 0x01, 0x19, 8, 12, 20, 28, 0x00, 0x00, 0x00, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0x80,
        0x25, 0x01, 0x00, 0x02,
    ];
    append_crc(&mut pkt);
    assert_eq!(pkt.len(), 25);

    let info = ConfigInfo::parse(&pkt).unwrap();
    assert_eq!(info.min_cruise_speed, 8);
    assert_eq!(info.max_speed_eco, 12);
    assert_eq!(info.max_speed_comfort, 20);
    assert_eq!(info.max_speed_sport, 28);
    assert_eq!(info.speed_unit(), "km/h");
    assert_eq!(info.software_version, "8025_01.00.02");
    assert_eq!(info.active_faults(), "No active faults");
}

#[test]
fn test_decoders_reject_cross_command_packets() {
    let a0 = {
        let mut pkt = vec![0xF0, 0xA0, 0x19];
        pkt.extend_from_slice(&[0u8; 20]);
        finish(pkt)
    };
    assert!(BmsDataInfo::parse(&a0).is_none());
    assert!(VersionInfo::parse(&a0).is_none());
    assert!(ConfigInfo::parse(&a0).is_none());
    assert!(RunningDataInfo::parse(&a0).is_some());
}
