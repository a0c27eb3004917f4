//! Unit tests for the packet codec: building, parsing and CRC verification
//! of ZYD packets.

use proptest::prelude::*;
use zyd_rs::protocol::crc::crc16_modbus;
use zyd_rs::protocol::packet::{
    build_chunk_packet, build_command, build_control_packet, build_poll_request,
    build_short_request, classify_packet, parse_packet, verify_packet, HeaderVariant, PacketKind,
};

/// The captured D0 upgrade request for a standard-header device.
#[test]
fn test_golden_d0_request() {
    let cmd = build_short_request(HeaderVariant::Standard, 0xD0);
    assert_eq!(cmd, vec![0xF0, 0xD0, 0x44, 0x2C]);
}

/// CRC16 must match the captured reference values byte-for-byte.
#[test]
fn test_crc_reference_vectors() {
    assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
    assert_eq!(crc16_modbus(&[0xF0, 0xD0]), 0x2C44);
    assert_eq!(crc16_modbus(&[0xAB, 0xD0]), 0x1C7F);
    assert_eq!(crc16_modbus(&[0xF0, 0xA0, 0x05]), 0xF0C9);
    assert_eq!(crc16_modbus(&[0xAB, 0xB0, 0x05]), 0xE3B5);
}

/// Every poll request is five bytes with the length byte 0x05.
#[test]
fn test_poll_requests_for_both_headers() {
    for header in [HeaderVariant::Standard, HeaderVariant::Alternate] {
        for cmd in [0xA0u8, 0xA1, 0xB0] {
            let packet = build_poll_request(header, cmd);
            assert_eq!(packet.len(), 5);
            assert_eq!(packet[0], header.byte());
            assert_eq!(packet[1], cmd);
            assert_eq!(packet[2], 0x05);
            let parsed = parse_packet(&packet).unwrap();
            assert!(parsed.crc_valid);
        }
    }
}

#[test]
fn test_control_packet_is_fifteen_bytes() {
    let packet = build_control_packet(HeaderVariant::Alternate, 0x0130, 18, 25);
    assert_eq!(packet.len(), 15);
    assert_eq!(packet[0], 0xAB);
    assert_eq!(packet[1], 0xC0);
    assert_eq!(packet[2], 0x0F);
    assert_eq!(packet[3], 0x01); // flags high byte
    assert_eq!(packet[4], 0x30); // flags low byte
    assert!(parse_packet(&packet).unwrap().crc_valid);
}

/// D2 packet index is big-endian; the 5th packet (index 4) carries 0x0004.
#[test]
fn test_chunk_packet_index_encoding() {
    let chunk = [0x00u8; 128];
    let packet = build_chunk_packet(HeaderVariant::Standard, 4, &chunk);
    assert_eq!(packet.len(), 136);
    assert_eq!(packet[2], 0x00);
    assert_eq!(packet[3], 0x04);
    assert_eq!(&packet[4..6], &[0x00, 0x80]);

    let high_index = build_chunk_packet(HeaderVariant::Standard, 0x0102, &chunk);
    assert_eq!(high_index[2], 0x01);
    assert_eq!(high_index[3], 0x02);
}

#[test]
fn test_verify_rejects_corrupted_packet() {
    let mut packet = build_poll_request(HeaderVariant::Standard, 0xA0);
    packet[3] ^= 0x01;
    let parsed = parse_packet(&packet).unwrap();
    assert!(!parsed.crc_valid);
    assert!(verify_packet(&parsed).is_err());
}

#[test]
fn test_classification_covers_firmware_range() {
    for cmd in 0xD0..=0xD3u8 {
        assert_eq!(classify_packet(&[0xF0, cmd]), PacketKind::Firmware(cmd));
    }
    assert_eq!(classify_packet(&[0xF0, 0xA2]), PacketKind::TripData);
    assert_eq!(classify_packet(&[0xAB, 0x42]), PacketKind::Unknown(0x42));
}

proptest! {
    /// Round-trip: parse(build_command(h, cmd, payload)) recovers header,
    /// command and payload with a valid CRC, for payloads up to 128 bytes.
    #[test]
    fn test_roundtrip_build_parse(
        alternate in any::<bool>(),
        command in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..=128),
    ) {
        let header = if alternate {
            HeaderVariant::Alternate
        } else {
            HeaderVariant::Standard
        };
        let bytes = build_command(header, command, &payload);
        let packet = parse_packet(&bytes).unwrap();

        prop_assert_eq!(packet.header, header.byte());
        prop_assert_eq!(packet.command, command);
        prop_assert_eq!(&packet.payload, &payload);
        prop_assert!(packet.crc_valid);
        prop_assert!(verify_packet(&packet).is_ok());
    }

    /// Flipping any single bit in the CRC field invalidates the packet.
    #[test]
    fn test_crc_detects_trailer_corruption(
        command in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..=32),
        bit in 0usize..16,
    ) {
        let mut bytes = build_command(HeaderVariant::Standard, command, &payload);
        let len = bytes.len();
        bytes[len - 2 + bit / 8] ^= 1 << (bit % 8);
        let packet = parse_packet(&bytes).unwrap();
        prop_assert!(!packet.crc_valid);
    }
}
