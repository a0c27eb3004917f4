//! # ZYD Packet Codec
//!
//! This module decodes and encodes ZYD scooter-controller packets as seen on
//! the BLE link. It leverages the `nom` crate for parsing of binary data.
//!
//! ## Wire format
//!
//! Every packet, inbound or outbound, has the shape
//!
//! ```text
//! [ header ][ command ][ body ... ][ crc_lo ][ crc_hi ]
//! ```
//!
//! with `header` either 0xF0 (standard) or 0xAB (alternate) and the CRC16
//! (MODBUS) computed over every byte preceding the CRC field. The body
//! varies per command:
//!
//! - firmware handshake requests (0xD0/0xD1/0xD3): empty body, 4 bytes total
//! - telemetry polls (0xA0/0xA1/0xB0): single length byte 0x05, 5 bytes total
//! - control command (0xC0): length 0x0F, flags word, cruise/max speed,
//!   6 reserved bytes, 15 bytes total
//! - firmware data (0xD2): 16-bit big-endian packet index, 2 reserved bytes,
//!   128 data bytes, 136 bytes total
//!
//! ## Usage
//!
//! Building and parsing a version poll:
//! ```rust
//! use zyd_rs::protocol::packet::{build_poll_request, parse_packet, HeaderVariant};
//!
//! let bytes = build_poll_request(HeaderVariant::Standard, 0xB0);
//! let packet = parse_packet(&bytes).unwrap();
//! assert_eq!(packet.command, 0xB0);
//! assert!(packet.crc_valid);
//! ```
//!
//! ## Error handling
//!
//! Outbound packets are always built with a freshly computed CRC. Inbound
//! packets are parsed even when their CRC is wrong (the controller itself
//! is known to emit occasionally mismatched CRCs), but the mismatch is
//! surfaced through [`Packet::crc_valid`] and [`verify_packet`] so callers
//! can choose to reject or to log.

use crate::constants::{
    CMD_BMS_DATA, CMD_CONFIG, CMD_CONTROL, CMD_FW_COMPLETE, CMD_FW_DATA, CMD_FW_ERASE,
    CMD_FW_REQUEST, CMD_RUNNING_DATA, CMD_TRIP_DATA, CMD_VERSION_INFO, CONTROL_PACKET_LEN,
    FIRMWARE_CHUNK_SIZE, FIRMWARE_PACKET_LEN, FIRMWARE_RESERVED, HEADER_ALTERNATE,
    HEADER_STANDARD,
};
use crate::protocol::crc::{append_crc, crc16_modbus, trailing_crc};
use crate::ZydError;
use bytes::{BufMut, BytesMut};
use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;

/// Protocol header variant. A session starts out `Standard` and latches to
/// `Alternate` for good once an 0xAB-headed packet is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderVariant {
    Standard,
    Alternate,
}

impl HeaderVariant {
    /// The on-wire header byte for this variant.
    pub fn byte(self) -> u8 {
        match self {
            HeaderVariant::Standard => HEADER_STANDARD,
            HeaderVariant::Alternate => HEADER_ALTERNATE,
        }
    }

    /// Maps a received first byte onto a variant, if it is a valid header.
    pub fn detect(first_byte: u8) -> Option<HeaderVariant> {
        match first_byte {
            HEADER_STANDARD => Some(HeaderVariant::Standard),
            HEADER_ALTERNATE => Some(HeaderVariant::Alternate),
            _ => None,
        }
    }

    /// One-way latch: observing an alternate header switches the session to
    /// `Alternate` permanently; a later 0xF0 packet never reverts it.
    pub fn latch(self, observed: u8) -> HeaderVariant {
        match (self, HeaderVariant::detect(observed)) {
            (HeaderVariant::Standard, Some(HeaderVariant::Alternate)) => HeaderVariant::Alternate,
            _ => self,
        }
    }
}

/// Represents a ZYD packet.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet {
    pub header: u8,
    pub command: u8,
    /// Everything between the command byte and the CRC field, including the
    /// length byte on packet types that carry one.
    pub payload: Vec<u8>,
    /// CRC16 as transmitted (little-endian on the wire).
    pub crc: u16,
    /// Whether the transmitted CRC matches the computed one.
    pub crc_valid: bool,
}

/// Classification of a packet by its command byte, used to route it to the
/// correct decoder. Unrecognized commands are surfaced, never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Config,
    RunningData,
    BmsData,
    TripData,
    VersionInfo,
    ControlAck,
    /// D0-D3 upload handshake response; carries the echoed command byte.
    Firmware(u8),
    Unknown(u8),
}

impl PacketKind {
    /// Human-readable name for a command byte, for logs and debug displays.
    pub fn name(command: u8) -> &'static str {
        match command {
            CMD_CONFIG => "01 (Config/Settings)",
            CMD_RUNNING_DATA => "A0 (Running Data)",
            CMD_BMS_DATA => "A1 (BMS Data)",
            CMD_TRIP_DATA => "A2 (Trip Data)",
            CMD_VERSION_INFO => "B0 (Version Info)",
            CMD_CONTROL => "C0 (Control)",
            CMD_FW_REQUEST => "D0 (FW Request)",
            CMD_FW_ERASE => "D1 (FW Erase)",
            CMD_FW_DATA => "D2 (FW Data)",
            CMD_FW_COMPLETE => "D3 (FW Complete)",
            _ => "Unknown",
        }
    }
}

/// Routes a raw packet to a [`PacketKind`] by inspecting its command byte
/// (the second byte on the wire).
pub fn classify_packet(bytes: &[u8]) -> PacketKind {
    if bytes.len() < 2 {
        return PacketKind::Unknown(0);
    }
    match bytes[1] {
        CMD_CONFIG => PacketKind::Config,
        CMD_RUNNING_DATA => PacketKind::RunningData,
        CMD_BMS_DATA => PacketKind::BmsData,
        CMD_TRIP_DATA => PacketKind::TripData,
        CMD_VERSION_INFO => PacketKind::VersionInfo,
        CMD_CONTROL => PacketKind::ControlAck,
        cmd @ (CMD_FW_REQUEST | CMD_FW_ERASE | CMD_FW_DATA | CMD_FW_COMPLETE) => {
            PacketKind::Firmware(cmd)
        }
        other => PacketKind::Unknown(other),
    }
}

/// Uses the `nom` crate to split a packet into header, command, body and CRC.
fn split_packet(input: &[u8]) -> IResult<&[u8], (u8, u8, &[u8])> {
    let (i, header) = be_u8(input)?;
    let (i, command) = be_u8(i)?;
    // Two trailing bytes are the CRC; everything before them is the body.
    let body_len = i.len().saturating_sub(2);
    let (i, body) = take(body_len)(i)?;
    Ok((i, (header, command, body)))
}

/// Parses a ZYD packet from a byte slice.
///
/// The packet must be at least four bytes (header, command, CRC16) and start
/// with a known header byte. The CRC is checked but a mismatch does not fail
/// the parse; see [`Packet::crc_valid`].
pub fn parse_packet(bytes: &[u8]) -> Result<Packet, ZydError> {
    if bytes.len() < 4 {
        return Err(ZydError::PacketParseError(format!(
            "packet too short: {} bytes",
            bytes.len()
        )));
    }
    if HeaderVariant::detect(bytes[0]).is_none() {
        return Err(ZydError::PacketParseError(format!(
            "invalid header byte 0x{:02X}",
            bytes[0]
        )));
    }

    let (_, (header, command, body)) = split_packet(bytes)
        .map_err(|e| ZydError::PacketParseError(format!("{e:?}")))?;

    let crc = trailing_crc(bytes).unwrap_or(0);
    let computed = crc16_modbus(&bytes[..bytes.len() - 2]);

    Ok(Packet {
        header,
        command,
        payload: body.to_vec(),
        crc,
        crc_valid: crc == computed,
    })
}

/// Verifies the integrity of a parsed packet.
pub fn verify_packet(packet: &Packet) -> Result<(), ZydError> {
    if packet.crc_valid {
        return Ok(());
    }
    let mut bytes = vec![packet.header, packet.command];
    bytes.extend_from_slice(&packet.payload);
    Err(ZydError::InvalidCrc {
        expected: packet.crc,
        calculated: crc16_modbus(&bytes),
    })
}

/// Lays out header, command and body, then appends the CRC16 low/high bytes.
///
/// This is the generic builder; the `build_*` helpers below produce the
/// specific packet shapes the controller understands.
pub fn build_command(header: HeaderVariant, command: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(body.len() + 4);
    packet.push(header.byte());
    packet.push(command);
    packet.extend_from_slice(body);
    append_crc(&mut packet);
    packet
}

/// Builds a 4-byte firmware handshake request (D0/D1/D3).
pub fn build_short_request(header: HeaderVariant, command: u8) -> Vec<u8> {
    build_command(header, command, &[])
}

/// Builds a 5-byte telemetry poll (A0/A1/B0) carrying its own total length.
pub fn build_poll_request(header: HeaderVariant, command: u8) -> Vec<u8> {
    build_command(header, command, &[0x05])
}

/// Builds the 15-byte 0xC0 control packet: control-state flags (big-endian),
/// cruise speed and max speed, followed by six reserved zero bytes.
pub fn build_control_packet(
    header: HeaderVariant,
    flags: u16,
    cruise_speed: u8,
    max_speed: u8,
) -> Vec<u8> {
    let mut body = Vec::with_capacity(CONTROL_PACKET_LEN - 4);
    body.push(CONTROL_PACKET_LEN as u8);
    body.push((flags >> 8) as u8);
    body.push((flags & 0xFF) as u8);
    body.push(cruise_speed);
    body.push(max_speed);
    body.extend_from_slice(&[0x00; 6]);
    build_command(header, CMD_CONTROL, &body)
}

/// Builds a 136-byte D2 firmware data packet for one 128-byte chunk.
///
/// The packet index is big-endian; the two reserved bytes are fixed at
/// `00 80` per the controller's flash protocol.
pub fn build_chunk_packet(header: HeaderVariant, index: u16, chunk: &[u8]) -> Vec<u8> {
    debug_assert_eq!(chunk.len(), FIRMWARE_CHUNK_SIZE);

    let mut buf = BytesMut::with_capacity(FIRMWARE_PACKET_LEN);
    buf.put_u8(header.byte());
    buf.put_u8(CMD_FW_DATA);
    buf.put_u16(index);
    buf.put_slice(&FIRMWARE_RESERVED);
    buf.put_slice(chunk);

    let crc = crc16_modbus(&buf);
    buf.put_u8((crc & 0xFF) as u8);
    buf.put_u8((crc >> 8) as u8);
    buf.to_vec()
}
