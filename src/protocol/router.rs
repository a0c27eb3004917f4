//! Packet routing: from raw notification bytes to typed session events.
//!
//! All session callbacks are modeled as one tagged event enum delivered
//! through a single channel, which makes delivery order explicit and lets
//! consumers match exhaustively.

use crate::protocol::packet::{classify_packet, parse_packet, PacketKind};
use crate::telemetry::{BmsDataInfo, ConfigInfo, RunningDataInfo, VersionInfo};
use crate::util::hex::format_hex_compact;
use log::{debug, warn};
use tokio::sync::mpsc;

/// Events emitted by a connection session, in arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A B0 version packet was decoded.
    Version(VersionInfo),
    /// A device-initiated 0x01 config packet was decoded.
    Config(ConfigInfo),
    /// A 0xA0 running-data packet was decoded.
    RunningData(RunningDataInfo),
    /// A 0xA1 BMS packet was decoded.
    BmsData(BmsDataInfo),
    /// A packet with an unhandled command byte arrived. Surfaced rather than
    /// dropped so callers can log it.
    Unknown { command: u8, raw: Vec<u8> },
    /// The link went down. `expected` is true for a caller-initiated
    /// disconnect, false for mid-operation link loss.
    Disconnected { expected: bool },
}

/// Routes raw BLE notification payloads to the matching decoder and emits
/// the decoded result as a [`SessionEvent`].
pub struct PacketRouter {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl PacketRouter {
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        PacketRouter { events }
    }

    /// Dispatches one notification payload. Returns the packet kind that was
    /// delivered, or `None` when the payload was a runt or undecodable.
    ///
    /// Inbound CRC mismatches are logged but do not suppress decoding; the
    /// controller is known to ship packets whose CRC disagrees with the
    /// trailing bytes, and the field layouts still parse.
    pub fn route(&self, data: &[u8]) -> Option<PacketKind> {
        if data.len() < 2 {
            return None;
        }

        if let Ok(packet) = parse_packet(data) {
            if !packet.crc_valid {
                warn!(
                    "CRC mismatch on inbound {} packet: {}",
                    PacketKind::name(packet.command),
                    format_hex_compact(data)
                );
            }
        }

        let kind = classify_packet(data);
        debug!("routing {} packet ({} bytes)", PacketKind::name(data[1]), data.len());

        let event = match kind {
            PacketKind::VersionInfo => VersionInfo::parse(data).map(SessionEvent::Version),
            PacketKind::Config => ConfigInfo::parse(data).map(SessionEvent::Config),
            PacketKind::RunningData => RunningDataInfo::parse(data).map(SessionEvent::RunningData),
            PacketKind::BmsData => BmsDataInfo::parse(data).map(SessionEvent::BmsData),
            PacketKind::TripData
            | PacketKind::ControlAck
            | PacketKind::Firmware(_)
            | PacketKind::Unknown(_) => Some(SessionEvent::Unknown {
                command: data[1],
                raw: data.to_vec(),
            }),
        };

        match event {
            Some(event) => {
                // The receiver may already be gone during teardown.
                let _ = self.events.send(event);
                Some(kind)
            }
            None => {
                warn!(
                    "undecodable {} packet: {}",
                    PacketKind::name(data[1]),
                    format_hex_compact(data)
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::append_crc;

    fn router() -> (PacketRouter, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PacketRouter::new(tx), rx)
    }

    #[test]
    fn test_routes_version_packet() {
        let (router, mut rx) = router();
        let mut pkt = vec![0xF0, 0xB0, 0x19];
        pkt.extend_from_slice(&[0u8; 20]);
        append_crc(&mut pkt);
        router.route(&pkt);
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Version(_)));
    }

    #[test]
    fn test_unknown_command_is_surfaced() {
        let (router, mut rx) = router();
        let mut pkt = vec![0xF0, 0x7E, 0x05];
        append_crc(&mut pkt);
        router.route(&pkt);
        match rx.try_recv().unwrap() {
            SessionEvent::Unknown { command, raw } => {
                assert_eq!(command, 0x7E);
                assert_eq!(raw, pkt);
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_crc_still_decodes() {
        let (router, mut rx) = router();
        let mut pkt = vec![0xF0, 0xA0, 0x19];
        pkt.extend_from_slice(&[0u8; 20]);
        append_crc(&mut pkt);
        let last = pkt.len() - 1;
        pkt[last] ^= 0xFF;
        router.route(&pkt);
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::RunningData(_)));
    }

    #[test]
    fn test_runt_packet_is_ignored() {
        let (router, mut rx) = router();
        router.route(&[0xF0]);
        assert!(rx.try_recv().is_err());
    }
}
