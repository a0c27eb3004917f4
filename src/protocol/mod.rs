//! ZYD packet codec: CRC16, framing, and packet routing.
//!
//! Everything in this module is pure: no transport state, no I/O. The
//! [`crate::ble::session`] and [`crate::upload`] modules build on these
//! functions for all wire traffic.

pub mod crc;
pub mod packet;
pub mod router;

pub use crc::crc16_modbus;
pub use packet::{
    build_chunk_packet, build_control_packet, build_poll_request, build_short_request,
    classify_packet, parse_packet, verify_packet, HeaderVariant, Packet, PacketKind,
};
pub use router::{PacketRouter, SessionEvent};
