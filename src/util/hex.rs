//! # Hex Encoding/Decoding Utilities
//!
//! This module provides enhanced hex encoding and decoding functions used
//! throughout the ZYD protocol implementation for packet logging, debugging,
//! and test frame construction.
//!
//! ## Features
//!
//! - Efficient hex encoding/decoding using the `hex` crate
//! - Compact per-byte spacing for packet logs
//! - Error handling for invalid hex strings
//!
//! ## Usage
//!
//! ```rust
//! use zyd_rs::util::hex::{encode_hex, decode_hex, format_hex_compact};
//!
//! let data = [0xF0, 0xB0, 0x05];
//! assert_eq!(encode_hex(&data), "f0b005");
//! assert_eq!(decode_hex("f0b005").unwrap(), data);
//! assert_eq!(format_hex_compact(&data), "f0 b0 05");
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Invalid hex character: {0}")]
    InvalidCharacter(char),

    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to lowercase hex string
///
/// This is the primary encoding function used throughout the codebase
/// for consistent hex representation.
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Encode bytes to uppercase hex string
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters.
/// Whitespace is automatically stripped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    if hex_str.is_empty() {
        return Err(HexError::EmptyString);
    }

    let cleaned: String = hex_str.chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format hex data for compact display (useful for logs)
///
/// Formats data as "f0 d2 00 04" with spaces between bytes.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format only the first `n` bytes compactly, marking the truncation.
///
/// Packet logs for 136-byte firmware chunks only need the leading bytes.
pub fn format_hex_prefix(data: &[u8], n: usize) -> String {
    if data.len() <= n {
        return format_hex_compact(data);
    }
    format!("{} ..", format_hex_compact(&data[..n]))
}

/// Helper for creating test data from hex strings
///
/// This is commonly used in tests throughout the codebase.
/// Panics on invalid hex (intended for test code only).
pub fn hex_to_bytes(hex: &str) -> Vec<u8> {
    decode_hex(hex).expect("Invalid hex in test data")
}
