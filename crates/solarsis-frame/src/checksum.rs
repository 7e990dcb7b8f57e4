//! Frame checksums.

use crc::{Crc, CRC_16_XMODEM};

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Byte values the CRC must never produce: line feed, carriage return and
/// the `(` reply start marker.
pub const RESERVED_BYTES: [u8; 3] = [0x0A, 0x0D, 0x28];

/// Raw CRC-16/XMODEM over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    XMODEM.checksum(data)
}

/// CRC-16 rendered big-endian, with every reserved byte bumped by one.
pub fn frame_checksum(data: &[u8]) -> [u8; 2] {
    crc16(data).to_be_bytes().map(escape_reserved)
}

/// Sum of all byte values rendered as lowercase hex.
///
/// No modulus and no fixed width: devices that use this checksum expect
/// exactly this arithmetic.
pub fn sum_checksum(data: &[u8]) -> String {
    let sum: u64 = data.iter().map(|b| u64::from(*b)).sum();
    format!("{sum:x}")
}

fn escape_reserved(byte: u8) -> u8 {
    if RESERVED_BYTES.contains(&byte) {
        byte + 1
    } else {
        byte
    }
}
