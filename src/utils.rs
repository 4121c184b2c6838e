//! Utility functions for block transfer checksums and object formatting.
//!
//! This module provides the CRC-16 used to protect block transfers and small
//! helpers that render object addresses the way CANopen tools print them.
//!
//! # Example
//!
//! ```
//! use canopen_sdo::utils::{crc16, format_bytes, format_object};
//!
//! assert_eq!(crc16(b"123456789"), 0x31C3);
//! assert_eq!(format_object(0x6041, 0), "0x6041.00");
//! assert_eq!(format_bytes(&[0x40, 0x41, 0x60]), "40 41 60");
//! ```

use crc::{Crc, CRC_16_XMODEM};

/// CRC-16 of block transfers (CCITT polynomial, initial value 0).
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Computes the CRC-16 of a block transfer data set.
///
/// CCITT polynomial `0x1021`, initial value 0, no reflection and no final
/// XOR.
///
/// # Arguments
///
/// * `data` - Complete data set, padding excluded
///
/// # Returns
///
/// The checksum as sent in the block end frames.
///
/// # Example
///
/// ```
/// use canopen_sdo::utils::crc16;
///
/// assert_eq!(crc16(&[]), 0);
/// assert_eq!(crc16(b"123456789"), 0x31C3);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Formats an index and sub-index as `0xIIII.SS`.
///
/// # Example
///
/// ```
/// use canopen_sdo::utils::format_object;
///
/// assert_eq!(format_object(0x1018, 4), "0x1018.04");
/// ```
pub fn format_object(index: u16, sub_index: u8) -> String {
    format!("0x{:04X}.{:02X}", index, sub_index)
}

/// Formats a payload as space separated hex bytes, as frames are logged.
///
/// # Example
///
/// ```
/// use canopen_sdo::utils::format_bytes;
///
/// assert_eq!(format_bytes(&[0x40, 0x18, 0x10, 0x01]), "40 18 10 01");
/// ```
pub fn format_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
