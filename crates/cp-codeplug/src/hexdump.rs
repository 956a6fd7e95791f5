//! Plain-text hex dumps of captured memory

use std::fmt::Write;

use crate::image::{Element, Image};

/// Bytes per dump line
pub const BYTES_PER_LINE: usize = 16;

/// Format `data` located at byte address `address` as hex dump lines
///
/// ```rust
/// assert_eq!(cp_codeplug::hexdump::hexdump_bytes(0x10, &[0xde, 0xad]), "00000010: de ad\n");
/// ```
pub fn hexdump_bytes(address: u64, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(BYTES_PER_LINE).enumerate() {
        let _ = write!(out, "{:08x}:", address + (i * BYTES_PER_LINE) as u64);
        for b in line {
            let _ = write!(out, " {:02x}", b);
        }
        out.push('\n');
    }
    out
}

pub fn hexdump_element(element: &Element) -> String {
    hexdump_bytes(element.address().byte(), element.data())
}

/// Dump all elements, separated by a rule between non-contiguous runs
pub fn hexdump_image(image: &Image) -> String {
    let mut out = String::new();
    for (i, el) in image.iter().enumerate() {
        if i > 0 {
            out.push_str("--------------------------------------------------------\n");
        }
        out.push_str(&hexdump_element(el));
    }
    out
}
