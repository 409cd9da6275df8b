//! Byte-level plumbing for the host link: little-endian field readers, a
//! bounded cursor for building response payloads, fixed-width name fields,
//! and the CRC-8 that validates frames.
//!
//! The framing is the same shape as CRSF (sync byte, length, type, payload,
//! CRC-8 with polynomial 0xD5 over type + payload). Note the CRC never covers
//! the sync or length bytes.

/// Framing preamble. The receiver scans for this byte while idle.
pub const SYNC_BYTE: u8 = 0xC8;

/// Largest payload one frame can carry; 63 f32 values per message.
pub const MAX_PAYLOAD: usize = 252;

// CRC8 lookup table, polynomial 0xD5, seed 0. Must match the host tool
// byte-for-byte; the check value of b"123456789" is 0xBC.
const CRC8_LUT: [u8; 256] = [
    0x00, 0xD5, 0x7F, 0xAA, 0xFE, 0x2B, 0x81, 0x54,
    0x29, 0xFC, 0x56, 0x83, 0xD7, 0x02, 0xA8, 0x7D,
    0x52, 0x87, 0x2D, 0xF8, 0xAC, 0x79, 0xD3, 0x06,
    0x7B, 0xAE, 0x04, 0xD1, 0x85, 0x50, 0xFA, 0x2F,
    0xA4, 0x71, 0xDB, 0x0E, 0x5A, 0x8F, 0x25, 0xF0,
    0x8D, 0x58, 0xF2, 0x27, 0x73, 0xA6, 0x0C, 0xD9,
    0xF6, 0x23, 0x89, 0x5C, 0x08, 0xDD, 0x77, 0xA2,
    0xDF, 0x0A, 0xA0, 0x75, 0x21, 0xF4, 0x5E, 0x8B,
    0x9D, 0x48, 0xE2, 0x37, 0x63, 0xB6, 0x1C, 0xC9,
    0xB4, 0x61, 0xCB, 0x1E, 0x4A, 0x9F, 0x35, 0xE0,
    0xCF, 0x1A, 0xB0, 0x65, 0x31, 0xE4, 0x4E, 0x9B,
    0xE6, 0x33, 0x99, 0x4C, 0x18, 0xCD, 0x67, 0xB2,
    0x39, 0xEC, 0x46, 0x93, 0xC7, 0x12, 0xB8, 0x6D,
    0x10, 0xC5, 0x6F, 0xBA, 0xEE, 0x3B, 0x91, 0x44,
    0x6B, 0xBE, 0x14, 0xC1, 0x95, 0x40, 0xEA, 0x3F,
    0x42, 0x97, 0x3D, 0xE8, 0xBC, 0x69, 0xC3, 0x16,
    0xEF, 0x3A, 0x90, 0x45, 0x11, 0xC4, 0x6E, 0xBB,
    0xC6, 0x13, 0xB9, 0x6C, 0x38, 0xED, 0x47, 0x92,
    0xBD, 0x68, 0xC2, 0x17, 0x43, 0x96, 0x3C, 0xE9,
    0x94, 0x41, 0xEB, 0x3E, 0x6A, 0xBF, 0x15, 0xC0,
    0x4B, 0x9E, 0x34, 0xE1, 0xB5, 0x60, 0xCA, 0x1F,
    0x62, 0xB7, 0x1D, 0xC8, 0x9C, 0x49, 0xE3, 0x36,
    0x19, 0xCC, 0x66, 0xB3, 0xE7, 0x32, 0x98, 0x4D,
    0x30, 0xE5, 0x4F, 0x9A, 0xCE, 0x1B, 0xB1, 0x64,
    0x72, 0xA7, 0x0D, 0xD8, 0x8C, 0x59, 0xF3, 0x26,
    0x5B, 0x8E, 0x24, 0xF1, 0xA5, 0x70, 0xDA, 0x0F,
    0x20, 0xF5, 0x5F, 0x8A, 0xDE, 0x0B, 0xA1, 0x74,
    0x09, 0xDC, 0x76, 0xA3, 0xF7, 0x22, 0x88, 0x5D,
    0xD6, 0x03, 0xA9, 0x7C, 0x28, 0xFD, 0x57, 0x82,
    0xFF, 0x2A, 0x80, 0x55, 0x01, 0xD4, 0x7E, 0xAB,
    0x84, 0x51, 0xFB, 0x2E, 0x7A, 0xAF, 0x05, 0xD0,
    0xAD, 0x78, 0xD2, 0x07, 0x53, 0x86, 0x2C, 0xF9,
];

/// Calculate the CRC-8 of `data`, starting from seed 0. Used for both
/// validating received frames and sealing outgoing ones; exposed publicly so
/// host-side tooling can share the implementation.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc = CRC8_LUT[(crc ^ byte) as usize];
    }
    crc
}

pub(crate) fn read_u16(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

pub(crate) fn read_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

pub(crate) fn read_f32(data: &[u8]) -> f32 {
    f32::from_bits(read_u32(data))
}

/// Copy `src` into a fixed-width field: truncated to `dest.len() - 1` bytes so
/// the result always ends in at least one NUL, remainder zero-filled.
pub(crate) fn write_str_fixed(dest: &mut [u8], src: &str) {
    dest.fill(0);
    let n = src.len().min(dest.len().saturating_sub(1));
    dest[..n].copy_from_slice(&src.as_bytes()[..n]);
}

/// Cursor for building a response payload in place. Callers size the buffer
/// for the message they are building; lengths are bounded by the payload
/// contracts in `protocol`, so a push can never run past the end of a
/// correctly sized buffer.
pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    pub fn push_u8(&mut self, value: u8) {
        self.buf[self.len] = value;
        self.len += 1;
    }

    pub fn push_u16(&mut self, value: u16) {
        self.push_bytes(&value.to_le_bytes());
    }

    pub fn push_u32(&mut self, value: u32) {
        self.push_bytes(&value.to_le_bytes());
    }

    pub fn push_f32(&mut self, value: f32) {
        self.push_u32(value.to_bits());
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// The bytes pushed so far.
    pub fn done(self) -> &'a [u8] {
        &self.buf[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_check_value() {
        // Standard check value for CRC-8 poly 0xD5.
        assert_eq!(crc8(b"123456789"), 0xBC);
    }

    #[test]
    fn crc_single_bytes() {
        assert_eq!(crc8(&[]), 0x00);
        assert_eq!(crc8(&[0x00]), 0x00);
        assert_eq!(crc8(&[0x01]), 0xD5);
        assert_eq!(crc8(&[0x04]), 0xFE);
    }

    #[test]
    fn le_round_trips() {
        assert_eq!(read_u16(&[0xE8, 0x03]), 1000);
        assert_eq!(read_u32(&[0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
        let bits = 1.5f32.to_bits().to_le_bytes();
        assert_eq!(read_f32(&bits), 1.5);
    }

    #[test]
    fn fixed_names_truncate_and_pad() {
        let mut field = [0xFFu8; 8];
        write_str_fixed(&mut field, "abc");
        assert_eq!(&field, b"abc\0\0\0\0\0");

        // One byte is always reserved for the NUL.
        write_str_fixed(&mut field, "a_very_long_name");
        assert_eq!(&field, b"a_very_\0");

        write_str_fixed(&mut field, "");
        assert_eq!(&field, &[0u8; 8]);
    }

    #[test]
    fn writer_layout() {
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        w.push_u8(0xAB);
        w.push_u16(0x0201);
        w.push_u32(0x0605_0403);
        w.push_f32(f32::from_bits(0x0A09_0807));
        let out = w.done();
        assert_eq!(
            out,
            &[0xAB, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A]
        );
    }
}
