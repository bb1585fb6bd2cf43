//! Byte-order helpers for the SCSI (big-endian) / NVMe (little-endian) boundary
//!
//! Every NVMe-to-SCSI copy is a byte-reversal; a dedicated helper per field
//! width keeps that explicit at every call site instead of inline shifting.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Read a big-endian field out of SCSI wire bytes (CDB or parameter data).
pub fn be_u16(buf: &[u8]) -> u16 {
    BigEndian::read_u16(buf)
}
pub fn be_u32(buf: &[u8]) -> u32 {
    BigEndian::read_u32(buf)
}
pub fn be_u64(buf: &[u8]) -> u64 {
    BigEndian::read_u64(buf)
}
/// Read a 3-byte big-endian field (the obsolete READ(6)/WRITE(6) LBA).
pub fn be_u24(buf: &[u8]) -> u32 {
    ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | buf[2] as u32
}

/// Write a big-endian field into SCSI wire bytes.
pub fn put_be_u16(buf: &mut [u8], val: u16) {
    BigEndian::write_u16(buf, val)
}
pub fn put_be_u32(buf: &mut [u8], val: u32) {
    BigEndian::write_u32(buf, val)
}
pub fn put_be_u64(buf: &mut [u8], val: u64) {
    BigEndian::write_u64(buf, val)
}

/// Read a little-endian field out of NVMe structures (Identify, log pages).
pub fn le_u16(buf: &[u8]) -> u16 {
    LittleEndian::read_u16(buf)
}
pub fn le_u32(buf: &[u8]) -> u32 {
    LittleEndian::read_u32(buf)
}
pub fn le_u64(buf: &[u8]) -> u64 {
    LittleEndian::read_u64(buf)
}
pub fn le_u128(buf: &[u8]) -> u128 {
    LittleEndian::read_u128(buf)
}

/// Write a little-endian field into an NVMe structure.
pub fn put_le_u32(buf: &mut [u8], val: u32) {
    LittleEndian::write_u32(buf, val)
}
pub fn put_le_u64(buf: &mut [u8], val: u64) {
    LittleEndian::write_u64(buf, val)
}
pub fn put_le_u128(buf: &mut [u8], val: u128) {
    LittleEndian::write_u128(buf, val)
}

/// Index (0-7) of the most-significant set bit of `val`, or `None` if zero.
///
/// Used by the CDB validator to compute `bit_pointer` from a masked
/// reserved-bits byte: SPC defines the bit pointer as the MSB of the
/// offending field within its byte.
pub fn msb_set_bit(val: u8) -> Option<u8> {
    if val == 0 {
        None
    } else {
        Some(7 - val.leading_zeros() as u8)
    }
}

/// Copy `src` into `dst`, space-padding (ASCII 0x20) on the right and
/// truncating on the left, as SCSI ASCII fields (vendor id, product id,
/// serial number) require.
pub fn copy_space_padded(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    for b in &mut dst[n..] {
        *b = b' ';
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msb_set_bit_examples() {
        assert_eq!(msb_set_bit(0x00), None);
        assert_eq!(msb_set_bit(0x01), Some(0));
        assert_eq!(msb_set_bit(0x80), Some(7));
        assert_eq!(msb_set_bit(0x18), Some(4));
    }

    #[test]
    fn padded_copy_truncates_and_pads() {
        let mut dst = [0u8; 8];
        copy_space_padded(&mut dst, b"ACME");
        assert_eq!(&dst, b"ACME    ");
        let mut dst2 = [0u8; 4];
        copy_space_padded(&mut dst2, b"ACMEWIDGET");
        assert_eq!(&dst2, b"ACME");
    }
}
