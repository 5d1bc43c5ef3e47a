//! Little-endian wire accessors and the IPMB message checksum.
//!
//! All multi-byte integers on the IPMI wire are little-endian.

/// Read a little-endian `u16` at `offset`.
///
/// Panics if `data` is shorter than `offset + 2`; callers validate message
/// lengths before decoding fields.
pub fn get_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Read a little-endian `u32` at `offset`.
pub fn get_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Write `value` as a little-endian `u16` at `offset`.
pub fn set_u16_le(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write `value` as a little-endian `u32` at `offset`.
pub fn set_u32_le(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// IPMB checksum over a frame region: the two's complement of the byte
/// sum, so that the region followed by its checksum sums to zero.
///
/// `seed` folds in bytes that belong to the sum but not to `data`; the
/// dispatcher passes 0 since it checksums whole header and body slices.
pub fn ipmb_checksum(data: &[u8], seed: u8) -> u8 {
    data.iter()
        .fold(seed, |sum, byte| sum.wrapping_add(*byte))
        .wrapping_neg()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksummed_region_sums_to_zero() {
        let header = [0x20u8, 0x07 << 2];
        let check = ipmb_checksum(&header, 0);

        let total = header
            .iter()
            .fold(check, |sum, byte| sum.wrapping_add(*byte));
        assert_eq!(0, total);
    }

    #[test]
    fn seed_counts_toward_the_sum() {
        assert_eq!(ipmb_checksum(&[0x18], 0x20), ipmb_checksum(&[0x20, 0x18], 0));
        assert_eq!(0, ipmb_checksum(&[], 0));
    }

    #[test]
    fn round_trip_integers() {
        let mut buf = [0u8; 8];
        set_u16_le(&mut buf, 1, 0xBEEF);
        set_u32_le(&mut buf, 3, 0x12345678);

        assert_eq!(0xBEEF, get_u16_le(&buf, 1));
        assert_eq!(0x12345678, get_u32_le(&buf, 3));
        assert_eq!([0xEF, 0xBE], buf[1..3]);
        assert_eq!([0x78, 0x56, 0x34, 0x12], buf[3..7]);
    }
}
