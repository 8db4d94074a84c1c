/// Extract `len` bits of `value` starting at bit `start` (LSB = bit 0).
pub fn bits(value: u64, start: u32, len: u32) -> u64 {
    assert!(start < 64, "bit offset out of range");
    let shifted = value >> start;
    if len >= 64 {
        shifted
    } else {
        shifted & ((1u64 << len) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::bits;

    #[test]
    fn extracts_high_range() {
        assert_eq!(bits(0xffff_8000_0000_0000, 48, 16), 0xffff);
        assert_eq!(bits(0x0000_7fff_ffff_ffff, 48, 16), 0);
    }

    #[test]
    fn extracts_low_and_full_ranges() {
        assert_eq!(bits(0b1011_0000, 4, 4), 0b1011);
        assert_eq!(bits(u64::MAX, 0, 64), u64::MAX);
        assert_eq!(bits(0x1234, 8, 100), 0x12);
    }
}
