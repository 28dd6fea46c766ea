use bitfield_struct::bitfield;

/// The ring's shared index word.
///
/// Both endpoints update it with a single compare-and-swap, so a reader never
/// sees a write index without the gap flag that belongs to it, and vice versa.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct RingWord {
    /// Bits 0-14: next offset the reader consumes from.
    #[bits(15)]
    pub read_index: u16,

    /// Bit 15: set by the reader when it found the ring empty; cleared by
    /// whoever consumes the idle signal.
    pub spare: bool,

    /// Bits 16-30: next offset the writer produces to.
    #[bits(15)]
    pub write_index: u16,

    /// Bit 31: the writer wrapped early; the bytes between the gap start
    /// and the end of the buffer carry no data.
    pub has_gap: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_documented_bits() {
        let w = RingWord::new()
            .with_read_index(0x7FFF)
            .with_write_index(1)
            .with_has_gap(true);
        assert_eq!(w.into_bits(), 0x7FFF | (1 << 16) | (1 << 31));

        let w = RingWord::from_bits(1 << 15);
        assert!(w.spare());
        assert_eq!(w.read_index(), 0);
        assert_eq!(w.write_index(), 0);
        assert!(!w.has_gap());
    }
}
