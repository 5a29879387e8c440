use std::fmt::Debug;
use std::hash::Hash;
use std::ptr::NonNull;

mod private {
    pub trait Sealed {}
}

/// The integer type stored inside a vacant slot to link it to the next vacant slot.
///
/// The width of the link bounds the number of slots a single [`Chunk`][crate::Chunk] can
/// manage: `u8` (the default) allows 255 slots per chunk, `u16` allows 65535. Larger pools are
/// built from more chunks, not from a wider link, so `u8` is the right choice unless the per-chunk
/// bookkeeping overhead matters for your workload.
///
/// A slot must be at least as large as the link, so pools with a `u16` link only accept element
/// layouts of two or more bytes.
///
/// This trait is sealed and implemented for `u8` and `u16` only.
pub trait SlotIndex: Copy + Debug + Eq + Hash + private::Sealed + 'static {
    /// The maximum number of slots a single chunk can hold with this link width.
    const MAX_SLOTS: usize;

    /// Converts a slot index to the link type.
    ///
    /// The caller guarantees `value <= MAX_SLOTS`.
    fn from_usize(value: usize) -> Self;

    /// Converts the link back to a slot index.
    fn to_usize(self) -> usize;

    /// Reads the link stored at the start of a vacant slot.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for reads of `size_of::<Self>()` bytes and must have been written
    /// by [`write_link()`][Self::write_link].
    #[must_use]
    unsafe fn read_link(slot: NonNull<u8>) -> Self {
        // SAFETY: Forwarding guarantees from the caller. Slots are only aligned to the element
        // alignment, which may be smaller than the link alignment, hence the unaligned read.
        unsafe { slot.cast::<Self>().read_unaligned() }
    }

    /// Writes a link into the start of a vacant slot, overwriting whatever object bytes were there.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for writes of `size_of::<Self>()` bytes and must not hold a live
    /// object that anyone still expects to read.
    unsafe fn write_link(slot: NonNull<u8>, link: Self) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            slot.cast::<Self>().write_unaligned(link);
        }
    }
}

impl private::Sealed for u8 {}
impl private::Sealed for u16 {}

impl SlotIndex for u8 {
    const MAX_SLOTS: usize = u8::MAX as usize;

    #[inline]
    fn from_usize(value: usize) -> Self {
        debug_assert!(value <= Self::MAX_SLOTS, "slot index {value} does not fit in u8");

        #[expect(
            clippy::cast_possible_truncation,
            reason = "caller guarantees the value is within MAX_SLOTS"
        )]
        let link = value as Self;
        link
    }

    #[inline]
    fn to_usize(self) -> usize {
        usize::from(self)
    }
}

impl SlotIndex for u16 {
    const MAX_SLOTS: usize = u16::MAX as usize;

    #[inline]
    fn from_usize(value: usize) -> Self {
        debug_assert!(value <= Self::MAX_SLOTS, "slot index {value} does not fit in u16");

        #[expect(
            clippy::cast_possible_truncation,
            reason = "caller guarantees the value is within MAX_SLOTS"
        )]
        let link = value as Self;
        link
    }

    #[inline]
    fn to_usize(self) -> usize {
        usize::from(self)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn max_slots_match_link_width() {
        assert_eq!(<u8 as SlotIndex>::MAX_SLOTS, 255);
        assert_eq!(<u16 as SlotIndex>::MAX_SLOTS, 65535);
    }

    #[test]
    fn conversions_preserve_value() {
        assert_eq!(<u8 as SlotIndex>::from_usize(255).to_usize(), 255);
        assert_eq!(<u16 as SlotIndex>::from_usize(300).to_usize(), 300);
    }

    #[test]
    fn link_survives_unaligned_storage() {
        let mut bytes = [0_u8; 5];
        let slot = NonNull::new(bytes.as_mut_ptr().wrapping_add(1)).unwrap();

        // SAFETY: Four bytes remain after index 1, enough for a u16 link.
        unsafe {
            u16::write_link(slot, 0xBEEF);
            assert_eq!(u16::read_link(slot), 0xBEEF);
        }
    }
}
