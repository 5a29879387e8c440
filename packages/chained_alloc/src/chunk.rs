use std::num::NonZero;
use std::ptr::NonNull;

use crate::SlotIndex;

/// A fixed-capacity run of equally sized slots with an intrusive free list.
///
/// The chunk does not own the memory it manages. Whoever created the chunk keeps the backing
/// storage alive for as long as the chunk exists and releases it afterwards.
///
/// # Free list
///
/// Every vacant slot stores, in its first bytes, the index of the next vacant slot. The link is
/// written over whatever the previous occupant of the slot left behind, so a slot is either an
/// object owned by the caller or a free list node, never both. `head` is the index of the first
/// vacant slot. The last slot initially links to `size`, which is never followed because
/// `available` reaches zero first.
///
/// The link width `I` caps the chunk size (255 slots for the default `u8` link).
#[derive(Debug)]
pub struct Chunk<I: SlotIndex = u8> {
    storage: NonNull<u8>,
    head: I,
    available: I,
    size: I,
}

impl<I: SlotIndex> Chunk<I> {
    /// Threads a free list through `capacity` slots of `object_size` bytes starting at `storage`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`I::MAX_SLOTS`][SlotIndex::MAX_SLOTS] or if `object_size`
    /// is smaller than the link.
    ///
    /// # Safety
    ///
    /// `storage` must be valid for reads and writes of `capacity * object_size` bytes for the
    /// entire lifetime of the chunk and must not be accessed by anyone else except through
    /// pointers handed out by [`allocate()`][Self::allocate].
    #[must_use]
    pub unsafe fn new(storage: NonNull<u8>, object_size: usize, capacity: NonZero<usize>) -> Self {
        assert!(
            capacity.get() <= I::MAX_SLOTS,
            "chunk capacity {capacity} exceeds the maximum of {} slots",
            I::MAX_SLOTS
        );
        assert!(
            object_size >= size_of::<I>(),
            "object size {object_size} is too small to hold a free list link of {} bytes",
            size_of::<I>()
        );

        for index in 0..capacity.get() {
            // SAFETY: index < capacity, so the slot lies within the storage the caller vouched for.
            // Cannot overflow because that would imply the chunk extends beyond virtual memory.
            let slot = unsafe { storage.byte_add(index.wrapping_mul(object_size)) };

            // SAFETY: The slot is valid for writes per the caller's guarantee and holds no object yet.
            unsafe {
                I::write_link(slot, I::from_usize(index.wrapping_add(1)));
            }
        }

        Self {
            storage,
            head: I::from_usize(0),
            available: I::from_usize(capacity.get()),
            size: I::from_usize(capacity.get()),
        }
    }

    /// Start of the storage managed by this chunk.
    #[must_use]
    pub fn storage(&self) -> NonNull<u8> {
        self.storage
    }

    /// Total number of slots in the chunk.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size.to_usize()
    }

    /// Number of vacant slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.available.to_usize()
    }

    /// Whether at least one slot is vacant.
    #[must_use]
    pub fn is_memory_available(&self) -> bool {
        self.available() > 0
    }

    /// Whether `ptr` points into the storage of this chunk.
    #[must_use]
    pub fn is_owned(&self, ptr: NonNull<u8>, object_size: usize) -> bool {
        let start = self.storage.addr().get();
        let end = start.wrapping_add(self.size().wrapping_mul(object_size));
        let addr = ptr.addr().get();

        start <= addr && addr < end
    }

    /// Takes the first vacant slot off the free list.
    ///
    /// Returns `None` if the chunk is full.
    #[must_use]
    pub fn allocate(&mut self, object_size: usize) -> Option<NonNull<u8>> {
        if !self.is_memory_available() {
            return None;
        }

        // Cannot overflow because head < size and the chunk fits in virtual memory.
        let offset = self.head.to_usize().wrapping_mul(object_size);

        // SAFETY: head indexes a vacant slot inside the storage guaranteed valid by the creator.
        let slot = unsafe { self.storage.byte_add(offset) };

        // SAFETY: Vacant slots always hold a link written either by new() or by deallocate().
        self.head = unsafe { I::read_link(slot) };

        // Cannot underflow because we checked above that a slot is available.
        self.available = I::from_usize(self.available().wrapping_sub(1));

        Some(slot)
    }

    /// Pushes a slot back onto the free list.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate()`][Self::allocate] on this chunk with the same
    /// `object_size` and must not have been deallocated since. The object in the slot is treated
    /// as dead; its first bytes are overwritten with the free list link.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, object_size: usize) {
        debug_assert!(
            self.is_owned(ptr, object_size),
            "pointer {ptr:?} does not belong to chunk at {:?}",
            self.storage
        );
        debug_assert!(
            self.available() < self.size(),
            "deallocating into a chunk that has no outstanding allocations"
        );

        // Cannot underflow because the pointer is owned by this chunk.
        let offset = ptr.addr().get().wrapping_sub(self.storage.addr().get());

        debug_assert!(
            offset.checked_rem(object_size) == Some(0),
            "pointer {ptr:?} does not point to the start of a slot"
        );

        #[expect(
            clippy::integer_division,
            reason = "offset is a multiple of the object size for any pointer we handed out"
        )]
        let index = offset / object_size;

        // SAFETY: The caller guarantees the slot is ours and no longer holds a live object.
        unsafe {
            I::write_link(ptr, self.head);
        }

        self.head = I::from_usize(index);

        // Cannot overflow because available < size (checked in debug builds above).
        self.available = I::from_usize(self.available().wrapping_add(1));
    }

    /// Walks the free list and verifies it visits exactly `available` distinct in-bounds slots.
    #[cfg(debug_assertions)]
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub(crate) fn integrity_check(&self, object_size: usize) {
        let size = self.size();
        let mut visited = vec![false; size];
        let mut index = self.head.to_usize();

        for step in 0..self.available() {
            assert!(
                index < size,
                "free list step {step} points to slot {index} outside chunk of size {size}"
            );

            let seen = visited
                .get_mut(index)
                .expect("index was bounds checked above");
            assert!(!*seen, "free list visits slot {index} twice");
            *seen = true;

            // SAFETY: index < size, so the slot is within our storage and vacant (on the free list).
            index = unsafe {
                I::read_link(self.storage.byte_add(index.wrapping_mul(object_size))).to_usize()
            };
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::collections::HashSet;

    use static_assertions::assert_not_impl_any;

    use super::*;

    const OBJECT_SIZE: usize = size_of::<u32>();

    assert_not_impl_any!(Chunk: Send, Sync);

    fn storage_for(slots: usize) -> Vec<u32> {
        vec![0; slots]
    }

    fn chunk_over(storage: &mut [u32]) -> Chunk {
        let ptr = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap();
        unsafe { Chunk::new(ptr, OBJECT_SIZE, NonZero::new(storage.len()).unwrap()) }
    }

    #[test]
    fn fresh_chunk_is_fully_available() {
        let mut storage = storage_for(255);
        let chunk = chunk_over(&mut storage);

        assert_eq!(chunk.size(), 255);
        assert_eq!(chunk.available(), 255);
        assert!(chunk.is_memory_available());
        chunk.integrity_check(OBJECT_SIZE);
    }

    #[test]
    fn allocate_up_to_capacity_then_none() {
        let mut storage = storage_for(255);
        let mut chunk = chunk_over(&mut storage);

        let mut seen = HashSet::new();
        for _ in 0..255 {
            let ptr = chunk.allocate(OBJECT_SIZE).unwrap();
            assert!(chunk.is_owned(ptr, OBJECT_SIZE));
            assert!(seen.insert(ptr));

            // Must be writable without corrupting anything else.
            unsafe { ptr.cast::<u32>().write(42) };
        }

        assert!(!chunk.is_memory_available());
        assert!(chunk.allocate(OBJECT_SIZE).is_none());
    }

    #[test]
    fn freeing_one_allows_exactly_one_more() {
        let mut storage = storage_for(8);
        let mut chunk = chunk_over(&mut storage);

        let ptrs: Vec<_> = (0..8)
            .map(|_| chunk.allocate(OBJECT_SIZE).unwrap())
            .collect();
        assert!(chunk.allocate(OBJECT_SIZE).is_none());

        unsafe { chunk.deallocate(ptrs[3], OBJECT_SIZE) };
        assert!(chunk.is_memory_available());

        let reused = chunk.allocate(OBJECT_SIZE).unwrap();
        assert_eq!(reused, ptrs[3]);
        assert!(chunk.allocate(OBJECT_SIZE).is_none());
    }

    #[test]
    fn free_list_is_lifo() {
        let mut storage = storage_for(4);
        let mut chunk = chunk_over(&mut storage);

        let a = chunk.allocate(OBJECT_SIZE).unwrap();
        let b = chunk.allocate(OBJECT_SIZE).unwrap();

        unsafe {
            chunk.deallocate(a, OBJECT_SIZE);
            chunk.deallocate(b, OBJECT_SIZE);
        }

        assert_eq!(chunk.allocate(OBJECT_SIZE), Some(b));
        assert_eq!(chunk.allocate(OBJECT_SIZE), Some(a));
        chunk.integrity_check(OBJECT_SIZE);
    }

    #[test]
    fn is_owned_respects_bounds() {
        let mut storage = storage_for(16);
        let chunk = chunk_over(&mut storage);
        let start = chunk.storage();

        assert!(chunk.is_owned(start, OBJECT_SIZE));
        assert!(chunk.is_owned(
            unsafe { start.byte_add(15 * OBJECT_SIZE) },
            OBJECT_SIZE
        ));
        assert!(!chunk.is_owned(
            NonNull::new(start.as_ptr().wrapping_add(16 * OBJECT_SIZE)).unwrap(),
            OBJECT_SIZE
        ));
        assert!(!chunk.is_owned(
            NonNull::new(start.as_ptr().wrapping_sub(1)).unwrap(),
            OBJECT_SIZE
        ));
    }

    #[test]
    fn interleaved_operations_keep_integrity() {
        let mut storage = storage_for(255);
        let mut chunk = chunk_over(&mut storage);
        let mut outstanding = Vec::new();

        // Deterministic pattern: allocate three, free one, repeat until full, then drain.
        for round in 0..400 {
            if round % 4 == 3 {
                if let Some(ptr) = outstanding.pop() {
                    unsafe { chunk.deallocate(ptr, OBJECT_SIZE) };
                }
            } else if chunk.is_memory_available() {
                let ptr = chunk.allocate(OBJECT_SIZE).unwrap();
                assert!(!outstanding.contains(&ptr));
                outstanding.push(ptr);
            }

            assert_eq!(chunk.available(), 255 - outstanding.len());
            chunk.integrity_check(OBJECT_SIZE);
        }

        while let Some(ptr) = outstanding.pop() {
            unsafe { chunk.deallocate(ptr, OBJECT_SIZE) };
        }

        assert_eq!(chunk.available(), 255);
        chunk.integrity_check(OBJECT_SIZE);
    }

    #[test]
    fn wide_link_supports_large_chunks() {
        let mut storage = storage_for(1000);
        let ptr = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap();
        let mut chunk: Chunk<u16> =
            unsafe { Chunk::new(ptr, OBJECT_SIZE, NonZero::new(1000).unwrap()) };

        for _ in 0..1000 {
            assert!(chunk.allocate(OBJECT_SIZE).is_some());
        }

        assert!(chunk.allocate(OBJECT_SIZE).is_none());
    }

    #[test]
    #[should_panic]
    fn capacity_beyond_link_width_panics() {
        let mut storage = storage_for(256);
        let _chunk = chunk_over(&mut storage);
    }

    #[test]
    #[should_panic]
    fn object_smaller_than_link_panics() {
        let mut storage = storage_for(4);
        let ptr = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap();
        let _chunk: Chunk<u16> = unsafe { Chunk::new(ptr, 1, NonZero::new(4).unwrap()) };
    }
}
