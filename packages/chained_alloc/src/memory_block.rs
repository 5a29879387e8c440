use std::num::NonZero;
use std::ptr::NonNull;

use crate::{Chunk, SlotIndex};

/// A contiguous memory region partitioned into [`Chunk`]s of one object size.
///
/// All chunks hold [`I::MAX_SLOTS`][SlotIndex::MAX_SLOTS] objects except possibly the last one,
/// which holds the remainder. Chunks lie in address order matching their position.
///
/// Like the chunks it contains, the block does not own its memory. Dropping a block leaves the
/// region untouched; whoever supplied the region returns it to its allocator.
#[derive(Debug)]
pub struct MemoryBlock<I: SlotIndex = u8> {
    storage: NonNull<u8>,
    object_count: NonZero<usize>,
    chunks: Vec<Chunk<I>>,
}

impl<I: SlotIndex> MemoryBlock<I> {
    /// Carves `object_count` slots of `object_size` bytes out of `storage`.
    ///
    /// # Panics
    ///
    /// Panics if `object_size` is smaller than the free list link.
    ///
    /// # Safety
    ///
    /// `storage` must be valid for reads and writes of `object_count * object_size` bytes for the
    /// entire lifetime of the block and must not be accessed through other pointers except those
    /// handed out by [`allocate()`][Self::allocate].
    #[must_use]
    pub unsafe fn new(
        storage: NonNull<u8>,
        object_size: usize,
        object_count: NonZero<usize>,
    ) -> Self {
        let chunk_count = object_count.get().div_ceil(I::MAX_SLOTS);
        let mut chunks = Vec::with_capacity(chunk_count);

        let mut remaining = object_count.get();
        let mut offset = 0_usize;

        while let Some(chunk_capacity) = NonZero::new(remaining.min(I::MAX_SLOTS)) {
            // SAFETY: offset + chunk_capacity * object_size never exceeds the region size the
            // caller vouched for, because we only ever consume `object_count` objects in total.
            let chunk_storage = unsafe { storage.byte_add(offset) };

            // SAFETY: The chunk gets a disjoint sub-range of the caller's region.
            chunks.push(unsafe { Chunk::new(chunk_storage, object_size, chunk_capacity) });

            // Neither can overflow/underflow: we stay within object_count objects of a region
            // that fits in virtual memory.
            remaining = remaining.wrapping_sub(chunk_capacity.get());
            offset = offset.wrapping_add(chunk_capacity.get().wrapping_mul(object_size));
        }

        Self {
            storage,
            object_count,
            chunks,
        }
    }

    /// Start of the memory region partitioned by this block.
    #[must_use]
    pub fn storage(&self) -> NonNull<u8> {
        self.storage
    }

    /// Total number of object slots in the block.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.object_count.get()
    }

    /// The chunks of this block, in address order.
    #[must_use]
    pub fn chunks(&self) -> &[Chunk<I>] {
        &self.chunks
    }

    pub(crate) fn chunk_mut(&mut self, index: usize) -> Option<&mut Chunk<I>> {
        self.chunks.get_mut(index)
    }

    /// Whether any chunk of the block has a vacant slot.
    #[must_use]
    pub fn is_memory_available(&self) -> bool {
        self.chunks.iter().any(Chunk::is_memory_available)
    }

    /// Whether `ptr` points into the region of this block.
    #[must_use]
    pub fn is_owned(&self, ptr: NonNull<u8>, object_size: usize) -> bool {
        let start = self.storage.addr().get();
        let end = start.wrapping_add(self.object_count().wrapping_mul(object_size));
        let addr = ptr.addr().get();

        start <= addr && addr < end
    }

    /// Allocates from the first chunk with a vacant slot.
    ///
    /// Returns the slot together with the index of the chunk that served it, so the caller can
    /// go straight back to that chunk next time. Returns `None` if every chunk is full.
    #[must_use]
    pub fn allocate(&mut self, object_size: usize) -> Option<(NonNull<u8>, usize)> {
        let (index, chunk) = self
            .chunks
            .iter_mut()
            .enumerate()
            .find(|(_, chunk)| chunk.is_memory_available())?;

        chunk.allocate(object_size).map(|ptr| (ptr, index))
    }

    /// Returns a slot to the chunk that owns it.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate()`][Self::allocate] on this block with the same
    /// `object_size` and must not have been deallocated since.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, object_size: usize) {
        let chunk = self
            .chunks
            .iter_mut()
            .find(|chunk| chunk.is_owned(ptr, object_size));

        debug_assert!(
            chunk.is_some(),
            "pointer {ptr:?} does not belong to any chunk of block at {:?}",
            self.storage
        );

        if let Some(chunk) = chunk {
            // SAFETY: Forwarding guarantees from the caller; the chunk owns the pointer.
            unsafe {
                chunk.deallocate(ptr, object_size);
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use super::*;

    const OBJECT_SIZE: usize = size_of::<u64>();

    fn block_over(storage: &mut [u64]) -> MemoryBlock {
        let ptr = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap();
        unsafe { MemoryBlock::new(ptr, OBJECT_SIZE, NonZero::new(storage.len()).unwrap()) }
    }

    #[test]
    fn partitions_into_full_chunks_plus_remainder() {
        let mut storage = vec![0_u64; 600];
        let block = block_over(&mut storage);

        let sizes: Vec<_> = block.chunks().iter().map(Chunk::size).collect();
        assert_eq!(sizes, vec![255, 255, 90]);
        assert_eq!(block.object_count(), 600);
    }

    #[test]
    fn evenly_divisible_count_has_full_last_chunk() {
        let mut storage = vec![0_u64; 510];
        let block = block_over(&mut storage);

        let sizes: Vec<_> = block.chunks().iter().map(Chunk::size).collect();
        assert_eq!(sizes, vec![255, 255]);
    }

    #[test]
    fn chunks_are_contiguous_in_address_order() {
        let mut storage = vec![0_u64; 600];
        let block = block_over(&mut storage);

        let mut expected = block.storage();
        for chunk in block.chunks() {
            assert_eq!(chunk.storage(), expected);
            expected = unsafe { expected.byte_add(chunk.size() * OBJECT_SIZE) };
        }
    }

    #[test]
    fn allocate_reports_serving_chunk() {
        let mut storage = vec![0_u64; 300];
        let mut block = block_over(&mut storage);

        for _ in 0..255 {
            let (_, chunk_index) = block.allocate(OBJECT_SIZE).unwrap();
            assert_eq!(chunk_index, 0);
        }

        let (ptr, chunk_index) = block.allocate(OBJECT_SIZE).unwrap();
        assert_eq!(chunk_index, 1);
        assert!(block.chunks()[1].is_owned(ptr, OBJECT_SIZE));
    }

    #[test]
    fn exhausts_then_recovers_after_deallocate() {
        let mut storage = vec![0_u64; 10];
        let mut block = block_over(&mut storage);

        let ptrs: Vec<_> = (0..10)
            .map(|_| block.allocate(OBJECT_SIZE).unwrap().0)
            .collect();

        assert!(!block.is_memory_available());
        assert!(block.allocate(OBJECT_SIZE).is_none());

        unsafe { block.deallocate(ptrs[7], OBJECT_SIZE) };

        assert!(block.is_memory_available());
        assert_eq!(block.allocate(OBJECT_SIZE).unwrap().0, ptrs[7]);
    }

    #[test]
    fn disjoint_blocks_never_share_ownership() {
        let mut storage_a = vec![0_u64; 300];
        let mut storage_b = vec![0_u64; 300];
        let mut block_a = block_over(&mut storage_a);
        let mut block_b = block_over(&mut storage_b);

        for _ in 0..300 {
            let (from_a, _) = block_a.allocate(OBJECT_SIZE).unwrap();
            let (from_b, _) = block_b.allocate(OBJECT_SIZE).unwrap();

            assert!(block_a.is_owned(from_a, OBJECT_SIZE));
            assert!(!block_b.is_owned(from_a, OBJECT_SIZE));
            assert!(block_b.is_owned(from_b, OBJECT_SIZE));
            assert!(!block_a.is_owned(from_b, OBJECT_SIZE));
        }
    }
}
