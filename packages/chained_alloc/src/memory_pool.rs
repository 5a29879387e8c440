use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;

use crate::{Chunk, ChunkCoordinates, MemoryBlock, SlotIndex};

/// A growable collection of [`MemoryBlock`]s that all serve objects of one layout.
///
/// The pool never talks to an allocator itself. Whoever owns the pool acquires memory regions
/// and registers them via [`add_mem_block()`][Self::add_mem_block]; the pool only does the
/// bookkeeping. Consequently the pool does not free anything when dropped, either: the owner
/// walks [`blocks()`][Self::blocks] and returns each region before letting go of the pool.
///
/// Blocks are only ever appended, so [`capacity()`][Self::capacity] never decreases.
#[derive(Debug)]
pub struct MemoryPool<I: SlotIndex = u8> {
    object_layout: Layout,

    blocks: Vec<MemoryBlock<I>>,

    /// The chunk that served the most recent allocation. This is a cache, not the ground truth:
    /// the chunk may have filled up since, in which case we fall back to scanning all blocks.
    last_used_chunk: Option<ChunkCoordinates>,
}

impl<I: SlotIndex> MemoryPool<I> {
    /// Creates an empty pool for objects of the given layout.
    ///
    /// # Panics
    ///
    /// Panics if the layout is smaller than the free list link (which includes zero-sized layouts).
    #[must_use]
    pub fn new(object_layout: Layout) -> Self {
        assert!(
            object_layout.size() >= size_of::<I>(),
            "MemoryPool objects must be at least {} bytes to hold a free list link, got {object_layout:?}",
            size_of::<I>()
        );

        Self {
            object_layout,
            blocks: Vec::new(),
            last_used_chunk: None,
        }
    }

    /// Layout of the objects served by this pool.
    #[must_use]
    pub fn object_layout(&self) -> Layout {
        self.object_layout
    }

    /// Size in bytes of the objects served by this pool.
    #[must_use]
    pub fn object_size(&self) -> usize {
        self.object_layout.size()
    }

    /// Total number of object slots across all blocks, vacant or not.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.blocks.iter().map(MemoryBlock::object_count).sum()
    }

    /// The blocks registered with this pool, in the order they were added.
    #[must_use]
    pub fn blocks(&self) -> &[MemoryBlock<I>] {
        &self.blocks
    }

    /// Registers an externally acquired memory region as a new block of `object_count` slots.
    ///
    /// # Safety
    ///
    /// `storage` must be aligned for [`object_layout()`][Self::object_layout] and valid for reads
    /// and writes of `object_count * object_size()` bytes until the pool is dropped. The region
    /// must not overlap any block already in the pool.
    pub unsafe fn add_mem_block(&mut self, storage: NonNull<u8>, object_count: NonZero<usize>) {
        debug_assert!(
            storage.addr().get().checked_rem(self.object_layout.align()) == Some(0),
            "block storage {storage:?} is not aligned for {:?}",
            self.object_layout
        );

        // SAFETY: Forwarding guarantees from the caller.
        let block = unsafe { MemoryBlock::new(storage, self.object_size(), object_count) };

        self.blocks.push(block);
    }

    /// Whether a subsequent [`allocate()`][Self::allocate] would succeed.
    #[must_use]
    pub fn is_memory_available(&self) -> bool {
        if self
            .cached_chunk()
            .is_some_and(Chunk::is_memory_available)
        {
            return true;
        }

        self.blocks.iter().any(MemoryBlock::is_memory_available)
    }

    /// Whether `ptr` points into any block of this pool.
    #[must_use]
    pub fn is_owned(&self, ptr: NonNull<u8>) -> bool {
        let object_size = self.object_size();
        self.blocks
            .iter()
            .any(|block| block.is_owned(ptr, object_size))
    }

    /// Takes a vacant slot from the pool.
    ///
    /// Returns `None` if every block is full. Growing the pool is the caller's responsibility.
    #[must_use]
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        let object_size = self.object_size();

        if let Some(chunk) = self.cached_chunk_mut() {
            if chunk.is_memory_available() {
                return chunk.allocate(object_size);
            }
        }

        for (block_index, block) in self.blocks.iter_mut().enumerate() {
            if let Some((ptr, chunk_index)) = block.allocate(object_size) {
                self.last_used_chunk = Some(ChunkCoordinates::from_parts(block_index, chunk_index));
                return Some(ptr);
            }
        }

        None
    }

    /// Returns a slot to the pool.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate()`][Self::allocate] on this pool and must not
    /// have been deallocated since. Passing a pointer the pool does not own is undefined behavior
    /// in release builds (debug builds panic).
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        let object_size = self.object_size();

        let block = self
            .blocks
            .iter_mut()
            .find(|block| block.is_owned(ptr, object_size));

        debug_assert!(
            block.is_some(),
            "pointer {ptr:?} does not belong to the pool for {:?}",
            self.object_layout
        );

        if let Some(block) = block {
            // SAFETY: Forwarding guarantees from the caller; the block owns the pointer.
            unsafe {
                block.deallocate(ptr, object_size);
            }
        }
    }

    fn cached_chunk(&self) -> Option<&Chunk<I>> {
        let coordinates = self.last_used_chunk?;

        self.blocks
            .get(coordinates.block_index())?
            .chunks()
            .get(coordinates.chunk_index())
    }

    fn cached_chunk_mut(&mut self) -> Option<&mut Chunk<I>> {
        let coordinates = self.last_used_chunk?;

        self.blocks
            .get_mut(coordinates.block_index())?
            .chunk_mut(coordinates.chunk_index())
    }

    #[cfg(debug_assertions)]
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub(crate) fn integrity_check(&self) {
        let object_size = self.object_size();

        for block in &self.blocks {
            for chunk in block.chunks() {
                chunk.integrity_check(object_size);
            }
        }

        for (index, block) in self.blocks.iter().enumerate() {
            for other in self.blocks.iter().skip(index.wrapping_add(1)) {
                assert!(
                    !block.is_owned(other.storage(), object_size)
                        && !other.is_owned(block.storage(), object_size),
                    "blocks at {:?} and {:?} overlap",
                    block.storage(),
                    other.storage()
                );
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
    use std::collections::HashSet;

    use super::*;

    fn region(objects: usize) -> Vec<u64> {
        vec![0; objects]
    }

    fn add_region(pool: &mut MemoryPool, region: &mut [u64]) {
        let ptr = NonNull::new(region.as_mut_ptr().cast::<u8>()).unwrap();
        unsafe { pool.add_mem_block(ptr, NonZero::new(region.len()).unwrap()) };
    }

    #[test]
    fn empty_pool_has_nothing_to_give() {
        let mut pool = MemoryPool::<u8>::new(Layout::new::<u64>());

        assert_eq!(pool.capacity(), 0);
        assert!(!pool.is_memory_available());
        assert!(pool.allocate().is_none());
    }

    #[test]
    fn capacity_grows_by_exactly_block_size() {
        let mut pool = MemoryPool::new(Layout::new::<u64>());
        let mut first = region(100);
        let mut second = region(300);

        add_region(&mut pool, &mut first);
        assert_eq!(pool.capacity(), 100);

        add_region(&mut pool, &mut second);
        assert_eq!(pool.capacity(), 400);
        assert_eq!(pool.blocks().len(), 2);
    }

    #[test]
    fn allocations_span_blocks_and_are_distinct() {
        let mut pool = MemoryPool::new(Layout::new::<u64>());
        let mut first = region(10);
        let mut second = region(10);
        add_region(&mut pool, &mut first);
        add_region(&mut pool, &mut second);

        let mut seen = HashSet::new();
        for _ in 0..20 {
            let ptr = pool.allocate().unwrap();
            assert!(pool.is_owned(ptr));
            assert!(seen.insert(ptr));
        }

        assert!(!pool.is_memory_available());
        assert!(pool.allocate().is_none());
        pool.integrity_check();
    }

    #[test]
    fn no_two_blocks_claim_the_same_pointer() {
        let mut pool = MemoryPool::new(Layout::new::<u64>());
        let mut first = region(300);
        let mut second = region(300);
        add_region(&mut pool, &mut first);
        add_region(&mut pool, &mut second);

        for _ in 0..600 {
            let ptr = pool.allocate().unwrap();
            let owners = pool
                .blocks()
                .iter()
                .filter(|block| block.is_owned(ptr, pool.object_size()))
                .count();
            assert_eq!(owners, 1);
        }
    }

    #[test]
    fn freed_slot_is_reused_through_cache() {
        let mut pool = MemoryPool::new(Layout::new::<u64>());
        let mut storage = region(4);
        add_region(&mut pool, &mut storage);

        let ptrs: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
        assert!(!pool.is_memory_available());

        unsafe { pool.deallocate(ptrs[1]) };

        assert!(pool.is_memory_available());
        assert_eq!(pool.allocate(), Some(ptrs[1]));
        pool.integrity_check();
    }

    #[test]
    fn stale_cache_falls_back_to_scan() {
        let mut pool = MemoryPool::new(Layout::new::<u64>());
        let mut first = region(2);
        add_region(&mut pool, &mut first);

        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        // The cached chunk is now full; a newly added block must still be found.
        let mut second = region(2);
        add_region(&mut pool, &mut second);

        let c = pool.allocate().unwrap();
        assert!(pool.blocks()[1].is_owned(c, pool.object_size()));

        unsafe { pool.deallocate(a) };
        let _d = pool.allocate().unwrap();
        let reused = pool.allocate().unwrap();
        assert_eq!(reused, a);
    }

    #[test]
    fn capacity_is_monotonic_under_churn() {
        let mut pool = MemoryPool::new(Layout::new::<u64>());
        let mut regions: Vec<_> = (0..5).map(|_| region(64)).collect();
        let mut outstanding = Vec::new();
        let mut last_capacity = 0;

        for storage in &mut regions {
            add_region(&mut pool, storage);

            for _ in 0..80 {
                if let Some(ptr) = pool.allocate() {
                    outstanding.push(ptr);
                }
            }
            for _ in 0..20 {
                if let Some(ptr) = outstanding.pop() {
                    unsafe { pool.deallocate(ptr) };
                }
            }

            assert!(pool.capacity() >= last_capacity);
            last_capacity = pool.capacity();
        }

        pool.integrity_check();
    }

    #[test]
    #[should_panic]
    fn zero_sized_layout_panics() {
        let _pool = MemoryPool::<u8>::new(Layout::new::<()>());
    }

    #[test]
    #[should_panic]
    fn layout_smaller_than_wide_link_panics() {
        let _pool = MemoryPool::<u16>::new(Layout::new::<u8>());
    }
}
