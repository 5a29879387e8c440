use std::alloc::Layout;
use std::fmt;

use foldhash::{HashMap, HashMapExt};

use crate::{MemoryPool, SlotIndex};

/// A registry of [`MemoryPool`]s keyed by object layout, with a reference count per pool.
///
/// One manager is shared by a [`PoolPolicy`][crate::PoolPolicy] and every clone or rebound
/// policy derived from it. Each policy holds one reference on the pool for its element layout,
/// so policies for element types with the same layout share a pool.
///
/// Dropping the last reference is split into two steps. [`release_pool()`][Self::release_pool]
/// only decrements the count, after which the caller can observe the count reaching zero,
/// return the memory of every block to wherever it came from and only then remove the entry via
/// [`erase_pool()`][Self::erase_pool]. This guarantees block memory is returned exactly once.
///
/// The manager itself never allocates or frees block memory.
pub struct PoolsManager<I: SlotIndex = u8> {
    /// We use foldhash for better performance with small hash tables.
    pools: HashMap<Layout, PoolEntry<I>>,
}

#[derive(Debug)]
struct PoolEntry<I: SlotIndex> {
    pool: MemoryPool<I>,
    ref_count: usize,
}

impl<I: SlotIndex> PoolsManager<I> {
    /// Creates a manager with no pools.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: HashMap::new(),
        }
    }

    /// Takes a reference on the pool for `layout`, creating the pool if it does not exist yet.
    ///
    /// # Panics
    ///
    /// Panics if a new pool would have to be created for a layout smaller than the free list link.
    pub fn acquire_pool(&mut self, layout: Layout) -> &mut MemoryPool<I> {
        let entry = self.pools.entry(layout).or_insert_with(|| {
            tracing::debug!(?layout, "creating memory pool");

            PoolEntry {
                pool: MemoryPool::new(layout),
                ref_count: 0,
            }
        });

        // Cannot overflow because every reference is held by a live policy object in memory.
        entry.ref_count = entry.ref_count.wrapping_add(1);

        &mut entry.pool
    }

    /// Takes a reference on the pool for `layout` only if that pool already exists.
    ///
    /// Returns `None` without creating anything if there is no such pool.
    pub fn try_acquire_pool(&mut self, layout: Layout) -> Option<&mut MemoryPool<I>> {
        let entry = self.pools.get_mut(&layout)?;

        // Cannot overflow because every reference is held by a live policy object in memory.
        entry.ref_count = entry.ref_count.wrapping_add(1);

        Some(&mut entry.pool)
    }

    /// Gives up one reference on the pool for `layout`.
    ///
    /// The entry stays in the registry even when the count reaches zero; see
    /// [`erase_pool()`][Self::erase_pool]. Does nothing if there is no such pool.
    pub fn release_pool(&mut self, layout: Layout) {
        if let Some(entry) = self.pools.get_mut(&layout) {
            debug_assert!(
                entry.ref_count > 0,
                "released the pool for {layout:?} more times than it was acquired"
            );

            entry.ref_count = entry.ref_count.saturating_sub(1);
        }
    }

    /// Removes the pool for `layout` from the registry and hands it to the caller.
    ///
    /// The caller is expected to have confirmed the reference count is zero and to return the
    /// memory of every block of the returned pool. Returns `None` if there is no such pool.
    pub fn erase_pool(&mut self, layout: Layout) -> Option<MemoryPool<I>> {
        let entry = self.pools.remove(&layout)?;

        debug_assert_eq!(
            entry.ref_count, 0,
            "erased the pool for {layout:?} while it is still referenced"
        );

        Some(entry.pool)
    }

    /// Number of references held on the pool for `layout`, or zero if there is no such pool.
    #[must_use]
    pub fn pool_ref_count(&self, layout: Layout) -> usize {
        self.pools.get(&layout).map_or(0, |entry| entry.ref_count)
    }

    /// Looks up the pool for `layout` without touching its reference count.
    #[must_use]
    pub fn pool(&self, layout: Layout) -> Option<&MemoryPool<I>> {
        self.pools.get(&layout).map(|entry| &entry.pool)
    }

    /// Looks up the pool for `layout` without touching its reference count.
    #[must_use]
    pub fn pool_mut(&mut self, layout: Layout) -> Option<&mut MemoryPool<I>> {
        self.pools.get_mut(&layout).map(|entry| &mut entry.pool)
    }

    /// Iterates over all pools, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryPool<I>> {
        self.pools.values().map(|entry| &entry.pool)
    }

    /// Iterates over all pools, in no particular order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MemoryPool<I>> {
        self.pools.values_mut().map(|entry| &mut entry.pool)
    }

    /// Number of pools in the registry, including pools whose reference count dropped to zero
    /// but which have not been erased yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether the registry contains no pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

impl<I: SlotIndex> Default for PoolsManager<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: SlotIndex> fmt::Debug for PoolsManager<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolsManager")
            .field("pools", &self.pools.len())
            .field(
                "ref_counts",
                &self
                    .pools
                    .iter()
                    .map(|(layout, entry)| (layout.size(), layout.align(), entry.ref_count))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn int_layout() -> Layout {
        Layout::new::<u32>()
    }

    #[test]
    fn acquire_creates_once_and_counts() {
        let mut manager = PoolsManager::<u8>::new();

        for _ in 0..3 {
            let pool = manager.acquire_pool(int_layout());
            assert_eq!(pool.object_layout(), int_layout());
        }

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.pool_ref_count(int_layout()), 3);
    }

    #[test]
    fn distinct_layouts_get_distinct_pools() {
        let mut manager = PoolsManager::<u8>::new();

        manager.acquire_pool(Layout::new::<u32>());
        manager.acquire_pool(Layout::new::<u64>());
        manager.acquire_pool(Layout::new::<u8>());

        assert_eq!(manager.len(), 3);
        assert_eq!(manager.iter().count(), 3);
    }

    #[test]
    fn same_size_different_alignment_is_a_different_pool() {
        let mut manager = PoolsManager::<u8>::new();

        manager.acquire_pool(Layout::new::<[u8; 8]>());
        manager.acquire_pool(Layout::new::<u64>());

        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn try_acquire_does_not_create() {
        let mut manager = PoolsManager::<u8>::new();

        assert!(manager.try_acquire_pool(int_layout()).is_none());
        assert!(manager.is_empty());

        manager.acquire_pool(int_layout());
        assert!(manager.try_acquire_pool(int_layout()).is_some());
        assert_eq!(manager.pool_ref_count(int_layout()), 2);
    }

    #[test]
    fn release_keeps_entry_until_erased() {
        let mut manager = PoolsManager::<u8>::new();
        let k = 4;

        for _ in 0..k {
            manager.acquire_pool(int_layout());
        }
        for _ in 0..k - 1 {
            manager.release_pool(int_layout());
        }
        assert_eq!(manager.pool_ref_count(int_layout()), 1);

        manager.release_pool(int_layout());
        assert_eq!(manager.pool_ref_count(int_layout()), 0);
        assert!(manager.pool(int_layout()).is_some());

        let erased = manager.erase_pool(int_layout()).unwrap();
        assert_eq!(erased.object_layout(), int_layout());
        assert!(manager.pool(int_layout()).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn missing_pool_operations_are_harmless() {
        let mut manager = PoolsManager::<u8>::new();

        manager.release_pool(int_layout());
        assert!(manager.erase_pool(int_layout()).is_none());
        assert_eq!(manager.pool_ref_count(int_layout()), 0);
    }

    #[test]
    fn debug_output_mentions_pool_count() {
        let mut manager = PoolsManager::<u8>::new();
        manager.acquire_pool(int_layout());

        let output = format!("{manager:?}");
        assert!(output.contains("PoolsManager"));
        assert!(output.contains("pools: 1"));
    }
}
