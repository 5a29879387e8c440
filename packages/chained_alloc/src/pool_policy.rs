use std::alloc::Layout;
use std::cell::RefCell;
use std::fmt;
use std::num::NonZero;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::{
    AllocError, AllocPolicy, AllocRequest, DeallocRequest, MemoryPool, PolicyChain,
    PoolPolicyBuilder, PoolsManager, Result, SlotIndex,
};

/// An allocation policy that serves single-element requests from a shared pool of fixed-size
/// slots, acquiring backing memory in blocks from the rest of the chain.
///
/// The policy is bound to one element layout. Requests for exactly one element of that layout are
/// served from the pool for it; everything else (arrays, zero-length requests, other layouts) goes
/// to the rest of the chain untouched. When the pool runs out of vacant slots, the policy asks the
/// rest of the chain for [`block_size()`][Self::block_size] more elements and adds them to the
/// pool as a new block.
///
/// Slots handed out by the pool are still passed on to the rest of the chain, and releases of
/// slots are forwarded marked as released. Observers after this policy therefore see both the
/// slot traffic and the block traffic: block growth and teardown show up as allocations and
/// releases of their own.
///
/// # Sharing
///
/// Every clone of a policy, and every policy rebound from it to another element layout, shares
/// the same [`PoolsManager`]. Policies bound to the same layout share the same pool, and any of
/// them can release memory obtained through any other. Two pool policies compare equal if and
/// only if they share a manager, regardless of their element layouts.
///
/// When the last policy bound to a layout goes away as part of a [`Link`][crate::Link], the
/// memory of every block in the pool for that layout is returned to the rest of the chain and the
/// pool is erased. Any elements still allocated from that pool are invalidated at that point.
///
/// A policy dropped on its own, outside of a chain, has no way to return block memory and leaks
/// it (a warning is logged).
///
/// # Element layouts
///
/// Zero-sized layouts and layouts smaller than the free list link (one byte with the default `u8`
/// link) are never pooled; requests for them always go to the rest of the chain.
///
/// # Example
///
/// ```
/// use chained_alloc::{Allocator, HeapPolicy, PoolPolicy, policy_chain};
///
/// let mut allocator = Allocator::<u64, _>::new(policy_chain![PoolPolicy::new(), HeapPolicy]);
///
/// let first = allocator.allocate(1).unwrap();
/// let second = allocator.allocate(1).unwrap();
/// assert_ne!(first, second);
///
/// // SAFETY: Both pointers came from this allocator and are released once.
/// unsafe {
///     allocator.deallocate(first, 1);
///     allocator.deallocate(second, 1);
/// }
/// ```
///
/// # Thread safety
///
/// This type is single-threaded and is neither [`Send`] nor [`Sync`].
pub struct PoolPolicy<I: SlotIndex = u8> {
    manager: Rc<RefCell<PoolsManager<I>>>,

    /// The element layout whose pool this policy holds a reference on.
    ///
    /// `None` if the policy has not been bound to a poolable layout, or if it has already
    /// given up its reference during teardown.
    binding: Option<Layout>,

    /// Number of elements requested from the rest of the chain whenever the pool needs to grow.
    block_size: NonZero<usize>,
}

impl PoolPolicy {
    /// Creates a policy with a fresh [`PoolsManager`], not yet bound to any element layout.
    ///
    /// An unbound policy forwards everything to the rest of the chain. It gets bound when an
    /// [`Allocator`][crate::Allocator] rebinds its chain to the element type.
    ///
    /// For custom configuration, use [`PoolPolicy::builder()`].
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a policy with a fresh [`PoolsManager`], bound to elements of type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is too small to be pooled (this includes zero-sized types).
    #[must_use]
    pub fn for_type<T>() -> Self {
        Self::builder().layout_of::<T>().build()
    }

    /// Returns a builder for creating a [`PoolPolicy`] with custom configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use chained_alloc::PoolPolicy;
    ///
    /// let policy = PoolPolicy::builder()
    ///     .layout_of::<u64>()
    ///     .block_size(1024)
    ///     .build();
    ///
    /// assert_eq!(policy.block_size(), 1024);
    /// ```
    pub fn builder() -> PoolPolicyBuilder {
        PoolPolicyBuilder::new()
    }
}

impl<I: SlotIndex> PoolPolicy<I> {
    /// The default number of elements a pool grows by: one full chunk.
    pub const DEFAULT_BLOCK_SIZE: NonZero<usize> = match NonZero::new(I::MAX_SLOTS) {
        Some(block_size) => block_size,
        None => panic!("a chunk must hold at least one slot"),
    };

    pub(crate) fn new_inner(binding: Option<Layout>, block_size: NonZero<usize>) -> Self {
        let manager = Rc::new(RefCell::new(PoolsManager::new()));

        Self::attach(manager, binding, block_size)
    }

    /// Creates a policy on an existing manager, taking a reference on the pool for `binding`.
    fn attach(
        manager: Rc<RefCell<PoolsManager<I>>>,
        binding: Option<Layout>,
        block_size: NonZero<usize>,
    ) -> Self {
        if let Some(layout) = binding {
            let mut pools = manager.borrow_mut();

            // Copies and rebinds usually find the pool already there.
            if pools.try_acquire_pool(layout).is_none() {
                pools.acquire_pool(layout);
            }
        }

        Self {
            manager,
            binding,
            block_size,
        }
    }

    /// Whether elements of this layout can be served from a pool with this link width.
    #[must_use]
    pub fn is_poolable(layout: Layout) -> bool {
        layout.size() >= size_of::<I>()
    }

    /// The element layout this policy serves from its pool, if any.
    #[must_use]
    pub fn element_layout(&self) -> Option<Layout> {
        self.binding
    }

    /// Total number of slots in this policy's pool, vacant or not.
    ///
    /// Returns 0 if the policy is not bound to a poolable layout.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.binding.map_or(0, |layout| {
            self.manager
                .borrow()
                .pool(layout)
                .map_or(0, MemoryPool::capacity)
        })
    }

    /// Number of elements requested from the rest of the chain whenever the pool needs to grow.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size.get()
    }

    /// Changes the number of elements requested whenever the pool needs to grow.
    ///
    /// Only affects future growth; existing blocks keep their size.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    pub fn set_block_size(&mut self, block_size: usize) {
        match NonZero::new(block_size) {
            Some(block_size) => self.block_size = block_size,
            None => panic!("PoolPolicy block size must be non-zero"),
        }
    }

    /// Grows the pool so it has at least `new_capacity` slots in total, acquiring one block
    /// covering the difference from `rest`.
    ///
    /// Does nothing if the capacity is already sufficient or the policy is not bound to a
    /// poolable layout.
    ///
    /// # Errors
    ///
    /// Returns an error if `rest` fails the request or does not produce any memory.
    pub fn reserve<R: PolicyChain>(&self, new_capacity: usize, rest: &mut R) -> Result<()> {
        let Some(layout) = self.binding else {
            return Ok(());
        };

        let Some(missing) = NonZero::new(new_capacity.saturating_sub(self.capacity())) else {
            return Ok(());
        };

        if self.grow(layout, missing, None, rest)? {
            Ok(())
        } else {
            Err(AllocError::Unsatisfied {
                count: missing.get(),
                element: layout,
            })
        }
    }

    /// Runs `f` with read access to the shared [`PoolsManager`].
    ///
    /// The manager is borrowed for the duration of the call.
    pub fn with_pools_manager<T>(&self, f: impl FnOnce(&PoolsManager<I>) -> T) -> T {
        f(&self.manager.borrow())
    }

    /// Acquires `count` elements worth of memory from `rest` and adds it to the pool for `layout`.
    ///
    /// Returns `false` if `rest` did not produce any memory.
    fn grow<R: PolicyChain>(
        &self,
        layout: Layout,
        count: NonZero<usize>,
        hint: Option<NonNull<u8>>,
        rest: &mut R,
    ) -> Result<bool> {
        let mut request = AllocRequest::new(layout, count.get());
        if let Some(hint) = hint {
            request = request.with_hint(hint);
        }

        let Some(storage) = rest.allocate(&request, None)? else {
            tracing::debug!(
                ?layout,
                count = count.get(),
                "rest of the chain declined to grow the pool"
            );
            return Ok(false);
        };

        let mut manager = self.manager.borrow_mut();

        let Some(pool) = manager.pool_mut(layout) else {
            unreachable!("the pool for {layout:?} is missing although this policy references it");
        };

        // SAFETY: The chain contract guarantees the storage is valid and aligned for `count`
        // elements of `layout` until we hand it back, which only happens at pool teardown.
        unsafe {
            pool.add_mem_block(storage, count);
        }

        tracing::debug!(
            ?layout,
            count = count.get(),
            capacity = pool.capacity(),
            "added memory block to pool"
        );

        #[cfg(debug_assertions)]
        pool.integrity_check();

        Ok(true)
    }

    fn has_vacant_slot(&self, layout: Layout) -> bool {
        self.manager
            .borrow()
            .pool(layout)
            .is_some_and(MemoryPool::is_memory_available)
    }

    /// Releases `ptr` to whichever pool of the manager owns it, checking our own pool first.
    ///
    /// Returns `false` if no pool owns the pointer.
    ///
    /// # Safety
    ///
    /// If a pool owns `ptr`, the pointer must have been allocated from it and not released since.
    unsafe fn release_to_pools(&self, ptr: NonNull<u8>) -> bool {
        let mut manager = self.manager.borrow_mut();

        if let Some(layout) = self.binding {
            if let Some(pool) = manager.pool_mut(layout) {
                if pool.is_owned(ptr) {
                    // SAFETY: Forwarding guarantees from the caller; the pool owns the pointer.
                    unsafe {
                        pool.deallocate(ptr);
                    }
                    return true;
                }
            }
        }

        // The pointer may have been allocated through a policy rebound to another layout.
        for pool in manager.iter_mut() {
            if Some(pool.object_layout()) != self.binding && pool.is_owned(ptr) {
                // SAFETY: Forwarding guarantees from the caller; the pool owns the pointer.
                unsafe {
                    pool.deallocate(ptr);
                }
                return true;
            }
        }

        false
    }

    /// Gives up this policy's reference on its pool and, if that was the last reference, removes
    /// the pool from the manager and hands it to the caller for teardown.
    fn detach(&mut self) -> Option<MemoryPool<I>> {
        let layout = self.binding.take()?;
        let mut manager = self.manager.borrow_mut();

        manager.release_pool(layout);

        if manager.pool_ref_count(layout) == 0 {
            manager.erase_pool(layout)
        } else {
            None
        }
    }
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: SlotIndex> Clone for PoolPolicy<I> {
    fn clone(&self) -> Self {
        Self::attach(Rc::clone(&self.manager), self.binding, self.block_size)
    }
}

// SAFETY: Pool slots lie within blocks that the rest of the chain produced for the same element
// layout, so they are valid and aligned for one element. Blocks are returned only once the last
// policy referencing the pool is released.
unsafe impl<I: SlotIndex> AllocPolicy for PoolPolicy<I> {
    const COMPARABLE: bool = true;

    fn allocate<R: PolicyChain>(
        &mut self,
        request: &AllocRequest,
        existing: Option<NonNull<u8>>,
        rest: &mut R,
    ) -> Result<Option<NonNull<u8>>> {
        if existing.is_some() {
            return rest.allocate(request, existing);
        }

        let Some(layout) = self
            .binding
            .filter(|layout| request.count() == 1 && request.element() == *layout)
        else {
            return rest.allocate(request, None);
        };

        if !self.has_vacant_slot(layout)
            && !self.grow(layout, self.block_size, request.hint(), rest)?
        {
            return Ok(None);
        }

        let slot = self
            .manager
            .borrow_mut()
            .pool_mut(layout)
            .and_then(MemoryPool::allocate);

        rest.allocate(request, slot)
    }

    unsafe fn deallocate<R: PolicyChain>(&mut self, request: &DeallocRequest, rest: &mut R) {
        let owned = if request.is_released() {
            false
        } else {
            // SAFETY: Forwarding guarantees from the caller.
            unsafe { self.release_to_pools(request.ptr()) }
        };

        let request = if owned {
            request.into_released()
        } else {
            *request
        };

        // SAFETY: Forwarding guarantees from the caller. Unless marked as released, the pointer
        // is not pool memory and came from the rest of the chain.
        unsafe {
            rest.deallocate(&request);
        }
    }

    fn rebind(&self, element: Layout) -> Self {
        let binding = Self::is_poolable(element).then_some(element);

        Self::attach(Rc::clone(&self.manager), binding, self.block_size)
    }

    fn policy_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.manager, &other.manager)
    }

    fn release<R: PolicyChain>(&mut self, rest: &mut R) {
        let Some(pool) = self.detach() else {
            return;
        };

        tracing::debug!(
            layout = ?pool.object_layout(),
            blocks = pool.blocks().len(),
            capacity = pool.capacity(),
            "tearing down pool"
        );

        for block in pool.blocks() {
            let request =
                DeallocRequest::new(block.storage(), pool.object_layout(), block.object_count());

            // SAFETY: Every block was allocated from the rest of the chain with exactly this
            // layout and count and is released exactly once, here, after the pool is erased.
            unsafe {
                rest.deallocate(&request);
            }
        }
    }
}

impl<I: SlotIndex> Drop for PoolPolicy<I> {
    fn drop(&mut self) {
        // If the policy was torn down as part of a chain, the binding is already gone.
        if let Some(pool) = self.detach() {
            if !pool.blocks().is_empty() {
                tracing::warn!(
                    layout = ?pool.object_layout(),
                    blocks = pool.blocks().len(),
                    "pool policy dropped outside of a policy chain; leaking its memory blocks"
                );
            }
        }
    }
}

impl<I: SlotIndex> fmt::Debug for PoolPolicy<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolPolicy")
            .field("manager", &Rc::as_ptr(&self.manager))
            .field("binding", &self.binding)
            .field("block_size", &self.block_size)
            .finish()
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

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::{BasicStatistic, HeapPolicy, Link, StatisticPolicy, Terminal, policy_chain};

    assert_not_impl_any!(PoolPolicy: Send, Sync);

    type PoolChain = Link<PoolPolicy, Link<HeapPolicy, Terminal>>;

    fn int_request() -> AllocRequest {
        AllocRequest::new(Layout::new::<u32>(), 1)
    }

    fn int_chain() -> PoolChain {
        policy_chain![PoolPolicy::for_type::<u32>(), HeapPolicy]
    }

    fn free_int(chain: &mut PoolChain, ptr: NonNull<u8>) {
        unsafe { chain.deallocate(&DeallocRequest::new(ptr, Layout::new::<u32>(), 1)) };
    }

    #[test]
    fn unbound_policy_forwards_everything() {
        let mut chain = policy_chain![PoolPolicy::new(), HeapPolicy];

        let ptr = chain.allocate(&int_request(), None).unwrap().unwrap();
        assert_eq!(chain.policy().capacity(), 0);
        assert!(chain.policy().with_pools_manager(PoolsManager::is_empty));

        free_int(&mut chain, ptr);
    }

    #[test]
    fn single_element_requests_come_from_pool() {
        let mut chain = int_chain();

        let ptr = chain.allocate(&int_request(), None).unwrap().unwrap();

        assert_eq!(
            chain.policy().capacity(),
            PoolPolicy::<u8>::DEFAULT_BLOCK_SIZE.get()
        );
        assert!(chain.policy().with_pools_manager(|manager| {
            manager.pool(Layout::new::<u32>()).unwrap().is_owned(ptr)
        }));

        free_int(&mut chain, ptr);
    }

    #[test]
    fn existing_pointer_is_returned_unchanged() {
        let mut chain = int_chain();
        let mut target = 0_u32;
        let existing = NonNull::from(&mut target).cast::<u8>();

        let result = chain.allocate(&int_request(), Some(existing)).unwrap();

        assert_eq!(result, Some(existing));
        assert_eq!(chain.policy().capacity(), 0);
    }

    #[test]
    fn observer_after_heap_sees_pairs_through_pool() {
        let stats = Rc::new(BasicStatistic::new());
        let mut chain = policy_chain![
            HeapPolicy,
            PoolPolicy::for_type::<u32>(),
            StatisticPolicy::new(Rc::clone(&stats)),
        ];

        let ptr = chain.allocate(&int_request(), None).unwrap().unwrap();
        assert_eq!(stats.allocs_count(), 1);

        // The heap served it, so the pool stays empty.
        assert_eq!(chain.rest().policy().capacity(), 0);

        unsafe { chain.deallocate(&DeallocRequest::new(ptr, Layout::new::<u32>(), 1)) };
        assert_eq!(stats.deallocs_count(), 1);
    }

    #[test]
    fn observer_after_pool_sees_slots_and_blocks_in_pairs() {
        let stats = Rc::new(BasicStatistic::new());

        {
            let mut chain = policy_chain![
                PoolPolicy::for_type::<u32>(),
                HeapPolicy,
                StatisticPolicy::new(Rc::clone(&stats)),
            ];

            let ptr = chain.allocate(&int_request(), None).unwrap().unwrap();

            // One block for the pool, then the slot itself.
            assert_eq!(stats.allocs_count(), 2);

            unsafe { chain.deallocate(&DeallocRequest::new(ptr, Layout::new::<u32>(), 1)) };

            // The slot went back to the pool; the block is still held.
            assert_eq!(stats.deallocs_count(), 1);
            assert_eq!(
                chain.policy().capacity(),
                PoolPolicy::<u8>::DEFAULT_BLOCK_SIZE.get()
            );
        }

        assert_eq!(stats.allocs_count(), stats.deallocs_count());
        assert_eq!(stats.mem_used(), 0);
    }

    #[test]
    fn arrays_and_empty_requests_bypass_pool() {
        let mut chain = int_chain();

        let array = AllocRequest::new(Layout::new::<u32>(), 10);
        let ptr = chain.allocate(&array, None).unwrap().unwrap();
        assert_eq!(chain.policy().capacity(), 0);
        unsafe { chain.deallocate(&DeallocRequest::new(ptr, Layout::new::<u32>(), 10)) };

        let empty = AllocRequest::new(Layout::new::<u32>(), 0);
        let ptr = chain.allocate(&empty, None).unwrap().unwrap();
        assert_eq!(chain.policy().capacity(), 0);
        unsafe { chain.deallocate(&DeallocRequest::new(ptr, Layout::new::<u32>(), 0)) };
    }

    #[test]
    fn grows_by_block_size_when_full() {
        let mut chain = policy_chain![
            PoolPolicy::builder()
                .layout_of::<u32>()
                .block_size(4)
                .build(),
            HeapPolicy
        ];

        let mut seen = HashSet::new();
        for expected_capacity in [4, 4, 4, 4, 8, 8, 8, 8, 12] {
            let ptr = chain.allocate(&int_request(), None).unwrap().unwrap();
            assert!(seen.insert(ptr));
            assert_eq!(chain.policy().capacity(), expected_capacity);
        }

        for ptr in seen {
            free_int(&mut chain, ptr);
        }
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut chain = int_chain();

        let first = chain.allocate(&int_request(), None).unwrap().unwrap();
        let _second = chain.allocate(&int_request(), None).unwrap().unwrap();
        free_int(&mut chain, first);

        let third = chain.allocate(&int_request(), None).unwrap().unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn reserve_adds_one_block_for_the_difference() {
        let mut chain = int_chain();
        let (pool, rest) = chain.split_mut();

        pool.reserve(100, rest).unwrap();
        assert_eq!(pool.capacity(), 100);

        pool.reserve(50, rest).unwrap();
        assert_eq!(pool.capacity(), 100);

        pool.reserve(300, rest).unwrap();
        assert_eq!(pool.capacity(), 300);

        let blocks = pool.with_pools_manager(|manager| {
            manager.pool(Layout::new::<u32>()).unwrap().blocks().len()
        });
        assert_eq!(blocks, 2);
    }

    #[test]
    fn reserve_without_memory_source_fails() {
        let mut chain = policy_chain![PoolPolicy::for_type::<u32>()];
        let (pool, rest) = chain.split_mut();

        let result = pool.reserve(10, rest);

        assert_eq!(
            result,
            Err(AllocError::Unsatisfied {
                count: 10,
                element: Layout::new::<u32>(),
            })
        );
    }

    #[test]
    fn allocation_without_memory_source_yields_nothing() {
        let mut chain = policy_chain![PoolPolicy::for_type::<u32>()];

        assert_eq!(chain.allocate(&int_request(), None).unwrap(), None);
    }

    #[test]
    fn set_block_size_affects_future_growth() {
        let mut chain = int_chain();
        chain.policy_mut().set_block_size(16);
        assert_eq!(chain.policy().block_size(), 16);

        let ptr = chain.allocate(&int_request(), None).unwrap().unwrap();
        assert_eq!(chain.policy().capacity(), 16);

        free_int(&mut chain, ptr);
    }

    #[test]
    #[should_panic]
    fn zero_block_size_panics() {
        let mut policy = PoolPolicy::new();
        policy.set_block_size(0);
    }

    #[test]
    fn clones_share_manager_and_pool() {
        let policy = PoolPolicy::for_type::<u32>();
        let copy = policy.clone();

        assert!(policy.policy_eq(&copy));
        assert_eq!(
            policy.with_pools_manager(|manager| manager.pool_ref_count(Layout::new::<u32>())),
            2
        );

        drop(copy);
        assert_eq!(
            policy.with_pools_manager(|manager| manager.pool_ref_count(Layout::new::<u32>())),
            1
        );
    }

    #[test]
    fn clone_joins_existing_pool_without_creating_one() {
        let mut chain = int_chain();
        let ptr = chain.allocate(&int_request(), None).unwrap().unwrap();

        let copy = chain.policy().clone();

        assert_eq!(copy.with_pools_manager(PoolsManager::len), 1);
        assert_eq!(copy.capacity(), chain.policy().capacity());
        assert_eq!(
            copy.with_pools_manager(|manager| manager.pool_ref_count(Layout::new::<u32>())),
            2
        );

        drop(copy);
        free_int(&mut chain, ptr);
    }

    #[test]
    fn independent_policies_are_not_equal() {
        let a = PoolPolicy::for_type::<u32>();
        let b = PoolPolicy::for_type::<u32>();

        assert!(!a.policy_eq(&b));
    }

    #[test]
    fn rebind_shares_manager_with_new_pool() {
        let policy = PoolPolicy::for_type::<u32>();
        let rebound = policy.rebind(Layout::new::<u64>());

        assert!(policy.policy_eq(&rebound));
        assert_eq!(rebound.element_layout(), Some(Layout::new::<u64>()));
        assert_eq!(policy.with_pools_manager(PoolsManager::len), 2);
    }

    #[test]
    fn rebind_to_unpoolable_layout_is_unbound() {
        let policy = PoolPolicy::for_type::<u32>();

        assert_eq!(policy.rebind(Layout::new::<()>()).element_layout(), None);

        let wide = PoolPolicy::builder()
            .slot_index::<u16>()
            .layout_of::<u32>()
            .build();
        assert_eq!(wide.rebind(Layout::new::<u8>()).element_layout(), None);
    }

    #[test]
    fn last_link_returns_blocks_and_erases_pool() {
        let chain = int_chain();
        let observer = chain.policy().clone();

        {
            let mut chain = chain;
            let ptr = chain.allocate(&int_request(), None).unwrap().unwrap();
            free_int(&mut chain, ptr);
        }

        // The observer still holds a reference, so the pool survives.
        assert!(
            observer.with_pools_manager(|manager| manager.pool(Layout::new::<u32>()).is_some())
        );

        let mut last = policy_chain![observer, HeapPolicy];
        let ptr = last.allocate(&int_request(), None).unwrap().unwrap();
        free_int(&mut last, ptr);

        let manager_view = last.policy().rebind(Layout::new::<u64>());
        drop(last);

        assert!(
            manager_view.with_pools_manager(|manager| manager.pool(Layout::new::<u32>()).is_none())
        );
    }

    #[test]
    fn debug_output_names_the_policy() {
        let policy = PoolPolicy::for_type::<u32>();

        assert!(format!("{policy:?}").contains("PoolPolicy"));
    }
}
