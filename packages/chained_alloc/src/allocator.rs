use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::{AllocError, AllocRequest, DeallocRequest, PolicyChain, Propagation, Result};

/// A typed allocator for elements of type `T`, backed by a policy chain.
///
/// This is the surface generic containers talk to. Every request is translated into an
/// [`AllocRequest`] for `T`'s layout and run through the chain. A chain that ends without a
/// pointer fails the request with [`AllocError::Unsatisfied`].
///
/// Constructing an allocator rebinds the chain to `T`, so the chain's policies can be created
/// without knowing the element type up front.
///
/// # Rebinding and equality
///
/// [`rebind()`][Self::rebind] produces the equivalent allocator for another element type over a
/// rebound copy of the same chain. Allocators compare equal across element types whenever their
/// chains compare equal, meaning memory from one may be released through the other.
///
/// # Example
///
/// ```
/// use chained_alloc::{Allocator, HeapPolicy, PoolPolicy, policy_chain};
///
/// let mut numbers = Allocator::<u64, _>::new(policy_chain![PoolPolicy::new(), HeapPolicy]);
/// let pairs = numbers.rebind::<(u32, u32)>();
///
/// // Both views share one pools manager.
/// assert!(numbers == pairs);
///
/// let ptr = numbers.allocate(1).unwrap();
///
/// // SAFETY: The pointer is valid for one u64 and released exactly once.
/// unsafe {
///     numbers.construct(ptr, 42);
///     assert_eq!(*ptr.as_ptr(), 42);
///     numbers.destroy(ptr);
///     numbers.deallocate(ptr, 1);
/// }
/// ```
pub struct Allocator<T, C: PolicyChain> {
    chain: C,

    _element: PhantomData<fn() -> T>,
}

impl<T, C: PolicyChain> Allocator<T, C> {
    /// Creates an allocator for `T` from a chain, rebinding the chain to `T`'s layout.
    #[must_use]
    pub fn new(chain: C) -> Self {
        Self::from_bound_chain(chain.rebind(Layout::new::<T>()))
    }

    fn from_bound_chain(chain: C) -> Self {
        Self {
            chain,
            _element: PhantomData,
        }
    }

    /// Allocates storage for `count` elements of `T`.
    ///
    /// The storage is uninitialized.
    ///
    /// # Errors
    ///
    /// Returns an error if a policy fails the request, if the request is too large, or if no
    /// policy in the chain produced a pointer.
    pub fn allocate(&mut self, count: usize) -> Result<NonNull<T>> {
        self.allocate_request(&AllocRequest::new(Layout::new::<T>(), count))
    }

    /// Allocates storage for `count` elements of `T`, preferably near `hint`.
    ///
    /// # Errors
    ///
    /// Same as [`allocate()`][Self::allocate].
    pub fn allocate_with_hint(&mut self, count: usize, hint: NonNull<T>) -> Result<NonNull<T>> {
        self.allocate_request(&AllocRequest::new(Layout::new::<T>(), count).with_hint(hint.cast()))
    }

    fn allocate_request(&mut self, request: &AllocRequest) -> Result<NonNull<T>> {
        // Surface overflow before any policy sees the request.
        request.array_layout()?;

        self.chain
            .allocate(request, None)?
            .map(NonNull::cast)
            .ok_or(AllocError::Unsatisfied {
                count: request.count(),
                element: request.element(),
            })
    }

    /// Releases storage for `count` elements of `T`.
    ///
    /// The elements are not dropped; use [`destroy()`][Self::destroy] first if needed.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate()`][Self::allocate] with the same `count` on
    /// this allocator or one that compares equal to it, and must not have been released since.
    ///
    /// Releasing through an allocator for a different element type is only sound if every policy
    /// that may own the pointer recognizes it by address alone, as
    /// [`PoolPolicy`][crate::PoolPolicy] does for single elements.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<T>, count: usize) {
        let request = DeallocRequest::new(ptr.cast(), Layout::new::<T>(), count);

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            self.chain.deallocate(&request);
        }
    }

    /// The largest `count` that could in theory be passed to [`allocate()`][Self::allocate].
    #[must_use]
    pub fn max_size(&self) -> usize {
        isize::MAX
            .unsigned_abs()
            .checked_div(size_of::<T>())
            .unwrap_or(usize::MAX)
    }

    /// Moves `value` into the storage at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes and properly aligned for `U`. Any value previously at `ptr`
    /// is overwritten without being dropped.
    #[expect(
        clippy::unused_self,
        reason = "part of the allocator surface generic containers program against"
    )]
    pub unsafe fn construct<U>(&self, ptr: NonNull<U>, value: U) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            ptr.write(value);
        }
    }

    /// Drops the value at `ptr` in place, leaving the storage allocated.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a valid, initialized `U` that is not used again afterwards.
    #[expect(
        clippy::unused_self,
        reason = "part of the allocator surface generic containers program against"
    )]
    pub unsafe fn destroy<U>(&self, ptr: NonNull<U>) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            ptr.drop_in_place();
        }
    }

    /// Creates the equivalent allocator for elements of type `U`.
    #[must_use]
    pub fn rebind<U>(&self) -> Allocator<U, C> {
        Allocator::from_bound_chain(self.chain.rebind(Layout::new::<U>()))
    }

    /// The allocator a container should use when it is copy-constructed from a container using
    /// this allocator.
    #[must_use]
    pub fn select_on_container_copy_construction(&self) -> Self {
        self.clone()
    }

    /// Whether containers should carry this allocator along on copy, move and swap.
    #[must_use]
    pub fn propagation(&self) -> Propagation {
        C::PROPAGATION
    }

    /// The policy chain behind this allocator.
    #[must_use]
    pub fn chain(&self) -> &C {
        &self.chain
    }

    /// The policy chain behind this allocator.
    #[must_use]
    pub fn chain_mut(&mut self) -> &mut C {
        &mut self.chain
    }
}

impl<T, C: PolicyChain + Default> Default for Allocator<T, C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<T, C: PolicyChain> Clone for Allocator<T, C> {
    fn clone(&self) -> Self {
        Self::from_bound_chain(self.chain.clone())
    }
}

impl<T, U, C: PolicyChain> PartialEq<Allocator<U, C>> for Allocator<T, C> {
    fn eq(&self, other: &Allocator<U, C>) -> bool {
        self.chain.chain_eq(&other.chain)
    }
}

impl<T, C: PolicyChain> Eq for Allocator<T, C> {}

impl<T, C: PolicyChain + fmt::Debug> fmt::Debug for Allocator<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("element", &Layout::new::<T>())
            .field("chain", &self.chain)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::{
        HeapPolicy, Link, LinearPolicy, PoolPolicy, StrictPolicy, Terminal, policy_chain,
    };

    type PoolHeap = Link<PoolPolicy, Link<HeapPolicy, Terminal>>;

    assert_not_impl_any!(Allocator<u64, PoolHeap>: Send, Sync);

    #[test]
    fn empty_chain_is_unsatisfied() {
        let mut allocator = Allocator::<u32, _>::new(Terminal);

        assert_eq!(
            allocator.allocate(2),
            Err(AllocError::Unsatisfied {
                count: 2,
                element: Layout::new::<u32>(),
            })
        );
    }

    #[test]
    fn strict_chain_reports_out_of_memory() {
        let mut allocator = Allocator::<u32, _>::new(policy_chain![StrictPolicy]);

        assert_eq!(
            allocator.allocate(2),
            Err(AllocError::OutOfMemory { bytes: 8 })
        );
    }

    #[test]
    fn overflow_is_reported_before_policies_run() {
        let mut allocator = Allocator::<u64, _>::new(policy_chain![HeapPolicy]);

        assert!(matches!(
            allocator.allocate(usize::MAX),
            Err(AllocError::CapacityOverflow { .. })
        ));
    }

    #[test]
    fn new_binds_pool_to_element_type() {
        let allocator =
            Allocator::<u64, PoolHeap>::new(policy_chain![PoolPolicy::new(), HeapPolicy]);

        assert_eq!(
            allocator.chain().policy().element_layout(),
            Some(Layout::new::<u64>())
        );
    }

    #[test]
    fn hint_is_accepted() {
        let mut allocator = Allocator::<u64, _>::new(policy_chain![PoolPolicy::new(), HeapPolicy]);

        let first = allocator.allocate(1).unwrap();
        let second = allocator.allocate_with_hint(1, first).unwrap();
        assert_ne!(first, second);

        unsafe {
            allocator.deallocate(first, 1);
            allocator.deallocate(second, 1);
        }
    }

    #[test]
    fn max_size_depends_on_element_size() {
        let bytes = Allocator::<u8, _>::new(Terminal);
        let words = Allocator::<u64, _>::new(Terminal);
        let nothing = Allocator::<(), _>::new(Terminal);

        assert_eq!(bytes.max_size(), isize::MAX.unsigned_abs());
        assert_eq!(words.max_size(), isize::MAX.unsigned_abs() / 8);
        assert_eq!(nothing.max_size(), usize::MAX);
    }

    #[test]
    fn construct_and_destroy_run_value_lifecycle() {
        struct DropCounter(Rc<Cell<usize>>);

        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut allocator = Allocator::<DropCounter, _>::new(policy_chain![HeapPolicy]);

        let ptr = allocator.allocate(1).unwrap();
        unsafe {
            allocator.construct(ptr, DropCounter(Rc::clone(&drops)));
            assert_eq!(drops.get(), 0);

            allocator.destroy(ptr);
            assert_eq!(drops.get(), 1);

            allocator.deallocate(ptr, 1);
        }
    }

    #[test]
    fn rebound_allocators_compare_equal() {
        let ints = Allocator::<u32, _>::new(policy_chain![PoolPolicy::new(), HeapPolicy]);
        let chars = ints.rebind::<char>();
        let unrelated = Allocator::<u32, _>::new(policy_chain![PoolPolicy::new(), HeapPolicy]);

        assert!(ints == chars);
        assert!(chars == ints);
        assert!(ints != unrelated);
        assert!(ints == ints.select_on_container_copy_construction());
    }

    #[test]
    fn propagation_comes_from_chain() {
        let pooled = Allocator::<u32, _>::new(policy_chain![PoolPolicy::new(), HeapPolicy]);
        let linear =
            Allocator::<u32, _>::new(policy_chain![LinearPolicy::with_capacity(64).unwrap()]);

        assert_eq!(pooled.propagation(), Propagation::NONE);
        assert_eq!(linear.propagation(), Propagation::ALL);
    }

    #[test]
    fn debug_output_mentions_chain() {
        let allocator = Allocator::<u32, _>::new(policy_chain![HeapPolicy]);

        let output = format!("{allocator:?}");
        assert!(output.contains("Allocator"));
        assert!(output.contains("HeapPolicy"));
    }

    #[test]
    fn chain_mut_allows_reconfiguration() {
        let mut allocator = Allocator::<u32, _>::new(policy_chain![PoolPolicy::new(), HeapPolicy]);

        allocator.chain_mut().policy_mut().set_block_size(8);
        let ptr = allocator.allocate(1).unwrap();

        assert_eq!(allocator.chain().policy().capacity(), 8);
        unsafe { allocator.deallocate(ptr, 1) };
    }
}
