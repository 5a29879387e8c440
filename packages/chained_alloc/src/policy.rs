use std::alloc::Layout;
use std::ptr::NonNull;

use crate::{AllocError, Result};

/// Describes a request for storage for `count` elements of one layout.
///
/// Requests are type-erased: the element type only shows up as its [`Layout`], which lets a
/// single policy chain serve [`Allocator`][crate::Allocator]s of any element type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocRequest {
    element: Layout,
    count: usize,
    hint: Option<NonNull<u8>>,
}

impl AllocRequest {
    /// Creates a request for `count` elements of layout `element`.
    #[must_use]
    pub fn new(element: Layout, count: usize) -> Self {
        Self {
            element,
            count,
            hint: None,
        }
    }

    /// Attaches a locality hint: a pointer near which the caller would like the storage.
    ///
    /// Policies are free to ignore the hint.
    #[must_use]
    pub fn with_hint(mut self, hint: NonNull<u8>) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Layout of a single element.
    #[must_use]
    pub fn element(&self) -> Layout {
        self.element
    }

    /// Number of elements requested.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// The locality hint, if any.
    #[must_use]
    pub fn hint(&self) -> Option<NonNull<u8>> {
        self.hint
    }

    /// Total number of bytes requested, saturating at `usize::MAX`.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.element.size().saturating_mul(self.count)
    }

    /// The layout of the whole array of requested elements.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::CapacityOverflow`] if the array does not fit in `isize::MAX` bytes.
    pub fn array_layout(&self) -> Result<Layout> {
        array_layout(self.element, self.count)
    }
}

/// Describes the release of storage previously obtained via an [`AllocRequest`].
///
/// The element layout and count must match the request that produced the pointer.
///
/// Every policy in the chain sees every release, including the policies after the one that owns
/// the pointer. The owner takes the storage back and forwards the request marked as
/// [released][Self::is_released], so later producers leave the pointer alone while observers
/// still record it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeallocRequest {
    ptr: NonNull<u8>,
    element: Layout,
    count: usize,

    /// Set once the policy that owns the pointer has taken the storage back.
    released: bool,
}

impl DeallocRequest {
    /// Creates a request to release `count` elements of layout `element` at `ptr`.
    #[must_use]
    pub fn new(ptr: NonNull<u8>, element: Layout, count: usize) -> Self {
        Self {
            ptr,
            element,
            count,
            released: false,
        }
    }

    /// The same request, marked as already taken back by the policy that owns the pointer.
    #[must_use]
    pub fn into_released(mut self) -> Self {
        self.released = true;
        self
    }

    /// Whether an earlier policy in the chain already took the storage back.
    ///
    /// Policies that produce memory must not release a pointer again once this is set.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// The pointer being released.
    #[must_use]
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Layout of a single element.
    #[must_use]
    pub fn element(&self) -> Layout {
        self.element
    }

    /// Number of elements being released.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Total number of bytes being released, saturating at `usize::MAX`.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.element.size().saturating_mul(self.count)
    }

    /// The layout of the whole array of released elements.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::CapacityOverflow`] if the array does not fit in `isize::MAX` bytes,
    /// which cannot happen for a request that was successfully allocated.
    pub fn array_layout(&self) -> Result<Layout> {
        array_layout(self.element, self.count)
    }
}

fn array_layout(element: Layout, count: usize) -> Result<Layout> {
    let size = element
        .size()
        .checked_mul(count)
        .ok_or(AllocError::CapacityOverflow { count, element })?;

    Layout::from_size_align(size, element.align())
        .map_err(|_| AllocError::CapacityOverflow { count, element })
}

/// Whether an allocator should travel along with the data when a container is copied, moved or
/// swapped, mirroring the propagation traits generic containers consult.
///
/// A chain propagates on an event if any policy in it does.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Propagation {
    on_copy_assignment: bool,
    on_move_assignment: bool,
    on_swap: bool,
}

impl Propagation {
    /// Never propagates.
    pub const NONE: Self = Self::new(false, false, false);

    /// Propagates on every event.
    pub const ALL: Self = Self::new(true, true, true);

    /// Creates a propagation profile from its individual flags.
    #[must_use]
    pub const fn new(on_copy_assignment: bool, on_move_assignment: bool, on_swap: bool) -> Self {
        Self {
            on_copy_assignment,
            on_move_assignment,
            on_swap,
        }
    }

    /// Whether the allocator is copied along when a container is copy-assigned.
    #[must_use]
    pub const fn on_copy_assignment(&self) -> bool {
        self.on_copy_assignment
    }

    /// Whether the allocator is moved along when a container is move-assigned.
    #[must_use]
    pub const fn on_move_assignment(&self) -> bool {
        self.on_move_assignment
    }

    /// Whether the allocators are exchanged when two containers are swapped.
    #[must_use]
    pub const fn on_swap(&self) -> bool {
        self.on_swap
    }

    /// Field-wise OR of two profiles.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self::new(
            self.on_copy_assignment || other.on_copy_assignment,
            self.on_move_assignment || other.on_move_assignment,
            self.on_swap || other.on_swap,
        )
    }
}

/// One pluggable allocation strategy in a policy chain.
///
/// A policy sits in a [`Link`][crate::Link] and sees every request before the rest of the chain
/// does. It decides whether to handle the request itself and whether to hand it on to `rest`.
///
/// # Allocation
///
/// `existing` is the pointer produced by the policies processed so far, if any. A policy that
/// sees `Some` must not replace it (first satisfier wins). A policy that sees `None` and can serve
/// the request produces a pointer. Either way the policy forwards the request to `rest`, passing
/// along whatever pointer it has, so every policy after the producer sees the allocation.
/// `Ok(None)` means "nothing produced a pointer", which is not an error by itself.
///
/// # Deallocation
///
/// Unlike allocation, deallocation is not first-wins, and every policy forwards every release to
/// `rest`. A policy that owns the pointer takes the storage back and forwards the request
/// [marked as released][DeallocRequest::into_released]; a policy that produces memory leaves
/// requests that are already marked alone. Observers record every release they see, so they see
/// allocations and releases in pairs wherever they sit in the chain.
///
/// # Capabilities
///
/// [`COMPARABLE`][Self::COMPARABLE] declares whether [`policy_eq()`][Self::policy_eq] carries
/// meaning. Chains compare only their comparable policies, treating the rest as always equal.
///
/// # Safety
///
/// Implementations must uphold the pointer contract that containers rely on: a pointer returned
/// from [`allocate()`][Self::allocate] must be valid for reads and writes of the request's
/// [`array_layout()`][AllocRequest::array_layout] and properly aligned for it, and it must stay
/// valid until it is passed to [`deallocate()`][Self::deallocate] of this policy, a clone of it
/// or a policy it compares equal to.
pub unsafe trait AllocPolicy: Clone {
    /// Whether instances of this policy can be told apart by [`policy_eq()`][Self::policy_eq].
    const COMPARABLE: bool = false;

    /// The propagation profile this policy demands.
    const PROPAGATION: Propagation = Propagation::NONE;

    /// Processes an allocation request, typically forwarding it to `rest`.
    ///
    /// # Errors
    ///
    /// Policies may fail the request outright, for example when a strict policy sees that no
    /// earlier policy produced a pointer.
    fn allocate<R: PolicyChain>(
        &mut self,
        request: &AllocRequest,
        existing: Option<NonNull<u8>>,
        rest: &mut R,
    ) -> Result<Option<NonNull<u8>>>;

    /// Processes a deallocation request, typically forwarding it to `rest`.
    ///
    /// # Safety
    ///
    /// The request must describe a pointer previously returned by `allocate()` on a chain equal to
    /// this one, with the same element layout and count, which has not been deallocated since.
    unsafe fn deallocate<R: PolicyChain>(&mut self, request: &DeallocRequest, rest: &mut R);

    /// Creates the equivalent policy for elements of layout `element`.
    ///
    /// Policies that do not depend on the element layout simply clone themselves.
    #[must_use]
    fn rebind(&self, element: Layout) -> Self {
        let _ = element;
        self.clone()
    }

    /// Whether memory obtained through `self` can be released through `other`.
    ///
    /// Only consulted when [`COMPARABLE`][Self::COMPARABLE] is true.
    fn policy_eq(&self, other: &Self) -> bool {
        let _ = other;
        true
    }

    /// Teardown hook, called once when the link holding this policy is dropped, while the rest of
    /// the chain is still alive.
    ///
    /// Policies that borrowed memory from the rest of the chain return it here.
    fn release<R: PolicyChain>(&mut self, rest: &mut R) {
        let _ = rest;
    }
}

/// An ordered chain of [`AllocPolicy`]s ending in a [`Terminal`][crate::Terminal].
///
/// Implemented by [`Link`][crate::Link] and [`Terminal`][crate::Terminal]; build chains with the
/// [`policy_chain!`][crate::policy_chain] macro.
///
/// # Safety
///
/// Same pointer contract as [`AllocPolicy`], applied to the chain as a whole.
pub unsafe trait PolicyChain: Clone {
    /// Field-wise OR of the propagation profiles of every policy in the chain.
    const PROPAGATION: Propagation;

    /// Runs an allocation request through the chain.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by any policy in the chain.
    fn allocate(
        &mut self,
        request: &AllocRequest,
        existing: Option<NonNull<u8>>,
    ) -> Result<Option<NonNull<u8>>>;

    /// Runs a deallocation request through the chain.
    ///
    /// # Safety
    ///
    /// The request must describe a pointer previously returned by `allocate()` on a chain equal to
    /// this one, with the same element layout and count, which has not been deallocated since.
    unsafe fn deallocate(&mut self, request: &DeallocRequest);

    /// Rebinds every policy in the chain to elements of layout `element`.
    #[must_use]
    fn rebind(&self, element: Layout) -> Self;

    /// Conjunction of [`AllocPolicy::policy_eq()`] over the comparable policies of the chain.
    fn chain_eq(&self, other: &Self) -> bool;
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn array_layout_multiplies_element() {
        let request = AllocRequest::new(Layout::new::<u32>(), 10);

        let layout = request.array_layout().unwrap();
        assert_eq!(layout.size(), 40);
        assert_eq!(layout.align(), 4);
        assert_eq!(request.size_bytes(), 40);
    }

    #[test]
    fn array_layout_overflow_is_reported() {
        let request = AllocRequest::new(Layout::new::<u64>(), usize::MAX);

        assert_eq!(
            request.array_layout(),
            Err(AllocError::CapacityOverflow {
                count: usize::MAX,
                element: Layout::new::<u64>(),
            })
        );
        assert_eq!(request.size_bytes(), usize::MAX);
    }

    #[test]
    fn zero_count_is_a_zero_sized_layout() {
        let request = AllocRequest::new(Layout::new::<u64>(), 0);

        assert_eq!(request.array_layout().unwrap().size(), 0);
    }

    #[test]
    fn hint_is_optional() {
        let mut target = 0_u8;
        let hint = NonNull::from(&mut target);

        let request = AllocRequest::new(Layout::new::<u8>(), 1);
        assert_eq!(request.hint(), None);
        assert_eq!(request.with_hint(hint).hint(), Some(hint));
    }

    #[test]
    fn dealloc_request_reports_bytes() {
        let mut target = [0_u16; 4];
        let ptr = NonNull::from(&mut target).cast::<u8>();

        let request = DeallocRequest::new(ptr, Layout::new::<u16>(), 4);
        assert_eq!(request.ptr(), ptr);
        assert_eq!(request.size_bytes(), 8);
        assert_eq!(request.array_layout().unwrap().size(), 8);
    }

    #[test]
    fn released_mark_keeps_the_rest_of_the_request() {
        let mut target = 0_u32;
        let ptr = NonNull::from(&mut target).cast::<u8>();

        let request = DeallocRequest::new(ptr, Layout::new::<u32>(), 1);
        assert!(!request.is_released());

        let released = request.into_released();
        assert!(released.is_released());
        assert_eq!(released.ptr(), ptr);
        assert_eq!(released.element(), Layout::new::<u32>());
        assert_eq!(released.count(), 1);
        assert_ne!(released, request);
    }

    #[test]
    fn propagation_union_is_field_wise_or() {
        let copy_only = Propagation::new(true, false, false);
        let swap_only = Propagation::new(false, false, true);

        let combined = copy_only.union(swap_only);
        assert!(combined.on_copy_assignment());
        assert!(!combined.on_move_assignment());
        assert!(combined.on_swap());

        assert_eq!(Propagation::NONE.union(Propagation::NONE), Propagation::NONE);
        assert_eq!(Propagation::NONE.union(Propagation::ALL), Propagation::ALL);
        assert_eq!(Propagation::default(), Propagation::NONE);
    }
}
