use std::alloc::{self, Layout};
use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::{
    AllocError, AllocPolicy, AllocRequest, DeallocRequest, PolicyChain, Propagation, Result,
};

/// Alignment of the buffer owned by a [`LinearStorage`].
const BUFFER_ALIGN: usize = 16;

/// A fixed-capacity buffer handed out front to back by bumping an offset.
///
/// Individual allocations are never released; the whole buffer is freed when the storage is
/// dropped.
#[derive(Debug)]
pub struct LinearStorage {
    buffer: NonNull<u8>,
    capacity: usize,
    used: Cell<usize>,
}

impl LinearStorage {
    /// Allocates a buffer of `capacity` bytes from the system allocator.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] if the system allocator cannot provide the buffer and
    /// [`AllocError::CapacityOverflow`] if `capacity` is too large to describe.
    pub fn new(capacity: usize) -> Result<Self> {
        let layout = Self::buffer_layout(capacity)?;

        let buffer = if capacity == 0 {
            NonNull::<u8>::dangling()
        } else {
            // SAFETY: The layout has a non-zero size.
            NonNull::new(unsafe { alloc::alloc(layout) })
                .ok_or(AllocError::OutOfMemory { bytes: capacity })?
        };

        Ok(Self {
            buffer,
            capacity,
            used: Cell::new(0),
        })
    }

    fn buffer_layout(capacity: usize) -> Result<Layout> {
        Layout::from_size_align(capacity, BUFFER_ALIGN).map_err(|_| AllocError::CapacityOverflow {
            count: capacity,
            element: Layout::new::<u8>(),
        })
    }

    /// Total size of the buffer in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes handed out so far, including alignment padding.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used.get()
    }

    /// Number of bytes not handed out yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    /// Whether `ptr` points into the buffer.
    #[must_use]
    pub fn is_owned(&self, ptr: NonNull<u8>) -> bool {
        let start = self.buffer.addr().get();
        let addr = ptr.addr().get();

        // Cannot overflow because the buffer exists in memory.
        start <= addr && addr < start.wrapping_add(self.capacity)
    }

    /// Hands out the next `layout.size()` bytes aligned to `layout.align()`, or `None` if the rest
    /// of the buffer is too small.
    #[must_use]
    pub fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let start = self.buffer.addr().get();
        let cursor = start.checked_add(self.used())?;

        let padding = cursor.wrapping_neg() & (layout.align().wrapping_sub(1));
        let offset = self.used().checked_add(padding)?;
        let end = offset.checked_add(layout.size())?;

        if end > self.capacity {
            return None;
        }

        self.used.set(end);

        // SAFETY: offset <= end <= capacity, so we stay within (or one past the end of) the buffer.
        Some(unsafe { self.buffer.byte_add(offset) })
    }
}

impl Drop for LinearStorage {
    fn drop(&mut self) {
        if self.capacity == 0 {
            return;
        }

        // The layout was valid when the buffer was allocated, so it still is.
        if let Ok(layout) = Self::buffer_layout(self.capacity) {
            // SAFETY: The buffer was allocated with this layout in `new()` and is released once.
            unsafe {
                alloc::dealloc(self.buffer.as_ptr(), layout);
            }
        }
    }
}

/// Serves every request that fits from a shared [`LinearStorage`] by bumping an offset.
///
/// Releasing memory that came from the storage is a no-op; the storage is reclaimed as a whole
/// when the last policy sharing it is dropped. Such releases are still forwarded, marked as
/// released, so observers later in the chain see them. Releases of other pointers are forwarded
/// as they are, so a fallback placed after this policy can serve what does not fit.
///
/// Policies compare equal if they share the same storage. Containers are expected to carry the
/// allocator along on copy, move and swap.
///
/// # Example
///
/// ```
/// use chained_alloc::{Allocator, HeapPolicy, LinearPolicy, policy_chain};
///
/// let linear = LinearPolicy::with_capacity(1024).unwrap();
/// let mut allocator = Allocator::<u64, _>::new(policy_chain![linear, HeapPolicy]);
///
/// let ptr = allocator.allocate(16).unwrap();
/// assert_eq!(allocator.chain().policy().storage().used(), 128);
///
/// // SAFETY: The pointer came from this allocator and is released once.
/// unsafe { allocator.deallocate(ptr, 16) };
/// ```
#[derive(Clone, Debug)]
pub struct LinearPolicy {
    storage: Rc<LinearStorage>,
}

impl LinearPolicy {
    /// Creates a policy over an existing, possibly shared, storage.
    #[must_use]
    pub fn new(storage: Rc<LinearStorage>) -> Self {
        Self { storage }
    }

    /// Creates a policy over a fresh storage of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage buffer cannot be allocated.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self::new(Rc::new(LinearStorage::new(capacity)?)))
    }

    /// The storage this policy allocates from.
    #[must_use]
    pub fn storage(&self) -> &Rc<LinearStorage> {
        &self.storage
    }

    /// Switches this policy to another storage.
    ///
    /// Memory obtained from the previous storage stays valid for as long as some other policy
    /// keeps that storage alive.
    pub fn set_storage(&mut self, storage: Rc<LinearStorage>) {
        self.storage = storage;
    }
}

// SAFETY: Pointers are handed out from disjoint, aligned ranges of a buffer that stays alive for
// as long as any policy sharing it exists.
unsafe impl AllocPolicy for LinearPolicy {
    const COMPARABLE: bool = true;
    const PROPAGATION: Propagation = Propagation::ALL;

    fn allocate<R: PolicyChain>(
        &mut self,
        request: &AllocRequest,
        existing: Option<NonNull<u8>>,
        rest: &mut R,
    ) -> Result<Option<NonNull<u8>>> {
        let ptr = match existing {
            Some(ptr) => Some(ptr),
            None => self.storage.allocate(request.array_layout()?),
        };

        rest.allocate(request, ptr)
    }

    unsafe fn deallocate<R: PolicyChain>(&mut self, request: &DeallocRequest, rest: &mut R) {
        // Owned storage is reclaimed with the whole buffer, so there is nothing to take back.
        let request = if !request.is_released() && self.storage.is_owned(request.ptr()) {
            request.into_released()
        } else {
            *request
        };

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            rest.deallocate(&request);
        }
    }

    fn policy_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.storage, &other.storage)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::{BasicStatistic, HeapPolicy, StatisticPolicy, Terminal, policy_chain};

    assert_not_impl_any!(LinearStorage: Send, Sync);
    assert_not_impl_any!(LinearPolicy: Send, Sync);

    #[test]
    fn bumps_with_alignment() {
        let storage = LinearStorage::new(64).unwrap();

        let a = storage.allocate(Layout::new::<u8>()).unwrap();
        let b = storage.allocate(Layout::new::<u64>()).unwrap();

        assert_eq!(b.addr().get() % 8, 0);
        assert_eq!(b.addr().get() - a.addr().get(), 8);
        assert_eq!(storage.used(), 16);
        assert_eq!(storage.remaining(), 48);
    }

    #[test]
    fn refuses_what_does_not_fit() {
        let storage = LinearStorage::new(16).unwrap();

        assert!(storage.allocate(Layout::new::<[u8; 12]>()).is_some());
        assert!(storage.allocate(Layout::new::<[u8; 8]>()).is_none());
        assert!(storage.allocate(Layout::new::<[u8; 4]>()).is_some());
        assert_eq!(storage.remaining(), 0);
    }

    #[test]
    fn empty_storage_owns_nothing() {
        let storage = LinearStorage::new(0).unwrap();

        assert!(storage.allocate(Layout::new::<u8>()).is_none());
        assert!(!storage.is_owned(NonNull::<u8>::dangling()));
    }

    #[test]
    fn overflow_falls_through_to_rest() {
        let mut chain = policy_chain![LinearPolicy::with_capacity(8).unwrap(), HeapPolicy];
        let element = Layout::new::<u64>();

        let inside = chain
            .allocate(&AllocRequest::new(element, 1), None)
            .unwrap()
            .unwrap();
        let outside = chain
            .allocate(&AllocRequest::new(element, 1), None)
            .unwrap()
            .unwrap();

        assert!(chain.policy().storage().is_owned(inside));
        assert!(!chain.policy().storage().is_owned(outside));

        unsafe {
            chain.deallocate(&DeallocRequest::new(inside, element, 1));
            chain.deallocate(&DeallocRequest::new(outside, element, 1));
        }
    }

    #[test]
    fn observers_see_owned_and_fallback_traffic_in_pairs() {
        let stats = Rc::new(BasicStatistic::new());
        let mut chain = policy_chain![
            LinearPolicy::with_capacity(8).unwrap(),
            HeapPolicy,
            StatisticPolicy::new(Rc::clone(&stats)),
        ];
        let element = Layout::new::<u64>();

        let inside = chain
            .allocate(&AllocRequest::new(element, 1), None)
            .unwrap()
            .unwrap();
        let outside = chain
            .allocate(&AllocRequest::new(element, 1), None)
            .unwrap()
            .unwrap();

        assert_eq!(stats.allocs_count(), 2);

        // The heap policy must leave the buffer pointer alone.
        unsafe {
            chain.deallocate(&DeallocRequest::new(inside, element, 1));
            chain.deallocate(&DeallocRequest::new(outside, element, 1));
        }

        assert_eq!(stats.deallocs_count(), 2);
        assert_eq!(stats.allocated_blocks_count(), 0);
        assert_eq!(stats.mem_used(), 0);
    }

    #[test]
    fn owned_release_is_a_no_op() {
        let mut policy = LinearPolicy::with_capacity(32).unwrap();
        let element = Layout::new::<u32>();

        let ptr = policy
            .allocate(&AllocRequest::new(element, 2), None, &mut Terminal)
            .unwrap()
            .unwrap();
        unsafe { policy.deallocate(&DeallocRequest::new(ptr, element, 2), &mut Terminal) };

        assert_eq!(policy.storage().used(), 8);
    }

    #[test]
    fn equality_follows_storage() {
        let storage = Rc::new(LinearStorage::new(16).unwrap());
        let a = LinearPolicy::new(Rc::clone(&storage));
        let b = LinearPolicy::new(storage);
        let mut c = LinearPolicy::with_capacity(16).unwrap();

        assert!(a.policy_eq(&b));
        assert!(!a.policy_eq(&c));

        c.set_storage(Rc::clone(a.storage()));
        assert!(a.policy_eq(&c));
    }

    #[test]
    fn propagates_everywhere() {
        assert_eq!(LinearPolicy::PROPAGATION, Propagation::ALL);
    }
}
