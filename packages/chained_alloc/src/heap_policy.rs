use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use crate::{AllocPolicy, AllocRequest, DeallocRequest, PolicyChain, Result};

/// Allocates from the system allocator whenever no earlier policy in the chain produced a pointer.
///
/// Allocation failure is not an error for this policy: it passes `None` on to the rest of the
/// chain, which may try something else or turn the missing pointer into an error (see
/// [`StrictPolicy`][crate::StrictPolicy]).
///
/// Requests that amount to zero bytes are served with a dangling, well-aligned pointer without
/// touching the system allocator, and releasing such a pointer is a no-op.
///
/// Every release that reaches this policy unclaimed is assumed to be its own. Place it after
/// the policies whose memory it does not own, or after ones that mark their releases (all the
/// policies in this crate do).
///
/// # Example
///
/// ```
/// use std::alloc::Layout;
///
/// use chained_alloc::{AllocRequest, DeallocRequest, HeapPolicy, PolicyChain, policy_chain};
///
/// let mut chain = policy_chain![HeapPolicy];
/// let request = AllocRequest::new(Layout::new::<u32>(), 16);
///
/// let ptr = chain.allocate(&request, None).unwrap().unwrap();
///
/// // SAFETY: The pointer came from this chain with the same layout and count.
/// unsafe { chain.deallocate(&DeallocRequest::new(ptr, Layout::new::<u32>(), 16)) };
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[expect(clippy::exhaustive_structs, reason = "intentionally an empty struct")]
pub struct HeapPolicy;

// SAFETY: Pointers come from the global allocator with the exact array layout of the request and
// are released with that same layout.
unsafe impl AllocPolicy for HeapPolicy {
    fn allocate<R: PolicyChain>(
        &mut self,
        request: &AllocRequest,
        existing: Option<NonNull<u8>>,
        rest: &mut R,
    ) -> Result<Option<NonNull<u8>>> {
        let ptr = match existing {
            Some(ptr) => Some(ptr),
            None => allocate_array(request.array_layout()?),
        };

        rest.allocate(request, ptr)
    }

    unsafe fn deallocate<R: PolicyChain>(&mut self, request: &DeallocRequest, rest: &mut R) {
        if request.is_released() {
            // SAFETY: Forwarding guarantees from the caller.
            unsafe {
                rest.deallocate(request);
            }
            return;
        }

        if let Ok(layout) = request.array_layout() {
            if layout.size() != 0 {
                // SAFETY: The caller guarantees the pointer came from `allocate()` with this same
                // array layout. No earlier policy claimed it, so for non-empty layouts it came
                // from the global allocator.
                unsafe {
                    alloc::dealloc(request.ptr().as_ptr(), layout);
                }
            }
        }

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            rest.deallocate(&request.into_released());
        }
    }
}

fn allocate_array(layout: Layout) -> Option<NonNull<u8>> {
    if layout.size() == 0 {
        // A dangling pointer at the alignment boundary is valid for zero-sized access.
        return NonNull::new(ptr::without_provenance_mut(layout.align()));
    }

    // SAFETY: The layout has a non-zero size.
    NonNull::new(unsafe { alloc::alloc(layout) })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{AllocError, BasicStatistic, StatisticPolicy, Terminal, policy_chain};

    #[test]
    fn allocates_aligned_memory() {
        let mut policy = HeapPolicy;
        let element = Layout::from_size_align(32, 32).unwrap();

        let ptr = policy
            .allocate(&AllocRequest::new(element, 3), None, &mut Terminal)
            .unwrap()
            .unwrap();
        assert_eq!(ptr.addr().get() % 32, 0);

        unsafe {
            ptr.as_ptr().write_bytes(0xAB, 96);
            policy.deallocate(&DeallocRequest::new(ptr, element, 3), &mut Terminal);
        }
    }

    #[test]
    fn existing_pointer_passes_through() {
        let mut policy = HeapPolicy;
        let existing = NonNull::<u64>::dangling().cast::<u8>();

        let result = policy
            .allocate(
                &AllocRequest::new(Layout::new::<u64>(), 1),
                Some(existing),
                &mut Terminal,
            )
            .unwrap();

        assert_eq!(result, Some(existing));
    }

    #[test]
    fn zero_bytes_yield_dangling_aligned_pointer() {
        let mut policy = HeapPolicy;
        let element = Layout::new::<u64>();

        let ptr = policy
            .allocate(&AllocRequest::new(element, 0), None, &mut Terminal)
            .unwrap()
            .unwrap();
        assert_eq!(ptr.addr().get(), align_of::<u64>());

        // Must not reach the system allocator.
        unsafe { policy.deallocate(&DeallocRequest::new(ptr, element, 0), &mut Terminal) };
    }

    #[test]
    fn released_requests_are_forwarded_untouched() {
        let stats = Rc::new(BasicStatistic::new());
        let mut chain = policy_chain![HeapPolicy, StatisticPolicy::new(Rc::clone(&stats))];

        // Not heap memory: freeing it here would be undefined behavior.
        let mut target = 0_u64;
        let ptr = NonNull::from(&mut target).cast::<u8>();
        let request = DeallocRequest::new(ptr, Layout::new::<u64>(), 1).into_released();

        unsafe { chain.deallocate(&request) };

        assert_eq!(stats.deallocs_count(), 1);
    }

    #[test]
    fn own_releases_are_marked_for_the_rest_of_the_chain() {
        let mut chain = policy_chain![HeapPolicy, HeapPolicy];
        let element = Layout::new::<u32>();

        let ptr = chain
            .allocate(&AllocRequest::new(element, 4), None)
            .unwrap()
            .unwrap();

        // The second heap policy must not free the same pointer again.
        unsafe { chain.deallocate(&DeallocRequest::new(ptr, element, 4)) };
    }

    #[test]
    fn overflowing_request_is_an_error() {
        let mut policy = HeapPolicy;
        let element = Layout::new::<u64>();

        let result = policy.allocate(&AllocRequest::new(element, usize::MAX), None, &mut Terminal);

        assert_eq!(
            result,
            Err(AllocError::CapacityOverflow {
                count: usize::MAX,
                element,
            })
        );
    }
}
