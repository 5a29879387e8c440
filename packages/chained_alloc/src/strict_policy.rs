use std::ptr::NonNull;

use crate::{AllocError, AllocPolicy, AllocRequest, DeallocRequest, PolicyChain, Result};

/// Turns "no policy so far produced a pointer" into [`AllocError::OutOfMemory`].
///
/// Place it after the policies that are expected to satisfy every request. Policies before it
/// report exhaustion by passing `None`, and this policy converts that into a hard failure instead
/// of letting the chain end without a pointer.
///
/// # Example
///
/// ```
/// use std::alloc::Layout;
///
/// use chained_alloc::{AllocError, AllocRequest, PolicyChain, StrictPolicy, policy_chain};
///
/// // Nothing in front of the strict policy can allocate.
/// let mut chain = policy_chain![StrictPolicy];
///
/// let result = chain.allocate(&AllocRequest::new(Layout::new::<u32>(), 2), None);
/// assert_eq!(result, Err(AllocError::OutOfMemory { bytes: 8 }));
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[expect(clippy::exhaustive_structs, reason = "intentionally an empty struct")]
pub struct StrictPolicy;

// SAFETY: This policy never produces a pointer of its own.
unsafe impl AllocPolicy for StrictPolicy {
    fn allocate<R: PolicyChain>(
        &mut self,
        request: &AllocRequest,
        existing: Option<NonNull<u8>>,
        rest: &mut R,
    ) -> Result<Option<NonNull<u8>>> {
        if existing.is_none() {
            return Err(AllocError::OutOfMemory {
                bytes: request.size_bytes(),
            });
        }

        rest.allocate(request, existing)
    }

    unsafe fn deallocate<R: PolicyChain>(&mut self, request: &DeallocRequest, rest: &mut R) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            rest.deallocate(request);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::alloc::Layout;

    use super::*;
    use crate::{HeapPolicy, Terminal, policy_chain};

    #[test]
    fn missing_pointer_becomes_error() {
        let mut policy = StrictPolicy;
        let request = AllocRequest::new(Layout::new::<u64>(), 4);

        let result = policy.allocate(&request, None, &mut Terminal);

        assert_eq!(result, Err(AllocError::OutOfMemory { bytes: 32 }));
    }

    #[test]
    fn existing_pointer_passes_through() {
        let mut policy = StrictPolicy;
        let request = AllocRequest::new(Layout::new::<u64>(), 1);
        let existing = NonNull::<u64>::dangling().cast::<u8>();

        let result = policy.allocate(&request, Some(existing), &mut Terminal);

        assert_eq!(result, Ok(Some(existing)));
    }

    #[test]
    fn satisfied_chain_is_not_affected() {
        let mut chain = policy_chain![HeapPolicy, StrictPolicy];
        let request = AllocRequest::new(Layout::new::<u64>(), 1);

        let ptr = chain.allocate(&request, None).unwrap().unwrap();

        // SAFETY: The pointer came from this chain with the same layout and count.
        unsafe {
            chain.deallocate(&DeallocRequest::new(ptr, Layout::new::<u64>(), 1));
        }
    }
}
