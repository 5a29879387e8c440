use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::{
    AllocObserver, AllocPolicy, AllocRequest, BasicStatistic, DeallocRequest, PolicyChain, Result,
};

/// Reports the traffic passing through its position in the chain to a shared [`AllocObserver`].
///
/// The policy never allocates or frees anything itself. It sees every allocation produced before
/// its position in the chain and every release, so allocations and releases always come in pairs.
/// Placed behind a [`PoolPolicy`][crate::PoolPolicy], it also observes the blocks the pool
/// acquires and returns, in addition to the individual elements.
///
/// Every clone and rebound copy reports to the same observer. Without an observer, the policy
/// only forwards.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
///
/// use chained_alloc::{Allocator, BasicStatistic, HeapPolicy, StatisticPolicy, policy_chain};
///
/// let stats = Rc::new(BasicStatistic::new());
/// let chain = policy_chain![HeapPolicy, StatisticPolicy::new(Rc::clone(&stats))];
/// let mut allocator = Allocator::<u32, _>::new(chain);
///
/// let ptr = allocator.allocate(4).unwrap();
/// assert_eq!(stats.mem_used(), 16);
///
/// // SAFETY: The pointer came from this allocator and is released once.
/// unsafe { allocator.deallocate(ptr, 4) };
/// assert_eq!(stats.allocated_blocks_count(), 0);
/// ```
pub struct StatisticPolicy<S: AllocObserver = BasicStatistic> {
    observer: Option<Rc<S>>,
}

impl<S: AllocObserver> StatisticPolicy<S> {
    /// Creates a policy that reports to `observer`.
    #[must_use]
    pub fn new(observer: Rc<S>) -> Self {
        Self {
            observer: Some(observer),
        }
    }

    /// Creates a policy without an observer.
    #[must_use]
    pub fn detached() -> Self {
        Self { observer: None }
    }

    /// The observer this policy reports to, if any.
    #[must_use]
    pub fn observer(&self) -> Option<&Rc<S>> {
        self.observer.as_ref()
    }

    /// Replaces the observer this policy reports to.
    ///
    /// Other clones of the policy keep reporting to their own observer.
    pub fn set_observer(&mut self, observer: Option<Rc<S>>) {
        self.observer = observer;
    }
}

impl<S: AllocObserver> Clone for StatisticPolicy<S> {
    fn clone(&self) -> Self {
        Self {
            observer: self.observer.as_ref().map(Rc::clone),
        }
    }
}

impl<S: AllocObserver> Default for StatisticPolicy<S> {
    fn default() -> Self {
        Self::detached()
    }
}

impl<S: AllocObserver> fmt::Debug for StatisticPolicy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatisticPolicy")
            .field("observer", &self.observer.as_ref().map(Rc::as_ptr))
            .finish()
    }
}

// SAFETY: This policy never produces a pointer of its own.
unsafe impl<S: AllocObserver> AllocPolicy for StatisticPolicy<S> {
    fn allocate<R: PolicyChain>(
        &mut self,
        request: &AllocRequest,
        existing: Option<NonNull<u8>>,
        rest: &mut R,
    ) -> Result<Option<NonNull<u8>>> {
        if let (Some(observer), Some(ptr)) = (&self.observer, existing) {
            observer.register_alloc(ptr, request.size_bytes());
        }

        rest.allocate(request, existing)
    }

    unsafe fn deallocate<R: PolicyChain>(&mut self, request: &DeallocRequest, rest: &mut R) {
        if let Some(observer) = &self.observer {
            observer.register_dealloc(request.ptr(), request.size_bytes());
        }

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            rest.deallocate(request);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::alloc::Layout;

    use super::*;
    use crate::{HeapPolicy, MockAllocObserver, Terminal, policy_chain};

    #[test]
    fn reports_allocation_with_byte_size() {
        let ptr = NonNull::<u64>::dangling().cast::<u8>();

        // Expectations must be `Send`, which pointers are not, so we match on the address.
        let addr = ptr.addr();

        let mut observer = MockAllocObserver::new();
        observer
            .expect_register_alloc()
            .withf(move |ptr, bytes| ptr.addr() == addr && *bytes == 24)
            .times(1)
            .return_const(());
        observer.expect_register_dealloc().never();

        let mut policy = StatisticPolicy::new(Rc::new(observer));
        let request = AllocRequest::new(Layout::new::<u64>(), 3);

        let result = policy.allocate(&request, Some(ptr), &mut Terminal).unwrap();
        assert_eq!(result, Some(ptr));
    }

    #[test]
    fn missing_pointer_is_not_reported() {
        let mut observer = MockAllocObserver::new();
        observer.expect_register_alloc().never();

        let mut policy = StatisticPolicy::new(Rc::new(observer));
        let request = AllocRequest::new(Layout::new::<u64>(), 1);

        assert_eq!(policy.allocate(&request, None, &mut Terminal).unwrap(), None);
    }

    #[test]
    fn reports_deallocation_and_forwards() {
        let element = Layout::new::<u16>();

        let mut observer = MockAllocObserver::new();
        observer.expect_register_alloc().times(1).return_const(());
        observer
            .expect_register_dealloc()
            .withf(|_, bytes| *bytes == 10)
            .times(1)
            .return_const(());

        // The heap policy in front produces the pointer and frees it before the release reaches us.
        let mut chain = policy_chain![HeapPolicy, StatisticPolicy::new(Rc::new(observer))];

        let ptr = chain
            .allocate(&AllocRequest::new(element, 5), None)
            .unwrap()
            .unwrap();
        unsafe { chain.deallocate(&DeallocRequest::new(ptr, element, 5)) };
    }

    #[test]
    fn clones_share_observer() {
        let stats = Rc::new(BasicStatistic::new());
        let policy = StatisticPolicy::new(Rc::clone(&stats));
        let mut copy = policy.clone();
        let ptr = NonNull::<u32>::dangling().cast::<u8>();

        copy.allocate(
            &AllocRequest::new(Layout::new::<u32>(), 1),
            Some(ptr),
            &mut Terminal,
        )
        .unwrap();

        assert_eq!(policy.observer().unwrap().allocs_count(), 1);
        assert_eq!(stats.mem_used(), 4);
    }

    #[test]
    fn detached_policy_only_forwards() {
        let mut policy = StatisticPolicy::<BasicStatistic>::detached();
        let ptr = NonNull::<u32>::dangling().cast::<u8>();

        let result = policy
            .allocate(
                &AllocRequest::new(Layout::new::<u32>(), 1),
                Some(ptr),
                &mut Terminal,
            )
            .unwrap();

        assert_eq!(result, Some(ptr));
        assert!(policy.observer().is_none());
    }
}
