use std::cell::Cell;
use std::ptr::NonNull;

/// A passive observer of the allocations flowing through a
/// [`StatisticPolicy`][crate::StatisticPolicy].
///
/// Observers are shared between all clones of a policy, so registration takes `&self`.
#[cfg_attr(test, mockall::automock)]
pub trait AllocObserver {
    /// Called after a request of `bytes` bytes was satisfied with `ptr`.
    fn register_alloc(&self, ptr: NonNull<u8>, bytes: usize);

    /// Called when `bytes` bytes at `ptr` are released.
    fn register_dealloc(&self, ptr: NonNull<u8>, bytes: usize);
}

/// Counts allocations and deallocations, and tracks the number of bytes outstanding.
///
/// # Example
///
/// ```
/// use std::ptr::NonNull;
///
/// use chained_alloc::{AllocObserver, BasicStatistic};
///
/// let stats = BasicStatistic::new();
/// let ptr = NonNull::<u64>::dangling().cast::<u8>();
///
/// stats.register_alloc(ptr, 64);
/// stats.register_alloc(ptr, 16);
/// stats.register_dealloc(ptr, 64);
///
/// assert_eq!(stats.allocs_count(), 2);
/// assert_eq!(stats.deallocs_count(), 1);
/// assert_eq!(stats.allocated_blocks_count(), 1);
/// assert_eq!(stats.mem_used(), 16);
/// ```
#[derive(Debug, Default)]
pub struct BasicStatistic {
    allocs_count: Cell<usize>,
    deallocs_count: Cell<usize>,
    mem_used: Cell<usize>,
}

impl BasicStatistic {
    /// Creates a statistic with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocations registered so far.
    #[must_use]
    pub fn allocs_count(&self) -> usize {
        self.allocs_count.get()
    }

    /// Number of deallocations registered so far.
    #[must_use]
    pub fn deallocs_count(&self) -> usize {
        self.deallocs_count.get()
    }

    /// Number of allocations that have not been released yet.
    #[must_use]
    pub fn allocated_blocks_count(&self) -> usize {
        self.allocs_count().saturating_sub(self.deallocs_count())
    }

    /// Number of bytes allocated and not released yet.
    #[must_use]
    pub fn mem_used(&self) -> usize {
        self.mem_used.get()
    }
}

impl AllocObserver for BasicStatistic {
    fn register_alloc(&self, _ptr: NonNull<u8>, bytes: usize) {
        // Cannot overflow because every counted allocation is a distinct live request.
        self.allocs_count.set(self.allocs_count.get().wrapping_add(1));
        self.mem_used.set(self.mem_used.get().saturating_add(bytes));
    }

    fn register_dealloc(&self, _ptr: NonNull<u8>, bytes: usize) {
        self.deallocs_count
            .set(self.deallocs_count.get().wrapping_add(1));
        self.mem_used.set(self.mem_used.get().saturating_sub(bytes));
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(BasicStatistic: Sync);

    #[test]
    fn starts_at_zero() {
        let stats = BasicStatistic::new();

        assert_eq!(stats.allocs_count(), 0);
        assert_eq!(stats.deallocs_count(), 0);
        assert_eq!(stats.allocated_blocks_count(), 0);
        assert_eq!(stats.mem_used(), 0);
    }

    #[test]
    fn balanced_traffic_returns_to_zero() {
        let stats = BasicStatistic::new();
        let ptr = NonNull::<u32>::dangling().cast::<u8>();

        for bytes in [4, 8, 12] {
            stats.register_alloc(ptr, bytes);
        }
        assert_eq!(stats.mem_used(), 24);
        assert_eq!(stats.allocated_blocks_count(), 3);

        for bytes in [12, 4, 8] {
            stats.register_dealloc(ptr, bytes);
        }
        assert_eq!(stats.allocs_count(), 3);
        assert_eq!(stats.deallocs_count(), 3);
        assert_eq!(stats.allocated_blocks_count(), 0);
        assert_eq!(stats.mem_used(), 0);
    }
}
