//! Tests for chains that fall back from one policy to the next.

use std::rc::Rc;

use chained_alloc::{
    AllocError, Allocator, BasicStatistic, HeapPolicy, LinearPolicy, LinearStorage, PoolPolicy,
    StatisticPolicy, StrictPolicy, policy_chain,
};

#[test]
fn linear_buffer_overflows_into_heap() {
    let stats = Rc::new(BasicStatistic::new());
    let linear = LinearPolicy::with_capacity(64).unwrap();
    let storage = Rc::clone(linear.storage());

    let mut allocator = Allocator::<u64, _>::new(policy_chain![
        linear,
        HeapPolicy,
        StatisticPolicy::new(Rc::clone(&stats)),
    ]);

    let in_buffer = allocator.allocate(6).unwrap();
    let on_heap = allocator.allocate(4).unwrap();

    assert!(storage.is_owned(in_buffer.cast()));
    assert!(!storage.is_owned(on_heap.cast()));
    assert_eq!(storage.used(), 48);

    // Both allocations passed the observer, whichever policy served them.
    assert_eq!(stats.allocs_count(), 2);
    assert_eq!(stats.mem_used(), 80);

    // SAFETY: Both pointers came from this allocator and are released once.
    unsafe {
        allocator.deallocate(in_buffer, 6);
        allocator.deallocate(on_heap, 4);
    }

    // The heap left the buffer pointer alone; the observer still saw both releases.
    assert_eq!(stats.deallocs_count(), 2);
    assert_eq!(stats.mem_used(), 0);
    assert_eq!(storage.used(), 48);
}

#[test]
fn heap_in_front_of_pool_keeps_observer_balanced() {
    let stats = Rc::new(BasicStatistic::new());
    let mut allocator = Allocator::<u64, _>::new(policy_chain![
        HeapPolicy,
        PoolPolicy::new(),
        StatisticPolicy::new(Rc::clone(&stats)),
    ]);

    let ptrs: Vec<_> = (0..10).map(|_| allocator.allocate(1).unwrap()).collect();

    // The heap serves everything, so the pool never grows.
    assert_eq!(allocator.chain().rest().policy().capacity(), 0);
    assert_eq!(stats.allocs_count(), 10);

    for ptr in ptrs {
        // SAFETY: Every pointer came from this allocator and is released once.
        unsafe { allocator.deallocate(ptr, 1) };
    }

    assert_eq!(stats.deallocs_count(), 10);
    assert_eq!(stats.allocated_blocks_count(), 0);
}

#[test]
fn allocators_sharing_storage_compare_equal() {
    let storage = Rc::new(LinearStorage::new(128).unwrap());

    let a = Allocator::<u32, _>::new(policy_chain![LinearPolicy::new(Rc::clone(&storage))]);
    let b = Allocator::<u16, _>::new(policy_chain![LinearPolicy::new(Rc::clone(&storage))]);
    let c = Allocator::<u32, _>::new(policy_chain![LinearPolicy::with_capacity(128).unwrap()]);

    assert!(a == b);
    assert!(a != c);
    assert!(a.propagation().on_swap());
}

#[test]
fn strict_chain_reports_exhaustion() {
    let mut allocator = Allocator::<u64, _>::new(policy_chain![
        LinearPolicy::with_capacity(16).unwrap(),
        StrictPolicy,
    ]);

    let fits = allocator.allocate(2);
    assert!(fits.is_ok());

    assert_eq!(
        allocator.allocate(1),
        Err(AllocError::OutOfMemory { bytes: 8 })
    );
}

#[test]
fn chain_without_source_is_unsatisfied() {
    let mut allocator = Allocator::<u64, _>::new(policy_chain![PoolPolicy::new()]);

    assert!(matches!(
        allocator.allocate(1),
        Err(AllocError::Unsatisfied { count: 1, .. })
    ));
}

#[test]
fn oversized_request_fails_before_reaching_policies() {
    let stats = Rc::new(BasicStatistic::new());
    let mut allocator = Allocator::<u64, _>::new(policy_chain![
        HeapPolicy,
        StatisticPolicy::new(Rc::clone(&stats)),
    ]);

    assert!(matches!(
        allocator.allocate(usize::MAX),
        Err(AllocError::CapacityOverflow { .. })
    ));
    assert_eq!(stats.allocs_count(), 0);
}

#[test]
fn pool_with_wide_slot_index_serves_large_batches() {
    let policy = PoolPolicy::builder().slot_index::<u16>().build();
    let mut allocator = Allocator::<u32, _>::new(policy_chain![policy, HeapPolicy]);

    let ptrs: Vec<_> = (0..1000).map(|_| allocator.allocate(1).unwrap()).collect();

    // One default-sized block holds a full u16 chunk.
    assert_eq!(allocator.chain().policy().capacity(), 65535);

    for ptr in ptrs {
        // SAFETY: Every pointer came from this allocator and is released once.
        unsafe { allocator.deallocate(ptr, 1) };
    }
}
