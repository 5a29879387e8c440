//! End-to-end scenarios for pool-backed allocators.
//!
//! These tests drive complete policy chains through the public [`Allocator`] surface and verify
//! slot reuse, cross-type routing of releases and the return of pool memory at teardown.

use std::alloc::Layout;
use std::collections::HashSet;
use std::ptr::NonNull;
use std::rc::Rc;

use chained_alloc::{
    Allocator, BasicStatistic, HeapPolicy, Link, PoolPolicy, StatisticPolicy, Terminal,
    policy_chain,
};

type ObservedPool = Link<PoolPolicy, Link<HeapPolicy, Link<StatisticPolicy, Terminal>>>;

/// Pool first, heap as the block source, statistics observing everything behind them.
fn observed_pool<T>(stats: &Rc<BasicStatistic>) -> Allocator<T, ObservedPool> {
    Allocator::new(policy_chain![
        PoolPolicy::new(),
        HeapPolicy,
        StatisticPolicy::new(Rc::clone(stats)),
    ])
}

fn pool_layouts<T>(allocator: &Allocator<T, ObservedPool>) -> Vec<Layout> {
    allocator
        .chain()
        .policy()
        .with_pools_manager(|manager| manager.iter().map(|pool| pool.object_layout()).collect())
}

#[test]
fn three_hundred_ints_span_blocks_and_reuse_slots() {
    let stats = Rc::new(BasicStatistic::new());
    let mut ints = observed_pool::<i32>(&stats);

    let ptrs: Vec<NonNull<i32>> = (0..300).map(|_| ints.allocate(1).unwrap()).collect();

    let distinct: HashSet<_> = ptrs.iter().copied().collect();
    assert_eq!(distinct.len(), 300);

    // The first block held one chunk of 255 slots; the 256th allocation grew the pool.
    assert_eq!(ints.chain().policy().capacity(), 510);

    // The observer sees every element and both blocks.
    assert_eq!(stats.allocs_count(), 302);

    for ptr in ptrs.iter().rev() {
        // SAFETY: Every pointer came from this allocator and is released once.
        unsafe { ints.deallocate(*ptr, 1) };
    }

    // Only the two blocks are still held.
    assert_eq!(stats.deallocs_count(), 300);
    assert_eq!(stats.allocated_blocks_count(), 2);

    let reused = ints.allocate(1).unwrap();
    assert!(distinct.contains(&reused));
    assert_eq!(ints.chain().policy().capacity(), 510);

    // SAFETY: The pointer came from this allocator and is released once.
    unsafe { ints.deallocate(reused, 1) };
}

#[test]
fn rebound_copy_is_equal_and_routes_foreign_releases_home() {
    let stats = Rc::new(BasicStatistic::new());
    let mut ints = observed_pool::<i32>(&stats);
    let mut bytes = ints.clone().rebind::<u8>();

    assert!(ints == bytes);

    let int_ptr = ints.allocate(1).unwrap();
    let byte_ptr = bytes.allocate(1).unwrap();

    let mut layouts = pool_layouts(&ints);
    layouts.sort_by_key(|layout| layout.size());
    assert_eq!(layouts, vec![Layout::new::<u8>(), Layout::new::<i32>()]);
    assert!(!ints.chain().policy().with_pools_manager(|manager| {
        manager
            .pool(Layout::new::<u8>())
            .unwrap()
            .is_owned(int_ptr.cast())
    }));

    // Release an int-sized pointer through the byte allocator.
    // SAFETY: The pointer is a single pooled element from an equal allocator, released once.
    unsafe { bytes.deallocate(int_ptr.cast(), 1) };

    // It went back to the int pool: the slot is handed out again and both blocks stay live.
    assert_eq!(stats.deallocs_count(), 1);
    assert_eq!(stats.allocated_blocks_count(), 3);
    assert_eq!(ints.allocate(1).unwrap(), int_ptr);

    // SAFETY: Both pointers came from their allocators and are released once.
    unsafe {
        ints.deallocate(int_ptr, 1);
        bytes.deallocate(byte_ptr, 1);
    }
}

#[test]
fn dropping_last_user_returns_every_block_once() {
    let stats = Rc::new(BasicStatistic::new());
    let mut ints = observed_pool::<i32>(&stats);
    let witness = ints.rebind::<u64>();

    let ptrs: Vec<_> = (0..600).map(|_| ints.allocate(1).unwrap()).collect();
    for ptr in ptrs {
        // SAFETY: Every pointer came from this allocator and is released once.
        unsafe { ints.deallocate(ptr, 1) };
    }

    assert_eq!(stats.allocated_blocks_count(), 3);

    let copy = ints.clone();
    drop(ints);

    // A copy still uses the int pool, so nothing was returned yet.
    assert_eq!(stats.allocated_blocks_count(), 3);

    drop(copy);

    // 600 elements and 3 blocks, each released exactly once.
    assert_eq!(stats.allocs_count(), 603);
    assert_eq!(stats.deallocs_count(), 603);
    assert_eq!(stats.allocated_blocks_count(), 0);
    assert_eq!(stats.mem_used(), 0);

    // The int pool is gone from the shared manager; the u64 pool is still there.
    assert_eq!(pool_layouts(&witness), vec![Layout::new::<u64>()]);
}

#[test]
fn pool_reference_counts_follow_policy_instances() {
    let stats = Rc::new(BasicStatistic::new());
    let ints = observed_pool::<i32>(&stats);
    let ref_count = |allocator: &Allocator<i32, ObservedPool>| {
        allocator
            .chain()
            .policy()
            .with_pools_manager(|manager| manager.pool_ref_count(Layout::new::<i32>()))
    };

    let copies: Vec<_> = (0..4).map(|_| ints.clone()).collect();
    assert_eq!(ref_count(&ints), 5);

    // Rebinding to a type with the same layout shares the pool as well.
    let same_layout = ints.rebind::<u32>();
    assert_eq!(ref_count(&ints), 6);

    drop(copies);
    drop(same_layout);
    assert_eq!(ref_count(&ints), 1);
}

#[test]
fn zero_sized_and_array_requests_bypass_the_pool() {
    let stats = Rc::new(BasicStatistic::new());
    let mut units = observed_pool::<()>(&stats);
    let mut ints = units.rebind::<i32>();

    let unit = units.allocate(1).unwrap();
    let array = ints.allocate(64).unwrap();

    assert_eq!(units.chain().policy().element_layout(), None);
    assert_eq!(ints.chain().policy().capacity(), 0);
    assert_eq!(stats.allocs_count(), 2);
    assert_eq!(stats.mem_used(), 256);

    // SAFETY: Both pointers came from their allocators and are released once.
    unsafe {
        units.deallocate(unit, 1);
        ints.deallocate(array, 64);
    }

    assert_eq!(stats.allocated_blocks_count(), 0);
}
