//! Compares single-element allocation through a pool chain against going straight to the heap.
//!
//! Each iteration allocates a batch of elements and releases them again. The pool reuses the
//! slots of its first block, so after warmup it should not touch the system allocator at all.

#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::ptr::NonNull;

use alloc_tracker::Session;
use chained_alloc::{
    Allocator, HeapPolicy, LoggingPolicy, PolicyChain, PoolPolicy, policy_chain,
};
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: alloc_tracker::Allocator<std::alloc::System> =
    alloc_tracker::Allocator::system();

const BATCH_SIZE: usize = 200;

type Payload = [u64; 4];

/// Allocates `BATCH_SIZE` single elements and releases them in reverse order.
fn churn<C: PolicyChain>(
    allocator: &mut Allocator<Payload, C>,
    ptrs: &mut Vec<NonNull<Payload>>,
) {
    for _ in 0..BATCH_SIZE {
        ptrs.push(black_box(allocator.allocate(1).unwrap()));
    }

    while let Some(ptr) = ptrs.pop() {
        // SAFETY: Every pointer came from this allocator and is released once.
        unsafe { allocator.deallocate(ptr, 1) };
    }
}

fn entrypoint(c: &mut Criterion) {
    let allocs = Session::new();

    let mut group = c.benchmark_group("single_element_churn");

    let heap_op = allocs.operation("heap");
    group.bench_function("heap", |b| {
        let mut allocator = Allocator::<Payload, _>::new(policy_chain![HeapPolicy]);
        let mut ptrs = Vec::with_capacity(BATCH_SIZE);

        b.iter(|| {
            let _span = heap_op.measure_process();
            churn(&mut allocator, &mut ptrs);
        });
    });

    let pool_op = allocs.operation("pool");
    group.bench_function("pool", |b| {
        let mut allocator =
            Allocator::<Payload, _>::new(policy_chain![PoolPolicy::new(), HeapPolicy]);
        let mut ptrs = Vec::with_capacity(BATCH_SIZE);

        b.iter(|| {
            let _span = pool_op.measure_process();
            churn(&mut allocator, &mut ptrs);
        });
    });

    // No subscriber is installed, so this measures the cost of a disabled event callsite.
    let logged_pool_op = allocs.operation("pool_logged");
    group.bench_function("pool_logged", |b| {
        let mut allocator = Allocator::<Payload, _>::new(policy_chain![
            PoolPolicy::new(),
            LoggingPolicy::new(),
            HeapPolicy,
        ]);
        let mut ptrs = Vec::with_capacity(BATCH_SIZE);

        b.iter(|| {
            let _span = logged_pool_op.measure_process();
            churn(&mut allocator, &mut ptrs);
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
