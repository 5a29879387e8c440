//! Builds a node-based container on a pool chain and reports what reached the heap.
//!
//! Events are printed at debug level, so block growth and pool teardown show up in the output.

use std::ptr::NonNull;
use std::rc::Rc;

use chained_alloc::{
    Allocator, BasicStatistic, HeapPolicy, Link, LoggingPolicy, PoolPolicy, StatisticPolicy,
    Terminal, policy_chain,
};
use tracing::Level;

type Chain =
    Link<PoolPolicy, Link<LoggingPolicy, Link<HeapPolicy, Link<StatisticPolicy, Terminal>>>>;

struct Node {
    value: u64,
    next: Option<NonNull<Node>>,
}

/// A minimal singly linked stack that gets every node from an allocator.
struct Stack {
    head: Option<NonNull<Node>>,
    nodes: Allocator<Node, Chain>,
}

impl Stack {
    fn new(nodes: Allocator<Node, Chain>) -> Self {
        Self { head: None, nodes }
    }

    fn push(&mut self, value: u64) {
        let node = self.nodes.allocate(1).expect("the heap fallback never gives up");

        // SAFETY: The storage is fresh and sized for one node.
        unsafe {
            self.nodes.construct(
                node,
                Node {
                    value,
                    next: self.head,
                },
            );
        }

        self.head = Some(node);
    }

    fn pop(&mut self) -> Option<u64> {
        let node = self.head?;

        // SAFETY: Every node on the stack was constructed by `push()` and is popped once.
        let Node { value, next } = unsafe { node.read() };
        self.head = next;

        // SAFETY: The node came from this allocator and its value was moved out above.
        unsafe { self.nodes.deallocate(node, 1) };

        Some(value)
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let stats = Rc::new(BasicStatistic::new());

    let chain = policy_chain![
        PoolPolicy::new(),
        LoggingPolicy::builder().level(Level::INFO).build(),
        HeapPolicy,
        StatisticPolicy::new(Rc::clone(&stats)),
    ];

    let mut stack = Stack::new(Allocator::new(chain));

    for value in 0..600 {
        stack.push(value);
    }

    let mut sum = 0_u64;
    while let Some(value) = stack.pop() {
        sum = sum.wrapping_add(value);
    }

    println!("Sum of popped values: {sum}");
    // The observer sees every node plus the pool blocks backing them.
    println!(
        "Allocations observed for 600 nodes: {}, still live after popping: {} ({} bytes)",
        stats.allocs_count(),
        stats.allocated_blocks_count(),
        stats.mem_used()
    );

    drop(stack);

    println!(
        "After teardown: {} live allocations",
        stats.allocated_blocks_count()
    );
}
