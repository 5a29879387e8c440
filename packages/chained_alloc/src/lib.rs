//! Composable allocation policies, with a shared fixed-size object pool at their heart.
//!
//! An allocator in this crate is a chain of independent policies. Each policy sees every request
//! in turn and decides whether to serve it, observe it or pass it on:
//!
//! - [`PoolPolicy`] serves single-element requests from pools of fixed-size slots, shared
//!   between every copy of the allocator and every allocator rebound from it.
//! - [`HeapPolicy`] allocates from the system allocator.
//! - [`LinearPolicy`] bumps through a fixed buffer.
//! - [`StrictPolicy`] turns a request nobody served into an error.
//! - [`StatisticPolicy`] and [`LoggingPolicy`] observe the traffic passing by.
//!
//! Chains are built with [`policy_chain!`] and handed to an [`Allocator<T, C>`], the typed
//! surface that containers program against.
//!
//! # Allocation flow
//!
//! For allocation, the first policy that produces a pointer wins. Later policies see that pointer
//! and pass it through (observers record it). For deallocation, every policy gets a look: the one
//! that owns the pointer releases it and marks the request as released, producers after it leave
//! the pointer alone and observers record the release.
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use chained_alloc::{
//!     Allocator, BasicStatistic, HeapPolicy, PoolPolicy, StatisticPolicy, policy_chain,
//! };
//!
//! let stats = Rc::new(BasicStatistic::new());
//!
//! // Pool first, heap as the fallback and source of pool blocks, statistics at the end
//! // observing everything that passes by.
//! let chain = policy_chain![
//!     PoolPolicy::new(),
//!     HeapPolicy,
//!     StatisticPolicy::new(Rc::clone(&stats)),
//! ];
//!
//! let mut allocator = Allocator::<u64, _>::new(chain);
//!
//! let single = allocator.allocate(1).unwrap();
//! let array = allocator.allocate(100).unwrap();
//!
//! // The pool block, the element served from it and the array from the heap.
//! assert_eq!(stats.allocated_blocks_count(), 3);
//!
//! // SAFETY: Both pointers came from this allocator and are released once.
//! unsafe {
//!     allocator.deallocate(single, 1);
//!     allocator.deallocate(array, 100);
//! }
//!
//! // The pool keeps its block until the last allocator using it is dropped.
//! assert_eq!(stats.allocated_blocks_count(), 1);
//! drop(allocator);
//! assert_eq!(stats.allocated_blocks_count(), 0);
//! ```
//!
//! # Pool engine
//!
//! The pool is built from plain bookkeeping types that never allocate on their own:
//! [`Chunk`] threads an intrusive free list through up to 255 slots (or 65535 with a `u16`
//! [`SlotIndex`]), [`MemoryBlock`] partitions one region into chunks, [`MemoryPool`] collects the
//! blocks of one element layout and [`PoolsManager`] keeps a reference counted pool per layout.
//!
//! # Thread safety
//!
//! Everything in this crate is single-threaded. Pool policies share their manager through [`Rc`]
//! and are neither [`Send`] nor [`Sync`].
//!
//! [`Rc`]: std::rc::Rc

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod allocator;
mod chain;
mod chunk;
mod coordinates;
mod error;
mod heap_policy;
mod linear_policy;
mod logging_policy;
mod logging_policy_builder;
mod memory_block;
mod memory_pool;
mod policy;
mod pool_policy;
mod pool_policy_builder;
mod pools_manager;
mod slot_index;
mod statistic;
mod statistic_policy;
mod strict_policy;

pub use allocator::*;
pub use chain::*;
pub use chunk::*;
pub(crate) use coordinates::*;
pub use error::*;
pub use heap_policy::*;
pub use linear_policy::*;
pub use logging_policy::*;
pub use logging_policy_builder::*;
pub use memory_block::*;
pub use memory_pool::*;
pub use policy::*;
pub use pool_policy::*;
pub use pool_policy_builder::*;
pub use pools_manager::*;
pub use slot_index::*;
pub use statistic::*;
pub use statistic_policy::*;
pub use strict_policy::*;
