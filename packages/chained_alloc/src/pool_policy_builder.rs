use std::alloc::Layout;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::{PoolPolicy, SlotIndex};

/// Builder for creating an instance of [`PoolPolicy`].
///
/// All settings are optional. Without a layout, the policy starts out unbound and gets bound when
/// an [`Allocator`][crate::Allocator] rebinds its chain to the element type.
///
/// # Examples
///
/// ```
/// use chained_alloc::PoolPolicy;
///
/// // Grow by 64 elements at a time instead of one chunk.
/// let policy = PoolPolicy::builder().block_size(64).build();
///
/// // Use a 16-bit free list link, allowing 65535 slots per chunk.
/// let wide = PoolPolicy::builder()
///     .slot_index::<u16>()
///     .layout_of::<u64>()
///     .build();
/// ```
#[derive(Debug)]
#[must_use]
pub struct PoolPolicyBuilder<I: SlotIndex = u8> {
    element_layout: Option<Layout>,
    block_size: Option<NonZero<usize>>,

    _slot_index: PhantomData<I>,
}

impl PoolPolicyBuilder {
    pub(crate) fn new() -> Self {
        Self {
            element_layout: None,
            block_size: None,
            _slot_index: PhantomData,
        }
    }
}

impl<I: SlotIndex> PoolPolicyBuilder<I> {
    /// Selects the width of the free list link, which bounds the number of slots per chunk.
    ///
    /// The default is `u8`.
    ///
    /// # Panics
    ///
    /// Panics if a layout was already set that is too small for the new link width.
    pub fn slot_index<J: SlotIndex>(self) -> PoolPolicyBuilder<J> {
        if let Some(layout) = self.element_layout {
            assert!(
                PoolPolicy::<J>::is_poolable(layout),
                "PoolPolicy element layout {layout:?} is too small to hold a free list link"
            );
        }

        PoolPolicyBuilder {
            element_layout: self.element_layout,
            block_size: self.block_size,
            _slot_index: PhantomData,
        }
    }

    /// Binds the policy to elements of the given layout.
    ///
    /// # Panics
    ///
    /// Panics if the layout is too small to be pooled (this includes zero-sized layouts).
    pub fn layout(mut self, layout: Layout) -> Self {
        assert!(
            PoolPolicy::<I>::is_poolable(layout),
            "PoolPolicy element layout {layout:?} is too small to hold a free list link"
        );
        self.element_layout = Some(layout);
        self
    }

    /// Binds the policy to elements of type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is too small to be pooled (this includes zero-sized types).
    pub fn layout_of<T>(self) -> Self {
        self.layout(Layout::new::<T>())
    }

    /// Sets the number of elements requested from the rest of the chain whenever the pool needs
    /// to grow.
    ///
    /// Defaults to [`PoolPolicy::DEFAULT_BLOCK_SIZE`].
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    pub fn block_size(mut self, block_size: usize) -> Self {
        assert!(block_size > 0, "PoolPolicy block size must be non-zero");
        self.block_size = NonZero::new(block_size);
        self
    }

    /// Builds the policy with a fresh [`PoolsManager`][crate::PoolsManager].
    #[must_use]
    pub fn build(self) -> PoolPolicy<I> {
        PoolPolicy::new_inner(
            self.element_layout,
            self.block_size.unwrap_or(PoolPolicy::<I>::DEFAULT_BLOCK_SIZE),
        )
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(PoolPolicyBuilder: Send, Sync);

    #[test]
    fn defaults_to_unbound_with_one_chunk_blocks() {
        let policy = PoolPolicyBuilder::new().build();

        assert_eq!(policy.element_layout(), None);
        assert_eq!(policy.block_size(), 255);
    }

    #[test]
    fn wide_link_defaults_to_wide_chunk_blocks() {
        let policy = PoolPolicyBuilder::new().slot_index::<u16>().build();

        assert_eq!(policy.block_size(), 65535);
    }

    #[test]
    fn settings_survive_link_width_change() {
        let policy = PoolPolicyBuilder::new()
            .layout_of::<u64>()
            .block_size(7)
            .slot_index::<u16>()
            .build();

        assert_eq!(policy.element_layout(), Some(Layout::new::<u64>()));
        assert_eq!(policy.block_size(), 7);
    }

    #[test]
    #[should_panic]
    fn zero_sized_layout_panics() {
        let _builder = PoolPolicyBuilder::new().layout_of::<()>();
    }

    #[test]
    #[should_panic]
    fn narrow_layout_then_wide_link_panics() {
        let _builder = PoolPolicyBuilder::new()
            .layout_of::<u8>()
            .slot_index::<u16>();
    }

    #[test]
    #[should_panic]
    fn zero_block_size_panics() {
        let _builder = PoolPolicyBuilder::new().block_size(0);
    }
}
