use std::ptr::NonNull;

use tracing::Level;

use crate::{AllocPolicy, AllocRequest, DeallocRequest, LoggingPolicyBuilder, PolicyChain, Result};

/// Emits one `tracing` event per allocation and deallocation passing through its position in
/// the chain.
///
/// Allocation events are only emitted once some policy has produced a pointer, so place this
/// policy after the ones that allocate. Every event carries the pointer, the element count and
/// the size in bytes. No subscriber is installed by this crate; events go wherever the
/// application's subscriber sends them.
///
/// Logging policies never affect chain equality.
///
/// # Example
///
/// ```
/// use chained_alloc::{Allocator, HeapPolicy, LoggingPolicy, policy_chain};
/// use tracing::Level;
///
/// let logging = LoggingPolicy::builder().level(Level::INFO).build();
/// let mut allocator = Allocator::<u32, _>::new(policy_chain![HeapPolicy, logging]);
///
/// let ptr = allocator.allocate(8).unwrap();
///
/// // SAFETY: The pointer came from this allocator and is released once.
/// unsafe { allocator.deallocate(ptr, 8) };
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LoggingPolicy {
    level: Level,
    enabled: bool,
}

/// `tracing` macros need the level as a constant, so we branch once per level.
macro_rules! event_at {
    ($level:expr, $($fields:tt)+) => {
        if $level == Level::ERROR {
            tracing::event!(Level::ERROR, $($fields)+);
        } else if $level == Level::WARN {
            tracing::event!(Level::WARN, $($fields)+);
        } else if $level == Level::INFO {
            tracing::event!(Level::INFO, $($fields)+);
        } else if $level == Level::DEBUG {
            tracing::event!(Level::DEBUG, $($fields)+);
        } else {
            tracing::event!(Level::TRACE, $($fields)+);
        }
    };
}

impl LoggingPolicy {
    /// Creates an enabled policy that logs at [`Level::DEBUG`].
    ///
    /// For custom configuration, use [`LoggingPolicy::builder()`].
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder for creating a [`LoggingPolicy`] with custom configuration.
    pub fn builder() -> LoggingPolicyBuilder {
        LoggingPolicyBuilder::new()
    }

    pub(crate) fn new_inner(level: Level, enabled: bool) -> Self {
        Self { level, enabled }
    }

    /// The level at which events are emitted.
    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    /// Whether events are emitted at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns event emission on or off for this instance.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl Default for LoggingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: This policy never produces a pointer of its own.
unsafe impl AllocPolicy for LoggingPolicy {
    fn allocate<R: PolicyChain>(
        &mut self,
        request: &AllocRequest,
        existing: Option<NonNull<u8>>,
        rest: &mut R,
    ) -> Result<Option<NonNull<u8>>> {
        if let (true, Some(ptr)) = (self.enabled, existing) {
            event_at!(
                self.level,
                ?ptr,
                count = request.count(),
                bytes = request.size_bytes(),
                "allocate"
            );
        }

        rest.allocate(request, existing)
    }

    unsafe fn deallocate<R: PolicyChain>(&mut self, request: &DeallocRequest, rest: &mut R) {
        if self.enabled {
            event_at!(
                self.level,
                ptr = ?request.ptr(),
                count = request.count(),
                bytes = request.size_bytes(),
                "deallocate"
            );
        }

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            rest.deallocate(request);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_enabled_debug() {
        let policy = LoggingPolicy::new();

        assert!(policy.is_enabled());
        assert_eq!(policy.level(), Level::DEBUG);
        assert_eq!(policy, LoggingPolicy::default());
    }

    #[test]
    fn can_be_toggled() {
        let mut policy = LoggingPolicy::new();

        policy.set_enabled(false);
        assert!(!policy.is_enabled());
    }

    #[test]
    fn never_blocks_equality() {
        assert!(!<LoggingPolicy as AllocPolicy>::COMPARABLE);
    }
}
