use std::alloc::Layout;

use thiserror::Error;

/// Errors that can occur when allocating memory through a policy chain.
///
/// Running out of pool capacity is not an error: policies signal "I did not produce a pointer"
/// with `Ok(None)` and let the rest of the chain try. These errors are raised only when a chain
/// is configured to treat a missing pointer as a failure or when the request itself is invalid.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum AllocError {
    /// The system allocator could not provide the requested memory.
    #[error("out of memory: failed to allocate {bytes} bytes")]
    OutOfMemory {
        /// Total number of bytes that were requested.
        bytes: usize,
    },

    /// Every policy in the chain declined the request, so nothing produced a pointer.
    #[error("no policy in the chain satisfied a request for {count} elements of {element:?}")]
    Unsatisfied {
        /// Number of elements that were requested.
        count: usize,

        /// Layout of a single requested element.
        element: Layout,
    },

    /// The total size of the request does not fit in `isize::MAX` bytes.
    #[error("allocation of {count} elements of {element:?} overflows the address space")]
    CapacityOverflow {
        /// Number of elements that were requested.
        count: usize,

        /// Layout of a single requested element.
        element: Layout,
    },
}

/// A specialized `Result` type for allocation operations, returning the crate's
/// [`AllocError`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, AllocError>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AllocError: Send, Sync, Debug, Clone);

    #[test]
    fn out_of_memory_mentions_bytes() {
        let error = AllocError::OutOfMemory { bytes: 4096 };

        assert!(error.to_string().contains("4096"));
    }

    #[test]
    fn unsatisfied_mentions_count() {
        let error = AllocError::Unsatisfied {
            count: 3,
            element: Layout::new::<u32>(),
        };

        let message = error.to_string();
        assert!(message.contains('3'));
        assert!(message.contains("satisfied"));

        let result: Result<()> = Err(error.clone());
        assert_eq!(result, Err(error));
    }
}
