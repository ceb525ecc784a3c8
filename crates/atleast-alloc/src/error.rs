//! Allocation failure taxonomy.

use std::alloc::Layout;

/// Failures an allocation request can signal.
///
/// Release never fails, so there is no variant for it: a malformed release
/// is a caller bug covered by the `unsafe` contract of
/// [`Allocator::deallocate`](crate::Allocator::deallocate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// `units * unit_size` does not fit the addressable size limit.
    #[error("request for {units} units of {unit_size} bytes exceeds the size limit")]
    LimitExceeded { units: usize, unit_size: usize },

    /// The underlying resource could not satisfy the request.
    #[error("out of memory: {bytes} bytes aligned to {align} could not be reserved")]
    OutOfMemory { bytes: usize, align: usize },
}

impl AllocError {
    /// Out-of-memory failure for `layout`.
    #[must_use]
    pub const fn out_of_memory(layout: Layout) -> Self {
        Self::OutOfMemory {
            bytes: layout.size(),
            align: layout.align(),
        }
    }

    /// Size-limit failure for a byte-level request.
    #[must_use]
    pub const fn byte_limit(bytes: usize) -> Self {
        Self::LimitExceeded {
            units: bytes,
            unit_size: 1,
        }
    }

    /// Whether a caller may retry after freeing other resources.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}
