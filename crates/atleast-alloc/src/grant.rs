//! Values produced by a feedback allocation.

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;

/// Byte-level grant returned by [`Allocator::allocate_at_least`](crate::Allocator::allocate_at_least).
///
/// `bytes` is the usable size of the block starting at `ptr`; it is never
/// smaller than the size of the layout that was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    /// Start of the reserved block.
    pub ptr: NonNull<u8>,
    /// Usable size of the block in bytes.
    pub bytes: usize,
}

impl Grant {
    /// A grant that reports exactly what `layout` asked for.
    #[must_use]
    pub const fn exact(ptr: NonNull<u8>, layout: Layout) -> Self {
        Self {
            ptr,
            bytes: layout.size(),
        }
    }

    /// Bytes reserved beyond the request.
    #[must_use]
    pub const fn surplus(&self, layout: Layout) -> usize {
        self.bytes.saturating_sub(layout.size())
    }
}

/// Typed result of a feedback allocation: a handle to unconstructed storage
/// and the number of `T` units it can hold.
///
/// `granted` is at least the number of units requested. When it is zero the
/// handle is dangling and must not be dereferenced.
pub struct AllocationResult<T> {
    /// Storage for `granted` units, not yet holding constructed values.
    pub handle: NonNull<T>,
    /// Number of units actually reserved.
    pub granted: usize,
}

impl<T> Clone for AllocationResult<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AllocationResult<T> {}

impl<T> PartialEq for AllocationResult<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && self.granted == other.granted
    }
}

impl<T> Eq for AllocationResult<T> {}

impl<T> fmt::Debug for AllocationResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationResult")
            .field("handle", &self.handle)
            .field("granted", &self.granted)
            .finish()
    }
}

/// Aligned, non-null address for a zero-sized block. Never dereferenceable.
pub(crate) fn dangling_for(layout: Layout) -> NonNull<u8> {
    // SAFETY: alignments are non-zero powers of two.
    unsafe { NonNull::new_unchecked(std::ptr::without_provenance_mut(layout.align())) }
}
