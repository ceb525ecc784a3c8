//! The allocator capability.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::error::AllocError;
use crate::grant::Grant;
use crate::metrics::{AllocatorMetrics, global_metrics};

/// A source of raw, unconstructed storage.
///
/// `allocate` and `deallocate` are required. `allocate_at_least` is
/// provided: allocators that cannot say how much they really reserved keep
/// the default, which calls `allocate` and reports the request exactly.
/// Allocators that round requests up (size classes, pages, quanta) override
/// it to report the real block size. Which body runs is decided at compile
/// time by the implementing type; no opt-in marker exists.
///
/// Zero-sized layouts are legal. Implementations return an aligned, dangling
/// pointer for them and must not be asked to dereference it.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - a successful `allocate(layout)` returns a block valid for
///   `layout.size()` bytes aligned to `layout.align()`;
/// - a successful `allocate_at_least(layout)` returns a [`Grant`] whose
///   `bytes >= layout.size()` and whose block is valid for `bytes` bytes
///   aligned to `layout.align()`;
/// - a block stays valid until it is passed to `deallocate`, and a release
///   happens-before any later call that hands out the same memory, even when
///   the calls come from different threads.
pub unsafe trait Allocator {
    /// Reserve a block for `layout`.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Reserve a block for at least `layout` and report its real size.
    fn allocate_at_least(&self, layout: Layout) -> Result<Grant, AllocError> {
        let ptr = self.allocate(layout)?;
        AllocatorMetrics::inc(&global_metrics().fallback_grants);
        Ok(Grant::exact(ptr, layout))
    }

    /// Release a block.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator and `layout` must have
    /// the alignment it was requested with. If the block came from
    /// `allocate_at_least(requested)` with grant `g`, `layout.size()` may be
    /// anything in `requested.size()..=g.bytes`; if it came from
    /// `allocate(requested)`, `layout` must equal `requested`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    #[inline]
    fn allocate_at_least(&self, layout: Layout) -> Result<Grant, AllocError> {
        (**self).allocate_at_least(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }
}

unsafe impl<A: Allocator + ?Sized> Allocator for std::sync::Arc<A> {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    #[inline]
    fn allocate_at_least(&self, layout: Layout) -> Result<Grant, AllocError> {
        (**self).allocate_at_least(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }
}
