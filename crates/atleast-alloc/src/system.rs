//! Global-heap allocator without native feedback.
//!
//! `SystemAllocator` forwards to the process allocator and does not override
//! [`Allocator::allocate_at_least`], so every feedback request through it
//! takes the exact-size fallback.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::alloc_trait::Allocator;
use crate::error::AllocError;
use crate::grant::dangling_for;

/// The process heap, via `std::alloc`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SystemAllocator;

unsafe impl Allocator for SystemAllocator {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            return Ok(dangling_for(layout));
        }
        // SAFETY: layout has non-zero size.
        let raw = unsafe { std::alloc::alloc(layout) };
        NonNull::new(raw).ok_or(AllocError::out_of_memory(layout))
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            // SAFETY: caller guarantees `ptr` was allocated here with `layout`.
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}
