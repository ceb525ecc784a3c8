//! Page path for blocks above the largest size class or with wide alignment.
//!
//! Requests are rounded up to whole pages and served straight from the
//! process heap. The granted size is the page-rounded size, and a release
//! with any size in between rounds back to the same page count.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::AllocError;
use crate::grant::Grant;

/// Page size for rounding.
pub const PAGE_SIZE: usize = 4096;

/// Rounds a size up to the nearest page boundary. `None` on overflow.
#[must_use]
pub fn page_align(size: usize) -> Option<usize> {
    size.checked_next_multiple_of(PAGE_SIZE)
}

/// Layout actually requested from the heap for `layout`.
pub(crate) fn mapped_layout(layout: Layout) -> Result<Layout, AllocError> {
    let mapped = page_align(layout.size().max(1)).ok_or(AllocError::out_of_memory(layout))?;
    Layout::from_size_align(mapped, layout.align()).map_err(|_| AllocError::byte_limit(mapped))
}

/// Tracks live page-path blocks.
#[derive(Debug, Default)]
pub struct LargeAllocator {
    active: AtomicUsize,
    mapped: AtomicUsize,
}

impl LargeAllocator {
    /// Creates a new large allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            mapped: AtomicUsize::new(0),
        }
    }

    /// Reserve a page-rounded block for `layout`.
    pub fn alloc(&self, layout: Layout) -> Result<Grant, AllocError> {
        let mapped = mapped_layout(layout)?;
        // SAFETY: mapped has non-zero size.
        let raw = unsafe { std::alloc::alloc(mapped) };
        let ptr = NonNull::new(raw).ok_or(AllocError::out_of_memory(layout))?;
        self.active.fetch_add(1, Ordering::Relaxed);
        self.mapped.fetch_add(mapped.size(), Ordering::Relaxed);
        Ok(Grant {
            ptr,
            bytes: mapped.size(),
        })
    }

    /// Release a block from [`alloc`](Self::alloc).
    ///
    /// # Safety
    ///
    /// `ptr` must be live from this allocator, and `layout` must round to
    /// the same page count with the same alignment as the original request.
    pub unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        let Ok(mapped) = mapped_layout(layout) else {
            return;
        };
        // SAFETY: caller contract; mapped equals the layout used at allocation.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), mapped) };
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.mapped.fetch_sub(mapped.size(), Ordering::Relaxed);
    }

    /// Returns the number of live large blocks.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Returns the total bytes currently held.
    #[must_use]
    pub fn total_mapped(&self) -> usize {
        self.mapped.load(Ordering::Relaxed)
    }
}
