//! Dynamically dispatched memory resources.
//!
//! [`MemoryResource`] is the object-safe face of an allocator, for code that
//! picks its allocator at run time. Size feedback is not part of it: a
//! resource that can report real block sizes also implements
//! [`FeedbackResource`] and returns itself from
//! [`MemoryResource::feedback`]. Resources that do neither keep working
//! unchanged.
//!
//! [`ResourceAllocator`] turns a `&dyn MemoryResource` back into an
//! [`Allocator`], so the typed entry points and growable buffers run on top
//! of a run-time choice.

use std::alloc::Layout;
use std::any::Any;
use std::ptr::NonNull;

use crate::alloc_trait::Allocator;
use crate::classes::ClassAllocator;
use crate::doubles::RoundingAllocator;
use crate::error::AllocError;
use crate::grant::Grant;
use crate::metrics::{AllocatorMetrics, global_metrics};
use crate::system::SystemAllocator;

/// Object-safe allocator interface.
pub trait MemoryResource: Send + Sync {
    /// Reserve a block fitting `layout`, with no size feedback.
    fn allocate_bytes(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// # Safety
    ///
    /// Same contract as [`Allocator::deallocate`].
    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, layout: Layout);

    /// Whether memory from `self` can be released through `other` and vice versa.
    fn is_equal(&self, other: &dyn MemoryResource) -> bool;

    /// Concrete type access, used by `is_equal` implementations.
    fn as_any(&self) -> &dyn Any;

    /// The feedback side of this resource, if it has one.
    fn feedback(&self) -> Option<&dyn FeedbackResource> {
        None
    }
}

/// Size feedback for a [`MemoryResource`].
pub trait FeedbackResource {
    /// Reserve at least `layout` and report the real block size.
    fn allocate_bytes_at_least(&self, layout: Layout) -> Result<Grant, AllocError>;
}

impl PartialEq for dyn MemoryResource + '_ {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl std::fmt::Debug for dyn MemoryResource + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryResource")
            .field("feedback", &self.feedback().is_some())
            .finish_non_exhaustive()
    }
}

impl MemoryResource for SystemAllocator {
    fn allocate_bytes(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocate(layout)
    }

    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.deallocate(ptr, layout) }
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        other.as_any().is::<SystemAllocator>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl MemoryResource for ClassAllocator {
    fn allocate_bytes(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocate(layout)
    }

    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.deallocate(ptr, layout) }
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        std::ptr::addr_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn feedback(&self) -> Option<&dyn FeedbackResource> {
        Some(self)
    }
}

impl FeedbackResource for ClassAllocator {
    fn allocate_bytes_at_least(&self, layout: Layout) -> Result<Grant, AllocError> {
        self.allocate_at_least(layout)
    }
}

impl MemoryResource for RoundingAllocator {
    fn allocate_bytes(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocate(layout)
    }

    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.deallocate(ptr, layout) }
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        std::ptr::addr_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn feedback(&self) -> Option<&dyn FeedbackResource> {
        Some(self)
    }
}

impl FeedbackResource for RoundingAllocator {
    fn allocate_bytes_at_least(&self, layout: Layout) -> Result<Grant, AllocError> {
        self.allocate_at_least(layout)
    }
}

/// [`Allocator`] over a borrowed [`MemoryResource`].
#[derive(Clone, Copy)]
pub struct ResourceAllocator<'r> {
    resource: &'r dyn MemoryResource,
}

impl<'r> ResourceAllocator<'r> {
    /// Wraps `resource`.
    #[must_use]
    pub fn new(resource: &'r dyn MemoryResource) -> Self {
        Self { resource }
    }

    /// The wrapped resource.
    #[must_use]
    pub fn resource(&self) -> &'r dyn MemoryResource {
        self.resource
    }

    /// Whether the resource reports real block sizes.
    #[must_use]
    pub fn has_feedback(&self) -> bool {
        self.resource.feedback().is_some()
    }
}

impl PartialEq for ResourceAllocator<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.resource.is_equal(other.resource)
    }
}

impl std::fmt::Debug for ResourceAllocator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAllocator")
            .field("resource", &self.resource)
            .finish()
    }
}

unsafe impl Allocator for ResourceAllocator<'_> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.resource.allocate_bytes(layout)
    }

    fn allocate_at_least(&self, layout: Layout) -> Result<Grant, AllocError> {
        match self.resource.feedback() {
            Some(feedback) => feedback.allocate_bytes_at_least(layout),
            None => {
                let ptr = self.resource.allocate_bytes(layout)?;
                AllocatorMetrics::inc(&global_metrics().fallback_grants);
                Ok(Grant::exact(ptr, layout))
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.resource.deallocate_bytes(ptr, layout) }
    }
}
