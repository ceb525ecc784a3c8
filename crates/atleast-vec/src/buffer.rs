//! Growable buffer that adopts the granted capacity.
//!
//! `GrowBuffer` asks its allocator for *at least* what it needs and keeps
//! whatever was granted as capacity. Later growth that fits inside the
//! surplus costs no allocator call at all. Storage is always released with
//! the current capacity, which lies in the range the allocator accepts.

use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, size_of};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::slice;

use atleast_alloc::{AllocError, AllocationResult, Allocator, SystemAllocator, dispatch};

use crate::policy::{GrowthPolicy, default_growth_policy};

/// Contiguous growable storage for `T` backed by allocator `A`.
pub struct GrowBuffer<T, A: Allocator = SystemAllocator> {
    ptr: NonNull<T>,
    cap: usize,
    len: usize,
    policy: GrowthPolicy,
    alloc: A,
    _owns: PhantomData<T>,
}

// SAFETY: the buffer uniquely owns its elements and its block.
unsafe impl<T: Send, A: Allocator + Send> Send for GrowBuffer<T, A> {}
// SAFETY: shared access only hands out `&T` and `&A`.
unsafe impl<T: Sync, A: Allocator + Sync> Sync for GrowBuffer<T, A> {}

impl<T> GrowBuffer<T> {
    /// Empty buffer on the process heap.
    #[must_use]
    pub fn new() -> Self {
        Self::new_in(SystemAllocator)
    }

    /// Buffer on the process heap holding at least `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if the allocation fails.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_in(capacity, SystemAllocator)
    }
}

impl<T> Default for GrowBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: Allocator> GrowBuffer<T, A> {
    const IS_ZST: bool = size_of::<T>() == 0;

    /// Empty buffer using `alloc` and the configured growth policy.
    #[must_use]
    pub fn new_in(alloc: A) -> Self {
        Self::with_policy_in(alloc, default_growth_policy())
    }

    /// Empty buffer using `alloc` and `policy`.
    #[must_use]
    pub fn with_policy_in(alloc: A, policy: GrowthPolicy) -> Self {
        Self {
            ptr: NonNull::dangling(),
            cap: 0,
            len: 0,
            policy,
            alloc,
            _owns: PhantomData,
        }
    }

    /// Buffer holding at least `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if the allocation fails.
    #[must_use]
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Self {
        match Self::try_with_capacity_in(capacity, alloc) {
            Ok(buffer) => buffer,
            Err(err) => allocation_failed(err),
        }
    }

    /// Fallible [`with_capacity_in`](Self::with_capacity_in).
    pub fn try_with_capacity_in(capacity: usize, alloc: A) -> Result<Self, AllocError> {
        let mut buffer = Self::new_in(alloc);
        buffer.grow_to(capacity)?;
        Ok(buffer)
    }

    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    #[must_use]
    pub fn policy(&self) -> GrowthPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: GrowthPolicy) {
        self.policy = policy;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements the current storage can hold. Unbounded for zero-sized `T`.
    #[must_use]
    pub fn capacity(&self) -> usize {
        if Self::IS_ZST { usize::MAX } else { self.cap }
    }

    /// Room left before the next allocator call.
    #[must_use]
    pub fn spare(&self) -> usize {
        self.capacity() - self.len
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the first `len` slots are initialized; `ptr` is aligned and non-null.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as in `as_slice`, with unique access through `&mut self`.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Make room for at least `min_needed` elements in total.
    ///
    /// Does nothing, and makes no allocator call, when the capacity already
    /// covers `min_needed`. Otherwise asks for exactly `min_needed` and adopts
    /// the granted count as the new capacity. On failure the buffer is left
    /// as it was.
    pub fn grow_to(&mut self, min_needed: usize) -> Result<(), AllocError> {
        if min_needed <= self.capacity() {
            return Ok(());
        }

        let AllocationResult { handle, granted } =
            dispatch::allocate_at_least::<T, A>(&self.alloc, min_needed)?;
        debug_assert!(granted >= min_needed);

        // SAFETY: the new block holds `granted > len` slots and is distinct
        // from the old one; the old slots are treated as moved-from below.
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), handle.as_ptr(), self.len) };
        let old_ptr = mem::replace(&mut self.ptr, handle);
        let old_cap = mem::replace(&mut self.cap, granted);
        // SAFETY: the old block came from this allocator with grant `old_cap`.
        unsafe { dispatch::deallocate(&self.alloc, old_ptr, old_cap) };
        Ok(())
    }

    /// Make room for `additional` more elements, following the growth policy.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), AllocError> {
        let needed = self
            .len
            .checked_add(additional)
            .ok_or(AllocError::LimitExceeded {
                units: usize::MAX,
                unit_size: size_of::<T>(),
            })?;
        if needed <= self.capacity() {
            return Ok(());
        }

        let target = self.policy.lower_bound(self.cap, needed);
        match self.grow_to(target) {
            // A doubled target can overflow where the real need does not.
            Err(AllocError::LimitExceeded { .. }) if target > needed => self.grow_to(needed),
            other => other,
        }
    }

    /// # Panics
    ///
    /// Panics if the allocation fails.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(err) = self.try_reserve(additional) {
            allocation_failed(err);
        }
    }

    /// Append `value`. On failure `value` is dropped and the buffer is unchanged.
    pub fn try_push(&mut self, value: T) -> Result<(), AllocError> {
        if self.len == self.capacity() {
            self.try_reserve(1)?;
        }
        // SAFETY: `len < capacity` after the reserve.
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the allocation fails.
    pub fn push(&mut self, value: T) {
        if let Err(err) = self.try_push(value) {
            allocation_failed(err);
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // SAFETY: slot `len` was initialized and is now outside the live range.
        Some(unsafe { self.ptr.as_ptr().add(self.len).read() })
    }

    /// Drop every element past `len`. Capacity is kept.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        let tail = ptr::slice_from_raw_parts_mut(
            // SAFETY: `len < self.len`, so the offset stays in the block.
            unsafe { self.ptr.as_ptr().add(len) },
            self.len - len,
        );
        self.len = len;
        // SAFETY: the tail was initialized and is no longer reachable.
        unsafe { ptr::drop_in_place(tail) };
    }

    /// Drop every element. Capacity is kept.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Drop every element and give the storage back.
    pub fn release(&mut self) {
        self.clear();
        self.free_storage();
    }

    fn free_storage(&mut self) {
        let old_ptr = mem::replace(&mut self.ptr, NonNull::dangling());
        let old_cap = mem::take(&mut self.cap);
        // SAFETY: `old_ptr` came from this allocator with grant `old_cap`;
        // a zero capacity makes this a no-op.
        unsafe { dispatch::deallocate(&self.alloc, old_ptr, old_cap) };
    }

    /// Move into the smallest block the allocator grants for `len` elements.
    ///
    /// Keeps the current block when the new grant would not be smaller.
    pub fn try_shrink_to_fit(&mut self) -> Result<(), AllocError> {
        if Self::IS_ZST || self.len == self.cap {
            return Ok(());
        }
        if self.len == 0 {
            self.free_storage();
            return Ok(());
        }

        let AllocationResult { handle, granted } =
            dispatch::allocate_at_least::<T, A>(&self.alloc, self.len)?;
        if granted >= self.cap {
            // SAFETY: just granted, nothing written.
            unsafe { dispatch::deallocate(&self.alloc, handle, granted) };
            return Ok(());
        }

        // SAFETY: `len <= granted`, distinct blocks.
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), handle.as_ptr(), self.len) };
        let old_ptr = mem::replace(&mut self.ptr, handle);
        let old_cap = mem::replace(&mut self.cap, granted);
        // SAFETY: the old block came from this allocator with grant `old_cap`.
        unsafe { dispatch::deallocate(&self.alloc, old_ptr, old_cap) };
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the allocation fails.
    pub fn shrink_to_fit(&mut self) {
        if let Err(err) = self.try_shrink_to_fit() {
            allocation_failed(err);
        }
    }
}

impl<T: Clone, A: Allocator> GrowBuffer<T, A> {
    /// Append clones of `items`. On failure the buffer is unchanged.
    pub fn try_extend_from_slice(&mut self, items: &[T]) -> Result<(), AllocError> {
        self.try_reserve(items.len())?;
        for item in items {
            // SAFETY: reserved above; `len` advances per element so a
            // panicking clone leaves every written slot owned.
            unsafe { self.ptr.as_ptr().add(self.len).write(item.clone()) };
            self.len += 1;
        }
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the allocation fails.
    pub fn extend_from_slice(&mut self, items: &[T]) {
        if let Err(err) = self.try_extend_from_slice(items) {
            allocation_failed(err);
        }
    }
}

#[cold]
#[track_caller]
fn allocation_failed(err: AllocError) -> ! {
    panic!("GrowBuffer allocation failed: {err}")
}

impl<T, A: Allocator> Drop for GrowBuffer<T, A> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T, A: Allocator> Deref for GrowBuffer<T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, A: Allocator> DerefMut for GrowBuffer<T, A> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Clone, A: Allocator + Clone> Clone for GrowBuffer<T, A> {
    fn clone(&self) -> Self {
        let mut copy = Self::with_policy_in(self.alloc.clone(), self.policy);
        copy.extend_from_slice(self.as_slice());
        copy
    }
}

impl<T, A: Allocator> Extend<T> for GrowBuffer<T, A> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for value in iter {
            self.push(value);
        }
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for GrowBuffer<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_slice(), f)
    }
}

impl<T: PartialEq, A: Allocator, B: Allocator> PartialEq<GrowBuffer<T, B>> for GrowBuffer<T, A> {
    fn eq(&self, other: &GrowBuffer<T, B>) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: PartialEq, A: Allocator> PartialEq<[T]> for GrowBuffer<T, A> {
    fn eq(&self, other: &[T]) -> bool {
        self.as_slice() == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atleast_alloc::Grant;
    use atleast_alloc::doubles::{FaultInjector, RoundingAllocator};
    use std::alloc::Layout;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out dangling blocks at least `span` bytes long. Never touched
    /// as long as the buffer stays empty.
    struct WideSpan {
        span: usize,
        last_request: AtomicUsize,
    }

    unsafe impl Allocator for WideSpan {
        fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
            self.last_request.store(layout.size(), Ordering::Relaxed);
            Ok(NonNull::dangling())
        }

        fn allocate_at_least(&self, layout: Layout) -> Result<Grant, AllocError> {
            let ptr = self.allocate(layout)?;
            Ok(Grant {
                ptr,
                bytes: layout.size().max(self.span),
            })
        }

        unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}
    }

    #[test]
    fn new_buffer_is_empty() {
        let buffer: GrowBuffer<u32> = GrowBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 0);
        assert_eq!(buffer.as_slice(), &[] as &[u32]);
    }

    #[test]
    fn push_pop_in_order() {
        let mut buffer = GrowBuffer::with_policy_in(SystemAllocator, GrowthPolicy::Doubling);
        for i in 0..100u64 {
            buffer.push(i);
        }
        assert_eq!(buffer.len(), 100);
        assert!(buffer.iter().copied().eq(0..100));
        assert_eq!(buffer.pop(), Some(99));
        assert_eq!(buffer.len(), 99);
    }

    #[test]
    fn capacity_follows_grant() {
        let alloc = RoundingAllocator::for_units::<u16>(8);
        let mut buffer = GrowBuffer::<u16, _>::with_policy_in(&alloc, GrowthPolicy::Exact);
        buffer.grow_to(3).unwrap();
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.spare(), 8);
        buffer.grow_to(9).unwrap();
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(alloc.live_blocks(), 1);
        drop(buffer);
        assert_eq!(alloc.live_blocks(), 0);
    }

    #[test]
    fn exact_policy_grows_only_past_surplus() {
        let alloc = RoundingAllocator::for_units::<u32>(4);
        let mut buffer = GrowBuffer::with_policy_in(&alloc, GrowthPolicy::Exact);
        let mut caps = Vec::new();
        for i in 0..10u32 {
            buffer.push(i);
            caps.push(buffer.capacity());
        }
        assert_eq!(caps, vec![4, 4, 4, 4, 8, 8, 8, 8, 12, 12]);
    }

    #[test]
    fn doubling_policy_doubles_lower_bound() {
        let alloc = RoundingAllocator::for_units::<u32>(3);
        let mut buffer = GrowBuffer::with_policy_in(&alloc, GrowthPolicy::Doubling);
        buffer.push(1);
        assert_eq!(buffer.capacity(), 3);
        for i in 0..3 {
            buffer.push(i);
        }
        // need 4, doubled bound 6, granted 6.
        assert_eq!(buffer.capacity(), 6);
    }

    #[test]
    fn truncate_and_clear_drop_elements() {
        let marker = Rc::new(());
        let mut buffer = GrowBuffer::new();
        for _ in 0..5 {
            buffer.push(Rc::clone(&marker));
        }
        assert_eq!(Rc::strong_count(&marker), 6);
        buffer.truncate(2);
        assert_eq!(Rc::strong_count(&marker), 3);
        buffer.truncate(10);
        assert_eq!(buffer.len(), 2);
        buffer.clear();
        assert_eq!(Rc::strong_count(&marker), 1);
        assert!(buffer.capacity() >= 5);
    }

    #[test]
    fn release_returns_to_empty() {
        let alloc = RoundingAllocator::new(64);
        let mut buffer = GrowBuffer::new_in(&alloc);
        buffer.extend_from_slice(&[1u8, 2, 3]);
        buffer.release();
        assert_eq!(buffer.capacity(), 0);
        assert!(buffer.is_empty());
        assert_eq!(alloc.live_blocks(), 0);
        buffer.push(4);
        assert_eq!(buffer.as_slice(), &[4]);
    }

    #[test]
    fn drop_releases_elements_and_storage() {
        let marker = Rc::new(());
        let alloc = RoundingAllocator::new(32);
        {
            let mut buffer = GrowBuffer::new_in(&alloc);
            buffer.extend([Rc::clone(&marker), Rc::clone(&marker)]);
            assert_eq!(alloc.live_blocks(), 1);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
        assert_eq!(alloc.live_blocks(), 0);
    }

    #[test]
    fn shrink_to_fit_moves_to_smaller_grant() {
        let alloc = RoundingAllocator::for_units::<u64>(2);
        let mut buffer = GrowBuffer::<u64, _>::with_policy_in(&alloc, GrowthPolicy::Exact);
        buffer.grow_to(10).unwrap();
        buffer.extend_from_slice(&[7, 8, 9]);
        assert_eq!(buffer.capacity(), 10);
        buffer.shrink_to_fit();
        assert_eq!(buffer.capacity(), 4);
        assert_eq!(buffer.as_slice(), &[7, 8, 9]);
        assert_eq!(alloc.live_blocks(), 1);
    }

    #[test]
    fn shrink_to_fit_keeps_block_when_grant_is_no_smaller() {
        let alloc = RoundingAllocator::for_units::<u64>(8);
        let mut buffer = GrowBuffer::<u64, _>::with_policy_in(&alloc, GrowthPolicy::Exact);
        buffer.extend_from_slice(&[1, 2, 3]);
        let before = buffer.as_ptr();
        buffer.shrink_to_fit();
        assert_eq!(buffer.as_ptr(), before);
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(alloc.live_blocks(), 1);
    }

    #[test]
    fn try_shrink_failure_keeps_block() {
        let failing = FaultInjector::new(SystemAllocator);
        let mut buffer = GrowBuffer::<u64, _>::with_policy_in(&failing, GrowthPolicy::Exact);
        buffer.grow_to(100).unwrap();
        buffer.push(5);
        failing.fail_now();
        let err = buffer.try_shrink_to_fit().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(buffer.capacity(), 100);
        assert_eq!(buffer.as_slice(), &[5]);
    }

    #[test]
    #[should_panic(expected = "GrowBuffer allocation failed")]
    fn shrink_to_fit_panics_on_failure() {
        let failing = FaultInjector::new(SystemAllocator);
        let mut buffer = GrowBuffer::<u64, _>::with_policy_in(&failing, GrowthPolicy::Exact);
        buffer.grow_to(100).unwrap();
        buffer.push(5);
        failing.fail_now();
        buffer.shrink_to_fit();
    }

    #[test]
    fn shrink_empty_frees_storage() {
        let alloc = RoundingAllocator::new(16);
        let mut buffer: GrowBuffer<u32, _> = GrowBuffer::with_capacity_in(8, &alloc);
        buffer.shrink_to_fit();
        assert_eq!(buffer.capacity(), 0);
        assert_eq!(alloc.live_blocks(), 0);
    }

    #[test]
    fn zero_sized_elements_never_allocate() {
        let alloc = RoundingAllocator::new(16);
        let mut buffer = GrowBuffer::new_in(&alloc);
        for _ in 0..1000 {
            buffer.push(());
        }
        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.capacity(), usize::MAX);
        assert_eq!(alloc.live_blocks(), 0);
    }

    #[test]
    fn reserve_overflow_is_limit_exceeded() {
        let mut buffer: GrowBuffer<u32> = GrowBuffer::new();
        buffer.push(1);
        let err = buffer.try_reserve(usize::MAX).unwrap_err();
        assert!(matches!(err, AllocError::LimitExceeded { unit_size: 4, .. }));
        assert_eq!(buffer.as_slice(), &[1]);
    }

    #[test]
    fn reserve_past_size_limit_leaves_buffer_alone() {
        let mut buffer = GrowBuffer::<u8>::with_policy_in(SystemAllocator, GrowthPolicy::Doubling);
        buffer.push(0);
        let err = buffer.try_reserve(isize::MAX as usize).unwrap_err();
        assert!(matches!(err, AllocError::LimitExceeded { .. }));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.capacity(), 1);
    }

    #[test]
    fn doubled_bound_past_size_limit_falls_back_to_exact_need() {
        let half = isize::MAX as usize / 2 + 1;
        let alloc = WideSpan {
            span: half,
            last_request: AtomicUsize::new(0),
        };
        let mut buffer = GrowBuffer::<u8, _>::with_policy_in(&alloc, GrowthPolicy::Doubling);
        buffer.grow_to(1).unwrap();
        assert_eq!(buffer.capacity(), half);

        // Doubling `half` lands past isize::MAX; `half + 1` does not.
        buffer.try_reserve(half + 1).unwrap();
        assert_eq!(alloc.last_request.load(Ordering::Relaxed), half + 1);
        assert_eq!(buffer.capacity(), half + 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn clone_and_equality() {
        let mut a = GrowBuffer::new();
        a.extend_from_slice(&[String::from("x"), String::from("y")]);
        let b = a.clone();
        assert_eq!(a, b);
        assert!(a == *["x".to_string(), "y".to_string()].as_slice());
        assert_eq!(format!("{b:?}"), r#"["x", "y"]"#);
    }

    #[test]
    fn deref_mut_sorts_in_place() {
        let mut buffer = GrowBuffer::new();
        buffer.extend([3, 1, 2]);
        buffer.sort_unstable();
        assert_eq!(&*buffer, &[1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "GrowBuffer allocation failed")]
    fn push_panics_on_failure() {
        let failing = atleast_alloc::doubles::FaultInjector::new(SystemAllocator);
        failing.fail_now();
        let mut buffer = GrowBuffer::new_in(&failing);
        buffer.push(1u8);
    }
}
