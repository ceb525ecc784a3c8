//! Test doubles for the allocation contract.
//!
//! - [`RoundingAllocator`] rounds every request up to a fixed quantum and
//!   reports it through native feedback.
//! - [`BumpAllocator`] hands out addresses from a fixed arena, deterministic
//!   across [`BumpAllocator::reset`], and has no feedback.
//! - [`Recording`] wraps any allocator and logs every call it forwards.
//! - [`FaultInjector`] wraps any allocator and fails on demand.
//!
//! All of them hand out real, writable memory.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::alloc_trait::Allocator;
use crate::error::AllocError;
use crate::grant::{Grant, dangling_for};
use crate::system::SystemAllocator;

/// Grants `ceil(size / quantum) * quantum` bytes for every request.
#[derive(Debug)]
pub struct RoundingAllocator {
    quantum: usize,
    live_blocks: AtomicUsize,
}

impl RoundingAllocator {
    /// Round to `quantum` bytes. A zero quantum behaves like one.
    #[must_use]
    pub fn new(quantum: usize) -> Self {
        Self {
            quantum: quantum.max(1),
            live_blocks: AtomicUsize::new(0),
        }
    }

    /// Round to `units` values of `T`.
    #[must_use]
    pub fn for_units<T>(units: usize) -> Self {
        Self::new(units.saturating_mul(std::mem::size_of::<T>()))
    }

    #[must_use]
    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Blocks handed out and not yet released.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live_blocks.load(Ordering::Acquire)
    }

    fn block_layout(&self, layout: Layout) -> Result<Layout, AllocError> {
        let rounded = layout
            .size()
            .div_ceil(self.quantum)
            .checked_mul(self.quantum)
            .ok_or(AllocError::byte_limit(layout.size()))?;
        Layout::from_size_align(rounded, layout.align()).map_err(|_| AllocError::byte_limit(rounded))
    }

    fn reserve(&self, layout: Layout) -> Result<Grant, AllocError> {
        if layout.size() == 0 {
            return Ok(Grant {
                ptr: dangling_for(layout),
                bytes: 0,
            });
        }
        let block = self.block_layout(layout)?;
        let ptr = SystemAllocator.allocate(block)?;
        self.live_blocks.fetch_add(1, Ordering::AcqRel);
        Ok(Grant {
            ptr,
            bytes: block.size(),
        })
    }
}

unsafe impl Allocator for RoundingAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.reserve(layout).map(|grant| grant.ptr)
    }

    fn allocate_at_least(&self, layout: Layout) -> Result<Grant, AllocError> {
        self.reserve(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // Any size in the granted range rounds back to the same block.
        if let Ok(block) = self.block_layout(layout) {
            self.live_blocks.fetch_sub(1, Ordering::AcqRel);
            unsafe { SystemAllocator.deallocate(ptr, block) }
        }
    }
}

/// Alignment of the arena backing a [`BumpAllocator`].
const ARENA_ALIGN: usize = 64;

struct Arena {
    base: NonNull<u8>,
    layout: Layout,
    offset: usize,
}

// SAFETY: the arena owns its block; access goes through the mutex.
unsafe impl Send for Arena {}

/// Deterministic bump allocator over a fixed arena. No native feedback.
pub struct BumpAllocator {
    arena: Mutex<Arena>,
    released: AtomicUsize,
}

impl BumpAllocator {
    /// Reserve an arena of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self, AllocError> {
        let layout = Layout::from_size_align(capacity.max(1), ARENA_ALIGN)
            .map_err(|_| AllocError::byte_limit(capacity))?;
        let base = SystemAllocator.allocate(layout)?;
        Ok(Self {
            arena: Mutex::new(Arena {
                base,
                layout,
                offset: 0,
            }),
            released: AtomicUsize::new(0),
        })
    }

    /// Rewind to the start of the arena. Outstanding blocks become invalid.
    pub fn reset(&self) {
        self.arena.lock().offset = 0;
    }

    /// Bytes consumed so far, including alignment padding.
    #[must_use]
    pub fn used(&self) -> usize {
        self.arena.lock().offset
    }

    /// Number of releases seen.
    #[must_use]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }
}

unsafe impl Allocator for BumpAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            return Ok(dangling_for(layout));
        }
        let mut arena = self.arena.lock();
        let base = arena.base.as_ptr() as usize;
        let start = (base + arena.offset)
            .checked_next_multiple_of(layout.align())
            .ok_or(AllocError::out_of_memory(layout))?
            - base;
        let end = start
            .checked_add(layout.size())
            .filter(|&end| end <= arena.layout.size())
            .ok_or(AllocError::out_of_memory(layout))?;
        arena.offset = end;
        // SAFETY: `start < end <= arena size`, so the result stays in the arena.
        Ok(unsafe { arena.base.add(start) })
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            self.released.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Drop for BumpAllocator {
    fn drop(&mut self) {
        let arena = self.arena.get_mut();
        // SAFETY: the arena block was allocated in `with_capacity` with this layout.
        unsafe { SystemAllocator.deallocate(arena.base, arena.layout) }
    }
}

impl std::fmt::Debug for BumpAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arena = self.arena.lock();
        f.debug_struct("BumpAllocator")
            .field("capacity", &arena.layout.size())
            .field("used", &arena.offset)
            .field("released", &self.released())
            .finish()
    }
}

/// Kind of a forwarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Allocate,
    AllocateAtLeast,
    Deallocate,
}

/// One call seen by a [`Recording`] allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocCall {
    pub kind: CallKind,
    /// Layout size passed in, in bytes.
    pub bytes: usize,
    /// Layout alignment passed in.
    pub align: usize,
    /// Bytes granted, for successful feedback calls.
    pub granted: Option<usize>,
    /// Whether the call failed.
    pub failed: bool,
}

/// Forwards to `A` and logs every call, including failed ones.
#[derive(Debug, Default)]
pub struct Recording<A> {
    inner: A,
    calls: Mutex<Vec<AllocCall>>,
}

impl<A> Recording<A> {
    #[must_use]
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Copy of the calls seen so far.
    #[must_use]
    pub fn calls(&self) -> Vec<AllocCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Forget the calls seen so far.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    #[must_use]
    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn push(&self, kind: CallKind, layout: Layout, granted: Option<usize>, failed: bool) {
        self.calls.lock().push(AllocCall {
            kind,
            bytes: layout.size(),
            align: layout.align(),
            granted,
            failed,
        });
    }
}

unsafe impl<A: Allocator> Allocator for Recording<A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let out = self.inner.allocate(layout);
        self.push(CallKind::Allocate, layout, None, out.is_err());
        out
    }

    fn allocate_at_least(&self, layout: Layout) -> Result<Grant, AllocError> {
        let out = self.inner.allocate_at_least(layout);
        let granted = out.as_ref().ok().map(|grant| grant.bytes);
        self.push(CallKind::AllocateAtLeast, layout, granted, out.is_err());
        out
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.push(CallKind::Deallocate, layout, None, false);
        unsafe { self.inner.deallocate(ptr, layout) }
    }
}

/// Forwards to `A` until its budget of successful allocations runs out.
#[derive(Debug)]
pub struct FaultInjector<A> {
    inner: A,
    remaining: AtomicUsize,
}

impl<A> FaultInjector<A> {
    /// Never fails until told to.
    #[must_use]
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(usize::MAX),
        }
    }

    /// Allow `successes` more allocations, then fail every one after.
    pub fn fail_after(&self, successes: usize) {
        self.remaining.store(successes, Ordering::Release);
    }

    /// Fail every allocation from now on.
    pub fn fail_now(&self) {
        self.fail_after(0);
    }

    /// Stop failing.
    pub fn heal(&self) {
        self.remaining.store(usize::MAX, Ordering::Release);
    }

    #[must_use]
    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn admit(&self, layout: Layout) -> Result<(), AllocError> {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .map(|_| ())
            .map_err(|_| AllocError::out_of_memory(layout))
    }
}

unsafe impl<A: Allocator> Allocator for FaultInjector<A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.admit(layout)?;
        self.inner.allocate(layout)
    }

    fn allocate_at_least(&self, layout: Layout) -> Result<Grant, AllocError> {
        self.admit(layout)?;
        self.inner.allocate_at_least(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.inner.deallocate(ptr, layout) }
    }
}
