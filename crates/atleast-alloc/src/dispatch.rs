//! Typed entry points.
//!
//! Client code asks for units of `T`, never for bytes. These functions turn a
//! unit count into a layout for `T`, call the allocator, and turn the granted
//! byte span back into whole units. They are the only place that converts
//! between the two.

use std::alloc::Layout;
use std::mem::size_of;
use std::ptr::NonNull;

use crate::alloc_trait::Allocator;
use crate::error::AllocError;
use crate::grant::AllocationResult;
use crate::metrics::{AllocatorMetrics, global_metrics};

/// Layout for `units` consecutive values of `T`.
///
/// Fails with [`AllocError::LimitExceeded`] when the byte size overflows or
/// exceeds `isize::MAX`.
pub fn array_layout<T>(units: usize) -> Result<Layout, AllocError> {
    Layout::array::<T>(units).map_err(|_| AllocError::LimitExceeded {
        units,
        unit_size: size_of::<T>(),
    })
}

/// Units of `T` needed to cover `bytes` bytes (`ceil(bytes / size_of::<T>())`).
///
/// Zero-sized units need none.
#[must_use]
pub const fn units_for_bytes<T>(bytes: usize) -> usize {
    let unit = size_of::<T>();
    if unit == 0 { 0 } else { bytes.div_ceil(unit) }
}

fn checked_layout<T>(units: usize) -> Result<Layout, AllocError> {
    array_layout::<T>(units).inspect_err(|_| {
        AllocatorMetrics::inc(&global_metrics().limit_rejections);
    })
}

/// Reserve storage for at least `units` values of `T` and learn how many fit.
///
/// On success `granted >= units`. A zero-byte request (no units, or a
/// zero-sized `T`) never reaches the allocator: the handle is dangling and
/// `granted` is `units` for zero-sized `T`, `0` otherwise.
pub fn allocate_at_least<T, A>(alloc: &A, units: usize) -> Result<AllocationResult<T>, AllocError>
where
    A: Allocator + ?Sized,
{
    let layout = checked_layout::<T>(units)?;
    if layout.size() == 0 {
        return Ok(AllocationResult {
            handle: NonNull::dangling(),
            granted: units,
        });
    }

    let grant = alloc.allocate_at_least(layout).inspect_err(|err| {
        if err.is_retryable() {
            AllocatorMetrics::inc(&global_metrics().out_of_memory);
        }
    })?;
    debug_assert!(grant.bytes >= layout.size(), "allocator granted less than requested");

    let granted = grant.bytes / size_of::<T>();
    AllocatorMetrics::add(&global_metrics().surplus_units, granted.saturating_sub(units));
    Ok(AllocationResult {
        handle: grant.ptr.cast(),
        granted,
    })
}

/// Reserve storage for exactly `units` values of `T`, without feedback.
pub fn allocate<T, A>(alloc: &A, units: usize) -> Result<NonNull<T>, AllocError>
where
    A: Allocator + ?Sized,
{
    let layout = checked_layout::<T>(units)?;
    if layout.size() == 0 {
        return Ok(NonNull::dangling());
    }
    let ptr = alloc.allocate(layout).inspect_err(|err| {
        if err.is_retryable() {
            AllocatorMetrics::inc(&global_metrics().out_of_memory);
        }
    })?;
    AllocatorMetrics::inc(&global_metrics().plain_allocations);
    Ok(ptr.cast())
}

/// Release storage obtained from [`allocate_at_least`] or [`allocate`].
///
/// # Safety
///
/// `handle` must be live storage from `alloc`, not yet released. For a
/// feedback allocation that asked for `r` units and was granted `g`, `units`
/// must lie in `r..=g`; for a plain allocation of `m` units it must be `m`.
pub unsafe fn deallocate<T, A>(alloc: &A, handle: NonNull<T>, units: usize)
where
    A: Allocator + ?Sized,
{
    // In-range counts always produce a valid layout: `units <= granted`.
    let Ok(layout) = Layout::array::<T>(units) else {
        return;
    };
    if layout.size() == 0 {
        return;
    }
    AllocatorMetrics::inc(&global_metrics().deallocations);
    // SAFETY: forwarded caller contract.
    unsafe { alloc.deallocate(handle.cast(), layout) }
}
