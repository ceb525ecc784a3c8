//! Atomic counters for allocator observability.
//!
//! All counters use relaxed ordering. They are diagnostic, not
//! synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Allocation counters, kept per allocator and once process-wide.
pub struct AllocatorMetrics {
    /// Feedback requests answered natively by an allocator.
    pub native_grants: AtomicU64,
    /// Feedback requests answered by the exact-size fallback.
    pub fallback_grants: AtomicU64,
    /// Plain (non-feedback) allocations.
    pub plain_allocations: AtomicU64,
    /// Bytes granted beyond the request.
    pub surplus_bytes: AtomicU64,
    /// Units granted beyond the request (typed dispatch only).
    pub surplus_units: AtomicU64,
    /// Releases performed.
    pub deallocations: AtomicU64,
    /// Requests served from a magazine.
    pub magazine_hits: AtomicU64,
    /// Requests served from a central bin.
    pub central_hits: AtomicU64,
    /// Requests that needed fresh memory.
    pub fresh_blocks: AtomicU64,
    /// Releases that overflowed a magazine into a central bin.
    pub spills_to_central: AtomicU64,
    /// Requests that failed with out-of-memory.
    pub out_of_memory: AtomicU64,
    /// Requests rejected for exceeding the size limit.
    pub limit_rejections: AtomicU64,
}

impl AllocatorMetrics {
    /// Create a zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            native_grants: AtomicU64::new(0),
            fallback_grants: AtomicU64::new(0),
            plain_allocations: AtomicU64::new(0),
            surplus_bytes: AtomicU64::new(0),
            surplus_units: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            magazine_hits: AtomicU64::new(0),
            central_hits: AtomicU64::new(0),
            fresh_blocks: AtomicU64::new(0),
            spills_to_central: AtomicU64::new(0),
            out_of_memory: AtomicU64::new(0),
            limit_rejections: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment a counter by `n`.
    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            native_grants: Self::get(&self.native_grants),
            fallback_grants: Self::get(&self.fallback_grants),
            plain_allocations: Self::get(&self.plain_allocations),
            surplus_bytes: Self::get(&self.surplus_bytes),
            surplus_units: Self::get(&self.surplus_units),
            deallocations: Self::get(&self.deallocations),
            magazine_hits: Self::get(&self.magazine_hits),
            central_hits: Self::get(&self.central_hits),
            fresh_blocks: Self::get(&self.fresh_blocks),
            spills_to_central: Self::get(&self.spills_to_central),
            out_of_memory: Self::get(&self.out_of_memory),
            limit_rejections: Self::get(&self.limit_rejections),
        }
    }
}

impl Default for AllocatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`AllocatorMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub native_grants: u64,
    pub fallback_grants: u64,
    pub plain_allocations: u64,
    pub surplus_bytes: u64,
    pub surplus_units: u64,
    pub deallocations: u64,
    pub magazine_hits: u64,
    pub central_hits: u64,
    pub fresh_blocks: u64,
    pub spills_to_central: u64,
    pub out_of_memory: u64,
    pub limit_rejections: u64,
}

impl MetricsSnapshot {
    /// Share of feedback requests that got a native answer, in permille.
    #[must_use]
    pub fn native_rate_permille(&self) -> u16 {
        let total = self.native_grants + self.fallback_grants;
        if total == 0 {
            return 0;
        }
        ((self.native_grants.saturating_mul(1000)) / total) as u16
    }
}

static GLOBAL_METRICS: AllocatorMetrics = AllocatorMetrics::new();

/// Process-wide counters updated by the typed dispatch and the fallback path.
#[must_use]
pub fn global_metrics() -> &'static AllocatorMetrics {
    &GLOBAL_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = AllocatorMetrics::new();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increment_and_add() {
        let m = AllocatorMetrics::new();
        AllocatorMetrics::inc(&m.native_grants);
        AllocatorMetrics::inc(&m.native_grants);
        AllocatorMetrics::add(&m.surplus_bytes, 24);
        let snap = m.snapshot();
        assert_eq!(snap.native_grants, 2);
        assert_eq!(snap.surplus_bytes, 24);
    }

    #[test]
    fn native_rate() {
        let snap = MetricsSnapshot {
            native_grants: 3,
            fallback_grants: 1,
            ..MetricsSnapshot::default()
        };
        assert_eq!(snap.native_rate_permille(), 750);
        assert_eq!(MetricsSnapshot::default().native_rate_permille(), 0);
    }
}
