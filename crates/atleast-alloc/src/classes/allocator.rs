//! Size-class allocator state.
//!
//! Coordinates the per-shard magazines, the central bins, and the page path.
//! Every grant reports the real block size, so callers that ask through
//! [`Allocator::allocate_at_least`] learn about class rounding.

use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::large::{LargeAllocator, mapped_layout};
use super::magazine::{FreeBlock, MagazineRack};
use super::size_class::{self, NUM_SIZE_CLASSES, SizeClass};
use crate::alloc_trait::Allocator;
use crate::config::{self, LogMode};
use crate::error::AllocError;
use crate::grant::{Grant, dangling_for};
use crate::log::{AllocatorLogLevel, AllocatorLogRecord, LifecycleJournal, LogEntry};
use crate::metrics::{AllocatorMetrics, MetricsSnapshot, global_metrics};

/// Number of magazine shards.
pub const NUM_SHARDS: usize = 8;

static NEXT_SHARD: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static SHARD_HINT: Cell<usize> = const { Cell::new(usize::MAX) };
}

fn shard_index() -> usize {
    SHARD_HINT.with(|hint| {
        let mut shard = hint.get();
        if shard == usize::MAX {
            shard = NEXT_SHARD.fetch_add(1, Ordering::Relaxed) % NUM_SHARDS;
            hint.set(shard);
        }
        shard
    })
}

/// Where a block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Magazine,
    Central,
    Fresh,
    Large,
}

impl Source {
    const fn outcome(self) -> &'static str {
        match self {
            Self::Magazine => "magazine_hit",
            Self::Central => "central_hit",
            Self::Fresh => "fresh",
            Self::Large => "large",
        }
    }
}

/// Size-class allocator with native size feedback.
///
/// Small requests (up to 32KB, alignment up to 16) are rounded to a size
/// class; larger or wider-aligned ones are rounded to whole pages. Either way
/// [`allocate_at_least`](Allocator::allocate_at_least) reports the rounded
/// size, and [`deallocate`](Allocator::deallocate) accepts any size between
/// the request and the grant.
pub struct ClassAllocator {
    shards: Box<[Mutex<MagazineRack>]>,
    central_bins: Mutex<Vec<Vec<FreeBlock>>>,
    large: LargeAllocator,
    metrics: AllocatorMetrics,
    journal: LifecycleJournal,
    live_blocks: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl ClassAllocator {
    /// Allocator with the configured magazine capacity and log mode.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(config::magazine_capacity(), config::log_mode())
    }

    /// Allocator caching at most `capacity` blocks per class and shard.
    #[must_use]
    pub fn with_magazine_capacity(capacity: usize) -> Self {
        Self::with_config(capacity, config::log_mode())
    }

    /// Allocator caching at most `magazine_capacity` blocks per class and
    /// shard, recording lifecycle events when `log_mode` is on. The journal
    /// keeps the most recent [`config::journal_capacity`] records.
    #[must_use]
    pub fn with_config(magazine_capacity: usize, log_mode: LogMode) -> Self {
        Self {
            shards: (0..NUM_SHARDS)
                .map(|_| Mutex::new(MagazineRack::new(magazine_capacity)))
                .collect(),
            central_bins: Mutex::new((0..NUM_SIZE_CLASSES).map(|_| Vec::new()).collect()),
            large: LargeAllocator::new(),
            metrics: AllocatorMetrics::new(),
            journal: LifecycleJournal::new("atleast::classes", log_mode),
            live_blocks: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
        }
    }

    fn record(&self, entry: LogEntry) {
        if self.journal.mode().enabled() {
            self.journal.record(entry.live(self.live_blocks(), self.live_bytes()));
        }
    }

    fn take_small(&self, class: SizeClass) -> Result<(NonNull<u8>, Source), AllocError> {
        if let Some(block) = self.shards[shard_index()].lock().take(class.index) {
            AllocatorMetrics::inc(&self.metrics.magazine_hits);
            return Ok((block.0, Source::Magazine));
        }
        if let Some(block) = self.central_bins.lock()[class.index].pop() {
            AllocatorMetrics::inc(&self.metrics.central_hits);
            return Ok((block.0, Source::Central));
        }
        let layout = class.block_layout();
        // SAFETY: class layouts have non-zero size.
        let raw = unsafe { std::alloc::alloc(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocError::out_of_memory(layout))?;
        AllocatorMetrics::inc(&self.metrics.fresh_blocks);
        Ok((ptr, Source::Fresh))
    }

    fn grant(&self, symbol: &'static str, layout: Layout) -> Result<Grant, AllocError> {
        if layout.size() == 0 {
            return Ok(Grant {
                ptr: dangling_for(layout),
                bytes: 0,
            });
        }

        let class = size_class::class_for(layout);
        let taken = match class {
            Some(class) => self.take_small(class).map(|(ptr, source)| {
                let grant = Grant {
                    ptr,
                    bytes: class.size,
                };
                (grant, source)
            }),
            None => self.large.alloc(layout).map(|grant| (grant, Source::Large)),
        };

        let (grant, source) = match taken {
            Ok(found) => found,
            Err(err) => {
                AllocatorMetrics::inc(&self.metrics.out_of_memory);
                self.record(
                    LogEntry::new(AllocatorLogLevel::Error, symbol, "grant", "oom")
                        .size(layout.size())
                        .bin(class.map(|c| c.index))
                        .details(format!("align={}", layout.align())),
                );
                return Err(err);
            }
        };

        self.live_blocks.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(grant.bytes, Ordering::Relaxed);
        self.record(
            LogEntry::new(AllocatorLogLevel::Trace, symbol, "grant", source.outcome())
                .ptr(grant.ptr.as_ptr() as usize)
                .size(layout.size())
                .granted(grant.bytes)
                .bin(Some(class.map_or(NUM_SIZE_CLASSES, |c| c.index))),
        );
        Ok(grant)
    }

    /// # Safety
    ///
    /// Same contract as [`Allocator::deallocate`].
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        let (bin, bytes, outcome) = match size_class::class_for(layout) {
            Some(class) => {
                let block = FreeBlock(ptr);
                let cached = self.shards[shard_index()].lock().stash(class.index, block);
                if !cached {
                    self.central_bins.lock()[class.index].push(block);
                    AllocatorMetrics::inc(&self.metrics.spills_to_central);
                }
                let outcome = if cached { "cached" } else { "spilled" };
                (class.index, class.size, outcome)
            }
            None => {
                let bytes = mapped_layout(layout).map_or(0, |mapped| mapped.size());
                // SAFETY: forwarded caller contract.
                unsafe { self.large.free(ptr, layout) };
                (NUM_SIZE_CLASSES, bytes, "unmapped")
            }
        };

        AllocatorMetrics::inc(&self.metrics.deallocations);
        self.live_blocks.fetch_sub(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
        self.record(
            LogEntry::new(AllocatorLogLevel::Trace, "deallocate", "release", outcome)
                .ptr(ptr.as_ptr() as usize)
                .size(layout.size())
                .granted(bytes)
                .bin(Some(bin)),
        );
    }

    /// Return every cached block to the process heap. Returns how many were freed.
    pub fn trim(&self) -> usize {
        let mut freed = 0;
        let mut central = self.central_bins.lock();
        for shard in &*self.shards {
            for (bin, block) in shard.lock().drain() {
                central[bin].push(block);
            }
        }
        for (bin, blocks) in central.iter_mut().enumerate() {
            let Some(class) = size_class::class_for_bin(bin) else {
                continue;
            };
            let layout = class.block_layout();
            for block in blocks.drain(..) {
                // SAFETY: cached blocks came from `take_small` with this class layout.
                unsafe { std::alloc::dealloc(block.0.as_ptr(), layout) };
                freed += 1;
            }
        }
        drop(central);

        self.record(
            LogEntry::new(AllocatorLogLevel::Debug, "trim", "allocator_stats", "snapshot")
                .details(format!("freed_blocks={freed}")),
        );
        freed
    }

    /// Blocks currently held in magazines.
    #[must_use]
    pub fn cached_blocks(&self) -> usize {
        self.shards.iter().map(|s| s.lock().total_cached()).sum()
    }

    /// Blocks currently held in central bins.
    #[must_use]
    pub fn central_blocks(&self) -> usize {
        self.central_bins.lock().iter().map(Vec::len).sum()
    }

    /// Blocks handed out and not yet released.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live_blocks.load(Ordering::Relaxed)
    }

    /// Granted bytes handed out and not yet released.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    /// Live page-path blocks.
    #[must_use]
    pub fn large_blocks(&self) -> usize {
        self.large.active_count()
    }

    /// Snapshot of this allocator's counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Copy of the retained lifecycle records, oldest first.
    #[must_use]
    pub fn lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.journal.records()
    }

    /// Take the retained lifecycle records, oldest first.
    pub fn drain_lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.journal.drain()
    }

    /// Lifecycle records dropped because the journal was full.
    #[must_use]
    pub fn evicted_lifecycle_logs(&self) -> u64 {
        self.journal.evicted()
    }
}

impl Default for ClassAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClassAllocator {
    fn drop(&mut self) {
        self.trim();
    }
}

impl std::fmt::Debug for ClassAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassAllocator")
            .field("live_blocks", &self.live_blocks())
            .field("live_bytes", &self.live_bytes())
            .field("cached_blocks", &self.cached_blocks())
            .field("central_blocks", &self.central_blocks())
            .field("large_blocks", &self.large_blocks())
            .finish_non_exhaustive()
    }
}

unsafe impl Allocator for ClassAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let grant = self.grant("allocate", layout)?;
        AllocatorMetrics::inc(&self.metrics.plain_allocations);
        Ok(grant.ptr)
    }

    fn allocate_at_least(&self, layout: Layout) -> Result<Grant, AllocError> {
        let grant = self.grant("allocate_at_least", layout)?;
        let surplus = grant.bytes - layout.size();
        AllocatorMetrics::inc(&self.metrics.native_grants);
        AllocatorMetrics::add(&self.metrics.surplus_bytes, surplus);
        AllocatorMetrics::inc(&global_metrics().native_grants);
        AllocatorMetrics::add(&global_metrics().surplus_bytes, surplus);
        Ok(grant)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { self.release(ptr, layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(size: usize, align: usize) -> Layout {
        Layout::from_size_align(size, align).unwrap()
    }

    fn quiet(capacity: usize) -> ClassAllocator {
        ClassAllocator::with_config(capacity, LogMode::Off)
    }

    #[test]
    fn grant_reports_class_size() {
        let alloc = quiet(8);
        let grant = alloc.allocate_at_least(layout(40, 8)).unwrap();
        assert_eq!(grant.bytes, 48);
        assert_eq!(alloc.live_blocks(), 1);
        assert_eq!(alloc.live_bytes(), 48);
        unsafe { alloc.deallocate(grant.ptr, layout(40, 8)) };
        assert_eq!(alloc.live_blocks(), 0);
        assert_eq!(alloc.live_bytes(), 0);
    }

    #[test]
    fn release_accepts_any_size_in_granted_range() {
        let alloc = quiet(8);
        for release in 40..=48 {
            let grant = alloc.allocate_at_least(layout(40, 8)).unwrap();
            unsafe { alloc.deallocate(grant.ptr, layout(release, 8)) };
        }
        assert_eq!(alloc.live_blocks(), 0);
        // Every release landed in the same magazine, so one block was reused.
        assert_eq!(alloc.cached_blocks(), 1);
        assert_eq!(alloc.metrics().fresh_blocks, 1);
    }

    #[test]
    fn reuse_from_magazine() {
        let alloc = quiet(8);
        let first = alloc.allocate_at_least(layout(100, 8)).unwrap();
        unsafe { alloc.deallocate(first.ptr, layout(first.bytes, 8)) };
        let second = alloc.allocate_at_least(layout(100, 8)).unwrap();
        assert_eq!(first.ptr, second.ptr);
        assert_eq!(alloc.metrics().magazine_hits, 1);
        unsafe { alloc.deallocate(second.ptr, layout(100, 8)) };
    }

    #[test]
    fn full_magazine_spills_to_central() {
        let alloc = quiet(1);
        let a = alloc.allocate(layout(64, 8)).unwrap();
        let b = alloc.allocate(layout(64, 8)).unwrap();
        unsafe {
            alloc.deallocate(a, layout(64, 8));
            alloc.deallocate(b, layout(64, 8));
        }
        assert_eq!(alloc.cached_blocks(), 1);
        assert_eq!(alloc.central_blocks(), 1);
        assert_eq!(alloc.metrics().spills_to_central, 1);

        let c = alloc.allocate(layout(64, 8)).unwrap();
        let d = alloc.allocate(layout(64, 8)).unwrap();
        let snapshot = alloc.metrics();
        assert_eq!(snapshot.magazine_hits, 1);
        assert_eq!(snapshot.central_hits, 1);
        unsafe {
            alloc.deallocate(c, layout(64, 8));
            alloc.deallocate(d, layout(64, 8));
        }
    }

    #[test]
    fn large_and_over_aligned_use_pages() {
        let alloc = quiet(8);
        let big = alloc.allocate_at_least(layout(40_000, 8)).unwrap();
        assert_eq!(big.bytes, 40_960);
        let wide = alloc.allocate_at_least(layout(100, 64)).unwrap();
        assert_eq!(wide.bytes, 4096);
        assert_eq!(wide.ptr.as_ptr() as usize % 64, 0);
        assert_eq!(alloc.large_blocks(), 2);
        unsafe {
            alloc.deallocate(big.ptr, layout(big.bytes, 8));
            alloc.deallocate(wide.ptr, layout(100, 64));
        }
        assert_eq!(alloc.large_blocks(), 0);
        assert_eq!(alloc.live_bytes(), 0);
    }

    #[test]
    fn zero_size_is_dangling() {
        let alloc = quiet(8);
        let grant = alloc.allocate_at_least(layout(0, 16)).unwrap();
        assert_eq!(grant.bytes, 0);
        assert_eq!(grant.ptr.as_ptr() as usize % 16, 0);
        assert_eq!(alloc.live_blocks(), 0);
        unsafe { alloc.deallocate(grant.ptr, layout(0, 16)) };
    }

    #[test]
    fn plain_allocate_counts_separately() {
        let alloc = quiet(8);
        let ptr = alloc.allocate(layout(24, 8)).unwrap();
        let snapshot = alloc.metrics();
        assert_eq!(snapshot.plain_allocations, 1);
        assert_eq!(snapshot.native_grants, 0);
        unsafe { alloc.deallocate(ptr, layout(24, 8)) };
    }

    #[test]
    fn trim_returns_cached_blocks() {
        let alloc = quiet(4);
        let blocks: Vec<_> = (0..6)
            .map(|_| alloc.allocate(layout(200, 8)).unwrap())
            .collect();
        for ptr in blocks {
            unsafe { alloc.deallocate(ptr, layout(200, 8)) };
        }
        assert_eq!(alloc.cached_blocks() + alloc.central_blocks(), 6);
        assert_eq!(alloc.trim(), 6);
        assert_eq!(alloc.cached_blocks(), 0);
        assert_eq!(alloc.central_blocks(), 0);
    }

    #[test]
    fn lifecycle_logs_capture_grant_and_release() {
        let alloc = ClassAllocator::with_config(8, LogMode::On);
        let grant = alloc.allocate_at_least(layout(40, 8)).unwrap();
        unsafe { alloc.deallocate(grant.ptr, layout(48, 8)) };

        let logs = alloc.drain_lifecycle_logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].symbol, "allocate_at_least");
        assert_eq!(logs[0].outcome, "fresh");
        assert_eq!(logs[0].size, Some(40));
        assert_eq!(logs[0].granted, Some(48));
        assert_eq!(logs[0].live_blocks, 1);
        assert!(logs[0].trace_id.starts_with("atleast::classes::allocate_at_least::"));
        assert_eq!(logs[1].event, "release");
        assert_eq!(logs[1].outcome, "cached");
        assert_eq!(logs[1].live_bytes, 0);
        assert!(alloc.lifecycle_logs().is_empty());
    }

    #[test]
    fn lifecycle_journal_stays_bounded() {
        let alloc = ClassAllocator::with_config(8, LogMode::On);
        let bound = config::journal_capacity();
        for _ in 0..bound {
            let grant = alloc.allocate_at_least(layout(24, 8)).unwrap();
            unsafe { alloc.deallocate(grant.ptr, layout(24, 8)) };
        }
        let logs = alloc.lifecycle_logs();
        assert_eq!(logs.len(), bound);
        let newest = logs.last().unwrap().decision_id;
        assert_eq!(alloc.evicted_lifecycle_logs(), newest - bound as u64);
        assert!(alloc.evicted_lifecycle_logs() >= bound as u64);
    }

    #[test]
    fn deterministic_trace_keeps_accounting() {
        let alloc = quiet(4);
        let mut live: Vec<(NonNull<u8>, Layout, usize)> = Vec::new();
        let mut seed: u64 = 0x5eed_a11c;
        for _ in 0..2_000 {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let choice = (seed >> 33) as usize;
            if choice % 3 != 0 || live.is_empty() {
                let size = 1 + choice % 50_000;
                let request = layout(size, 8);
                let grant = alloc.allocate_at_least(request).unwrap();
                assert!(grant.bytes >= size);
                unsafe { grant.ptr.as_ptr().write_bytes(0xA5, grant.bytes) };
                // Release with a size anywhere in the granted range.
                let release = size + (choice >> 7) % (grant.bytes - size + 1);
                live.push((grant.ptr, layout(release, 8), grant.bytes));
            } else {
                let (ptr, release, _) = live.swap_remove(choice % live.len());
                unsafe { alloc.deallocate(ptr, release) };
            }
            let expected: usize = live.iter().map(|(_, _, bytes)| bytes).sum();
            assert_eq!(alloc.live_blocks(), live.len());
            assert_eq!(alloc.live_bytes(), expected);
        }
        for (ptr, release, _) in live.drain(..) {
            unsafe { alloc.deallocate(ptr, release) };
        }
        assert_eq!(alloc.live_blocks(), 0);
        assert_eq!(alloc.large_blocks(), 0);
    }

    #[test]
    fn threads_share_one_allocator() {
        let alloc = quiet(16);
        std::thread::scope(|scope| {
            for t in 0..4usize {
                let alloc = &alloc;
                scope.spawn(move || {
                    for i in 0..500 {
                        let size = 8 + (t * 131 + i * 17) % 3000;
                        let grant = alloc.allocate_at_least(layout(size, 8)).unwrap();
                        unsafe {
                            grant.ptr.as_ptr().write_bytes(t as u8, grant.bytes);
                            alloc.deallocate(grant.ptr, layout(grant.bytes, 8));
                        }
                    }
                });
            }
        });
        assert_eq!(alloc.live_blocks(), 0);
        assert_eq!(alloc.live_bytes(), 0);
        assert_eq!(alloc.metrics().deallocations, 2000);
    }
}
