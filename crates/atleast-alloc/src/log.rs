//! Structured allocator lifecycle records.
//!
//! Allocators that keep a [`LifecycleJournal`] append one
//! [`AllocatorLogRecord`] per decision (grant, release, spill, failure).
//! Records carry a monotonic decision id and a trace id of the form
//! `<prefix>::<symbol>::<decision id as hex>`, and can be drained for
//! inspection or exported as JSON. A journal holds a fixed number of records;
//! once full, each new record evicts the oldest one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{self, LogMode};

/// Record severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorLogRecord {
    /// Monotonic decision id, starting at 1.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`allocate`, `allocate_at_least`, `deallocate`, `trim`).
    pub symbol: &'static str,
    /// Event kind (`grant`, `release`, `spill_to_central`, ...).
    pub event: &'static str,
    /// Block address involved in the event.
    pub ptr: Option<usize>,
    /// Requested or released size in bytes.
    pub size: Option<usize>,
    /// Granted size in bytes.
    pub granted: Option<usize>,
    /// Size-class bin, absent on the page path.
    pub bin: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details.
    pub details: String,
    /// Snapshot: blocks handed out and not yet released.
    pub live_blocks: usize,
    /// Snapshot: granted bytes handed out and not yet released.
    pub live_bytes: usize,
}

/// Fields of a record before the journal stamps it.
#[derive(Debug, Clone)]
pub struct LogEntry {
    level: AllocatorLogLevel,
    symbol: &'static str,
    event: &'static str,
    outcome: &'static str,
    ptr: Option<usize>,
    size: Option<usize>,
    granted: Option<usize>,
    bin: Option<usize>,
    details: String,
    live_blocks: usize,
    live_bytes: usize,
}

impl LogEntry {
    #[must_use]
    pub fn new(
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
    ) -> Self {
        Self {
            level,
            symbol,
            event,
            outcome,
            ptr: None,
            size: None,
            granted: None,
            bin: None,
            details: String::new(),
            live_blocks: 0,
            live_bytes: 0,
        }
    }

    #[must_use]
    pub fn ptr(mut self, ptr: usize) -> Self {
        self.ptr = Some(ptr);
        self
    }

    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn granted(mut self, granted: usize) -> Self {
        self.granted = Some(granted);
        self
    }

    #[must_use]
    pub fn bin(mut self, bin: Option<usize>) -> Self {
        self.bin = bin;
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    #[must_use]
    pub fn live(mut self, blocks: usize, bytes: usize) -> Self {
        self.live_blocks = blocks;
        self.live_bytes = bytes;
        self
    }
}

/// Bounded, thread-safe record store.
pub struct LifecycleJournal {
    prefix: &'static str,
    mode: LogMode,
    capacity: usize,
    next_decision_id: AtomicU64,
    evicted: AtomicU64,
    records: Mutex<VecDeque<AllocatorLogRecord>>,
}

impl LifecycleJournal {
    /// Journal holding the configured number of records.
    #[must_use]
    pub fn new(prefix: &'static str, mode: LogMode) -> Self {
        Self::with_capacity(prefix, mode, config::journal_capacity())
    }

    /// Journal holding at most `capacity` records.
    #[must_use]
    pub fn with_capacity(prefix: &'static str, mode: LogMode, capacity: usize) -> Self {
        Self {
            prefix,
            mode,
            capacity,
            next_decision_id: AtomicU64::new(1),
            evicted: AtomicU64::new(0),
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Stamp and append `entry`, evicting the oldest record when full.
    /// No-op when logging is off.
    pub fn record(&self, entry: LogEntry) {
        if !self.mode.enabled() {
            return;
        }
        let decision_id = self.next_decision_id.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let trace_id = format!("{}::{}::{:016x}", self.prefix, entry.symbol, decision_id);
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        records.push_back(AllocatorLogRecord {
            decision_id,
            trace_id,
            level: entry.level,
            symbol: entry.symbol,
            event: entry.event,
            ptr: entry.ptr,
            size: entry.size,
            granted: entry.granted,
            bin: entry.bin,
            outcome: entry.outcome,
            details: entry.details,
            live_blocks: entry.live_blocks,
            live_bytes: entry.live_bytes,
        });
    }

    /// Copy of the retained records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<AllocatorLogRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Take the retained records, oldest first.
    pub fn drain(&self) -> Vec<AllocatorLogRecord> {
        self.records.lock().drain(..).collect()
    }

    /// Records dropped because the journal was full.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn mode(&self) -> LogMode {
        self.mode
    }
}

impl std::fmt::Debug for LifecycleJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleJournal")
            .field("prefix", &self.prefix)
            .field("mode", &self.mode)
            .field("capacity", &self.capacity)
            .field("records", &self.records.lock().len())
            .field("evicted", &self.evicted())
            .finish()
    }
}
