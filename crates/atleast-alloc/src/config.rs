//! Environment configuration.
//!
//! - `ATLEAST_LOG`: `on` (default) collects lifecycle records in allocators
//!   that keep a journal; `off` disables collection.
//! - `ATLEAST_MAGAZINE`: per-bin magazine capacity for
//!   [`ClassAllocator::new`](crate::ClassAllocator::new). Defaults to
//!   [`DEFAULT_MAGAZINE_CAPACITY`].
//! - `ATLEAST_LOG_CAPACITY`: records a journal keeps before dropping the
//!   oldest. Defaults to [`DEFAULT_JOURNAL_CAPACITY`].
//!
//! All are read on first use and cached for the life of the process.

use std::sync::OnceLock;

/// Default number of cached blocks per size class and shard.
pub const DEFAULT_MAGAZINE_CAPACITY: usize = 64;

/// Default number of lifecycle records a journal retains.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 4096;

/// Whether lifecycle records are collected.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogMode {
    /// Records are appended to the allocator's journal.
    #[default]
    On,
    /// Nothing is recorded.
    Off,
}

impl LogMode {
    /// Parse from string (case-insensitive). Unknown values keep logging on.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "disabled" | "0" | "false" => Self::Off,
            _ => Self::On,
        }
    }

    /// Returns true if records should be kept.
    #[must_use]
    pub const fn enabled(self) -> bool {
        matches!(self, Self::On)
    }
}

/// Parse a magazine capacity, falling back to the default on garbage.
#[must_use]
pub fn parse_magazine_capacity(s: &str) -> usize {
    s.trim()
        .parse::<usize>()
        .unwrap_or(DEFAULT_MAGAZINE_CAPACITY)
}

/// Parse a journal capacity, falling back to the default on garbage.
#[must_use]
pub fn parse_journal_capacity(s: &str) -> usize {
    s.trim()
        .parse::<usize>()
        .unwrap_or(DEFAULT_JOURNAL_CAPACITY)
}

static LOG_MODE: OnceLock<LogMode> = OnceLock::new();
static MAGAZINE_CAPACITY: OnceLock<usize> = OnceLock::new();
static JOURNAL_CAPACITY: OnceLock<usize> = OnceLock::new();

/// Configured log mode (reads `ATLEAST_LOG` on first call).
#[must_use]
pub fn log_mode() -> LogMode {
    *LOG_MODE.get_or_init(|| {
        std::env::var("ATLEAST_LOG")
            .map(|v| LogMode::from_str_loose(&v))
            .unwrap_or_default()
    })
}

/// Configured magazine capacity (reads `ATLEAST_MAGAZINE` on first call).
#[must_use]
pub fn magazine_capacity() -> usize {
    *MAGAZINE_CAPACITY.get_or_init(|| {
        std::env::var("ATLEAST_MAGAZINE")
            .map(|v| parse_magazine_capacity(&v))
            .unwrap_or(DEFAULT_MAGAZINE_CAPACITY)
    })
}

/// Configured journal capacity (reads `ATLEAST_LOG_CAPACITY` on first call).
#[must_use]
pub fn journal_capacity() -> usize {
    *JOURNAL_CAPACITY.get_or_init(|| {
        std::env::var("ATLEAST_LOG_CAPACITY")
            .map(|v| parse_journal_capacity(&v))
            .unwrap_or(DEFAULT_JOURNAL_CAPACITY)
    })
}
