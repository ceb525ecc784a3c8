//! Harness error type.

use atleast_alloc::AllocError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("allocation failed: {0}")]
    Alloc(#[from] AllocError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown allocator '{0}' (expected system, classes or rounding:<bytes>)")]
    InvalidAllocator(String),
    #[error("unknown growth policy '{0}' (expected exact or doubling)")]
    InvalidPolicy(String),
    #[error("unsupported unit size {0} (expected 1, 2, 4, 8, 12, 16, 24, 32 or 64)")]
    UnsupportedUnitSize(usize),
}
