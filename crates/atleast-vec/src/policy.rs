//! Growth policy: how far past the immediate need a buffer asks to grow.
//!
//! The policy only picks the lower bound handed to the allocator. Whatever
//! the allocator grants on top of it is adopted as capacity.

use std::sync::OnceLock;

use serde::Serialize;

/// Lower-bound rule for `reserve`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowthPolicy {
    /// Ask for exactly what is needed.
    Exact,
    /// Ask for at least twice the current capacity.
    #[default]
    Doubling,
}

impl GrowthPolicy {
    /// Parse from string (case-insensitive). Unknown values give the default.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" | "minimal" | "tight" => Self::Exact,
            _ => Self::Doubling,
        }
    }

    /// Unit count to request when `needed` units are required and `capacity`
    /// are held.
    #[must_use]
    pub const fn lower_bound(self, capacity: usize, needed: usize) -> usize {
        match self {
            Self::Exact => needed,
            Self::Doubling => {
                let doubled = capacity.saturating_mul(2);
                if doubled > needed { doubled } else { needed }
            }
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Doubling => "doubling",
        }
    }
}

impl std::fmt::Display for GrowthPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

static GROWTH_POLICY: OnceLock<GrowthPolicy> = OnceLock::new();

/// Configured policy for new buffers (reads `ATLEAST_GROWTH` on first call).
#[must_use]
pub fn default_growth_policy() -> GrowthPolicy {
    *GROWTH_POLICY.get_or_init(|| {
        std::env::var("ATLEAST_GROWTH")
            .map(|v| GrowthPolicy::from_str_loose(&v))
            .unwrap_or_default()
    })
}
