//! # atleast-vec
//!
//! A growable buffer that uses allocation size feedback.
//!
//! [`GrowBuffer`] asks for at least what it needs through
//! [`atleast_alloc::allocate_at_least`] and adopts the granted count as its
//! capacity. [`GrowthPolicy`] decides how far past the immediate need it asks.

pub mod buffer;
pub mod policy;

pub use buffer::GrowBuffer;
pub use policy::{GrowthPolicy, default_growth_policy};
