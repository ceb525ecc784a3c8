//! # atleast-alloc
//!
//! Allocation with size feedback.
//!
//! Allocators often reserve more than they are asked for: a size class, a
//! page, an alignment quantum. This crate lets them say so. A caller asks for
//! *at least* `n` units and learns how many actually fit, so a growable
//! container can use the surplus instead of asking again.
//!
//! # Architecture
//!
//! - **Capability** (`alloc_trait`): the [`Allocator`] trait. Its provided
//!   `allocate_at_least` falls back to an exact grant; allocators that round
//!   override it.
//! - **Typed entry points** (`dispatch`): unit counts in, [`AllocationResult`]
//!   out, with byte/unit conversion and overflow checks.
//! - **Allocators**: [`SystemAllocator`] (process heap, no feedback) and
//!   [`ClassAllocator`] (size classes and pages, native feedback).
//! - **Resources** (`resource`): object-safe [`MemoryResource`] with an
//!   optional [`FeedbackResource`] side.
//! - **Test doubles** (`doubles`): rounding, bump, recording and
//!   fault-injecting allocators.
//! - **Observability** (`log`, `metrics`, `config`): lifecycle records, atomic
//!   counters, environment configuration.

pub mod alloc_trait;
pub mod classes;
pub mod config;
pub mod dispatch;
pub mod doubles;
pub mod error;
pub mod grant;
pub mod log;
pub mod metrics;
pub mod resource;
pub mod system;

pub use alloc_trait::Allocator;
pub use classes::ClassAllocator;
pub use dispatch::{allocate, allocate_at_least, array_layout, deallocate, units_for_bytes};
pub use error::AllocError;
pub use grant::{AllocationResult, Grant};
pub use metrics::{AllocatorMetrics, MetricsSnapshot, global_metrics};
pub use resource::{FeedbackResource, MemoryResource, ResourceAllocator};
pub use system::SystemAllocator;
