//! Size-class allocator with native size feedback.

pub mod allocator;
pub mod large;
mod magazine;
pub mod size_class;

pub use allocator::{ClassAllocator, NUM_SHARDS};
pub use large::{LargeAllocator, PAGE_SIZE};
pub use size_class::{MAX_SMALL_SIZE, NUM_SIZE_CLASSES, SMALL_ALIGN, SizeClass};
