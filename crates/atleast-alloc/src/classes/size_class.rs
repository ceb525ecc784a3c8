//! Size class bins for small blocks.
//!
//! Sizes from 16 bytes to 32KB are rounded up to one of 32 classes. Every
//! class size is a multiple of [`SMALL_ALIGN`], so a class block serves any
//! layout with alignment up to that. The rounding is monotonic: every size
//! between a request and its class size maps back to the same class, which
//! is what lets a release name any count in the granted range.

use std::alloc::Layout;

/// Minimum block size (bytes).
pub const MIN_SIZE: usize = 16;

/// Maximum size served by a class. Above this, use the page path.
pub const MAX_SMALL_SIZE: usize = 32 * 1024; // 32KB

/// Largest alignment served by a class. Above this, use the page path.
pub const SMALL_ALIGN: usize = 16;

/// Number of size class bins.
pub const NUM_SIZE_CLASSES: usize = 32;

/// Bins 0-7: 16-byte steps. Bins 8-15: 32-byte steps. Then wider steps up to 32KB.
const SIZE_TABLE: [usize; NUM_SIZE_CLASSES] = [
    16, 32, 48, 64, 80, 96, 112, 128, // 16-byte steps
    160, 192, 224, 256, 288, 320, 352, 384, // 32-byte steps
    448, 512, 640, 768, 896, 1024, 1280, 1536, // wider steps
    2048, 2560, 3072, 4096, 8192, 16384, 24576, 32768, // large small classes
];

/// A resolved size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    /// Bin index.
    pub index: usize,
    /// Block size for this class (bytes).
    pub size: usize,
}

impl SizeClass {
    /// Layout of the backing block.
    #[must_use]
    pub fn block_layout(self) -> Layout {
        // SAFETY: table sizes are non-zero multiples of SMALL_ALIGN, far below isize::MAX.
        unsafe { Layout::from_size_align_unchecked(self.size, SMALL_ALIGN) }
    }
}

/// Bin index for `size`, or `NUM_SIZE_CLASSES` above `MAX_SMALL_SIZE`.
#[must_use]
pub fn bin_index(size: usize) -> usize {
    let size = size.max(MIN_SIZE);
    if size > MAX_SMALL_SIZE {
        return NUM_SIZE_CLASSES;
    }
    SIZE_TABLE.partition_point(|&class_size| class_size < size)
}

/// Block size for a bin index, 0 for out-of-range indices.
#[must_use]
pub fn bin_size(index: usize) -> usize {
    SIZE_TABLE.get(index).copied().unwrap_or(0)
}

/// Class serving `layout`, or `None` when it belongs on the page path.
#[must_use]
pub fn class_for(layout: Layout) -> Option<SizeClass> {
    if layout.align() > SMALL_ALIGN || layout.size() > MAX_SMALL_SIZE {
        return None;
    }
    let index = bin_index(layout.size());
    Some(SizeClass {
        index,
        size: SIZE_TABLE[index],
    })
}

/// Class for a bin index, `None` out of range.
#[must_use]
pub fn class_for_bin(index: usize) -> Option<SizeClass> {
    SIZE_TABLE
        .get(index)
        .map(|&size| SizeClass { index, size })
}
