//! Per-shard magazine cache of free blocks.
//!
//! Each shard keeps a small stack of recently released blocks per size
//! class. Threads are pinned to a shard on first use, so a thread usually
//! reuses its own blocks without touching the central bins.

use std::ptr::NonNull;

use super::size_class::NUM_SIZE_CLASSES;

/// Address of a free block owned by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeBlock(pub(crate) NonNull<u8>);

// SAFETY: a free block is plain memory with no owner besides the cache that holds it.
unsafe impl Send for FreeBlock {}

/// Stack of free blocks for one size class.
#[derive(Debug, Clone)]
struct Magazine {
    blocks: Vec<FreeBlock>,
    capacity: usize,
}

impl Magazine {
    fn new(capacity: usize) -> Self {
        Self {
            blocks: Vec::new(),
            capacity,
        }
    }

    fn pop(&mut self) -> Option<FreeBlock> {
        self.blocks.pop()
    }

    /// Returns `false` if the magazine is full.
    fn push(&mut self, block: FreeBlock) -> bool {
        if self.blocks.len() < self.capacity {
            self.blocks.push(block);
            true
        } else {
            false
        }
    }
}

/// One magazine per size class.
#[derive(Debug)]
pub(crate) struct MagazineRack {
    magazines: Vec<Magazine>,
    total_cached: usize,
}

impl MagazineRack {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            magazines: (0..NUM_SIZE_CLASSES)
                .map(|_| Magazine::new(capacity))
                .collect(),
            total_cached: 0,
        }
    }

    /// Take a cached block of class `bin`, if any.
    pub(crate) fn take(&mut self, bin: usize) -> Option<FreeBlock> {
        let block = self.magazines.get_mut(bin)?.pop();
        if block.is_some() {
            self.total_cached -= 1;
        }
        block
    }

    /// Cache a block of class `bin`. Returns `false` when the magazine is full.
    pub(crate) fn stash(&mut self, bin: usize, block: FreeBlock) -> bool {
        let Some(magazine) = self.magazines.get_mut(bin) else {
            return false;
        };
        let cached = magazine.push(block);
        if cached {
            self.total_cached += 1;
        }
        cached
    }

    pub(crate) fn total_cached(&self) -> usize {
        self.total_cached
    }

    /// Remove every cached block, paired with its bin.
    pub(crate) fn drain(&mut self) -> Vec<(usize, FreeBlock)> {
        self.total_cached = 0;
        self.magazines
            .iter_mut()
            .enumerate()
            .flat_map(|(bin, magazine)| {
                std::mem::take(&mut magazine.blocks)
                    .into_iter()
                    .map(move |block| (bin, block))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(addr: usize) -> FreeBlock {
        FreeBlock(NonNull::new(std::ptr::without_provenance_mut(addr)).unwrap())
    }

    #[test]
    fn new_rack_is_empty() {
        let mut rack = MagazineRack::new(4);
        assert_eq!(rack.total_cached(), 0);
        assert!(rack.take(0).is_none());
        assert!(rack.take(5).is_none());
    }

    #[test]
    fn stash_and_take_lifo() {
        let mut rack = MagazineRack::new(4);
        assert!(rack.stash(0, block(0x1000)));
        assert!(rack.stash(0, block(0x2000)));
        assert_eq!(rack.total_cached(), 2);
        assert_eq!(rack.take(0), Some(block(0x2000)));
        assert_eq!(rack.take(0), Some(block(0x1000)));
        assert!(rack.take(0).is_none());
        assert_eq!(rack.total_cached(), 0);
    }

    #[test]
    fn classes_are_separate() {
        let mut rack = MagazineRack::new(4);
        rack.stash(0, block(0x1000));
        rack.stash(5, block(0x2000));
        assert_eq!(rack.take(0), Some(block(0x1000)));
        assert!(rack.take(0).is_none());
        assert_eq!(rack.take(5), Some(block(0x2000)));
    }

    #[test]
    fn full_magazine_refuses() {
        let mut rack = MagazineRack::new(2);
        assert!(rack.stash(3, block(0x10)));
        assert!(rack.stash(3, block(0x20)));
        assert!(!rack.stash(3, block(0x30)));
        assert_eq!(rack.total_cached(), 2);
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let mut rack = MagazineRack::new(0);
        assert!(!rack.stash(0, block(0x10)));
    }

    #[test]
    fn out_of_range_bins() {
        let mut rack = MagazineRack::new(4);
        assert!(rack.take(NUM_SIZE_CLASSES).is_none());
        assert!(!rack.stash(NUM_SIZE_CLASSES, block(0x10)));
    }

    #[test]
    fn drain_returns_everything_with_bins() {
        let mut rack = MagazineRack::new(4);
        rack.stash(1, block(0x10));
        rack.stash(1, block(0x20));
        rack.stash(7, block(0x30));
        let mut drained = rack.drain();
        drained.sort_by_key(|(_, b)| b.0.as_ptr() as usize);
        assert_eq!(
            drained,
            vec![(1, block(0x10)), (1, block(0x20)), (7, block(0x30))]
        );
        assert_eq!(rack.total_cached(), 0);
        assert!(rack.take(1).is_none());
    }
}
