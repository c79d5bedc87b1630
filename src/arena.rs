//! Fixed-capacity block allocator that owns the physical layout of every heap object.
//!
//! The arena only deals in byte ranges. It never sees object payloads: the heap keeps
//! one [`Block`] per live object and hands blocks back here when the object dies.

use std::collections::BTreeMap;

use crate::exceptions::{HeapError, HeapResult};

/// Bytes every block spends on its header (type tag, size and refcount words).
pub const HEADER_SIZE: usize = 24;

/// Block sizes and the arena capacity are multiples of this.
pub const ALIGNMENT: usize = 8;

/// Rounds `size` up to the allocation granularity.
#[must_use]
pub const fn align_up(size: usize) -> usize {
    size.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// How the arena picks among the free regions large enough for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitPolicy {
    /// Smallest region that fits, lowest address on ties.
    #[default]
    BestFit,
    /// Lowest-addressed region that fits.
    FirstFit,
}

/// A contiguous byte range inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    offset: usize,
    size: usize,
}

impl Block {
    #[must_use]
    pub fn offset(self) -> usize {
        self.offset
    }

    /// Size charged for this block, including any slack absorbed from a free region.
    #[must_use]
    pub fn size(self) -> usize {
        self.size
    }

    #[must_use]
    pub fn end(self) -> usize {
        self.offset + self.size
    }
}

/// Block allocator over a single fixed-size region.
///
/// Free regions live in a map keyed by start offset, so every search walks them in
/// address order and placement is deterministic for a given sequence of requests.
/// Freed blocks are filed as their own regions; runs of neighbouring regions are only
/// merged when a search comes up empty.
#[derive(Debug, Clone)]
pub struct Arena {
    capacity: usize,
    fit: FitPolicy,
    /// Start offset -> length of every free region.
    free: BTreeMap<usize, usize>,
    in_use: usize,
}

impl Arena {
    /// Creates an arena of `capacity` bytes, rounded down to the granularity.
    #[must_use]
    pub fn new(capacity: usize, fit: FitPolicy) -> Self {
        let capacity = capacity / ALIGNMENT * ALIGNMENT;
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        Self {
            capacity,
            fit,
            free,
            in_use: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sum of the sizes of all live blocks.
    #[must_use]
    pub fn bytes_in_use(&self) -> usize {
        self.in_use
    }

    #[must_use]
    pub fn bytes_free(&self) -> usize {
        self.capacity - self.in_use
    }

    /// Length of the largest free region as the free list currently stands.
    #[must_use]
    pub fn largest_free_region(&self) -> usize {
        self.free.values().copied().max().unwrap_or(0)
    }

    /// Free regions in address order.
    pub fn free_regions(&self) -> impl Iterator<Item = Block> + '_ {
        self.free.iter().map(|(&offset, &size)| Block { offset, size })
    }

    /// Reserves a block for an object whose header plus payload needs `size` bytes.
    ///
    /// The request is raised to the minimum block size and rounded to the granularity.
    /// A free region is split only when the remainder could hold more than a header;
    /// otherwise the caller receives the whole region.
    pub fn allocate(&mut self, size: usize) -> HeapResult<Block> {
        if size > self.capacity {
            return Err(self.out_of_memory(size));
        }
        let size = align_up(size.max(HEADER_SIZE));
        if let Some(block) = self.take_fit(size) {
            return Ok(block);
        }
        if self.coalesce() > 0
            && let Some(block) = self.take_fit(size)
        {
            return Ok(block);
        }
        Err(self.out_of_memory(size))
    }

    /// The error for a request of `requested` bytes that cannot be placed.
    pub(crate) fn out_of_memory(&self, requested: usize) -> HeapError {
        HeapError::OutOfMemory {
            requested,
            in_use: self.in_use,
            capacity: self.capacity,
        }
    }

    fn take_fit(&mut self, size: usize) -> Option<Block> {
        let mut fits = self.free.iter().filter(|&(_, &len)| len >= size);
        let (offset, len) = match self.fit {
            FitPolicy::BestFit => fits.min_by_key(|&(_, &len)| len),
            FitPolicy::FirstFit => fits.next(),
        }
        .map(|(&offset, &len)| (offset, len))?;
        self.free.remove(&offset);

        let remainder = len - size;
        let block = if remainder > HEADER_SIZE {
            self.free.insert(offset + size, remainder);
            Block { offset, size }
        } else {
            Block { offset, size: len }
        };
        self.in_use += block.size;
        Some(block)
    }

    /// Returns a block to the free list.
    pub fn free(&mut self, block: Block) {
        debug_assert!(block.end() <= self.capacity, "Arena::free: block outside arena");
        debug_assert!(
            !self.free.contains_key(&block.offset),
            "Arena::free: block already free"
        );
        self.free.insert(block.offset, block.size);
        self.in_use -= block.size;
    }

    /// Merges every run of touching free regions into one region.
    ///
    /// Returns the number of merges performed.
    pub fn coalesce(&mut self) -> usize {
        let mut merged = BTreeMap::new();
        let mut merges = 0;
        let mut current: Option<(usize, usize)> = None;
        for (&offset, &len) in &self.free {
            current = match current {
                Some((start, run)) if start + run == offset => {
                    merges += 1;
                    Some((start, run + len))
                }
                Some((start, run)) => {
                    merged.insert(start, run);
                    Some((offset, len))
                }
                None => Some((offset, len)),
            };
        }
        if let Some((start, run)) = current {
            merged.insert(start, run);
        }
        self.free = merged;
        merges
    }

    /// Slides `live` blocks to the low end of the arena, keeping their address order.
    ///
    /// Afterwards all free space forms one region at the high end. The caller must pass
    /// every live block exactly once. Returns how many blocks changed offset.
    pub fn compact<'a, I>(&mut self, live: I) -> usize
    where
        I: IntoIterator<Item = &'a mut Block>,
    {
        let mut blocks: Vec<&mut Block> = live.into_iter().collect();
        blocks.sort_unstable_by_key(|block| block.offset);

        let mut cursor = 0;
        let mut moved = 0;
        for block in blocks {
            if block.offset != cursor {
                block.offset = cursor;
                moved += 1;
            }
            cursor += block.size;
        }
        debug_assert_eq!(cursor, self.in_use, "Arena::compact: live blocks do not match usage");

        self.free.clear();
        if cursor < self.capacity {
            self.free.insert(cursor, self.capacity - cursor);
        }
        moved
    }
}
