use std::fmt;

use crate::arena::FitPolicy;
use crate::exceptions::{HeapError, HeapResult};
use crate::values::DictPolicy;

/// Arena size used when the evaluator does not ask for one.
pub const DEFAULT_MEMORY_SIZE: usize = 1024;

/// Startup configuration for a [`Heap`](crate::Heap).
///
/// Fixed for the lifetime of the heap: the arena never grows.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Total arena capacity in bytes, rounded down to the block granularity.
    pub capacity: usize,
    /// Which free region a new block is carved from.
    pub fit: FitPolicy,
    /// Run arena compaction at the end of every collection.
    pub compact_on_collect: bool,
    /// Sizing and load policy shared by every dict on the heap.
    pub dict: DictPolicy,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MEMORY_SIZE,
            fit: FitPolicy::default(),
            compact_on_collect: true,
            dict: DictPolicy::default(),
        }
    }
}

impl HeapConfig {
    /// Creates the default configuration with the given arena capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn fit(mut self, fit: FitPolicy) -> Self {
        self.fit = fit;
        self
    }

    #[must_use]
    pub fn compact_on_collect(mut self, compact: bool) -> Self {
        self.compact_on_collect = compact;
        self
    }

    #[must_use]
    pub fn dict_policy(mut self, policy: DictPolicy) -> Self {
        self.dict = policy;
        self
    }
}

/// Snapshot of heap occupancy, as reported by `mem()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryUsage {
    /// Sum of live block sizes in the arena.
    pub bytes_in_use: usize,
    /// Number of live object handles (not the sum of their reference counts).
    pub refs_in_use: usize,
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes in use; {} refs in use", self.bytes_in_use, self.refs_in_use)
    }
}

/// Hooks the heap calls as objects come and go.
///
/// Trackers can refuse allocations and tell the evaluator when a collection would be
/// worthwhile. The heap itself never collects on its own.
pub trait ResourceTracker: fmt::Debug {
    /// Called once the arena has found room for a block of `size` bytes.
    ///
    /// Returning an error cancels the allocation.
    fn on_allocate(&mut self, size: usize) -> HeapResult<()>;

    /// Called for every block returned to the arena, by the cascade or by the collector.
    fn on_free(&mut self, size: usize);

    /// Whether the evaluator should schedule a collection at its next safe point.
    fn should_gc(&self) -> bool;

    /// Called after every collection.
    fn on_gc_complete(&mut self);
}

/// A tracker that imposes no limits and never asks for a collection.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _size: usize) -> HeapResult<()> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _size: usize) {}

    #[inline]
    fn should_gc(&self) -> bool {
        false
    }

    #[inline]
    fn on_gc_complete(&mut self) {}
}

/// Limits enforced by [`LimitedTracker`]. `None` disables a limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of allocations over the heap's lifetime.
    pub max_allocations: Option<usize>,
    /// Suggest a collection every N allocations.
    pub gc_interval: Option<usize>,
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    #[must_use]
    pub fn gc_interval(mut self, interval: usize) -> Self {
        self.gc_interval = Some(interval);
        self
    }
}

/// A tracker that counts allocations, enforces [`ResourceLimits`] and schedules collections.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    allocation_count: usize,
    free_count: usize,
    allocations_since_gc: usize,
    collections: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            allocation_count: 0,
            free_count: 0,
            allocations_since_gc: 0,
            collections: 0,
        }
    }

    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    #[must_use]
    pub fn collections(&self) -> usize {
        self.collections
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, _size: usize) -> HeapResult<()> {
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(HeapError::AllocationLimit {
                limit: max,
                count: self.allocation_count + 1,
            });
        }
        self.allocation_count += 1;
        self.allocations_since_gc += 1;
        Ok(())
    }

    fn on_free(&mut self, _size: usize) {
        self.free_count += 1;
    }

    fn should_gc(&self) -> bool {
        self.limits
            .gc_interval
            .is_some_and(|interval| self.allocations_since_gc >= interval)
    }

    fn on_gc_complete(&mut self) {
        self.allocations_since_gc = 0;
        self.collections += 1;
    }
}
