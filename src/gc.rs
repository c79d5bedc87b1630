//! On-demand mark-sweep collection of reference cycles, followed by compaction.
//!
//! Reference counting frees everything except cycles. The evaluator calls
//! [`Heap::collect`] with its root set at a safe point; nothing here runs implicitly.
use std::fmt;

use crate::heap::{FALSE_ID, Heap, HeapId, NONE_ID, TRUE_ID};
use crate::resource::ResourceTracker;

/// Outcome of one [`Heap::collect`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GcReport {
    /// Unreachable objects freed, slot arrays included.
    pub objects_freed: usize,
    /// Drop in `bytes_in_use` caused by the sweep.
    pub bytes_reclaimed: usize,
    /// Blocks that changed offset during compaction.
    pub blocks_moved: usize,
}

impl fmt::Display for GcReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reclaimed {} bytes of garbage.", self.bytes_reclaimed)
    }
}

impl<T: ResourceTracker> Heap<T> {
    /// Frees every object not reachable from `roots` or the singletons.
    ///
    /// Survivors keep exact reference counts: edges from garbage into them are released
    /// before the garbage goes. Roots naming freed handles are skipped. Compacts the
    /// arena afterwards when the config asks for it.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = HeapId>) -> GcReport {
        let bytes_before = self.arena.bytes_in_use();
        tracing::debug!(live = self.live, bytes_in_use = bytes_before, "collection started");

        self.mark(roots);
        let objects_freed = self.sweep();
        self.unmark();
        let bytes_reclaimed = bytes_before - self.arena.bytes_in_use();

        let blocks_moved = if self.config.compact_on_collect {
            self.compact()
        } else {
            0
        };
        self.tracker.on_gc_complete();

        let report = GcReport {
            objects_freed,
            bytes_reclaimed,
            blocks_moved,
        };
        if bytes_reclaimed > 0 {
            tracing::info!(objects_freed, bytes_reclaimed, blocks_moved, "{report}");
        }
        report
    }

    /// Slides every live block to the low end of the arena.
    ///
    /// Handles stay valid; only block offsets change. Returns how many blocks moved.
    pub fn compact(&mut self) -> usize {
        let moved = self
            .arena
            .compact(self.entries.iter_mut().flatten().map(|entry| &mut entry.block));
        tracing::debug!(moved, free = self.arena.largest_free_region(), "arena compacted");
        moved
    }

    fn mark(&mut self, roots: impl IntoIterator<Item = HeapId>) {
        let mut work_list = vec![NONE_ID, TRUE_ID, FALSE_ID];
        work_list.extend(roots);

        while let Some(id) = work_list.pop() {
            let Some(Some(entry)) = self.entries.get_mut(id.index()) else {
                continue;
            };
            if entry.marked {
                continue;
            }
            entry.marked = true;
            entry.data.push_child_ids(&mut work_list);
        }
    }

    /// Frees every unmarked object and returns how many there were.
    fn sweep(&mut self) -> usize {
        let garbage: Vec<HeapId> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.as_ref().is_some_and(|entry| !entry.marked))
            .map(|(index, _)| HeapId(index))
            .collect();

        // release edges into survivors only; edges between garbage objects die with them
        let mut children = Vec::new();
        for id in &garbage {
            children.clear();
            if let Some(entry) = &self.entries[id.index()] {
                entry.data.push_child_ids(&mut children);
            }
            for child in &children {
                if let Some(Some(survivor)) = self.entries.get_mut(child.index())
                    && survivor.marked
                {
                    debug_assert!(survivor.refcount > 1, "Heap::collect: survivor owned only by garbage");
                    survivor.refcount -= 1;
                }
            }
        }

        for &id in &garbage {
            if let Some(value) = self.entries[id.index()].take() {
                self.release(id, value.block);
            }
        }
        garbage.len()
    }

    fn unmark(&mut self) {
        for entry in self.entries.iter_mut().flatten() {
            entry.marked = false;
        }
    }
}
