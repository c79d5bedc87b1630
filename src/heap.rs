use ahash::AHashMap;

use crate::arena::{Arena, Block, HEADER_SIZE};
use crate::exceptions::{HeapResult, exc_fmt};
use crate::resource::{HeapConfig, MemoryUsage, NoLimitTracker, ResourceTracker};
use crate::values::{Dict, List, Slots, Str, Type};

/// Stable handle of an object stored on the heap.
///
/// Handles never change while the object is alive, even when compaction moves the
/// object's block. A handle is reused once its object has been freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct HeapId(pub(crate) usize);

impl HeapId {
    /// Returns the raw index into the heap's entry table.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// `None` is a singleton allocated when the heap is created.
pub const NONE_ID: HeapId = HeapId(0);
/// `True` singleton.
pub const TRUE_ID: HeapId = HeapId(1);
/// `False` singleton.
pub const FALSE_ID: HeapId = HeapId(2);

/// Payload bytes of an int: one machine word.
const INT_PAYLOAD_SIZE: usize = 8;

/// HeapData captures every value that lives in the arena.
///
/// Containers do not hold their elements inline: a list or dict points at one or two
/// [`Slots`] objects which own the element references. Those slot arrays are heap
/// objects in their own right, with a block, a refcount and a handle.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapData {
    None,
    Bool(bool),
    Int(i64),
    Str(Str),
    List(List),
    Dict(Dict),
    Slots(Slots),
}

impl HeapData {
    #[must_use]
    pub fn py_type(&self) -> Type {
        match self {
            Self::None => Type::NoneType,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Str(_) => Type::Str,
            Self::List(_) => Type::List,
            Self::Dict(_) => Type::Dict,
            Self::Slots(_) => Type::Slots,
        }
    }

    /// Bytes this value needs from the arena before rounding: header plus payload.
    #[must_use]
    pub fn block_size(&self) -> usize {
        HEADER_SIZE
            + match self {
                Self::None | Self::Bool(_) => 0,
                Self::Int(_) => INT_PAYLOAD_SIZE,
                Self::Str(s) => s.payload_size(),
                Self::List(_) => List::PAYLOAD_SIZE,
                Self::Dict(_) => Dict::PAYLOAD_SIZE,
                Self::Slots(slots) => slots.payload_size(),
            }
    }

    /// Pushes every handle this value owns a reference to.
    ///
    /// This is the single definition of an ownership edge: the refcount cascade, the
    /// collector's mark and sweep phases, and [`Heap::verify`] all walk it.
    pub(crate) fn push_child_ids(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::None | Self::Bool(_) | Self::Int(_) | Self::Str(_) => {}
            Self::List(list) => out.push(list.slots()),
            Self::Dict(dict) => {
                out.push(dict.keys());
                out.push(dict.values());
            }
            Self::Slots(slots) => out.extend(slots.ids()),
        }
    }
}

/// A single entry of the heap's handle table.
#[derive(Debug)]
pub(crate) struct HeapValue {
    pub(crate) refcount: usize,
    /// Set only while a collection is running.
    pub(crate) marked: bool,
    pub(crate) block: Block,
    pub(crate) data: HeapData,
}

/// Reference-counted object store on top of a fixed-size [`Arena`].
///
/// Objects are addressed through [`HeapId`] handles. Every handle returned to the
/// caller by a factory or a getter is an *owned* reference: the caller must eventually
/// hand it back with [`Heap::dec_ref`] (or [`DropWithHeap`]). Container stores borrow
/// the value and take a reference of their own.
///
/// Generic over `T: ResourceTracker` so evaluators can observe allocation traffic or
/// cap it. The default `NoLimitTracker` does nothing.
#[derive(Debug)]
pub struct Heap<T: ResourceTracker = NoLimitTracker> {
    pub(crate) entries: Vec<Option<HeapValue>>,
    /// Freed handles available for reuse. Populated by frees, consumed by `allocate`.
    pub(crate) free_list: Vec<HeapId>,
    /// Number of `Some` entries.
    pub(crate) live: usize,
    pub(crate) arena: Arena,
    pub(crate) config: HeapConfig,
    pub(crate) tracker: T,
}

impl Heap<NoLimitTracker> {
    /// Creates a heap and allocates the `None`, `True` and `False` singletons.
    ///
    /// Fails with `OutOfMemory` if the configured capacity cannot even hold those.
    pub fn new(config: HeapConfig) -> HeapResult<Self> {
        Self::with_tracker(config, NoLimitTracker)
    }
}

impl<T: ResourceTracker> Heap<T> {
    /// Creates a heap that reports to `tracker`.
    pub fn with_tracker(config: HeapConfig, tracker: T) -> HeapResult<Self> {
        let mut heap = Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            live: 0,
            arena: Arena::new(config.capacity, config.fit),
            config,
            tracker,
        };
        // the heap keeps the initial reference to each singleton for its whole life
        for data in [HeapData::None, HeapData::Bool(true), HeapData::Bool(false)] {
            heap.allocate(data)?;
        }
        debug_assert_eq!(heap.entries.len(), FALSE_ID.index() + 1);
        Ok(heap)
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Allocates a block for `data` and files it under a fresh handle with refcount 1.
    ///
    /// On failure nothing has changed: no block is held and no handle was consumed.
    pub(crate) fn allocate(&mut self, data: HeapData) -> HeapResult<HeapId> {
        let block = self.arena.allocate(data.block_size()).inspect_err(|err| {
            tracing::warn!(%err, py_type = %data.py_type(), "allocation failed");
        })?;
        if let Err(err) = self.tracker.on_allocate(block.size()) {
            self.arena.free(block);
            return Err(err);
        }

        let entry = HeapValue {
            refcount: 1,
            marked: false,
            block,
            data,
        };
        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(entry));
            id
        };
        self.live += 1;
        Ok(id)
    }

    /// Returns a new reference to the `None` singleton.
    pub fn none(&mut self) -> HeapId {
        self.inc_ref(NONE_ID);
        NONE_ID
    }

    /// Returns a new reference to the `True` or `False` singleton.
    pub fn bool_value(&mut self, value: bool) -> HeapId {
        let id = if value { TRUE_ID } else { FALSE_ID };
        self.inc_ref(id);
        id
    }

    pub fn new_int(&mut self, value: i64) -> HeapResult<HeapId> {
        self.allocate(HeapData::Int(value))
    }

    pub fn new_str(&mut self, value: impl Into<Str>) -> HeapResult<HeapId> {
        self.allocate(HeapData::Str(value.into()))
    }

    /// Increments the reference count for an existing heap entry.
    ///
    /// # Panics
    /// Panics if the handle does not name a live object.
    pub fn inc_ref(&mut self, id: HeapId) {
        self.entry_mut(id, "inc_ref").refcount += 1;
    }

    /// Decrements the reference count and frees the object, plus everything it alone
    /// kept alive, once the count reaches zero.
    ///
    /// Uses an explicit work stack rather than recursion so long ownership chains cannot
    /// overflow the native stack. Each ownership edge is released exactly once, so
    /// diamond-shaped graphs free shared children a single time.
    ///
    /// Cycles are never detected here; they stay alive until [`Heap::collect`].
    ///
    /// # Panics
    /// Panics if the handle does not name a live object.
    pub fn dec_ref(&mut self, id: HeapId) {
        let mut current = id;
        let mut work_stack = Vec::new();
        loop {
            let slot = self
                .entries
                .get_mut(current.index())
                .expect("Heap::dec_ref: slot missing");
            let entry = slot.as_mut().expect("Heap::dec_ref: object already freed");
            if entry.refcount > 1 {
                entry.refcount -= 1;
            } else if let Some(value) = slot.take() {
                value.data.push_child_ids(&mut work_stack);
                self.release(current, value.block);
            }

            let Some(next) = work_stack.pop() else {
                break;
            };
            current = next;
        }
    }

    /// Returns a dead entry's block to the arena and its handle to the free list.
    pub(crate) fn release(&mut self, id: HeapId, block: Block) {
        self.arena.free(block);
        self.tracker.on_free(block.size());
        self.free_list.push(id);
        self.live -= 1;
    }

    /// Returns the heap data stored at the given handle.
    ///
    /// # Panics
    /// Panics if the handle does not name a live object.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.entry(id, "get").data
    }

    pub(crate) fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.entry_mut(id, "get_mut").data
    }

    /// Whether `id` currently names a live object.
    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        matches!(self.entries.get(id.index()), Some(Some(_)))
    }

    /// Returns the reference count of a live object.
    ///
    /// # Panics
    /// Panics if the handle does not name a live object.
    #[must_use]
    pub fn get_refcount(&self, id: HeapId) -> usize {
        self.entry(id, "get_refcount").refcount
    }

    /// Returns the arena block currently backing a live object.
    ///
    /// # Panics
    /// Panics if the handle does not name a live object.
    #[must_use]
    pub fn block(&self, id: HeapId) -> Block {
        self.entry(id, "block").block
    }

    /// Number of live objects, slot arrays and singletons included.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.live
    }

    /// Live-byte and live-handle totals. Never allocates or collects.
    #[must_use]
    pub fn mem(&self) -> MemoryUsage {
        MemoryUsage {
            bytes_in_use: self.arena.bytes_in_use(),
            refs_in_use: self.live,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    #[must_use]
    pub fn bytes_free(&self) -> usize {
        self.arena.bytes_free()
    }

    #[must_use]
    pub fn largest_free_region(&self) -> usize {
        self.arena.largest_free_region()
    }

    /// Free regions of the arena in address order.
    pub fn free_regions(&self) -> impl Iterator<Item = Block> + '_ {
        self.arena.free_regions()
    }

    /// Whether the tracker suggests running [`Heap::collect`] at the next safe point.
    #[must_use]
    pub fn should_collect(&self) -> bool {
        self.tracker.should_gc()
    }

    /// Audits the whole heap.
    ///
    /// Checks that blocks and free regions tile the arena without overlap, that the
    /// cached totals match the entries, that no container points at a freed handle, and
    /// that no object's count is lower than the number of container edges into it.
    pub fn verify(&self) -> HeapResult<()> {
        let mut incoming: AHashMap<HeapId, usize> = AHashMap::new();
        let mut ranges: Vec<Block> = self.arena.free_regions().collect();
        let mut children = Vec::new();
        let mut live = 0;
        let mut bytes = 0;

        for (index, entry) in self.entries.iter().enumerate() {
            let Some(entry) = entry else {
                continue;
            };
            if entry.refcount == 0 {
                return Err(exc_fmt!(InvariantViolation; "object {index} is live with a zero refcount"));
            }
            if entry.marked {
                return Err(exc_fmt!(InvariantViolation; "object {index} still carries a mark bit"));
            }
            live += 1;
            bytes += entry.block.size();
            ranges.push(entry.block);

            children.clear();
            entry.data.push_child_ids(&mut children);
            for &child in &children {
                *incoming.entry(child).or_default() += 1;
            }
        }

        if live != self.live {
            return Err(exc_fmt!(InvariantViolation; "{live} live entries but {} counted", self.live));
        }
        if bytes != self.arena.bytes_in_use() {
            return Err(exc_fmt!(
                InvariantViolation;
                "live blocks hold {bytes} bytes but the arena reports {}",
                self.arena.bytes_in_use()
            ));
        }

        ranges.sort_unstable_by_key(|block| block.offset());
        let mut cursor = 0;
        for block in &ranges {
            if block.offset() != cursor {
                return Err(exc_fmt!(InvariantViolation; "arena gap or overlap at offset {cursor}"));
            }
            cursor = block.end();
        }
        if cursor != self.arena.capacity() {
            return Err(exc_fmt!(InvariantViolation; "arena accounts for {cursor} of {} bytes", self.arena.capacity()));
        }

        for (child, edges) in incoming {
            match self.entries.get(child.index()).and_then(Option::as_ref) {
                None => {
                    return Err(exc_fmt!(InvariantViolation; "edge into freed object {}", child.index()));
                }
                Some(entry) if entry.refcount < edges => {
                    return Err(exc_fmt!(
                        InvariantViolation;
                        "object {} has refcount {} but {edges} incoming edges",
                        child.index(),
                        entry.refcount
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn entry(&self, id: HeapId, caller: &'static str) -> &HeapValue {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("Heap::{caller}: object already freed"))
    }

    fn entry_mut(&mut self, id: HeapId, caller: &'static str) -> &mut HeapValue {
        self.entries
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("Heap::{caller}: object already freed"))
    }

    /// Allocates an empty slot array with room for `capacity` references.
    ///
    /// The size is checked against the arena before the array is built, so an absurd
    /// capacity fails with `OutOfMemory` instead of exhausting process memory.
    pub(crate) fn alloc_slots(&mut self, capacity: usize) -> HeapResult<HeapId> {
        let size = Slots::block_size(capacity).unwrap_or(usize::MAX);
        if size > self.arena.capacity() {
            let err = self.arena.out_of_memory(size);
            tracing::warn!(%err, py_type = %Type::Slots, "allocation failed");
            return Err(err);
        }
        self.allocate(HeapData::Slots(Slots::with_capacity(capacity)))
    }

    /// Returns the slot array behind a container.
    ///
    /// # Panics
    /// Panics if `id` is not a live slot array, which means container bookkeeping broke.
    pub(crate) fn slots(&self, id: HeapId) -> &Slots {
        match &self.entry(id, "slots").data {
            HeapData::Slots(slots) => slots,
            other => panic!("Heap::slots: expected a slot array, found {}", other.py_type()),
        }
    }

    pub(crate) fn slots_mut(&mut self, id: HeapId) -> &mut Slots {
        match &mut self.entry_mut(id, "slots_mut").data {
            HeapData::Slots(slots) => slots,
            other => panic!("Heap::slots_mut: expected a slot array, found {}", other.py_type()),
        }
    }

    /// Copies out the list header stored at `id`.
    pub(crate) fn list(&self, id: HeapId) -> HeapResult<List> {
        match self.get(id) {
            HeapData::List(list) => Ok(*list),
            other => Err(exc_fmt!(TypeError; "expected list, got '{}'", other.py_type())),
        }
    }

    pub(crate) fn set_list(&mut self, id: HeapId, list: List) {
        if let HeapData::List(stored) = self.get_mut(id) {
            *stored = list;
        }
    }

    /// Copies out the dict header stored at `id`.
    pub(crate) fn dict(&self, id: HeapId) -> HeapResult<Dict> {
        match self.get(id) {
            HeapData::Dict(dict) => Ok(*dict),
            other => Err(exc_fmt!(TypeError; "expected dict, got '{}'", other.py_type())),
        }
    }

    pub(crate) fn set_dict(&mut self, id: HeapId, dict: Dict) {
        if let HeapData::Dict(stored) = self.get_mut(id) {
            *stored = dict;
        }
    }
}

/// Trait for types that hold owned heap references.
///
/// Rust's `Drop` cannot decrement heap reference counts because it has no access to
/// the `Heap`, so owned handles are released explicitly through this trait.
pub trait DropWithHeap {
    /// Consume `self` and decrement the reference count of every handle it holds.
    fn drop_with_heap<T: ResourceTracker>(self, heap: &mut Heap<T>);
}

impl DropWithHeap for HeapId {
    #[inline]
    fn drop_with_heap<T: ResourceTracker>(self, heap: &mut Heap<T>) {
        heap.dec_ref(self);
    }
}

impl<U: DropWithHeap> DropWithHeap for Option<U> {
    #[inline]
    fn drop_with_heap<T: ResourceTracker>(self, heap: &mut Heap<T>) {
        if let Some(value) = self {
            value.drop_with_heap(heap);
        }
    }
}

impl<U: DropWithHeap> DropWithHeap for Vec<U> {
    fn drop_with_heap<T: ResourceTracker>(self, heap: &mut Heap<T>) {
        for value in self {
            value.drop_with_heap(heap);
        }
    }
}
