use indexmap::IndexMap;

use crate::exceptions::{HeapError, HeapResult};
use crate::heap::{DropWithHeap, Heap, HeapId};
use crate::resource::ResourceTracker;

/// Global bindings of a running program: the root set handed to [`Heap::collect`].
///
/// Every bound handle is an owned reference. Names keep their first-binding order.
#[derive(Debug, Default)]
pub struct Namespace {
    bindings: IndexMap<String, HeapId>,
}

impl Namespace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `value`, taking over the caller's reference.
    ///
    /// A previous binding of the same name is released.
    pub fn bind<T: ResourceTracker>(&mut self, heap: &mut Heap<T>, name: impl Into<String>, value: HeapId) {
        if let Some(old) = self.bindings.insert(name.into(), value) {
            heap.dec_ref(old);
        }
    }

    /// Returns a new reference to the value bound to `name`.
    pub fn get<T: ResourceTracker>(&self, heap: &mut Heap<T>, name: &str) -> HeapResult<HeapId> {
        let id = self.lookup(name)?;
        heap.inc_ref(id);
        Ok(id)
    }

    /// The handle bound to `name`, borrowed.
    pub fn lookup(&self, name: &str) -> HeapResult<HeapId> {
        self.bindings
            .get(name)
            .copied()
            .ok_or_else(|| HeapError::NameError(name.to_string()))
    }

    /// `del name`: removes the binding and releases its reference.
    pub fn unbind<T: ResourceTracker>(&mut self, heap: &mut Heap<T>, name: &str) -> HeapResult<()> {
        let id = self
            .bindings
            .shift_remove(name)
            .ok_or_else(|| HeapError::NameError(name.to_string()))?;
        heap.dec_ref(id);
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Bound handles, for [`Heap::collect`].
    pub fn roots(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.bindings.values().copied()
    }

    /// Releases every binding.
    pub fn clear<T: ResourceTracker>(&mut self, heap: &mut Heap<T>) {
        self.bindings.drain(..).map(|(_, id)| id).collect::<Vec<_>>().drop_with_heap(heap);
    }
}
