use crate::exceptions::{HeapError, HeapResult};
use crate::heap::{Heap, HeapData, HeapId};
use crate::resource::ResourceTracker;
use crate::values::Slot;

/// Capacity of the first slot array allocated for a list that started empty.
const INITIAL_GROWTH_CAPACITY: usize = 8;

/// Python list header.
///
/// The elements live in a separate [`Slots`](crate::values::Slots) object; the header
/// records which one and how many of its leading slots are in use. Slots past `len` are
/// always empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct List {
    slots: HeapId,
    len: usize,
}

impl List {
    /// Payload bytes of the header: the slot array reference and the length.
    pub const PAYLOAD_SIZE: usize = 16;

    pub(crate) fn new(slots: HeapId) -> Self {
        Self { slots, len: 0 }
    }

    /// Handle of the slot array holding the elements.
    #[must_use]
    pub fn slots(&self) -> HeapId {
        self.slots
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Maps a possibly negative Python index onto `[0, len)`.
fn normalize_index(index: i64, len: usize) -> HeapResult<usize> {
    let adjusted = if index < 0 {
        i64::try_from(len).ok().and_then(|len| index.checked_add(len))
    } else {
        Some(index)
    };
    adjusted
        .and_then(|i| usize::try_from(i).ok())
        .filter(|&i| i < len)
        .ok_or(HeapError::IndexError { index, len })
}

impl<T: ResourceTracker> Heap<T> {
    /// Allocates an empty list whose slot array can hold `capacity` elements without growing.
    ///
    /// The slot array is allocated first. If the header then does not fit, the array is
    /// released again so the failure leaves the arena untouched.
    pub fn list_with_capacity(&mut self, capacity: usize) -> HeapResult<HeapId> {
        let slots = self.alloc_slots(capacity)?;
        self.allocate(HeapData::List(List::new(slots))).inspect_err(|_| {
            self.dec_ref(slots);
        })
    }

    /// Allocates a list holding `items` in order. The list takes its own reference to each.
    pub fn new_list(&mut self, items: &[HeapId]) -> HeapResult<HeapId> {
        let id = self.list_with_capacity(items.len())?;
        for &item in items {
            // fits without growing, so this cannot allocate
            self.list_append(id, item)?;
        }
        Ok(id)
    }

    /// Elements of `list` in order. Borrowed handles, no references are taken.
    pub(crate) fn list_items(&self, list: List) -> impl Iterator<Item = HeapId> + '_ {
        self.slots(list.slots()).iter().take(list.len()).filter_map(Slot::id)
    }

    /// Returns a new reference to `list[index]`.
    pub fn list_get(&mut self, id: HeapId, index: i64) -> HeapResult<HeapId> {
        let list = self.list(id)?;
        let index = normalize_index(index, list.len())?;
        let item = self
            .slots(list.slots())
            .get(index)
            .id()
            .unwrap_or_else(|| panic!("Heap::list_get: empty slot below list length"));
        self.inc_ref(item);
        Ok(item)
    }

    /// `list[index] = value`. The list takes its own reference to `value`.
    pub fn list_set(&mut self, id: HeapId, index: i64, value: HeapId) -> HeapResult<()> {
        let list = self.list(id)?;
        let index = normalize_index(index, list.len())?;
        self.inc_ref(value);
        let old = self.slots_mut(list.slots()).replace(index, Slot::Ref(value));
        if let Some(old) = old.id() {
            self.dec_ref(old);
        }
        Ok(())
    }

    /// Appends `value`, doubling the slot array when it is full.
    ///
    /// Growth allocates the new array before touching the old one, so an out-of-memory
    /// failure leaves the list exactly as it was.
    pub fn list_append(&mut self, id: HeapId, value: HeapId) -> HeapResult<()> {
        let mut list = self.list(id)?;
        let capacity = self.slots(list.slots()).capacity();
        if list.len() == capacity {
            let grown = if capacity == 0 {
                INITIAL_GROWTH_CAPACITY
            } else {
                capacity.saturating_mul(2)
            };
            let new_slots = self.alloc_slots(grown)?;
            let old_slots = list.slots();
            let moved: Vec<Slot> = self.slots(old_slots).iter().collect();
            self.slots_mut(old_slots).clear();
            let target = self.slots_mut(new_slots);
            for (index, slot) in moved.into_iter().enumerate() {
                target.replace(index, slot);
            }
            list.slots = new_slots;
            self.set_list(id, list);
            self.dec_ref(old_slots);
        }

        self.inc_ref(value);
        self.slots_mut(list.slots()).replace(list.len(), Slot::Ref(value));
        list.len += 1;
        self.set_list(id, list);
        Ok(())
    }

    /// `del list[index]`: shifts later elements down by one.
    pub fn list_delete(&mut self, id: HeapId, index: i64) -> HeapResult<()> {
        let mut list = self.list(id)?;
        let index = normalize_index(index, list.len())?;
        let slots = self.slots_mut(list.slots());
        let removed = slots.replace(index, Slot::Empty);
        for i in index + 1..list.len() {
            let next = slots.replace(i, Slot::Empty);
            slots.replace(i - 1, next);
        }
        list.len -= 1;
        self.set_list(id, list);
        if let Some(removed) = removed.id() {
            self.dec_ref(removed);
        }
        Ok(())
    }
}
