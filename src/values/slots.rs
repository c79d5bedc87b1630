//! Backing storage shared by lists and dicts.
use crate::arena::HEADER_SIZE;
use crate::heap::HeapId;

/// Fixed bytes of a slot array payload before the slots themselves: the capacity word.
const SLOTS_HEADER: usize = 8;
/// Bytes charged per slot.
const SLOT_SIZE: usize = 4;

/// One cell of a slot array.
///
/// `Tombstone` only appears in dict key arrays, where it marks a deleted entry that
/// probe sequences must walk past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Slot {
    #[default]
    Empty,
    Tombstone,
    Ref(HeapId),
}

impl Slot {
    /// The handle held by this slot, if any.
    #[must_use]
    pub fn id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            Self::Empty | Self::Tombstone => None,
        }
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Fixed-capacity array of slots, allocated as its own heap object.
///
/// Every `Slot::Ref` is an owned reference: freeing the array releases them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slots(Vec<Slot>);

impl Slots {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self(vec![Slot::Empty; capacity])
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.0.len()
    }

    /// # Panics
    /// Panics if `index` is past the capacity.
    #[must_use]
    pub fn get(&self, index: usize) -> Slot {
        self.0[index]
    }

    /// Stores `slot` at `index` and returns what was there.
    pub(crate) fn replace(&mut self, index: usize, slot: Slot) -> Slot {
        std::mem::replace(&mut self.0[index], slot)
    }

    /// Resets every slot to `Empty` without releasing anything.
    ///
    /// Callers use this after moving the references elsewhere.
    pub(crate) fn clear(&mut self) {
        self.0.fill(Slot::Empty);
    }

    pub(crate) fn payload_size(&self) -> usize {
        SLOTS_HEADER + SLOT_SIZE * self.capacity()
    }

    /// Unrounded block size of an array with `capacity` slots, or `None` on overflow.
    pub(crate) fn block_size(capacity: usize) -> Option<usize> {
        capacity.checked_mul(SLOT_SIZE)?.checked_add(HEADER_SIZE + SLOTS_HEADER)
    }

    pub fn iter(&self) -> impl Iterator<Item = Slot> + '_ {
        self.0.iter().copied()
    }

    /// Every handle stored in the array, in slot order.
    pub fn ids(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.iter().filter_map(Slot::id)
    }
}
