use crate::exceptions::{HeapError, HeapResult, exc_static};
use crate::heap::{Heap, HeapData, HeapId};
use crate::resource::ResourceTracker;
use crate::values::{Slot, Slots};

/// Sizing and load rules shared by every dict on a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DictPolicy {
    /// Smallest slot array a dict is created with.
    pub min_capacity: usize,
    /// Rebuild once live entries plus tombstones reach this share of the capacity.
    pub max_load_percent: usize,
    /// Capacity multiplier applied on rebuild.
    pub growth_factor: usize,
}

impl Default for DictPolicy {
    fn default() -> Self {
        Self {
            min_capacity: 16,
            max_load_percent: 50,
            growth_factor: 2,
        }
    }
}

impl DictPolicy {
    /// Capacity of a fresh dict expected to hold `expected` entries.
    #[must_use]
    pub fn initial_capacity(&self, expected: usize) -> usize {
        expected
            .saturating_mul(2)
            .checked_next_power_of_two()
            .unwrap_or(usize::MAX)
            .max(self.min_capacity)
            .max(1)
    }

    /// Whether a table with `occupied` used slots out of `capacity` must be rebuilt.
    ///
    /// The load is clamped to `1..=100` so a table always keeps an empty slot to end
    /// probe sequences on.
    #[must_use]
    pub fn needs_resize(&self, occupied: usize, capacity: usize) -> bool {
        occupied * 100 >= capacity * self.max_load_percent.clamp(1, 100)
    }

    #[must_use]
    pub fn grown_capacity(&self, capacity: usize) -> usize {
        capacity.max(1).saturating_mul(self.growth_factor.max(2))
    }
}

fn bucket(hash: u64, capacity: usize) -> usize {
    // the remainder is below `capacity`, so it fits back into usize
    (hash % capacity as u64) as usize
}

/// Python dict header: open-addressed table with linear probing.
///
/// Keys and values live in two parallel [`Slots`] objects of equal capacity. Deleted
/// entries leave a `Slot::Tombstone` in the key array so probe chains stay intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dict {
    keys: HeapId,
    values: HeapId,
    /// Live entries.
    len: usize,
    /// Live entries plus tombstones.
    occupied: usize,
}

impl Dict {
    /// Payload bytes of the header: length, occupied count and the two array references.
    pub const PAYLOAD_SIZE: usize = 24;

    #[must_use]
    pub fn keys(&self) -> HeapId {
        self.keys
    }

    #[must_use]
    pub fn values(&self) -> HeapId {
        self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live entries plus tombstones.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.occupied
    }
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new_dict(&mut self) -> HeapResult<HeapId> {
        self.dict_with_capacity(0)
    }

    /// Allocates an empty dict sized for `expected` entries under the heap's [`DictPolicy`].
    ///
    /// Allocation order is key array, value array, header. A failure releases whatever
    /// was already allocated.
    pub fn dict_with_capacity(&mut self, expected: usize) -> HeapResult<HeapId> {
        let capacity = self.config.dict.initial_capacity(expected);
        let (keys, values) = self.alloc_table(capacity)?;
        let dict = Dict {
            keys,
            values,
            len: 0,
            occupied: 0,
        };
        self.allocate(HeapData::Dict(dict)).inspect_err(|_| {
            self.dec_ref(keys);
            self.dec_ref(values);
        })
    }

    fn alloc_table(&mut self, capacity: usize) -> HeapResult<(HeapId, HeapId)> {
        let keys = self.alloc_slots(capacity)?;
        let values = self.alloc_slots(capacity).inspect_err(|_| self.dec_ref(keys))?;
        Ok((keys, values))
    }

    /// Slot holding `key`, probing past tombstones.
    pub(crate) fn find_key(&self, dict: Dict, hash: u64, key: HeapId) -> Option<usize> {
        let keys = self.slots(dict.keys());
        let capacity = keys.capacity();
        if capacity == 0 {
            return None;
        }
        let mut index = bucket(hash, capacity);
        for _ in 0..capacity {
            match keys.get(index) {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Ref(stored) => {
                    if self.py_eq(stored, key) {
                        return Some(index);
                    }
                }
            }
            index = (index + 1) % capacity;
        }
        None
    }

    /// First empty or tombstoned slot on the probe chain of `hash`.
    fn vacant_slot(&self, dict: Dict, hash: u64) -> HeapResult<usize> {
        let keys = self.slots(dict.keys());
        let capacity = keys.capacity();
        let start = bucket(hash, capacity.max(1));
        (0..capacity)
            .map(|step| (start + step) % capacity)
            .find(|&index| keys.get(index).id().is_none())
            .ok_or_else(|| exc_static!(InvariantViolation; "dict table has no vacant slot"))
    }

    /// Returns a new reference to `dict[key]`.
    pub fn dict_get(&mut self, id: HeapId, key: HeapId) -> HeapResult<HeapId> {
        let dict = self.dict(id)?;
        let hash = self.py_hash(key)?;
        let slot = self
            .find_key(dict, hash, key)
            .ok_or_else(|| HeapError::KeyError(self.py_repr(key)))?;
        let value = self
            .slots(dict.values())
            .get(slot)
            .id()
            .unwrap_or_else(|| panic!("Heap::dict_get: key without a value"));
        self.inc_ref(value);
        Ok(value)
    }

    /// Whether `key` is present.
    pub fn dict_contains(&self, id: HeapId, key: HeapId) -> HeapResult<bool> {
        let dict = self.dict(id)?;
        let hash = self.py_hash(key)?;
        Ok(self.find_key(dict, hash, key).is_some())
    }

    /// `dict[key] = value`. The dict takes its own references to `key` and `value`.
    ///
    /// Overwriting keeps the stored key and swaps the value, taking the new reference
    /// before releasing the old one. A new key goes into the first vacant slot of its
    /// probe chain; if that pushes the load over the policy limit the table is rebuilt.
    pub fn dict_set(&mut self, id: HeapId, key: HeapId, value: HeapId) -> HeapResult<()> {
        let mut dict = self.dict(id)?;
        let hash = self.py_hash(key)?;

        if let Some(slot) = self.find_key(dict, hash, key) {
            self.inc_ref(value);
            let old = self.slots_mut(dict.values()).replace(slot, Slot::Ref(value));
            if let Some(old) = old.id() {
                self.dec_ref(old);
            }
            return Ok(());
        }

        let slot = self.vacant_slot(dict, hash)?;
        let keys = self.slots(dict.keys());
        let occupied = dict.occupied + usize::from(keys.get(slot).is_empty());
        if self.config.dict.needs_resize(occupied, keys.capacity()) {
            return self.dict_rebuild(id, dict, (slot, hash, key, value));
        }

        self.inc_ref(key);
        self.inc_ref(value);
        self.slots_mut(dict.keys()).replace(slot, Slot::Ref(key));
        self.slots_mut(dict.values()).replace(slot, Slot::Ref(value));
        dict.len += 1;
        dict.occupied = occupied;
        self.set_dict(id, dict);
        Ok(())
    }

    /// Inserts `pending` and moves every live entry into a larger table.
    ///
    /// Entries are re-inserted in the order of their old slots, with the pending entry
    /// taking the place it would have had in the old table. Both new arrays are
    /// allocated before anything changes, so running out of memory leaves the dict as
    /// it was before the insert.
    fn dict_rebuild(
        &mut self,
        id: HeapId,
        dict: Dict,
        pending: (usize, u64, HeapId, HeapId),
    ) -> HeapResult<()> {
        let old_keys = dict.keys();
        let old_values = dict.values();
        let capacity = self.config.dict.grown_capacity(self.slots(old_keys).capacity());

        let mut entries = Vec::with_capacity(dict.len() + 1);
        for (index, (key, value)) in self.slots(old_keys).iter().zip(self.slots(old_values).iter()).enumerate() {
            if let (Some(key), Some(value)) = (key.id(), value.id()) {
                entries.push((index, self.py_hash(key)?, key, value));
            }
        }
        entries.push(pending);
        entries.sort_unstable_by_key(|&(index, ..)| index);

        let (new_keys, new_values) = self.alloc_table(capacity)?;

        let (_, _, key, value) = pending;
        self.inc_ref(key);
        self.inc_ref(value);
        let mut keys = Slots::with_capacity(capacity);
        let mut values = Slots::with_capacity(capacity);
        for &(_, hash, key, value) in &entries {
            let mut index = bucket(hash, capacity);
            while !keys.get(index).is_empty() {
                index = (index + 1) % capacity;
            }
            keys.replace(index, Slot::Ref(key));
            values.replace(index, Slot::Ref(value));
        }
        *self.slots_mut(new_keys) = keys;
        *self.slots_mut(new_values) = values;

        // the new arrays now own every reference the old ones held
        self.slots_mut(old_keys).clear();
        self.slots_mut(old_values).clear();
        let len = entries.len();
        self.set_dict(
            id,
            Dict {
                keys: new_keys,
                values: new_values,
                len,
                occupied: len,
            },
        );
        self.dec_ref(old_keys);
        self.dec_ref(old_values);
        tracing::trace!(capacity, len, "dict rebuilt");
        Ok(())
    }

    /// `del dict[key]`: leaves a tombstone behind.
    pub fn dict_delete(&mut self, id: HeapId, key: HeapId) -> HeapResult<()> {
        let mut dict = self.dict(id)?;
        let hash = self.py_hash(key)?;
        let slot = self
            .find_key(dict, hash, key)
            .ok_or_else(|| HeapError::KeyError(self.py_repr(key)))?;
        let old_key = self.slots_mut(dict.keys()).replace(slot, Slot::Tombstone);
        let old_value = self.slots_mut(dict.values()).replace(slot, Slot::Empty);
        dict.len -= 1;
        self.set_dict(id, dict);
        if let Some(old_key) = old_key.id() {
            self.dec_ref(old_key);
        }
        if let Some(old_value) = old_value.id() {
            self.dec_ref(old_value);
        }
        Ok(())
    }

    /// Live `(key, value)` pairs of `dict` in slot order. Borrowed handles.
    pub(crate) fn dict_pairs(&self, dict: Dict) -> impl Iterator<Item = (HeapId, HeapId)> + '_ {
        self.slots(dict.keys())
            .iter()
            .zip(self.slots(dict.values()).iter())
            .filter_map(|(key, value)| Some((key.id()?, value.id()?)))
    }

    /// Live `(key, value)` pairs in physical slot order.
    ///
    /// The handles are borrowed: no references are taken, so they are only valid until
    /// the dict is next modified.
    pub fn dict_items(&self, id: HeapId) -> HeapResult<Vec<(HeapId, HeapId)>> {
        let dict = self.dict(id)?;
        Ok(self.dict_pairs(dict).collect())
    }

    pub fn dict_len(&self, id: HeapId) -> HeapResult<usize> {
        Ok(self.dict(id)?.len())
    }
}
