//! Value types stored on the heap and the operations shared by all of them.
//!
//! Type-specific behaviour lives in the submodules; this module dispatches on the
//! [`HeapData`] variant for hashing, equality, truthiness, length and subscripting.
pub mod dict;
pub mod list;
mod repr;
pub mod slots;
pub mod str;

pub use dict::{Dict, DictPolicy};
pub use list::List;
pub use repr::MAX_REPR_DEPTH;
pub use slots::{Slot, Slots};
pub use str::Str;

use crate::exceptions::{HeapError, HeapResult, exc_fmt};
use crate::heap::{Heap, HeapData, HeapId};
use crate::resource::ResourceTracker;

/// Container comparisons give up, reporting inequality, below this nesting depth.
const MAX_EQ_DEPTH: usize = 1000;

/// Runtime type tag of a heap object, displayed the way the runtime names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Type {
    #[strum(serialize = "NoneType")]
    NoneType,
    Bool,
    Int,
    Str,
    List,
    Dict,
    /// Backing storage of a list or dict. Never visible to programs.
    Slots,
}

impl<T: ResourceTracker> Heap<T> {
    #[must_use]
    pub fn py_type(&self, id: HeapId) -> Type {
        self.get(id).py_type()
    }

    /// Hash used by the dict table.
    ///
    /// Deterministic across runs and platforms, so dict slot order is reproducible.
    /// Containers are unhashable.
    pub fn py_hash(&self, id: HeapId) -> HeapResult<u64> {
        match self.get(id) {
            HeapData::None => Ok(u64::MAX),
            HeapData::Bool(b) => Ok(u64::from(*b)),
            HeapData::Int(i) => Ok(*i as u64),
            HeapData::Str(s) => Ok(s.py_hash()),
            other => Err(HeapError::unhashable(other.py_type())),
        }
    }

    /// Value equality.
    ///
    /// Values of different types are never equal, so `True` and `1` are distinct dict keys.
    #[must_use]
    pub fn py_eq(&self, left: HeapId, right: HeapId) -> bool {
        self.eq_depth(left, right, MAX_EQ_DEPTH)
    }

    fn eq_depth(&self, left: HeapId, right: HeapId, depth: usize) -> bool {
        if left == right {
            return true;
        }
        let Some(depth) = depth.checked_sub(1) else {
            return false;
        };
        match (self.get(left), self.get(right)) {
            (HeapData::Int(a), HeapData::Int(b)) => a == b,
            (HeapData::Str(a), HeapData::Str(b)) => a == b,
            (HeapData::List(a), HeapData::List(b)) => {
                a.len() == b.len()
                    && self
                        .list_items(*a)
                        .zip(self.list_items(*b))
                        .all(|(x, y)| self.eq_depth(x, y, depth))
            }
            (HeapData::Dict(a), HeapData::Dict(b)) => {
                a.len() == b.len()
                    && self.dict_pairs(*a).all(|(key, value)| {
                        self.py_hash(key)
                            .ok()
                            .and_then(|hash| self.find_key(*b, hash, key))
                            .and_then(|slot| self.slots(b.values()).get(slot).id())
                            .is_some_and(|other| self.eq_depth(value, other, depth))
                    })
            }
            // singletons and slot arrays compare by identity only
            _ => false,
        }
    }

    /// Truthiness: empty containers, zero, `None` and `False` are falsy.
    #[must_use]
    pub fn py_bool(&self, id: HeapId) -> bool {
        match self.get(id) {
            HeapData::None => false,
            HeapData::Bool(b) => *b,
            HeapData::Int(i) => *i != 0,
            HeapData::Str(s) => !s.is_empty(),
            HeapData::List(list) => !list.is_empty(),
            HeapData::Dict(dict) => !dict.is_empty(),
            HeapData::Slots(_) => true,
        }
    }

    /// `len()` of a string, list or dict.
    pub fn py_len(&self, id: HeapId) -> HeapResult<usize> {
        match self.get(id) {
            HeapData::Str(s) => Ok(s.char_len()),
            HeapData::List(list) => Ok(list.len()),
            HeapData::Dict(dict) => Ok(dict.len()),
            other => Err(exc_fmt!(TypeError; "object of type '{}' has no len()", other.py_type())),
        }
    }

    /// `container[key]`. Returns a new reference.
    pub fn getitem(&mut self, container: HeapId, key: HeapId) -> HeapResult<HeapId> {
        match self.get(container) {
            HeapData::List(_) => {
                let index = self.list_index(key)?;
                self.list_get(container, index)
            }
            HeapData::Dict(_) => self.dict_get(container, key),
            other => Err(HeapError::not_subscriptable(other.py_type())),
        }
    }

    /// `container[key] = value`. The container takes its own reference to `key` and `value`.
    pub fn setitem(&mut self, container: HeapId, key: HeapId, value: HeapId) -> HeapResult<()> {
        match self.get(container) {
            HeapData::List(_) => {
                let index = self.list_index(key)?;
                self.list_set(container, index, value)
            }
            HeapData::Dict(_) => self.dict_set(container, key, value),
            other => Err(exc_fmt!(
                TypeError;
                "'{}' object does not support item assignment",
                other.py_type()
            )),
        }
    }

    /// `del container[key]`.
    pub fn delitem(&mut self, container: HeapId, key: HeapId) -> HeapResult<()> {
        match self.get(container) {
            HeapData::List(_) => {
                let index = self.list_index(key)?;
                self.list_delete(container, index)
            }
            HeapData::Dict(_) => self.dict_delete(container, key),
            other => Err(exc_fmt!(
                TypeError;
                "'{}' object does not support item deletion",
                other.py_type()
            )),
        }
    }

    fn list_index(&self, key: HeapId) -> HeapResult<i64> {
        match self.get(key) {
            HeapData::Int(i) => Ok(*i),
            other => Err(exc_fmt!(
                TypeError;
                "list indices must be integers, not {}",
                other.py_type()
            )),
        }
    }
}
