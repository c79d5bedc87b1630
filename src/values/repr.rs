//! Textual rendering of heap values.
use std::fmt::{self, Write};

use crate::arena::Block;
use crate::heap::{Heap, HeapData, HeapId};
use crate::resource::ResourceTracker;
use crate::values::Slot;
use crate::values::str::string_repr_fmt;

/// Containers nested deeper than this render as `...`, which also bounds cycles.
pub const MAX_REPR_DEPTH: usize = 4;

impl<T: ResourceTracker> Heap<T> {
    /// Renders `id` the way it appears inside a container: strings are quoted.
    #[must_use]
    pub fn py_repr(&self, id: HeapId) -> String {
        let mut out = String::new();
        // writing to a String cannot fail
        self.repr_fmt(id, MAX_REPR_DEPTH, &mut out).unwrap();
        out
    }

    /// Renders `id` for display: like [`Heap::py_repr`] but a top-level string is bare.
    #[must_use]
    pub fn py_str(&self, id: HeapId) -> String {
        match self.get(id) {
            HeapData::Str(s) => s.as_str().to_owned(),
            _ => self.py_repr(id),
        }
    }

    /// Writes one line per block of the arena in address order, live and free alike.
    ///
    /// Live lines carry the offset, size, handle, refcount and type. Scalars show their
    /// value; containers show the handles of their slot arrays, and slot arrays list
    /// their cells (`-` for empty, `x` for a tombstone).
    pub fn dump<W: Write>(&self, f: &mut W) -> fmt::Result {
        let mut blocks: Vec<(Block, Option<HeapId>)> =
            self.arena.free_regions().map(|block| (block, None)).collect();
        blocks.extend(self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry.as_ref().map(|entry| (entry.block, Some(HeapId(index))))
        }));
        blocks.sort_unstable_by_key(|(block, _)| block.offset());

        for (block, id) in blocks {
            let Some(id) = id else {
                writeln!(f, "Free  0x{:08x}; size {}", block.offset(), block.size())?;
                continue;
            };
            let data = self.get(id);
            write!(
                f,
                "Value 0x{:08x}; size {}; ref {}; refcnt: {}; type = {}; ",
                block.offset(),
                block.size(),
                id.index(),
                self.get_refcount(id),
                data.py_type()
            )?;
            match data {
                HeapData::List(list) => write!(f, "slots = {}", list.slots().index())?,
                HeapData::Dict(dict) => {
                    write!(f, "keys = {}; values = {}", dict.keys().index(), dict.values().index())?;
                }
                HeapData::Slots(slots) => {
                    f.write_str("values = [")?;
                    for (i, slot) in slots.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        match slot {
                            Slot::Empty => f.write_char('-')?,
                            Slot::Tombstone => f.write_char('x')?,
                            Slot::Ref(child) => write!(f, "{}", child.index())?,
                        }
                    }
                    f.write_char(']')?;
                }
                _ => {
                    f.write_str("value = ")?;
                    self.repr_fmt(id, 1, f)?;
                }
            }
            f.write_char('\n')?;
        }
        Ok(())
    }

    /// Writes the repr of `id` with `depth` levels of nesting left.
    pub fn repr_fmt<W: Write>(&self, id: HeapId, depth: usize, f: &mut W) -> fmt::Result {
        let Some(depth) = depth.checked_sub(1) else {
            return f.write_str("...");
        };
        match self.get(id) {
            HeapData::None => f.write_str("None"),
            HeapData::Bool(true) => f.write_str("True"),
            HeapData::Bool(false) => f.write_str("False"),
            HeapData::Int(i) => write!(f, "{i}"),
            HeapData::Str(s) => string_repr_fmt(s, f),
            HeapData::List(list) => {
                f.write_char('[')?;
                for (i, item) in self.list_items(*list).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    self.repr_fmt(item, depth, f)?;
                }
                f.write_char(']')
            }
            HeapData::Dict(dict) => {
                f.write_char('{')?;
                for (i, (key, value)) in self.dict_pairs(*dict).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    self.repr_fmt(key, depth, f)?;
                    f.write_str(": ")?;
                    self.repr_fmt(value, depth, f)?;
                }
                f.write_char('}')
            }
            HeapData::Slots(slots) => write!(f, "<slots capacity={}>", slots.capacity()),
        }
    }
}
