//! Object heap for a small scripting runtime.
//!
//! Every runtime value lives in one fixed-capacity [`arena`] and is addressed through a
//! stable [`HeapId`] handle. Objects are reference counted and freed as soon as their
//! count drops to zero; reference cycles survive until the evaluator runs
//! [`Heap::collect`] with its root set, which also compacts the arena.
//!
//! ```
//! use subheap::{Heap, HeapConfig, Namespace};
//!
//! let mut heap = Heap::new(HeapConfig::new(4096)).unwrap();
//! let mut globals = Namespace::new();
//!
//! let list = heap.list_with_capacity(0).unwrap();
//! heap.list_append(list, list).unwrap();
//! globals.bind(&mut heap, "a", list);
//! assert_eq!(heap.py_repr(list), "[[[[...]]]]");
//!
//! globals.unbind(&mut heap, "a").unwrap();
//! let report = heap.collect(globals.roots());
//! assert_eq!(report.to_string(), "Reclaimed 104 bytes of garbage.");
//! assert_eq!(heap.mem().to_string(), "72 bytes in use; 3 refs in use");
//! ```
pub mod arena;
pub mod exceptions;
mod gc;
mod heap;
mod namespace;
pub mod resource;
pub mod values;

pub use crate::arena::FitPolicy;
pub use crate::exceptions::{ExcType, HeapError, HeapResult};
pub use crate::gc::GcReport;
pub use crate::heap::{DropWithHeap, FALSE_ID, Heap, HeapData, HeapId, NONE_ID, TRUE_ID};
pub use crate::namespace::Namespace;
pub use crate::resource::{
    DEFAULT_MEMORY_SIZE, HeapConfig, LimitedTracker, MemoryUsage, NoLimitTracker, ResourceLimits, ResourceTracker,
};
pub use crate::values::{Dict, DictPolicy, List, MAX_REPR_DEPTH, Slot, Slots, Str, Type};
