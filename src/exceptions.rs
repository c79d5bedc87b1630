use std::borrow::Cow;
use std::fmt;

macro_rules! exc_static {
    ($variant:ident; $msg:expr) => {
        crate::exceptions::HeapError::$variant(std::borrow::Cow::Borrowed($msg))
    };
}
pub(crate) use exc_static;

macro_rules! exc_fmt {
    ($variant:ident; $($fmt_args:tt)*) => {
        crate::exceptions::HeapError::$variant(std::borrow::Cow::Owned(format!($($fmt_args)*)))
    };
}
pub(crate) use exc_fmt;

/// Python exception class an error surfaces as when handed back to the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr)]
pub enum ExcType {
    MemoryError,
    KeyError,
    IndexError,
    TypeError,
    NameError,
    /// Internal failure of the heap itself, never raised by well-behaved code.
    SystemError,
}

/// Every way a heap operation can fail.
///
/// Container errors are local to the failing operation: the heap guarantees that
/// reference counts and arena occupancy are exactly as they were before the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    /// The arena has no free region large enough, even after merging neighbours.
    OutOfMemory {
        requested: usize,
        in_use: usize,
        capacity: usize,
    },
    /// A `LimitedTracker` refused the allocation.
    AllocationLimit { limit: usize, count: usize },
    /// Dict lookup or delete miss. Carries the repr of the key.
    KeyError(String),
    /// List index outside `[0, len)` after normalising negative indices.
    IndexError { index: i64, len: usize },
    TypeError(Cow<'static, str>),
    /// Namespace lookup or unbind miss.
    NameError(String),
    /// Heap bookkeeping is inconsistent. Indicates a bug, not a user error.
    InvariantViolation(Cow<'static, str>),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, in_use, .. } => {
                write!(f, "cannot service request of size {requested} with {in_use} bytes allocated")
            }
            Self::AllocationLimit { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::KeyError(key) => write!(f, "{key}"),
            Self::IndexError { .. } => write!(f, "list index out of range"),
            Self::TypeError(msg) | Self::InvariantViolation(msg) => write!(f, "{msg}"),
            Self::NameError(name) => write!(f, "name '{name}' is not defined"),
        }
    }
}

impl std::error::Error for HeapError {}

impl HeapError {
    /// The exception class this error is raised as.
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        match self {
            Self::OutOfMemory { .. } | Self::AllocationLimit { .. } => ExcType::MemoryError,
            Self::KeyError(_) => ExcType::KeyError,
            Self::IndexError { .. } => ExcType::IndexError,
            Self::TypeError(_) => ExcType::TypeError,
            Self::NameError(_) => ExcType::NameError,
            Self::InvariantViolation(_) => ExcType::SystemError,
        }
    }

    /// Renders the error the way the runtime reports an uncaught exception, e.g. `KeyError: 3`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{}: {self}", self.exc_type())
    }

    pub(crate) fn unhashable(type_name: impl fmt::Display) -> Self {
        exc_fmt!(TypeError; "unhashable type: '{type_name}'")
    }

    pub(crate) fn not_subscriptable(type_name: impl fmt::Display) -> Self {
        exc_fmt!(TypeError; "'{type_name}' object is not subscriptable")
    }
}

/// Result alias used by every fallible heap operation.
pub type HeapResult<T> = Result<T, HeapError>;
