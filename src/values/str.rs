/// Python string type, wrapping a Rust `String`.
use std::fmt::{self, Write};

/// Seed of the string hash.
const HASH_SEED: u64 = 1_125_899_906_842_597;

/// Python string value stored on the heap.
///
/// Immutable once allocated. `len()` counts Unicode codepoints, while the arena is
/// charged for the UTF-8 bytes plus a terminator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Str(String);

impl Str {
    #[must_use]
    pub fn new(s: String) -> Self {
        Self(s)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of codepoints, matching Python's `len()`.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }

    pub(crate) fn payload_size(&self) -> usize {
        self.0.len() + 1
    }

    /// Polynomial hash over the UTF-8 bytes: `h = 31 * h + byte`, wrapping.
    ///
    /// Bytes are added as signed values, so anything from `0x80` up sign-extends. This
    /// keeps dict slot order for non-ASCII keys identical to the runtime's.
    #[must_use]
    pub fn py_hash(&self) -> u64 {
        self.0.bytes().fold(HASH_SEED, |hash, byte| {
            hash.wrapping_mul(31)
                .wrapping_add(i64::from(byte.cast_signed()).cast_unsigned())
        })
    }
}

impl From<String> for Str {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Str {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<Str> for String {
    fn from(value: Str) -> Self {
        value.0
    }
}

impl std::ops::Deref for Str {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Writes `s` the way it appears inside a container: double-quoted.
pub fn string_repr_fmt<W: Write>(s: &str, f: &mut W) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            _ => f.write_char(c)?,
        }
    }
    f.write_char('"')
}
