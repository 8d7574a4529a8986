//! [`Reference`], a stable handle to any DIE across the lifetime of the introspection state.

use std::fmt;

/// A `(compile-unit index, byte offset into .debug_info)` pair. Totally ordered, with a
/// distinguished null value, used anywhere the original passed around a `reference_t`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    /// Index into the owning [`crate::state::State`]'s compile-unit list.
    pub cu: u32,
    /// Byte offset from the start of `.debug_info`.
    pub offset: u32,
}

impl Reference {
    /// The distinguished "no entry" reference.
    pub const NULL: Reference = Reference {
        cu: u32::MAX,
        offset: u32::MAX,
    };

    /// Creates a reference into compile unit `cu` at `offset`.
    pub fn new(cu: u32, offset: u32) -> Self {
        Self { cu, offset }
    }

    /// Whether this is the [`Reference::NULL`] sentinel.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}+{}", self.cu, self.offset)
        }
    }
}
