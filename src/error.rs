//! Crate-wide error types.
//!
//! Each subsystem gets its own `{Kind, source}` pair: a small `Copy` enum carries the
//! caller-facing classification, while the optional boxed `source` preserves whatever underlying
//! error (I/O, regex, a foreign byte that didn't parse) caused it.

use std::error::Error as StdError;
use std::fmt;

/// Why a DWARF parse failed.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DwarfErrorKind {
    /// The section ran out of bytes before the value being read was complete.
    Truncated,
    /// A form code has no defined decoding.
    UnknownForm(u64),
    /// A `DW_FORM_indirect` ultimately named another indirect form.
    NestedIndirect,
    /// The compile unit header named a DWARF version this crate does not support.
    UnsupportedVersion(u16),
    /// A reference attribute pointed at a compile unit index that does not exist.
    InvalidUnitRef(u32),
    /// The object carries no recognized DWARF sections at all.
    NoDebugInfo,
}

impl fmt::Display for DwarfErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "section ran out of bytes mid-read"),
            Self::UnknownForm(form) => write!(f, "unknown DW_FORM 0x{form:x}"),
            Self::NestedIndirect => write!(f, "DW_FORM_indirect named another indirect form"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported DWARF version {v}"),
            Self::InvalidUnitRef(cu) => write!(f, "reference to nonexistent compile unit {cu}"),
            Self::NoDebugInfo => write!(f, "object has no DWARF sections"),
        }
    }
}

/// An error parsing or walking DWARF debugging information.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct DwarfError {
    kind: DwarfErrorKind,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl DwarfError {
    pub(crate) fn new(kind: DwarfErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source<E>(kind: DwarfErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> DwarfErrorKind {
        self.kind
    }
}

impl From<DwarfErrorKind> for DwarfError {
    fn from(kind: DwarfErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Why mapping a link object's sections failed.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapErrorKind {
    /// The underlying file could not be opened.
    Open,
    /// `mmap` itself failed.
    Mmap,
    /// The object's section table could not be parsed.
    BadObject,
}

impl fmt::Display for MapErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "failed to open object file"),
            Self::Mmap => write!(f, "failed to map object sections"),
            Self::BadObject => write!(f, "failed to parse object section table"),
        }
    }
}

/// An error mapping a [`LinkObject`](crate::object::LinkObject)'s sections into memory.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct MapError {
    kind: MapErrorKind,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl MapError {
    pub(crate) fn new(kind: MapErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source<E>(kind: MapErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> MapErrorKind {
        self.kind
    }
}

/// Why installing or uninstalling an intercept failed.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterceptErrorKind {
    /// Toggling page protection (read-only ⇄ writable) failed.
    Protect,
    /// The byte at the target no longer matches what install/uninstall expected, implying
    /// something else modified the target concurrently.
    Mismatch,
}

impl fmt::Display for InterceptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protect => write!(f, "failed to toggle text page protection"),
            Self::Mismatch => write!(f, "target byte does not match the expected value"),
        }
    }
}

/// An error installing or uninstalling a function intercept.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct InterceptError {
    kind: InterceptErrorKind,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl InterceptError {
    pub(crate) fn new(kind: InterceptErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source<E>(kind: InterceptErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> InterceptErrorKind {
        self.kind
    }
}

/// An error compiling a classifier rule.
#[derive(Debug, thiserror::Error)]
#[error("failed to compile classifier regular expression")]
pub struct ClassifierError {
    #[source]
    source: regex::Error,
}

impl ClassifierError {
    pub(crate) fn new(source: regex::Error) -> Self {
        Self { source }
    }
}

/// A test-visible event: either a hard failure (propagated as an `Err`) or, via
/// [`crate::state::State::raise`], a soft event that becomes a failure only if nothing else
/// explains it. Carries the composed message and a captured stack trace, mirroring the original's
/// `event_t(kind, msg).with_stack()`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Event {
    /// The human-readable description of what went wrong.
    pub message: String,
    /// Return addresses captured at the point the event was raised, most-recent first.
    pub stack: Vec<u64>,
}

impl Event {
    /// Creates a new event with no captured stack.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
        }
    }

    /// Attaches a captured stack trace to this event.
    pub fn with_stack(mut self, stack: Vec<u64>) -> Self {
        self.stack = stack;
        self
    }
}

/// The union of every error this crate can return.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// See [`DwarfError`].
    #[error(transparent)]
    Dwarf(#[from] DwarfError),
    /// See [`MapError`].
    #[error(transparent)]
    Map(#[from] MapError),
    /// See [`InterceptError`].
    #[error(transparent)]
    Intercept(#[from] InterceptError),
    /// See [`ClassifierError`].
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    /// A `count()` query named a tag no registered rule carries.
    #[error("no classifier rule carries tag {0}")]
    UnmatchedTag(i32),
    /// See [`Event`].
    #[error(transparent)]
    Event(#[from] Event),
}
