//! A hand-rolled DWARF 2–4 reader: abbreviation tables, DIE decoding and traversal, and an address
//! range index, enough to answer "what function/type/variable lives at this reference or
//! address" without depending on an external DWARF crate.

pub mod abbrev;
pub mod addr_index;
pub mod compile_unit;
pub mod constants;
pub mod entry;
pub mod reader;
pub mod reference;
pub mod walker;

pub use abbrev::{Abbrev, AbbrevTable, AttrSpec};
pub use addr_index::AddrIndex;
pub use compile_unit::CompileUnit;
pub use entry::{decode_entry, Attr, AttributeValue, Entry, SectionContext};
pub use reader::Reader;
pub use reference::Reference;
pub use walker::{Walker, WalkerContext};
