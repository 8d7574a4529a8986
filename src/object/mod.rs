//! ELF object reading: which DWARF sections an object carries, and how their bytes get mapped
//! into this process (reusing the loader's own mapping where possible).

pub mod linkobj;
pub mod section;

pub use linkobj::LinkObject;
pub use section::{MapSource, PrivateMapping, Section, SectionKind, SystemMapping, DW_SEC_NUM};
