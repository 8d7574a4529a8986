//! The closed enumeration of DWARF (and PLT) sections this crate recognizes, and the bookkeeping
//! for where each one lives — either in a system mapping the process loader already created, or
//! in a private mapping this crate `mmap`s itself.

use std::fmt;

/// A DWARF section kind, or the ELF PLT (needed by [`crate::plt::PltResolver`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SectionKind {
    Info,
    Abbrev,
    Str,
    Line,
    Ranges,
    Plt,
}

/// Total number of recognized section kinds, for fixed-size `[Section; DW_SEC_NUM]` arrays.
pub const DW_SEC_NUM: usize = 6;

impl SectionKind {
    /// All recognized kinds, in the fixed order used to index `[Section; DW_SEC_NUM]`.
    pub const ALL: [SectionKind; DW_SEC_NUM] = [
        SectionKind::Info,
        SectionKind::Abbrev,
        SectionKind::Str,
        SectionKind::Line,
        SectionKind::Ranges,
        SectionKind::Plt,
    ];

    /// This kind's fixed array index.
    pub fn index(self) -> usize {
        match self {
            SectionKind::Info => 0,
            SectionKind::Abbrev => 1,
            SectionKind::Str => 2,
            SectionKind::Line => 3,
            SectionKind::Ranges => 4,
            SectionKind::Plt => 5,
        }
    }

    /// Maps an ELF section name to a recognized kind, or `None` for sections this crate ignores.
    pub fn from_elf_name(name: &str) -> Option<Self> {
        match name {
            ".debug_info" => Some(Self::Info),
            ".debug_abbrev" => Some(Self::Abbrev),
            ".debug_str" => Some(Self::Str),
            ".debug_line" => Some(Self::Line),
            ".debug_ranges" => Some(Self::Ranges),
            ".plt" => Some(Self::Plt),
            _ => None,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SectionKind::Info => ".debug_info",
            SectionKind::Abbrev => ".debug_abbrev",
            SectionKind::Str => ".debug_str",
            SectionKind::Line => ".debug_line",
            SectionKind::Ranges => ".debug_ranges",
            SectionKind::Plt => ".plt",
        };
        f.write_str(name)
    }
}

/// Where a section's bytes come from once mapped.
#[derive(Clone, Copy, Debug)]
pub enum MapSource {
    /// Not yet mapped.
    Unmapped,
    /// Reused from a system mapping the process loader already created (`base` points inside
    /// that mapping at this section's file offset).
    System { base: *const u8 },
    /// Privately `mmap`'d by this crate (`base` points at the start of this section within the
    /// private mapping).
    Private { base: *const u8 },
}

// SAFETY: the raw pointers only ever point at read-only mapped memory kept alive by the owning
// `LinkObject` for at least as long as the `Section` is reachable.
unsafe impl Send for MapSource {}
unsafe impl Sync for MapSource {}

/// A contiguous byte range inside a link object, plus where it ended up mapped.
#[derive(Clone, Copy, Debug)]
pub struct Section {
    pub kind: SectionKind,
    offset: u64,
    size: u64,
    source: MapSource,
}

impl Section {
    /// Creates an unmapped, zero-sized section placeholder.
    pub fn new(kind: SectionKind) -> Self {
        Self {
            kind,
            offset: 0,
            size: 0,
            source: MapSource::Unmapped,
        }
    }

    /// Records this section's file shape, as seen in the object's section header table.
    pub fn set_range(&mut self, offset: u64, size: u64) {
        self.offset = offset;
        self.size = size;
    }

    pub fn get_offset(&self) -> u64 {
        self.offset
    }

    pub fn get_size(&self) -> u64 {
        self.size
    }

    pub fn get_end(&self) -> u64 {
        self.offset + self.size
    }

    /// Whether this section has been satisfied by a system or private mapping.
    pub fn is_mapped(&self) -> bool {
        !matches!(self.source, MapSource::Unmapped)
    }

    /// Whether this section is backed by a private mapping this crate made itself (as opposed to
    /// a reused system mapping, which outlives any single `unmap_sections` call).
    pub fn is_private(&self) -> bool {
        matches!(self.source, MapSource::Private { .. })
    }

    /// Forgets this section's mapping, leaving its `offset`/`size` shape intact so it can be
    /// remapped later.
    pub fn unmap(&mut self) {
        self.source = MapSource::Unmapped;
    }

    /// Points this section at a base address already known to cover `[offset, offset+size)`.
    pub fn map_from(&mut self, base: *const u8, system: bool) {
        self.source = if system {
            MapSource::System { base }
        } else {
            MapSource::Private { base }
        };
    }

    /// The mapped byte contents, or `None` if not yet mapped.
    ///
    /// # Safety
    /// Valid as long as the owning `LinkObject`'s mappings are alive.
    pub fn get_contents(&self) -> Option<&[u8]> {
        let base = match self.source {
            MapSource::Unmapped => return None,
            MapSource::System { base } | MapSource::Private { base } => base,
        };
        if self.size == 0 {
            return Some(&[]);
        }
        // SAFETY: `base` was established to cover exactly `size` bytes when the section was
        // mapped (see `LinkObject::map_sections`).
        Some(unsafe { std::slice::from_raw_parts(base, self.size as usize) })
    }
}

/// A mapping this crate established itself (as opposed to one the process loader already made):
/// a page-aligned file range and the memory it was mapped into.
pub struct PrivateMapping {
    pub file_offset: u64,
    pub file_size: u64,
    pub mmap: memmap2::Mmap,
}

impl PrivateMapping {
    pub fn base_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }
}

/// A mapping the OS loader already created (e.g. from `/proc/self/maps`), reused read-only.
#[derive(Clone, Copy, Debug)]
pub struct SystemMapping {
    pub file_offset: u64,
    pub file_size: u64,
    pub base: *const u8,
}

// SAFETY: system mappings point at pages the OS keeps resident for the lifetime of the process;
// they are only ever read.
unsafe impl Send for SystemMapping {}
unsafe impl Sync for SystemMapping {}

impl SystemMapping {
    /// Whether this mapping fully covers `[offset, offset+size)` of the underlying file.
    pub fn contains(&self, offset: u64, size: u64) -> bool {
        offset >= self.file_offset && offset + size <= self.file_offset + self.file_size
    }
}

const PAGE_SIZE: u64 = 4096;

/// Rounds `addr` up to the next page boundary.
pub fn page_round_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_elf_name_recognizes_debug_sections() {
        assert_eq!(SectionKind::from_elf_name(".debug_info"), Some(SectionKind::Info));
        assert_eq!(SectionKind::from_elf_name(".text"), None);
    }

    #[test]
    fn page_round_up_rounds_to_next_boundary() {
        assert_eq!(page_round_up(0), 0);
        assert_eq!(page_round_up(1), 4096);
        assert_eq!(page_round_up(4096), 4096);
        assert_eq!(page_round_up(4097), 8192);
    }

    #[test]
    fn system_mapping_contains_checks_both_bounds() {
        let m = SystemMapping {
            file_offset: 100,
            file_size: 50,
            base: std::ptr::null(),
        };
        assert!(m.contains(100, 50));
        assert!(m.contains(110, 10));
        assert!(!m.contains(90, 10));
        assert!(!m.contains(140, 20));
    }
}
