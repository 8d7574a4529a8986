//! A link object: one ELF file (executable or shared library) this crate reads DWARF sections
//! from, with the mapping bookkeeping to prefer a system mapping the process loader already made
//! over mmapping the file again privately.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{MapError, MapErrorKind};

use super::section::{PrivateMapping, Section, SectionKind, SystemMapping, DW_SEC_NUM};

/// One object file's DWARF sections, plus whatever mapped memory backs them.
pub struct LinkObject {
    index: u32,
    path: PathBuf,
    sections: [Section; DW_SEC_NUM],
    system_mapping: Option<SystemMapping>,
    private_mapping: Option<PrivateMapping>,
}

impl LinkObject {
    /// Creates a link object for `path`, with no sections discovered yet.
    pub fn new(index: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            path: path.into(),
            sections: SectionKind::ALL.map(Section::new),
            system_mapping: None,
            private_mapping: None,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records that `mapping` already covers (part of) this object's file, reused read-only
    /// instead of mapping those bytes again. Typically the executable's or a shared library's own
    /// loader-created mapping, discovered via `Platform::loaded_objects`.
    pub fn attach_system_mapping(&mut self, mapping: SystemMapping) {
        self.system_mapping = Some(mapping);
    }

    /// Parses the ELF section header table out of `file_data` and records the file offset/size of
    /// every recognized section. Does not map anything yet — call [`LinkObject::map_sections`]
    /// afterward.
    pub fn discover_sections(&mut self, file_data: &[u8]) -> Result<(), MapError> {
        let elf = goblin::elf::Elf::parse(file_data)
            .map_err(|e| MapError::with_source(MapErrorKind::BadObject, e))?;

        for shdr in &elf.section_headers {
            let Some(name) = elf.shdr_strtab.get_at(shdr.sh_name) else {
                continue;
            };
            if let Some(kind) = SectionKind::from_elf_name(name) {
                self.sections[kind.index()].set_range(shdr.sh_offset, shdr.sh_size);
            }
        }
        Ok(())
    }

    /// Satisfies every discovered, non-empty, unmapped section: from the attached system mapping
    /// where it covers the range, otherwise from one private `mmap` of the whole file (mapping the
    /// file once and slicing it, rather than one `mmap` call per section, keeps this to a single
    /// syscall regardless of how many sections are in play).
    pub fn map_sections(&mut self) -> Result<(), MapError> {
        if let Some(sysmap) = self.system_mapping {
            for kind in SectionKind::ALL {
                let sec = &mut self.sections[kind.index()];
                if sec.get_size() == 0 || sec.is_mapped() {
                    continue;
                }
                if sysmap.contains(sec.get_offset(), sec.get_size()) {
                    // SAFETY: `contains` established that `[offset, offset+size)` lies entirely
                    // within the system mapping's live byte range.
                    let base = unsafe {
                        sysmap.base.add((sec.get_offset() - sysmap.file_offset) as usize)
                    };
                    sec.map_from(base, true);
                }
            }
        }

        let needs_private = SectionKind::ALL
            .iter()
            .any(|k| !self.sections[k.index()].is_mapped() && self.sections[k.index()].get_size() > 0);
        if !needs_private {
            return Ok(());
        }

        let file = File::open(&self.path).map_err(|e| MapError::with_source(MapErrorKind::Open, e))?;
        // SAFETY: this crate treats the mapping as read-only for its own lifetime; if the backing
        // file is truncated or rewritten concurrently, reads may see garbage or fault, the same
        // risk every `mmap`-based reader accepts.
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file) }
            .map_err(|e| MapError::with_source(MapErrorKind::Mmap, e))?;
        let base = mmap.as_ptr();

        for kind in SectionKind::ALL {
            let sec = &mut self.sections[kind.index()];
            if sec.get_size() == 0 || sec.is_mapped() {
                continue;
            }
            // SAFETY: `offset`/`size` came from the same file's section header table that this
            // mapping was just made over.
            let ptr = unsafe { base.add(sec.get_offset() as usize) };
            sec.map_from(ptr, false);
        }

        self.private_mapping = Some(PrivateMapping {
            file_offset: 0,
            file_size: mmap.len() as u64,
            mmap,
        });
        Ok(())
    }

    /// Drops this object's private mapping (if any) and forgets which sections it backed, leaving
    /// section shapes (`offset`/`size`) intact so [`LinkObject::map_sections`] can remap later.
    /// Sections backed by a reused system mapping are left alone.
    pub fn unmap_sections(&mut self) {
        for section in &mut self.sections {
            if section.is_private() {
                section.unmap();
            }
        }
        self.private_mapping = None;
    }

    pub fn section(&self, kind: SectionKind) -> &Section {
        &self.sections[kind.index()]
    }

    /// Returns the mapped bytes of `kind`, or `None` if it wasn't present or isn't mapped yet.
    pub fn section_bytes(&self, kind: SectionKind) -> Option<&[u8]> {
        self.sections[kind.index()].get_contents()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// A minimal 64-bit little-endian ELF with one named section, `.debug_str`, containing
    /// `b"hello\0"`.
    fn build_minimal_elf() -> Vec<u8> {
        // Layout: ELF header (64 bytes) | section data | section header string table | section headers.
        let mut buf = vec![0u8; 64];
        buf[0..4].copy_from_slice(b"\x7fELF");
        buf[4] = 2; // ELFCLASS64
        buf[5] = 1; // ELFDATA2LSB
        buf[6] = 1; // EI_VERSION
        buf[16..18].copy_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
        buf[18..20].copy_from_slice(&0x3Eu16.to_le_bytes()); // e_machine = x86-64
        buf[20..24].copy_from_slice(&1u32.to_le_bytes()); // e_version

        let section_data_off = buf.len() as u64;
        buf.extend_from_slice(b"hello\0");

        let shstrtab_off = buf.len() as u64;
        let shstrtab: &[u8] = b"\0.debug_str\0.shstrtab\0";
        buf.extend_from_slice(shstrtab);

        let shoff = buf.len() as u64;
        // shdr[0]: null section
        buf.extend_from_slice(&[0u8; 64]);
        // shdr[1]: .debug_str
        let mut shdr = vec![0u8; 64];
        shdr[0..4].copy_from_slice(&1u32.to_le_bytes()); // sh_name = offset of ".debug_str" in shstrtab
        shdr[24..32].copy_from_slice(&section_data_off.to_le_bytes()); // sh_offset
        shdr[32..40].copy_from_slice(&6u64.to_le_bytes()); // sh_size
        buf.extend_from_slice(&shdr);
        // shdr[2]: .shstrtab
        let mut shdr2 = vec![0u8; 64];
        shdr2[0..4].copy_from_slice(&12u32.to_le_bytes()); // offset of ".shstrtab"
        shdr2[24..32].copy_from_slice(&shstrtab_off.to_le_bytes());
        shdr2[32..40].copy_from_slice((shstrtab.len() as u64).to_le_bytes().as_ref());
        buf.extend_from_slice(&shdr2);

        buf[40..48].copy_from_slice(&shoff.to_le_bytes()); // e_shoff
        buf[58..60].copy_from_slice(&64u16.to_le_bytes()); // e_shentsize
        buf[60..62].copy_from_slice(&3u16.to_le_bytes()); // e_shnum
        buf[62..64].copy_from_slice(&2u16.to_le_bytes()); // e_shstrndx

        buf
    }

    #[test]
    fn discovers_and_maps_a_named_section_privately() {
        let bytes = build_minimal_elf();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&bytes).unwrap();
        tmp.flush().unwrap();

        let mut obj = LinkObject::new(0, tmp.path());
        obj.discover_sections(&bytes).unwrap();
        assert_eq!(obj.section(SectionKind::Str).get_size(), 6);

        obj.map_sections().unwrap();
        assert_eq!(obj.section_bytes(SectionKind::Str), Some(&b"hello\0"[..]));
    }

    #[test]
    fn unmap_clears_private_sections_but_keeps_shape() {
        let bytes = build_minimal_elf();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&bytes).unwrap();
        tmp.flush().unwrap();

        let mut obj = LinkObject::new(0, tmp.path());
        obj.discover_sections(&bytes).unwrap();
        obj.map_sections().unwrap();
        obj.unmap_sections();

        assert!(!obj.section(SectionKind::Str).is_mapped());
        assert_eq!(obj.section(SectionKind::Str).get_size(), 6);
    }

    #[test]
    fn system_mapping_is_preferred_over_a_private_one() {
        let bytes = build_minimal_elf();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&bytes).unwrap();
        tmp.flush().unwrap();

        let mut obj = LinkObject::new(0, tmp.path());
        obj.discover_sections(&bytes).unwrap();

        // Pretend the whole file is already mapped at `bytes.as_ptr()` by the loader.
        obj.attach_system_mapping(SystemMapping {
            file_offset: 0,
            file_size: bytes.len() as u64,
            base: bytes.as_ptr(),
        });
        obj.map_sections().unwrap();

        assert!(obj.section(SectionKind::Str).is_mapped());
        assert!(!obj.section(SectionKind::Str).is_private());
        assert_eq!(obj.section_bytes(SectionKind::Str), Some(&b"hello\0"[..]));
    }
}
