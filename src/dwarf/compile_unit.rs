//! Compile unit header decoding: unit length, version, abbrev offset, address size, and the
//! abbreviation table that governs how this unit's DIEs are decoded.

use crate::error::{DwarfError, DwarfErrorKind};

use super::abbrev::AbbrevTable;
use super::reader::Reader;
use super::reference::Reference;

/// Header fields plus the parsed abbreviation table for one top-level DIE subtree.
#[derive(Clone, Debug)]
pub struct CompileUnit {
    /// This unit's index within its [`crate::state::State`]'s compile-unit list.
    pub index: u32,
    /// Index of the owning link object.
    pub linkobj: u32,
    /// DWARF version, 2–4 (enforced by [`CompileUnit::read_header`]).
    pub version: u16,
    /// Address size in bytes, 4 or 8.
    pub address_size: u8,
    /// Whether this unit uses the 64-bit DWARF length encoding (the 0xFFFFFFFF sentinel form).
    pub is_64bit: bool,
    /// Byte offset of this unit's abbreviation table within `.debug_abbrev`.
    pub abbrev_offset: u64,
    /// Byte offset of this unit's header within `.debug_info`.
    pub header_offset: u32,
    /// Byte offset of the first (root) DIE, immediately after the header.
    pub root_offset: u32,
    /// Byte offset one past the end of this unit within `.debug_info`.
    pub end_offset: u32,
    /// This unit's abbreviation table.
    pub abbrevs: AbbrevTable,
}

impl CompileUnit {
    /// Reads one compile-unit header from `info`, positioned at the section's start or the end of
    /// the previous unit. Returns `Ok(None)` at a clean end of section (no more units); returns
    /// `Err` if the section ends mid-header or declares an unsupported version.
    pub fn read_header(
        info: &mut Reader<'_>,
        index: u32,
        linkobj: u32,
    ) -> Result<Option<Self>, DwarfError> {
        if info.remaining() == 0 {
            return Ok(None);
        }

        let header_offset = info.offset() as u32;

        let first_len = info
            .read_u32()
            .ok_or(DwarfError::new(DwarfErrorKind::Truncated))?;
        let (is_64bit, unit_length) = if first_len == 0xFFFF_FFFF {
            let len = info
                .read_u64()
                .ok_or(DwarfError::new(DwarfErrorKind::Truncated))?;
            (true, len)
        } else {
            (false, u64::from(first_len))
        };

        let version = info
            .read_u16()
            .ok_or(DwarfError::new(DwarfErrorKind::Truncated))?;
        if !(2..=4).contains(&version) {
            return Err(DwarfError::new(DwarfErrorKind::UnsupportedVersion(version)));
        }

        let abbrev_offset = if is_64bit {
            info.read_u64()
                .ok_or(DwarfError::new(DwarfErrorKind::Truncated))?
        } else {
            u64::from(
                info.read_u32()
                    .ok_or(DwarfError::new(DwarfErrorKind::Truncated))?,
            )
        };

        let address_size = info
            .read_u8()
            .ok_or(DwarfError::new(DwarfErrorKind::Truncated))?;

        let root_offset = info.offset() as u32;
        let length_field_size = if is_64bit { 12 } else { 4 };
        let end_offset = header_offset + length_field_size + unit_length as u32;

        Ok(Some(Self {
            index,
            linkobj,
            version,
            address_size,
            is_64bit,
            abbrev_offset,
            header_offset,
            root_offset,
            end_offset,
            abbrevs: AbbrevTable::default(),
        }))
    }

    /// Reads this unit's abbreviation table, with `abbrevr` positioned at the unit's abbrev
    /// offset in `.debug_abbrev`.
    pub fn read_abbrevs(&mut self, abbrevr: &mut Reader<'_>) {
        self.abbrevs = AbbrevTable::read(abbrevr);
    }

    /// The root DIE's reference.
    pub fn root_reference(&self) -> Reference {
        Reference::new(self.index, self.root_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_32bit_header(version: u16) -> Vec<u8> {
        let mut bytes = Vec::new();
        // unit_length placeholder, patched below.
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(&version.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // abbrev_offset
        bytes.push(8); // address_size
        bytes.extend_from_slice(b"\x11\x01\x00\x00"); // one DIE's worth of body bytes
        let unit_length = (bytes.len() - 4) as u32;
        bytes[0..4].copy_from_slice(&unit_length.to_le_bytes());
        bytes
    }

    #[test]
    fn reads_header_fields() {
        let data = encode_32bit_header(4);
        let mut r = Reader::new(&data);
        let cu = CompileUnit::read_header(&mut r, 0, 0).unwrap().unwrap();
        assert_eq!(cu.version, 4);
        assert_eq!(cu.address_size, 8);
        assert!(!cu.is_64bit);
        assert_eq!(cu.root_offset, 11);
    }

    #[test]
    fn clean_end_of_section_returns_none() {
        let data: [u8; 0] = [];
        let mut r = Reader::new(&data);
        assert!(CompileUnit::read_header(&mut r, 0, 0).unwrap().is_none());
    }

    #[test]
    fn truncated_header_is_an_error() {
        let data = [0x10, 0x00, 0x00, 0x00, 0x04, 0x00]; // length + version, then nothing
        let mut r = Reader::new(&data);
        let err = CompileUnit::read_header(&mut r, 0, 0).unwrap_err();
        assert_eq!(err.kind(), DwarfErrorKind::Truncated);
    }

    #[test]
    fn rejects_unsupported_version() {
        let data = encode_32bit_header(5);
        let mut r = Reader::new(&data);
        let err = CompileUnit::read_header(&mut r, 0, 0).unwrap_err();
        assert_eq!(err.kind(), DwarfErrorKind::UnsupportedVersion(5));
    }

    #[test]
    fn selects_64bit_form_on_sentinel() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        bytes.extend_from_slice(&20u64.to_le_bytes()); // unit_length
        bytes.extend_from_slice(&3u16.to_le_bytes()); // version
        bytes.extend_from_slice(&0u64.to_le_bytes()); // abbrev offset (8 bytes in 64-bit form)
        bytes.push(4); // address size
        let mut r = Reader::new(&bytes);
        let cu = CompileUnit::read_header(&mut r, 0, 0).unwrap().unwrap();
        assert!(cu.is_64bit);
        assert_eq!(cu.address_size, 4);
        assert_eq!(cu.end_offset, 12 + 20);
    }
}
