//! Per-compile-unit abbreviation table: `code → (tag, has-children, attribute specs)`.

use super::constants::{DwAt, DwForm, DwTag};
use super::reader::Reader;

/// One `(attribute name, form)` pair from an abbreviation declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttrSpec {
    pub name: DwAt,
    pub form: DwForm,
}

/// A single abbreviation: what a DIE with this code looks like.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Abbrev {
    pub tag: DwTag,
    pub has_children: bool,
    pub attrs: Vec<AttrSpec>,
}

impl Abbrev {
    fn read(r: &mut Reader<'_>) -> Option<Self> {
        let tag = r.read_uleb128()?;
        let has_children = r.read_u8()? != 0;
        let mut attrs = Vec::new();
        loop {
            let name = r.read_uleb128()?;
            let form = r.read_uleb128()?;
            if name == 0 && form == 0 {
                break;
            }
            attrs.push(AttrSpec { name, form });
        }
        Some(Self {
            tag,
            has_children,
            attrs,
        })
    }
}

/// The abbreviation table for one compile unit: `code → Abbrev`.
///
/// Codes are small and dense in practice (per spec §4.2), so this is a direct-indexed vector with
/// holes rather than a hash map — code 0 is never assigned (it terminates the table) so slot 0 is
/// left as the default, unused `Abbrev`.
#[derive(Clone, Debug, Default)]
pub struct AbbrevTable {
    by_code: Vec<Option<Abbrev>>,
}

impl AbbrevTable {
    /// Reads abbreviation records from `r`, positioned at this compile unit's abbrev offset,
    /// until a terminating zero code.
    pub fn read(r: &mut Reader<'_>) -> Self {
        let mut by_code = Vec::new();
        loop {
            let code = match r.read_uleb128() {
                Some(c) => c,
                None => break,
            };
            if code == 0 {
                break;
            }
            let abbrev = match Abbrev::read(r) {
                Some(a) => a,
                None => break,
            };
            let idx = code as usize;
            if by_code.len() <= idx {
                by_code.resize(idx + 1, None);
            }
            by_code[idx] = Some(abbrev);
        }
        Self { by_code }
    }

    /// Looks up the abbreviation for `code`, if any.
    pub fn get(&self, code: u64) -> Option<&Abbrev> {
        self.by_code.get(code as usize).and_then(|o| o.as_ref())
    }
}
