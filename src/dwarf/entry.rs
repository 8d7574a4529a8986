//! Typed decoding of a single DIE's attributes, driven by its abbreviation.
//!
//! Entries are not materialized independently from the section bytes: [`decode_entry`] decodes
//! one DIE at a time, and for every `(name, form)` pair in the abbreviation it advances the reader
//! by the form-specific amount even when the caller never looks at that attribute — the cursor
//! must land exactly on the next entry regardless of which attributes anyone reads.

use smallvec::SmallVec;

use crate::error::{DwarfError, DwarfErrorKind};
use crate::object::section::SectionKind;

use super::compile_unit::CompileUnit;
use super::constants::*;
use super::reader::Reader;
use super::reference::Reference;

/// Context a [`decode_entry`] call needs beyond the current compile unit: access to arbitrary
/// sections of the owning link object (`.debug_str` for `DW_FORM_strp`, `.debug_ranges` for the
/// walker's [`super::walker::Walker::get_section_contents`]), and the ability to resolve a global
/// `.debug_info` offset (`DW_FORM_ref_addr`) to a compile-unit-relative [`Reference`]. Implemented
/// by [`crate::state::State`].
pub trait SectionContext {
    /// Returns the bytes of `kind` for the link object owning `linkobj`, if mapped.
    fn section_bytes(&self, linkobj: u32, kind: SectionKind) -> Option<&[u8]>;

    /// Resolves a global `.debug_info` byte offset to the compile unit that contains it.
    fn resolve_global_offset(&self, global_offset: u64) -> Reference;
}

/// A typed attribute value, as decoded from one `(name, form)` pair.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue<'d> {
    /// A target code address (`DW_FORM_addr`).
    Addr(u64),
    /// An unsigned integer, from any of the `data*`/`udata`/`sec_offset` forms.
    Udata(u64),
    /// A signed integer (`DW_FORM_sdata`).
    Sdata(i64),
    /// A string, either inline (`DW_FORM_string`) or resolved out of `.debug_str`
    /// (`DW_FORM_strp`).
    String(&'d [u8]),
    /// A resolved reference to another DIE, from any `ref*` form.
    Reference(Reference),
    /// An inline byte block (`DW_FORM_block*`/`exprloc`).
    Block(&'d [u8]),
    /// A boolean (`DW_FORM_flag`/`DW_FORM_flag_present`).
    Flag(bool),
}

/// One decoded `(name, form, value)` triple.
#[derive(Clone, Debug, PartialEq)]
pub struct Attr<'d> {
    pub name: DwAt,
    pub form: DwForm,
    pub value: AttributeValue<'d>,
}

/// A decoded Debugging Information Entry.
#[derive(Clone, Debug)]
pub struct Entry<'d> {
    reference: Reference,
    tag: DwTag,
    has_children: bool,
    attrs: SmallVec<[Attr<'d>; 6]>,
}

impl<'d> Entry<'d> {
    /// The stable reference to this entry.
    pub fn get_reference(&self) -> Reference {
        self.reference
    }

    /// The DIE's tag. `0` denotes a null entry (end-of-siblings marker).
    pub fn get_tag(&self) -> DwTag {
        self.tag
    }

    /// Whether this DIE's abbreviation declared children.
    pub fn has_children(&self) -> bool {
        self.has_children
    }

    /// Whether this is the null entry terminating a sibling chain.
    pub fn is_null(&self) -> bool {
        self.tag == 0
    }

    /// Returns the attribute named `name`, if present.
    pub fn get_attribute(&self, name: DwAt) -> Option<&Attr<'d>> {
        self.attrs.iter().find(|a| a.name == name)
    }

    /// Returns the DWARF form the attribute named `name` was encoded with, if present.
    pub fn get_attribute_form(&self, name: DwAt) -> Option<DwForm> {
        self.get_attribute(name).map(|a| a.form)
    }

    /// Returns a string attribute as UTF-8 (lossily), if present and string-shaped.
    pub fn get_string_attribute(&self, name: DwAt) -> Option<std::borrow::Cow<'d, str>> {
        match self.get_attribute(name)?.value {
            AttributeValue::String(bytes) => Some(String::from_utf8_lossy(bytes)),
            _ => None,
        }
    }

    /// Returns a numeric attribute coerced to `u32`, or 0 if absent/non-numeric — matching the
    /// original's `get_uint32_attribute`, which returns 0 for "not present".
    pub fn get_uint32_attribute(&self, name: DwAt) -> u32 {
        self.get_uint64_attribute(name) as u32
    }

    /// Returns a numeric attribute coerced to `u64`, or 0 if absent/non-numeric.
    pub fn get_uint64_attribute(&self, name: DwAt) -> u64 {
        match self.get_attribute(name).map(|a| &a.value) {
            Some(AttributeValue::Addr(v)) => *v,
            Some(AttributeValue::Udata(v)) => *v,
            Some(AttributeValue::Sdata(v)) => *v as u64,
            Some(AttributeValue::Flag(v)) => *v as u64,
            _ => 0,
        }
    }

    /// Returns a reference attribute, or [`Reference::NULL`] if absent/non-reference.
    pub fn get_reference_attribute(&self, name: DwAt) -> Reference {
        match self.get_attribute(name).map(|a| &a.value) {
            Some(AttributeValue::Reference(r)) => *r,
            _ => Reference::NULL,
        }
    }
}

fn read_form_value<'d>(
    r: &mut Reader<'d>,
    form: DwForm,
    cu: &CompileUnit,
    ctx: &dyn SectionContext,
    nested: bool,
) -> Result<(AttributeValue<'d>, DwForm), DwarfError> {
    let truncated = || DwarfError::new(DwarfErrorKind::Truncated);
    match form {
        DW_FORM_ADDR => Ok((
            AttributeValue::Addr(r.read_addr(cu.address_size).ok_or_else(truncated)?),
            form,
        )),
        DW_FORM_BLOCK1 => {
            let len = r.read_u8().ok_or_else(truncated)? as usize;
            Ok((
                AttributeValue::Block(r.read_block_sized(len).ok_or_else(truncated)?),
                form,
            ))
        }
        DW_FORM_BLOCK2 => {
            let len = r.read_u16().ok_or_else(truncated)? as usize;
            Ok((
                AttributeValue::Block(r.read_block_sized(len).ok_or_else(truncated)?),
                form,
            ))
        }
        DW_FORM_BLOCK4 => {
            let len = r.read_u32().ok_or_else(truncated)? as usize;
            Ok((
                AttributeValue::Block(r.read_block_sized(len).ok_or_else(truncated)?),
                form,
            ))
        }
        DW_FORM_BLOCK | DW_FORM_EXPRLOC => Ok((
            AttributeValue::Block(r.read_block().ok_or_else(truncated)?),
            form,
        )),
        DW_FORM_DATA1 => Ok((
            AttributeValue::Udata(r.read_u8().ok_or_else(truncated)? as u64),
            form,
        )),
        DW_FORM_DATA2 => Ok((
            AttributeValue::Udata(r.read_u16().ok_or_else(truncated)? as u64),
            form,
        )),
        DW_FORM_DATA4 => Ok((
            AttributeValue::Udata(r.read_u32().ok_or_else(truncated)? as u64),
            form,
        )),
        DW_FORM_DATA8 => Ok((
            AttributeValue::Udata(r.read_u64().ok_or_else(truncated)?),
            form,
        )),
        DW_FORM_SEC_OFFSET => {
            let v = if cu.is_64bit {
                r.read_u64().ok_or_else(truncated)?
            } else {
                r.read_u32().ok_or_else(truncated)? as u64
            };
            Ok((AttributeValue::Udata(v), form))
        }
        DW_FORM_STRING => Ok((
            AttributeValue::String(r.read_cstr().ok_or_else(truncated)?),
            form,
        )),
        DW_FORM_STRP => {
            let off = if cu.is_64bit {
                r.read_u64().ok_or_else(truncated)?
            } else {
                r.read_u32().ok_or_else(truncated)? as u64
            };
            let strsec = ctx.section_bytes(cu.linkobj, SectionKind::Str).unwrap_or(&[]);
            let mut sr = Reader::new(strsec);
            sr.seek(off as usize);
            let bytes = sr.read_cstr().unwrap_or(&[]);
            Ok((AttributeValue::String(bytes), form))
        }
        DW_FORM_FLAG => Ok((
            AttributeValue::Flag(r.read_u8().ok_or_else(truncated)? != 0),
            form,
        )),
        DW_FORM_FLAG_PRESENT => Ok((AttributeValue::Flag(true), form)),
        DW_FORM_SDATA => Ok((
            AttributeValue::Sdata(r.read_sleb128().ok_or_else(truncated)?),
            form,
        )),
        DW_FORM_UDATA => Ok((
            AttributeValue::Udata(r.read_uleb128().ok_or_else(truncated)?),
            form,
        )),
        DW_FORM_REF1 => {
            let off = r.read_u8().ok_or_else(truncated)? as u32;
            Ok((
                AttributeValue::Reference(Reference::new(cu.index, cu.header_offset + off)),
                form,
            ))
        }
        DW_FORM_REF2 => {
            let off = r.read_u16().ok_or_else(truncated)? as u32;
            Ok((
                AttributeValue::Reference(Reference::new(cu.index, cu.header_offset + off)),
                form,
            ))
        }
        DW_FORM_REF4 => {
            let off = r.read_u32().ok_or_else(truncated)?;
            Ok((
                AttributeValue::Reference(Reference::new(cu.index, cu.header_offset + off)),
                form,
            ))
        }
        DW_FORM_REF8 => {
            let off = r.read_u64().ok_or_else(truncated)? as u32;
            Ok((
                AttributeValue::Reference(Reference::new(cu.index, cu.header_offset + off)),
                form,
            ))
        }
        DW_FORM_REF_UDATA => {
            let off = r.read_uleb128().ok_or_else(truncated)? as u32;
            Ok((
                AttributeValue::Reference(Reference::new(cu.index, cu.header_offset + off)),
                form,
            ))
        }
        DW_FORM_REF_ADDR => {
            let global = if cu.is_64bit {
                r.read_u64().ok_or_else(truncated)?
            } else {
                r.read_u32().ok_or_else(truncated)? as u64
            };
            Ok((
                AttributeValue::Reference(ctx.resolve_global_offset(global)),
                form,
            ))
        }
        DW_FORM_INDIRECT => {
            if nested {
                return Err(DwarfError::new(DwarfErrorKind::NestedIndirect));
            }
            let actual_form = r.read_uleb128().ok_or_else(truncated)?;
            let (value, _) = read_form_value(r, actual_form, cu, ctx, true)?;
            Ok((value, actual_form))
        }
        other => Err(DwarfError::new(DwarfErrorKind::UnknownForm(other))),
    }
}

/// Decodes one entry at the reader's current position, using `cu`'s abbreviation table to
/// interpret the leading ULEB128 abbreviation code. A code of `0` yields the null entry (end of a
/// sibling chain) with no further bytes consumed beyond the code itself.
pub fn decode_entry<'d>(
    r: &mut Reader<'d>,
    cu: &CompileUnit,
    ctx: &dyn SectionContext,
) -> Result<Entry<'d>, DwarfError> {
    let offset = r.offset() as u32;
    let reference = Reference::new(cu.index, offset);
    let code = r
        .read_uleb128()
        .ok_or(DwarfError::new(DwarfErrorKind::Truncated))?;
    if code == 0 {
        return Ok(Entry {
            reference,
            tag: 0,
            has_children: false,
            attrs: SmallVec::new(),
        });
    }

    let abbrev = cu
        .abbrevs
        .get(code)
        .ok_or(DwarfError::new(DwarfErrorKind::Truncated))?
        .clone();

    let mut attrs = SmallVec::new();
    for spec in &abbrev.attrs {
        let (value, form) = read_form_value(r, spec.form, cu, ctx, false)?;
        attrs.push(Attr {
            name: spec.name,
            form,
            value,
        });
    }

    Ok(Entry {
        reference,
        tag: abbrev.tag,
        has_children: abbrev.has_children,
        attrs,
    })
}
