//! DWARF 2–4 tag, attribute and form constants used by the abbrev table, walker and address
//! index. Only the values this crate actually inspects are named; unrecognized values still
//! round-trip through the reader as raw `u64`s (see [`super::entry::AttributeValue`]).

#![allow(missing_docs)]

pub type DwTag = u64;
pub type DwAt = u64;
pub type DwForm = u64;

pub const DW_TAG_COMPILE_UNIT: DwTag = 0x11;
pub const DW_TAG_SUBPROGRAM: DwTag = 0x2e;
pub const DW_TAG_VARIABLE: DwTag = 0x34;
pub const DW_TAG_MEMBER: DwTag = 0x0d;
pub const DW_TAG_STRUCTURE_TYPE: DwTag = 0x13;
pub const DW_TAG_UNION_TYPE: DwTag = 0x17;
pub const DW_TAG_CLASS_TYPE: DwTag = 0x02;
pub const DW_TAG_ENUMERATION_TYPE: DwTag = 0x04;
pub const DW_TAG_NAMESPACE: DwTag = 0x39;
pub const DW_TAG_BASE_TYPE: DwTag = 0x24;
pub const DW_TAG_TYPEDEF: DwTag = 0x16;
pub const DW_TAG_POINTER_TYPE: DwTag = 0x0f;
pub const DW_TAG_VOLATILE_TYPE: DwTag = 0x35;
pub const DW_TAG_CONST_TYPE: DwTag = 0x26;
pub const DW_TAG_ARRAY_TYPE: DwTag = 0x01;
pub const DW_TAG_SUBRANGE_TYPE: DwTag = 0x21;
pub const DW_TAG_FORMAL_PARAMETER: DwTag = 0x05;
pub const DW_TAG_UNSPECIFIED_PARAMETERS: DwTag = 0x18;

pub const DW_AT_NAME: DwAt = 0x03;
pub const DW_AT_LOW_PC: DwAt = 0x11;
pub const DW_AT_HIGH_PC: DwAt = 0x12;
pub const DW_AT_RANGES: DwAt = 0x55;
pub const DW_AT_SPECIFICATION: DwAt = 0x47;
pub const DW_AT_TYPE: DwAt = 0x49;
pub const DW_AT_DECLARATION: DwAt = 0x3c;
pub const DW_AT_COUNT: DwAt = 0x37;
pub const DW_AT_UPPER_BOUND: DwAt = 0x2f;
pub const DW_AT_LOCATION: DwAt = 0x02;
pub const DW_AT_SIBLING: DwAt = 0x01;

pub const DW_FORM_ADDR: DwForm = 0x01;
pub const DW_FORM_BLOCK2: DwForm = 0x03;
pub const DW_FORM_BLOCK4: DwForm = 0x04;
pub const DW_FORM_DATA2: DwForm = 0x05;
pub const DW_FORM_DATA4: DwForm = 0x06;
pub const DW_FORM_DATA8: DwForm = 0x07;
pub const DW_FORM_STRING: DwForm = 0x08;
pub const DW_FORM_BLOCK: DwForm = 0x09;
pub const DW_FORM_BLOCK1: DwForm = 0x0a;
pub const DW_FORM_DATA1: DwForm = 0x0b;
pub const DW_FORM_FLAG: DwForm = 0x0c;
pub const DW_FORM_SDATA: DwForm = 0x0d;
pub const DW_FORM_STRP: DwForm = 0x0e;
pub const DW_FORM_UDATA: DwForm = 0x0f;
pub const DW_FORM_REF_ADDR: DwForm = 0x10;
pub const DW_FORM_REF1: DwForm = 0x11;
pub const DW_FORM_REF2: DwForm = 0x12;
pub const DW_FORM_REF4: DwForm = 0x13;
pub const DW_FORM_REF8: DwForm = 0x14;
pub const DW_FORM_REF_UDATA: DwForm = 0x15;
pub const DW_FORM_INDIRECT: DwForm = 0x16;
pub const DW_FORM_SEC_OFFSET: DwForm = 0x17;
pub const DW_FORM_EXPRLOC: DwForm = 0x18;
pub const DW_FORM_FLAG_PRESENT: DwForm = 0x19;

/// Returns a human-readable name for a tag, for the `dump_*` family. Unknown tags render as
/// their raw hex code, same as the original's `tagnames.to_name()` fallback.
pub fn tag_name(tag: DwTag) -> String {
    match tag {
        DW_TAG_COMPILE_UNIT => "DW_TAG_compile_unit".into(),
        DW_TAG_SUBPROGRAM => "DW_TAG_subprogram".into(),
        DW_TAG_VARIABLE => "DW_TAG_variable".into(),
        DW_TAG_MEMBER => "DW_TAG_member".into(),
        DW_TAG_STRUCTURE_TYPE => "DW_TAG_structure_type".into(),
        DW_TAG_UNION_TYPE => "DW_TAG_union_type".into(),
        DW_TAG_CLASS_TYPE => "DW_TAG_class_type".into(),
        DW_TAG_ENUMERATION_TYPE => "DW_TAG_enumeration_type".into(),
        DW_TAG_NAMESPACE => "DW_TAG_namespace".into(),
        DW_TAG_BASE_TYPE => "DW_TAG_base_type".into(),
        DW_TAG_TYPEDEF => "DW_TAG_typedef".into(),
        DW_TAG_POINTER_TYPE => "DW_TAG_pointer_type".into(),
        other => format!("DW_TAG_0x{other:x}"),
    }
}
