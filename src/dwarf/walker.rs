//! Preorder / child-sibling traversal of a DIE tree.

use crate::error::{DwarfError, DwarfErrorKind};
use crate::object::section::SectionKind;

use super::compile_unit::CompileUnit;
use super::constants::DwTag;
use super::entry::{decode_entry, Entry, SectionContext};
use super::reader::Reader;
use super::reference::Reference;

/// Everything a [`Walker`] needs from its owner: the compile-unit table (for header info and
/// `.debug_info` access) plus the [`SectionContext`] entry decoding needs.
pub trait WalkerContext: SectionContext {
    /// Returns the compile unit at `index`, if any.
    fn compile_unit(&self, index: u32) -> Option<&CompileUnit>;

    /// Returns the `.debug_info` bytes for the link object owning compile unit `index`.
    fn debug_info(&self, index: u32) -> Option<&[u8]>;
}

/// Traverses the DIE tree of one compile unit (or a subtree reachable from an arbitrary
/// reference), decoding entries on demand.
pub struct Walker<'s, C: WalkerContext> {
    ctx: &'s C,
    path: Vec<Reference>,
    current: Option<Entry<'s>>,
    filter_tag: Option<DwTag>,
}

impl<'s, C: WalkerContext> Walker<'s, C> {
    /// Creates a walker rooted at `start`, not yet positioned on any entry. The first call to
    /// [`Walker::move_next`] or [`Walker::move_preorder`] decodes `start` itself.
    pub fn new(ctx: &'s C, start: Reference) -> Self {
        Self {
            ctx,
            path: vec![start],
            current: None,
            filter_tag: None,
        }
    }

    /// Creates a walker rooted at a compile unit's root DIE.
    pub fn for_compile_unit(ctx: &'s C, cu: &CompileUnit) -> Self {
        Self::new(ctx, cu.root_reference())
    }

    /// Restricts [`Walker::move_preorder`] to entries whose tag equals `tag`.
    pub fn set_filter_tag(&mut self, tag: DwTag) {
        self.filter_tag = Some(tag);
    }

    /// The reference of the entry currently being visited, or [`Reference::NULL`] before the
    /// first move.
    pub fn get_reference(&self) -> Reference {
        self.current
            .as_ref()
            .map(|e| e.get_reference())
            .unwrap_or(Reference::NULL)
    }

    /// The currently decoded entry, if any.
    pub fn get_entry(&self) -> Option<&Entry<'s>> {
        self.current.as_ref()
    }

    /// The chain of references from the walker's root to the current entry.
    pub fn get_path(&self) -> Vec<Reference> {
        self.path.clone()
    }

    /// The DWARF version of the compile unit the current position belongs to.
    pub fn get_dwarf_version(&self) -> u16 {
        let cu_index = self.path.last().map(|r| r.cu).unwrap_or(0);
        self.ctx.compile_unit(cu_index).map(|cu| cu.version).unwrap_or(0)
    }

    /// Returns a reader over an arbitrary section of the link object owning the current position,
    /// for reading auxiliary data such as `.debug_ranges`.
    pub fn get_section_contents(&self, kind: SectionKind) -> Reader<'s> {
        let cu_index = self.path.last().map(|r| r.cu).unwrap_or(0);
        let linkobj = self
            .ctx
            .compile_unit(cu_index)
            .map(|cu| cu.linkobj)
            .unwrap_or(0);
        let bytes = self.ctx.section_bytes(linkobj, kind).unwrap_or(&[]);
        Reader::new(bytes)
    }

    fn decode_at(&self, reference: Reference) -> Result<Entry<'s>, DwarfError> {
        let cu = self
            .ctx
            .compile_unit(reference.cu)
            .ok_or(DwarfError::new(DwarfErrorKind::InvalidUnitRef(reference.cu)))?;
        let info = self
            .ctx
            .debug_info(reference.cu)
            .ok_or(DwarfError::new(DwarfErrorKind::NoDebugInfo))?;
        let mut r = Reader::new(info);
        r.seek(reference.offset as usize);
        decode_entry(&mut r, cu, self.ctx)
    }

    /// Skips over the subtree rooted at `parent` (assumed to have children), returning a reader
    /// positioned immediately after the terminating null entry — i.e. at `parent`'s next sibling.
    fn skip_children(&self, parent: Reference) -> Result<Reader<'s>, DwarfError> {
        let cu = self
            .ctx
            .compile_unit(parent.cu)
            .ok_or(DwarfError::new(DwarfErrorKind::InvalidUnitRef(parent.cu)))?;
        let info = self
            .ctx
            .debug_info(parent.cu)
            .ok_or(DwarfError::new(DwarfErrorKind::NoDebugInfo))?;
        let mut r = Reader::new(info);
        // Re-decoding the parent leaves the cursor exactly where its children start.
        r.seek(parent.offset as usize);
        decode_entry(&mut r, cu, self.ctx)?;

        let mut depth = 1i32;
        while depth > 0 {
            let e = decode_entry(&mut r, cu, self.ctx)?;
            if e.is_null() {
                depth -= 1;
            } else if e.has_children() {
                depth += 1;
            }
        }
        Ok(r)
    }

    /// Advances to the next sibling at the current depth, skipping any children. Returns `None`
    /// (leaving the walker positioned at the parent level) when there is no next sibling.
    pub fn move_next(&mut self) -> Result<Option<&Entry<'s>>, DwarfError> {
        let reference = match self.path.last().copied() {
            Some(r) => r,
            None => return Ok(None),
        };

        let mut reader = if self
            .current
            .as_ref()
            .map(|e| e.has_children())
            .unwrap_or(false)
        {
            self.skip_children(reference)?
        } else {
            let cu = self
                .ctx
                .compile_unit(reference.cu)
                .ok_or(DwarfError::new(DwarfErrorKind::InvalidUnitRef(reference.cu)))?;
            let info = self
                .ctx
                .debug_info(reference.cu)
                .ok_or(DwarfError::new(DwarfErrorKind::NoDebugInfo))?;
            let mut r = Reader::new(info);
            r.seek(reference.offset as usize);
            decode_entry(&mut r, cu, self.ctx)?;
            r
        };

        let cu = self.ctx.compile_unit(reference.cu).unwrap();
        let next = decode_entry(&mut reader, cu, self.ctx)?;
        if next.is_null() {
            self.current = None;
            Ok(None)
        } else {
            self.path.pop();
            self.path.push(next.get_reference());
            self.current = Some(next);
            Ok(self.current.as_ref())
        }
    }

    /// Descends to the first child of the current entry. Returns `None` if the current entry has
    /// no children (or none are declared in its abbreviation).
    pub fn move_down(&mut self) -> Result<Option<&Entry<'s>>, DwarfError> {
        let has_children = self
            .current
            .as_ref()
            .map(|e| e.has_children())
            .unwrap_or(false);
        if !has_children {
            return Ok(None);
        }
        let reference = *self.path.last().unwrap();
        let cu = self.ctx.compile_unit(reference.cu).unwrap();
        let info = self.ctx.debug_info(reference.cu).unwrap();
        let mut r = Reader::new(info);
        r.seek(reference.offset as usize);
        decode_entry(&mut r, cu, self.ctx)?; // land right after the parent's own attrs
        let child = decode_entry(&mut r, cu, self.ctx)?;
        if child.is_null() {
            return Ok(None);
        }
        self.path.push(child.get_reference());
        self.current = Some(child);
        Ok(self.current.as_ref())
    }

    /// Moves up to the parent of the current entry. Returns `None` if already at the root.
    pub fn move_up(&mut self) -> Result<Option<&Entry<'s>>, DwarfError> {
        if self.path.len() <= 1 {
            self.path.clear();
            self.current = None;
            return Ok(None);
        }
        self.path.pop();
        let parent_ref = *self.path.last().unwrap();
        let entry = self.decode_at(parent_ref)?;
        self.current = Some(entry);
        Ok(self.current.as_ref())
    }

    /// Jumps to an arbitrary reference, resetting the path to just that one entry.
    pub fn move_to(&mut self, reference: Reference) -> Result<Option<&Entry<'s>>, DwarfError> {
        if reference.is_null() {
            self.path.clear();
            self.current = None;
            return Ok(None);
        }
        let entry = self.decode_at(reference)?;
        self.path = vec![reference];
        self.current = Some(entry);
        Ok(self.current.as_ref())
    }

    fn matches_filter(&self, entry: &Entry<'_>) -> bool {
        self.filter_tag.map(|t| t == entry.get_tag()).unwrap_or(true)
    }

    /// Advances one step in preorder (self, then children, then next sibling, then ancestors'
    /// next siblings), returning the next entry matching the tag filter, or `None` when the
    /// traversal from the original root is exhausted.
    pub fn move_preorder(&mut self) -> Result<Option<&Entry<'s>>, DwarfError> {
        loop {
            let advanced = if self.current.is_none() {
                let root = *self.path.last().unwrap();
                let entry = self.decode_at(root)?;
                self.current = Some(entry);
                true
            } else if self.move_down()?.is_some() {
                true
            } else {
                loop {
                    if self.move_next()?.is_some() {
                        break true;
                    }
                    if self.move_up()?.is_none() {
                        break false;
                    }
                }
            };

            if !advanced {
                return Ok(None);
            }

            if self.matches_filter(self.current.as_ref().unwrap()) {
                return Ok(self.current.as_ref());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::abbrev::AbbrevTable;
    use crate::dwarf::constants::*;

    struct Fixture {
        cu: CompileUnit,
        info: Vec<u8>,
    }

    impl SectionContext for Fixture {
        fn section_bytes(&self, _linkobj: u32, kind: SectionKind) -> Option<&[u8]> {
            match kind {
                SectionKind::Info => Some(&self.info),
                _ => None,
            }
        }
        fn resolve_global_offset(&self, _global_offset: u64) -> Reference {
            Reference::NULL
        }
    }

    impl WalkerContext for Fixture {
        fn compile_unit(&self, index: u32) -> Option<&CompileUnit> {
            (index == 0).then_some(&self.cu)
        }
        fn debug_info(&self, index: u32) -> Option<&[u8]> {
            (index == 0).then(|| self.info.as_slice())
        }
    }

    fn leb(mut v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if v == 0 {
                break;
            }
        }
        out
    }

    /// Builds an abbrev table with `code => (tag, has_children)`, each abbrev carrying a single
    /// `DW_AT_name`/`DW_FORM_string` attribute.
    fn build_table(entries: &[(u64, DwTag, bool)]) -> AbbrevTable {
        let mut raw = Vec::new();
        for &(code, tag, children) in entries {
            raw.extend(leb(code));
            raw.extend(leb(tag));
            raw.push(children as u8);
            raw.extend(leb(DW_AT_NAME));
            raw.extend(leb(DW_FORM_STRING));
            raw.push(0);
            raw.push(0);
        }
        raw.push(0);
        let mut r = Reader::new(&raw);
        AbbrevTable::read(&mut r)
    }

    fn die(code: u64, name: &str) -> Vec<u8> {
        let mut out = leb(code);
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out
    }

    /// compile_unit "root" (has children)
    ///   subprogram "a" (no children)
    ///   subprogram "b" (no children)
    /// null (ends root's children)
    fn build_fixture() -> Fixture {
        let abbrevs = build_table(&[(1, DW_TAG_COMPILE_UNIT, true), (2, DW_TAG_SUBPROGRAM, false)]);
        let mut info = Vec::new();
        info.extend(die(1, "root"));
        info.extend(die(2, "a"));
        info.extend(die(2, "b"));
        info.push(0); // null terminator

        let cu = CompileUnit {
            index: 0,
            linkobj: 0,
            version: 4,
            address_size: 8,
            is_64bit: false,
            abbrev_offset: 0,
            header_offset: 0,
            root_offset: 0,
            end_offset: info.len() as u32,
            abbrevs,
        };
        Fixture { cu, info }
    }

    #[test]
    fn move_down_then_next_then_next_exhausts_children() {
        let fx = build_fixture();
        let mut w = Walker::for_compile_unit(&fx, &fx.cu);
        w.move_preorder().unwrap(); // root
        assert_eq!(w.get_entry().unwrap().get_string_attribute(DW_AT_NAME).unwrap(), "root");

        let child1 = w.move_down().unwrap().unwrap();
        assert_eq!(child1.get_string_attribute(DW_AT_NAME).unwrap(), "a");

        let child2 = w.move_next().unwrap().unwrap();
        assert_eq!(child2.get_string_attribute(DW_AT_NAME).unwrap(), "b");

        assert!(w.move_next().unwrap().is_none());
    }

    #[test]
    fn preorder_visits_root_then_each_child_in_order() {
        let fx = build_fixture();
        let mut w = Walker::for_compile_unit(&fx, &fx.cu);
        let mut names = Vec::new();
        while let Some(e) = w.move_preorder().unwrap() {
            names.push(e.get_string_attribute(DW_AT_NAME).unwrap().into_owned());
        }
        assert_eq!(names, vec!["root", "a", "b"]);
    }

    #[test]
    fn preorder_honors_tag_filter() {
        let fx = build_fixture();
        let mut w = Walker::for_compile_unit(&fx, &fx.cu);
        w.set_filter_tag(DW_TAG_SUBPROGRAM);
        let mut names = Vec::new();
        while let Some(e) = w.move_preorder().unwrap() {
            names.push(e.get_string_attribute(DW_AT_NAME).unwrap().into_owned());
        }
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn move_to_resets_path_to_single_entry() {
        let fx = build_fixture();
        let mut finder = Walker::for_compile_unit(&fx, &fx.cu);
        let mut b = Reference::NULL;
        while let Some(e) = finder.move_preorder().unwrap() {
            if e.get_string_attribute(DW_AT_NAME).unwrap() == "b" {
                b = e.get_reference();
            }
        }
        assert_ne!(b, Reference::NULL);

        let mut w = Walker::for_compile_unit(&fx, &fx.cu);
        let e = w.move_to(b).unwrap().unwrap();
        assert_eq!(e.get_string_attribute(DW_AT_NAME).unwrap(), "b");
        assert_eq!(w.get_path(), vec![b]);
    }

    #[test]
    fn move_up_from_child_returns_to_parent() {
        let fx = build_fixture();
        let mut w = Walker::for_compile_unit(&fx, &fx.cu);
        w.move_preorder().unwrap();
        w.move_down().unwrap();
        let parent = w.move_up().unwrap().unwrap();
        assert_eq!(parent.get_string_attribute(DW_AT_NAME).unwrap(), "root");
        assert!(w.move_up().unwrap().is_none());
    }
}
