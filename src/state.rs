//! The introspection state: the set of link objects and compile units this process has loaded,
//! the address range index built from them, and the lookups (`describe_address`, `get_full_name`)
//! built on top.
//!
//! Grounded throughout on `state_t` in the original's `dwarf/state.cxx`: `add_self`/
//! `add_executable` discover and map link objects, `prepare_address_index` walks every compile
//! unit's `DW_TAG_subprogram` entries into the address index, and `describe_address`/
//! `get_full_name` are lookups over the result.

use std::cell::RefCell;
use std::path::Path;

use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::dwarf::constants::*;
use crate::dwarf::{AddrIndex, CompileUnit, Entry, Reader, Reference, SectionContext, Walker, WalkerContext};
use crate::error::{DwarfError, DwarfErrorKind, Error, Event, MapError, MapErrorKind};
use crate::object::{LinkObject, SectionKind};
use crate::platform::{LinuxPlatform, Platform};

/// The result of a successful [`State::describe_address`] lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressInfo {
    /// The containing function's reference, following `DW_AT_specification` where present.
    pub function: Reference,
    /// `addr`'s offset from the start of the matched range.
    pub offset: u64,
    /// Source line; always `0` (`.debug_line` decoding is out of scope for now).
    pub line: u32,
}

/// Owns every link object, compile unit, and the address index built over them. The process-wide
/// introspection facade: at most one is expected to be live at a time (mirroring the original's
/// single static `state_t*`), though nothing here enforces that beyond convention — callers that
/// want the invariant should hold their `State` behind a `once_cell::sync::OnceCell`.
pub struct State<P: Platform = LinuxPlatform> {
    platform: P,
    config: Config,
    linkobjs: Vec<LinkObject>,
    compile_units: Vec<CompileUnit>,
    address_index: RefCell<AddrIndex>,
    sink: Option<Box<dyn Fn(Event) + Send + Sync>>,
}

impl State<LinuxPlatform> {
    /// Creates a state backed by the real OS, with no objects loaded yet.
    pub fn new() -> Self {
        Self::with_platform(LinuxPlatform::new())
    }
}

impl Default for State<LinuxPlatform> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> State<P> {
    /// Creates a state over a caller-supplied [`Platform`], typically [`crate::platform::FakePlatform`]
    /// in tests, with the default [`Config`].
    pub fn with_platform(platform: P) -> Self {
        Self::with_platform_and_config(platform, Config::default())
    }

    /// Creates a state over a caller-supplied [`Platform`] and [`Config`] (which link objects to
    /// skip, what `tracing` target to use).
    pub fn with_platform_and_config(platform: P, config: Config) -> Self {
        Self {
            platform,
            config,
            linkobjs: Vec::new(),
            compile_units: Vec::new(),
            address_index: RefCell::new(AddrIndex::new()),
            sink: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a callback for soft ("raised") events, mirroring the original's event sink used
    /// by the unit-test runner to collect non-fatal assertion failures.
    pub fn set_sink(&mut self, sink: impl Fn(Event) + Send + Sync + 'static) {
        self.sink = Some(Box::new(sink));
    }

    /// Emits a soft event: delivered to the sink if one is registered, otherwise dropped (matching
    /// the original's behavior when no test runner has installed a collector).
    pub fn raise(&self, message: impl Into<String>) {
        if let Some(sink) = &self.sink {
            let event = Event::new(message).with_stack(self.platform.stack_trace());
            sink(event);
        }
    }

    /// Adds every link object the loader has already mapped into this process (the running
    /// executable and its shared libraries), maps their DWARF sections, decodes their compile
    /// units, and rebuilds the address index.
    #[instrument(skip(self))]
    pub fn add_self(&mut self) -> Result<(), Error> {
        let exe = self.platform.self_exe().ok();
        let objects = self
            .platform
            .loaded_objects()
            .map_err(|e| Error::Map(MapError::with_source(MapErrorKind::Open, e)))?;

        for obj in objects {
            let path = obj.path.or_else(|| exe.clone());
            let Some(path) = path else { continue };
            if self.config.is_ignored(&path) {
                debug!(path = %path.display(), "ignoring platform-internal link object");
                continue;
            }
            let index = self.linkobjs.len() as u32;
            let mut linkobj = LinkObject::new(index, &path);
            if let Some(mapping) = obj.mappings.into_iter().next() {
                linkobj.attach_system_mapping(mapping);
            }
            self.load_linkobj(linkobj)?;
        }

        self.prepare_address_index();
        Ok(())
    }

    /// Adds a single object file by path (e.g. a standalone executable under test), independent
    /// of whether the current process has it mapped.
    #[instrument(skip(self))]
    pub fn add_executable(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let index = self.linkobjs.len() as u32;
        let linkobj = LinkObject::new(index, path);
        self.load_linkobj(linkobj)?;
        self.prepare_address_index();
        Ok(())
    }

    fn load_linkobj(&mut self, mut linkobj: LinkObject) -> Result<(), Error> {
        let file_data = std::fs::read(linkobj.path())
            .map_err(|e| Error::Map(MapError::with_source(MapErrorKind::Open, e)))?;
        linkobj
            .discover_sections(&file_data)
            .map_err(Error::Map)?;
        linkobj.map_sections().map_err(Error::Map)?;

        let cu_index_base = linkobj.index();
        match self.read_compile_units(&linkobj, cu_index_base) {
            // Recoverable per §7's error policy: a single link object with no DWARF sections does
            // not stop the rest from being scanned.
            Err(Error::Dwarf(err)) if err.kind() == DwarfErrorKind::NoDebugInfo => {}
            Err(err) => return Err(err),
            Ok(()) => {}
        }
        self.linkobjs.push(linkobj);
        Ok(())
    }

    fn read_compile_units(&mut self, linkobj: &LinkObject, linkobj_index: u32) -> Result<(), Error> {
        let Some(info) = linkobj.section_bytes(SectionKind::Info) else {
            warn!(
                path = %linkobj.path().display(),
                tracing_target = self.config.tracing_target(),
                "object has no DWARF sections"
            );
            return Err(Error::Dwarf(DwarfError::new(DwarfErrorKind::NoDebugInfo)));
        };
        let abbrev = linkobj.section_bytes(SectionKind::Abbrev).unwrap_or(&[]);

        let mut info_reader = Reader::new(info);
        loop {
            let next_index = self.compile_units.len() as u32;
            let header = CompileUnit::read_header(&mut info_reader, next_index, linkobj_index)
                .map_err(Error::Dwarf)?;
            let Some(mut cu) = header else { break };

            let mut abbrev_reader = Reader::new(abbrev);
            abbrev_reader.seek(cu.abbrev_offset as usize);
            cu.read_abbrevs(&mut abbrev_reader);

            let end = cu.end_offset as usize;
            self.compile_units.push(cu);
            info_reader.seek(end);
        }
        Ok(())
    }

    /// Rebuilds the address range index from every compile unit's `DW_TAG_subprogram` entries.
    fn prepare_address_index(&self) {
        let mut index = AddrIndex::new();
        for cu in &self.compile_units {
            let mut w: Walker<'_, Self> = Walker::for_compile_unit(self, cu);
            w.set_filter_tag(DW_TAG_SUBPROGRAM);
            loop {
                let entry = match w.move_preorder() {
                    Ok(Some(e)) => e.clone(),
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "stopped walking compile unit while building address index");
                        break;
                    }
                };
                let funcref = {
                    let spec = entry.get_reference_attribute(DW_AT_SPECIFICATION);
                    if spec.is_null() {
                        entry.get_reference()
                    } else {
                        spec
                    }
                };
                insert_ranges(&w, &entry, funcref, &mut index);
            }
        }
        *self.address_index.borrow_mut() = index;
    }

    /// Finds the function containing `addr`, if the address index has an entry for it.
    pub fn describe_address(&self, addr: u64) -> Option<AddressInfo> {
        let (function, start) = self.address_index.borrow_mut().lookup_with_start(addr)?;
        Some(AddressInfo {
            function,
            offset: addr - start,
            line: 0, // TODO: decode .debug_line once line-number resolution is in scope.
        })
    }

    /// Composes a DIE's fully qualified name by walking up through its ancestors (namespaces,
    /// enclosing types) joining names with `::`, following `DW_AT_specification` at every level.
    pub fn get_full_name(&self, reference: Reference) -> String {
        let mut w: Walker<'_, Self> = Walker::new(self, reference);
        let Ok(Some(first)) = w.move_to(reference) else {
            return String::new();
        };
        let mut current = first.clone();
        let mut parts = Vec::new();

        loop {
            let spec = current.get_reference_attribute(DW_AT_SPECIFICATION);
            if !spec.is_null() {
                if let Ok(Some(e)) = w.move_to(spec) {
                    current = e.clone();
                }
            }
            if current.get_tag() == DW_TAG_COMPILE_UNIT {
                break;
            }
            if let Some(name) = current.get_string_attribute(DW_AT_NAME) {
                parts.push(name.into_owned());
            }
            match w.move_up() {
                Ok(Some(e)) => current = e.clone(),
                _ => break,
            }
        }

        parts.reverse();
        parts.join("::")
    }

    /// Prints every compile unit's DIE tree to the `tracing` `info` target, depth-indented —
    /// the introspection-side counterpart of the original's `dump_dies`.
    pub fn dump_dies(&self) {
        for cu in &self.compile_units {
            let mut w: Walker<'_, Self> = Walker::for_compile_unit(self, cu);
            let mut depth: i32 = -1;
            let mut last_depth = -1i32;
            loop {
                match w.move_preorder() {
                    Ok(Some(entry)) => {
                        let path_len = w.get_path().len() as i32 - 1;
                        if path_len > last_depth {
                            depth += 1;
                        } else if path_len < last_depth {
                            depth -= last_depth - path_len;
                        }
                        last_depth = path_len;
                        let indent = " ".repeat((depth.max(0) as usize) * 2);
                        tracing::info!("{indent}{}", tag_name(entry.get_tag()));
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "stopped dumping DIEs");
                        break;
                    }
                }
            }
        }
    }

    pub fn compile_units(&self) -> &[CompileUnit] {
        &self.compile_units
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }
}

fn insert_ranges(w: &Walker<'_, impl WalkerContext>, entry: &Entry<'_>, funcref: Reference, index: &mut AddrIndex) {
    let has_lo = entry.get_attribute(DW_AT_LOW_PC).is_some();
    let lo = entry.get_uint64_attribute(DW_AT_LOW_PC);
    let has_hi = entry.get_attribute(DW_AT_HIGH_PC).is_some();
    let mut hi = entry.get_uint64_attribute(DW_AT_HIGH_PC);
    let ranges = entry.get_uint64_attribute(DW_AT_RANGES);

    if has_lo && has_hi {
        // In DWARF 4, DW_AT_high_pc may be an offset from low_pc rather than an absolute address,
        // depending on its form.
        if w.get_dwarf_version() == 4 && entry.get_attribute_form(DW_AT_HIGH_PC) != Some(DW_FORM_ADDR) {
            hi += lo;
        }
        index.insert_range(lo, hi, funcref);
    } else if ranges != 0 {
        let mut r = w.get_section_contents(SectionKind::Ranges);
        r.skip(ranges as usize);
        let mut base = 0u64;
        loop {
            let (Some(start), Some(end)) = (r.read_addr(8), r.read_addr(8)) else {
                break;
            };
            if start == 0 && end == 0 {
                break;
            }
            if start == u64::MAX {
                base = end;
                continue;
            }
            index.insert_range(start + base, end + base, funcref);
        }
    } else if has_lo {
        index.insert_range(lo, lo + 1, funcref);
    }
}

impl<P: Platform> SectionContext for State<P> {
    fn section_bytes(&self, linkobj: u32, kind: SectionKind) -> Option<&[u8]> {
        self.linkobjs.get(linkobj as usize)?.section_bytes(kind)
    }

    fn resolve_global_offset(&self, global_offset: u64) -> Reference {
        for cu in &self.compile_units {
            if (cu.header_offset as u64) <= global_offset && global_offset < cu.end_offset as u64 {
                return Reference::new(cu.index, global_offset as u32);
            }
        }
        Reference::NULL
    }
}

impl<P: Platform> WalkerContext for State<P> {
    fn compile_unit(&self, index: u32) -> Option<&CompileUnit> {
        self.compile_units.get(index as usize)
    }

    fn debug_info(&self, index: u32) -> Option<&[u8]> {
        let cu = self.compile_units.get(index as usize)?;
        self.linkobjs.get(cu.linkobj as usize)?.section_bytes(SectionKind::Info)
    }
}
