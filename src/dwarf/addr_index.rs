//! Address-range index: maps a code address back to the DIE (typically a `DW_TAG_subprogram`)
//! whose `[low_pc, high_pc)` or `DW_AT_ranges` list contains it.
//!
//! Ranges are allowed to overlap (inlined/nested subprograms, or a linker laying out COMDAT
//! sections oddly), so this is not a simple non-overlapping interval tree: lookups return the
//! narrowest containing range, matching the original's `range_map_t::lookup`, which preferred the
//! most specific (smallest) match.

use super::reference::Reference;

/// One half-open `[start, end)` address range bound to a DIE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Entry {
    start: u64,
    end: u64,
    reference: Reference,
}

/// A sorted-by-start address range index built once per [`crate::state::State`] and queried many
/// times during `describe_address`.
#[derive(Clone, Debug, Default)]
pub struct AddrIndex {
    entries: Vec<Entry>,
    sorted: bool,
}

impl AddrIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one address range. Ranges with `start >= end` are silently ignored, matching the
    /// original's handling of DIEs with absent or degenerate `low_pc`/`high_pc`.
    pub fn insert_range(&mut self, start: u64, end: u64, reference: Reference) {
        if start >= end {
            return;
        }
        self.entries.push(Entry { start, end, reference });
        self.sorted = false;
    }

    /// Registers every range in a `(start, end)` list under one reference, as produced by decoding
    /// a `DW_AT_ranges` block.
    pub fn insert_ranges(&mut self, ranges: &[(u64, u64)], reference: Reference) {
        for &(start, end) in ranges {
            self.insert_range(start, end, reference);
        }
    }

    fn ensure_sorted(&mut self) {
        if !self.sorted {
            self.entries.sort_by_key(|e| e.start);
            self.sorted = true;
        }
    }

    /// Whether `addr` falls within any registered range.
    pub fn is_within(&mut self, addr: u64) -> bool {
        self.lookup(addr).is_some()
    }

    /// Finds the narrowest range containing `addr`, or `None` if no range contains it.
    ///
    /// Candidate ranges are found by binary search on `start <= addr`, then scanned backward:
    /// since ranges can overlap, the first candidate in start order is not necessarily the
    /// narrowest, so every candidate whose `end > addr` is considered and the smallest kept.
    pub fn lookup(&mut self, addr: u64) -> Option<Reference> {
        self.lookup_with_start(addr).map(|(reference, _)| reference)
    }

    /// Like [`AddrIndex::lookup`], but also returns the matched range's start address, so callers
    /// can compute `addr`'s offset within it.
    pub fn lookup_with_start(&mut self, addr: u64) -> Option<(Reference, u64)> {
        self.ensure_sorted();

        let partition = self.entries.partition_point(|e| e.start <= addr);
        let mut best: Option<Entry> = None;
        for entry in self.entries[..partition].iter().rev() {
            if entry.end <= addr {
                continue;
            }
            let narrower = match best {
                Some(b) => (entry.end - entry.start) < (b.end - b.start),
                None => true,
            };
            if narrower {
                best = Some(*entry);
            }
            // Ranges more than this far back cannot possibly still contain addr if they started
            // before every range already considered and none were wide enough; there is no cheap
            // early-exit without tracking a running max-end, so this stays a linear scan over
            // `partition` candidates, acceptable given typical DIE counts per object.
        }
        best.map(|e| (e.reference, e.start))
    }

    /// Number of registered ranges, for diagnostics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
