//! Huge-block side table.
//!
//! Oversized objects (bigger than the largest arena size class) are backed
//! by their own dedicated, arena-aligned allocation rather than living in an
//! arena's cell grid — the "address equals arena base" test in
//! [`crate::arena::arena_base_of`] recognizes them. This module is just the
//! mark-bit bookkeeping for that set; allocation and release of the backing
//! memory is the allocator's job (spec §4.2 step 4).
//!
//! Grounded on `otter-vm-gc/src/ephemeron.rs`'s use of an `FxHashMap` keyed
//! by object address for an unordered side table.

use rustc_hash::FxHashMap;

use crate::object::GcPtr;

/// Per-huge-object bookkeeping: just the mark bit, since color for a huge
/// object is derived the same way as for any other object (mark bit plus
/// the `GRAY` header flag) but without a block-type cell to store it in.
#[derive(Debug, Clone, Copy)]
struct HugeEntry {
    marked: bool,
    size: usize,
}

/// Side table of all live huge-block allocations.
#[derive(Default)]
pub struct HugeBlockTable {
    entries: FxHashMap<usize, HugeEntry>,
}

impl HugeBlockTable {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }

    pub fn register(&mut self, obj: GcPtr, size: usize) {
        self.entries
            .insert(obj.0 as usize, HugeEntry { marked: false, size });
    }

    pub fn has(&self, obj: GcPtr) -> bool {
        self.entries.contains_key(&(obj.0 as usize))
    }

    pub fn is_marked(&self, obj: GcPtr) -> bool {
        self.entries
            .get(&(obj.0 as usize))
            .is_some_and(|e| e.marked)
    }

    /// Mark `obj`, returning `true` if this flipped it from unmarked to
    /// marked (the caller should only enqueue it for tracing in that case).
    pub fn mark(&mut self, obj: GcPtr) -> bool {
        match self.entries.get_mut(&(obj.0 as usize)) {
            Some(entry) if !entry.marked => {
                entry.marked = true;
                true
            }
            _ => false,
        }
    }

    /// Sweep: collect `(address, size)` of entries that survived unmarked
    /// (for the allocator to release), then reset survivors' mark bits for
    /// the next cycle.
    pub fn sweep(&mut self) -> Vec<(usize, usize)> {
        let dead: Vec<(usize, usize)> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.marked)
            .map(|(addr, e)| (*addr, e.size))
            .collect();
        for (addr, _) in &dead {
            self.entries.remove(addr);
        }
        for entry in self.entries.values_mut() {
            entry.marked = false;
        }
        dead
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain every entry regardless of mark state, for use when the owning
    /// allocator itself is being torn down.
    pub fn drain_all(&mut self) -> Vec<(usize, usize)> {
        self.entries.drain().map(|(addr, e)| (addr, e.size)).collect()
    }
}
