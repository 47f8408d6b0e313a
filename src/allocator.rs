//! Bump + size-classed free-list ("fit") allocator front end.
//!
//! Spec §3/§4.2: allocation tries the bump pointer first or the fit
//! free-lists first depending on a fragmentation-driven bias bit the sweep
//! engine sets ([`Allocator::use_bump_allocator`]); falls back to the other
//! strategy on failure; grows the arena pool if both fail; objects above the
//! largest size class go to a dedicated, arena-aligned huge allocation.
//!
//! Size classes are grounded in `otter-vm-gc/src/marked_block.rs`'s
//! `MarkedBlock` size-class table, expressed here in cells (`CELL_SIZE`
//! bytes each) instead of raw bytes since this design stores block-type per
//! cell rather than per size-classed block.

use std::alloc::{self, Layout};
use std::cell::{Cell, RefCell};

use crate::arena::{Arena, CELL_SIZE};
use crate::huge::HugeBlockTable;
use crate::object::{GcBox, GcPtr, Trace};

/// Size classes in bytes, matching `MarkedBlock`'s table. Any request larger
/// than the last entry is a huge allocation.
pub const SIZE_CLASSES_BYTES: [usize; 14] = [
    16, 32, 48, 64, 96, 128, 192, 256, 384, 512, 1024, 2048, 4096, 8192,
];

pub const HUGE_THRESHOLD_BYTES: usize = 8192;

fn size_class_index(size: usize) -> Option<usize> {
    SIZE_CLASSES_BYTES.iter().position(|&c| size <= c)
}

/// A free run, recorded as `(arena_index, start_cell, len_cells)`.
type FreeRun = (usize, usize, usize);

pub struct Allocator {
    arenas: RefCell<Vec<Arena>>,
    free_arenas: RefCell<Vec<Arena>>,
    /// Arena currently being bump-allocated into, if any.
    bump_arena: Cell<Option<usize>>,
    /// Per-size-class free lists of cell runs at least that large.
    free_lists: RefCell<Vec<Vec<FreeRun>>>,
    pub huge: RefCell<HugeBlockTable>,
    /// Fragmentation-driven bias: prefer the bump allocator over the fit
    /// free-lists. Flipped by the sweep engine (spec §4.7).
    pub use_bump_allocator: Cell<bool>,
}

impl Allocator {
    pub fn new() -> Self {
        Self {
            arenas: RefCell::new(Vec::new()),
            free_arenas: RefCell::new(Vec::new()),
            bump_arena: Cell::new(None),
            free_lists: RefCell::new(vec![Vec::new(); SIZE_CLASSES_BYTES.len()]),
            huge: RefCell::new(HugeBlockTable::new()),
            use_bump_allocator: Cell::new(true),
        }
    }

    pub fn arena_count(&self) -> usize {
        self.arenas.borrow().len()
    }

    pub fn with_arenas<R>(&self, f: impl FnOnce(&[Arena]) -> R) -> R {
        f(&self.arenas.borrow())
    }

    pub fn bump_arena_index(&self) -> Option<usize> {
        self.bump_arena.get()
    }

    /// Allocate and register a fresh arena, preferring one recycled from the
    /// free pool (spec §4.7's empty-arena recycling). Returns its index.
    fn grow(&self) -> Option<usize> {
        let mut arenas = self.arenas.borrow_mut();
        let arena = self
            .free_arenas
            .borrow_mut()
            .pop()
            .map(|a| {
                a.reset();
                a
            })
            .or_else(Arena::new)?;
        arenas.push(arena);
        Some(arenas.len() - 1)
    }

    fn bump_alloc_cells(&self, cells: usize) -> Option<*mut u8> {
        if let Some(idx) = self.bump_arena.get() {
            let arenas = self.arenas.borrow();
            if let Some(ptr) = arenas[idx].bump_alloc(cells) {
                return Some(ptr);
            }
        }
        let idx = self.grow()?;
        self.bump_arena.set(Some(idx));
        self.arenas.borrow()[idx].bump_alloc(cells)
    }

    fn fit_alloc_cells(&self, class_idx: usize, cells: usize) -> Option<*mut u8> {
        let mut lists = self.free_lists.borrow_mut();
        for class in class_idx..lists.len() {
            if let Some(pos) = lists[class].iter().position(|(_, _, len)| *len >= cells) {
                let (arena_idx, start, len) = lists[class].remove(pos);
                let arenas = self.arenas.borrow();
                let ptr = arenas[arena_idx].mark_allocated(start, cells);
                if len > cells {
                    lists[class].push((arena_idx, start + cells, len - cells));
                }
                return Some(ptr);
            }
        }
        None
    }

    /// Allocate `cells` contiguous cells, trying the biased strategy first
    /// and falling back to the other, then growing the pool if both fail
    /// (spec §4.2).
    fn alloc_cells(&self, size: usize, cells: usize) -> Option<*mut u8> {
        let class_idx = size_class_index(size).unwrap_or(SIZE_CLASSES_BYTES.len() - 1);
        if self.use_bump_allocator.get() {
            self.bump_alloc_cells(cells)
                .or_else(|| self.fit_alloc_cells(class_idx, cells))
                .or_else(|| {
                    self.grow()?;
                    self.bump_alloc_cells(cells)
                })
        } else {
            self.fit_alloc_cells(class_idx, cells)
                .or_else(|| self.bump_alloc_cells(cells))
                .or_else(|| {
                    self.grow()?;
                    self.fit_alloc_cells(class_idx, cells)
                })
        }
    }

    fn alloc_huge(&self, size: usize) -> Option<*mut u8> {
        let layout = Layout::from_size_align(size, crate::arena::ARENA_SIZE).ok()?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            None
        } else {
            Some(ptr)
        }
    }

    /// Release a huge allocation's backing memory. `size` must match the
    /// size originally passed to the allocation that produced `addr`.
    ///
    /// # Safety
    /// `addr` must have come from [`Self::alloc_huge`] with this `size` and
    /// must not be in use.
    pub(crate) unsafe fn dealloc_huge(&self, addr: usize, size: usize) {
        if let Ok(layout) = Layout::from_size_align(size, crate::arena::ARENA_SIZE) {
            // SAFETY: addr was allocated with this exact layout.
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
        }
    }

    /// Allocate a `GcBox<T>` and return its type-erased identity. The box's
    /// header is pre-set white and non-prebuilt, or black if `black_alloc`
    /// is set (spec §4.3: objects allocated while `MARK` is in progress are
    /// born already marked).
    pub fn alloc<T: Trace>(&self, tag: u8, value: T, black_alloc: bool) -> Option<GcPtr> {
        let size = std::mem::size_of::<GcBox<T>>();
        if size > HUGE_THRESHOLD_BYTES {
            let raw = self.alloc_huge(size)?;
            // SAFETY: raw is a fresh, correctly-sized, zeroed allocation.
            unsafe { std::ptr::write(raw as *mut GcBox<T>, GcBox::new(tag, value)) };
            let ptr = GcPtr(raw as *const crate::object::GcHeader);
            self.huge.borrow_mut().register(ptr, size);
            if black_alloc {
                self.huge.borrow_mut().mark(ptr);
            }
            return Some(ptr);
        }

        let cells = Arena::cells_needed(size);
        let raw = self.alloc_cells(size, cells)?;
        // SAFETY: raw is fresh, cell-aligned storage sized for at least
        // `size` bytes (cells_needed rounds up).
        unsafe { std::ptr::write(raw as *mut GcBox<T>, GcBox::new(tag, value)) };
        let ptr = GcPtr(raw as *const crate::object::GcHeader);
        if black_alloc {
            if let Some(arena) = self.arena_containing(ptr.0 as usize) {
                let idx = arena.cell_index_of(ptr.0 as usize);
                arena.set_block_type(idx, crate::object::BlockType::Black);
            }
        }
        Some(ptr)
    }

    fn arena_containing(&self, addr: usize) -> Option<std::cell::Ref<'_, Arena>> {
        let base = crate::arena::arena_base_of(addr);
        std::cell::Ref::filter_map(self.arenas.borrow(), |arenas| {
            arenas.iter().find(|a| a.base() == base)
        })
        .ok()
    }

    pub fn is_huge(&self, ptr: GcPtr) -> bool {
        self.huge.borrow().has(ptr)
    }

    /// Register a size-classed free run discovered by sweep, for reuse by
    /// the fit allocator.
    pub fn register_free_run(&self, size_hint: usize, arena_idx: usize, start: usize, len: usize) {
        let class_idx = size_class_index(size_hint).unwrap_or(0);
        self.free_lists.borrow_mut()[class_idx].push((arena_idx, start, len));
    }

    pub fn clear_free_lists(&self) {
        for list in self.free_lists.borrow_mut().iter_mut() {
            list.clear();
        }
    }

    pub fn retire_empty_arena(&self, idx: usize) {
        let mut arenas = self.arenas.borrow_mut();
        if idx >= arenas.len() {
            return;
        }
        let arena = arenas.remove(idx);
        if self.bump_arena.get() == Some(idx) {
            self.bump_arena.set(None);
        } else if let Some(b) = self.bump_arena.get() {
            if b > idx {
                self.bump_arena.set(Some(b - 1));
            }
        }
        self.free_arenas.borrow_mut().push(arena);
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        // Arenas free themselves via Arena's own Drop; huge allocations are
        // bare `alloc`ed bytes this table owns directly and must release.
        let entries = self.huge.get_mut().drain_all();
        for (addr, size) in entries {
            // SAFETY: every entry came from `alloc_huge` with this size.
            unsafe { self.dealloc_huge(addr, size) };
        }
    }
}

// Cells consumed per byte; kept private to this module's size-class math so
// CELL_SIZE stays the single source of truth.
const _: () = assert!(CELL_SIZE == 16);

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf;
    impl Trace for Leaf {
        fn trace(&self, _visit: &mut dyn FnMut(GcPtr)) {}
    }

    #[test]
    fn small_object_lands_in_an_arena() {
        let alloc = Allocator::new();
        let ptr = alloc.alloc(0, Leaf, false).unwrap();
        assert!(!alloc.is_huge(ptr));
        assert_eq!(alloc.arena_count(), 1);
    }

    #[test]
    fn huge_object_is_arena_aligned_and_registered() {
        let alloc = Allocator::new();
        let value = [0u8; 9000];
        let ptr = alloc.alloc(0, value, false).unwrap();
        assert!(alloc.is_huge(ptr));
        assert_eq!(
            crate::arena::arena_base_of(ptr.0 as usize),
            ptr.0 as usize
        );
    }

    #[test]
    fn black_alloc_marks_huge_object_immediately() {
        let alloc = Allocator::new();
        let value = [0u8; 9000];
        let ptr = alloc.alloc(0, value, true).unwrap();
        assert!(alloc.huge.borrow().is_marked(ptr));
    }

    #[test]
    fn size_class_lookup_rounds_up() {
        assert_eq!(size_class_index(1), Some(0));
        assert_eq!(size_class_index(16), Some(0));
        assert_eq!(size_class_index(17), Some(1));
        assert_eq!(size_class_index(8192), Some(13));
        assert_eq!(size_class_index(8193), None);
    }
}
