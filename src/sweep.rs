//! Sweep engine.
//!
//! Walks every arena (spec §4.7): survivors (`BLACK`) turn back `WHITE` for
//! the next cycle, unreached cells (`WHITE`) become `FREE`, `EXTENT` cells
//! are left alone. Free runs found are handed to the allocator's fit
//! free-lists; wholly-free arenas are retired to the recycled pool. The
//! huge-block table and weak-reference bag are swept in the same pass
//! (spec §4.8).

use crate::allocator::Allocator;
use crate::arena::CELL_SIZE;
use crate::object::{BlockType, GcPtr};
use crate::weakref::WeakrefBag;

pub struct SweepReport {
    pub reclaimed_cells: usize,
    pub reclaimed_huge: usize,
    pub retired_arenas: usize,
    /// Total `FREE` cells across all arenas after this sweep (spec §3's
    /// "global collector state", updated by sweep).
    pub free_cells: usize,
    /// Length, in cells, of the single largest contiguous free run found
    /// across all arenas after this sweep.
    pub largest_free_block: usize,
}

/// Run a full sweep pass over every arena and the huge-block table, then
/// resolve the weak-reference bag against the post-sweep liveness state.
///
/// # Safety
/// Every slot registered in `weakrefs` must still be valid to write
/// through (spec §4.8's contract on [`WeakrefBag::resolve`]).
pub unsafe fn sweep(allocator: &Allocator, weakrefs: &mut WeakrefBag) -> SweepReport {
    allocator.clear_free_lists();
    let bump_idx = allocator.bump_arena_index();

    let mut reclaimed_cells = 0usize;
    let mut total_free = 0usize;
    let mut largest_run = 0usize;
    let mut empties = Vec::new();

    allocator.with_arenas(|arenas| {
        for (idx, arena) in arenas.iter().enumerate() {
            let skip_bump = bump_idx == Some(idx);
            let result = arena.sweep(skip_bump);
            reclaimed_cells += result.free_cells;
            for (start, len) in result.free_runs {
                total_free += len;
                largest_run = largest_run.max(len);
                allocator.register_free_run(len * CELL_SIZE, idx, start, len);
            }
            if result.wholly_free {
                empties.push(idx);
            }
        }
    });

    // Retire in reverse index order so earlier indices stay valid as later
    // ones are removed.
    let retired_arenas = empties.len();
    for idx in empties.into_iter().rev() {
        allocator.retire_empty_arena(idx);
    }

    // Fragmentation policy (spec §9 open question, resolved): bias toward
    // the bump allocator when one large contiguous run dominates free space
    // (total free cells within 2x the largest run), and toward the fit
    // free-lists when free space is scattered across many small runs.
    allocator
        .use_bump_allocator
        .set(total_free < 2 * largest_run.max(1));

    let huge_dead = allocator.huge.borrow_mut().sweep();
    let reclaimed_huge = huge_dead.len();
    for (addr, size) in huge_dead {
        // SAFETY: addr/size came straight from the huge table's own
        // bookkeeping of a live allocation it just pruned.
        unsafe { allocator.dealloc_huge(addr, size) };
    }

    // SAFETY: forwarded from this function's contract.
    unsafe {
        weakrefs.resolve(
            |holder| is_live(allocator, holder),
            |target| is_live(allocator, target),
        )
    };

    SweepReport {
        reclaimed_cells,
        reclaimed_huge,
        retired_arenas,
        free_cells: total_free,
        largest_free_block: largest_run,
    }
}

fn is_live(allocator: &Allocator, obj: GcPtr) -> bool {
    if obj.is_null() {
        return false;
    }
    if allocator.is_huge(obj) {
        return true; // huge table has already pruned dead entries
    }
    allocator.with_arenas(|arenas| {
        arenas
            .iter()
            .find(|a| a.contains(obj.0 as usize))
            .is_some_and(|a| a.block_type(a.cell_index_of(obj.0 as usize)) != BlockType::Free)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graystack::{GrayDepth, GrayStack};
    use crate::mark::{mark_step, shade};
    use crate::object::Trace;

    struct Leaf;
    impl Trace for Leaf {
        fn trace(&self, _visit: &mut dyn FnMut(GcPtr)) {}
    }

    #[test]
    fn unrooted_object_is_reclaimed() {
        let allocator = Allocator::new();
        let mut weakrefs = WeakrefBag::new();
        allocator.alloc(0, Leaf, false).unwrap();

        let report = unsafe { sweep(&allocator, &mut weakrefs) };
        assert!(report.reclaimed_cells > 0);
    }

    #[test]
    fn rooted_object_survives_as_white() {
        let allocator = Allocator::new();
        let mut weakrefs = WeakrefBag::new();
        let general = GrayStack::new();
        let depth = GrayDepth::new();

        let obj = allocator.alloc(0, Leaf, false).unwrap();
        shade(obj, &allocator, &general, &depth);
        while !mark_step(&allocator, &general, &depth, 16, false) {}

        unsafe { sweep(&allocator, &mut weakrefs) };

        allocator.with_arenas(|arenas| {
            let arena = arenas.iter().find(|a| a.contains(obj.0 as usize)).unwrap();
            assert_eq!(
                arena.block_type(arena.cell_index_of(obj.0 as usize)),
                BlockType::White
            );
        });
    }

    #[test]
    fn largest_free_block_never_exceeds_free_cells() {
        let allocator = Allocator::new();
        let mut weakrefs = WeakrefBag::new();
        for _ in 0..4 {
            allocator.alloc(0, Leaf, false).unwrap();
        }

        let report = unsafe { sweep(&allocator, &mut weakrefs) };
        assert!(report.largest_free_block <= report.free_cells);
        assert!(report.free_cells > 0);
    }

    #[test]
    fn weakref_to_dead_target_is_cleared() {
        let allocator = Allocator::new();
        let mut weakrefs = WeakrefBag::new();
        let obj = allocator.alloc(0, Leaf, false).unwrap();
        let mut slot = obj;
        unsafe { weakrefs.register(GcPtr(std::ptr::null()), &mut slot as *mut GcPtr) };

        unsafe { sweep(&allocator, &mut weakrefs) };
        assert!(slot.is_null());
    }
}
