//! Incremental tri-color mark engine.
//!
//! Redesigned from `otter-vm-gc/src/mark_sweep.rs`'s
//! `start_incremental_gc`/`incremental_mark_step`/`finish_gc` budgeted-step
//! API: that file drives the same increment-with-a-floor discipline, but
//! resets color by bumping a logical mark-version counter on the header.
//! This rendition stores block-type explicitly in the arena bitmap (spec
//! §3), so "reset" is sweep flipping `BLACK` cells back to `WHITE` rather
//! than incrementing a version — shading and blackening below operate on
//! that bitmap plus the header's `GRAY` bit instead.

use crate::allocator::Allocator;
use crate::graystack::{GrayDepth, GrayStack};
use crate::object::{BlockType, GcPtr};

/// Floor on objects traced per incremental step per gray stack, per spec
/// §4.4's halving rule `k = max(n / 2, INC_MARK_MIN)`. Fixed internally,
/// unlike the byte-denominated `INCMARK` pacing threshold in
/// [`crate::config`] — a different, env-configurable concept.
pub const INC_MARK_MIN: usize = 16;

/// Floor on objects traced per incremental step, per spec §4.4's halving
/// rule `k = max(n / 2, INC_MARK_MIN)`.
pub fn increment_budget(remaining: usize, inc_mark_min: usize) -> usize {
    if remaining == 0 {
        0
    } else {
        (remaining / 2).max(inc_mark_min).min(remaining)
    }
}

/// Shade `obj`: if it isn't already pending trace, flag it `GRAY` and push
/// it onto the stack that owns its storage (its arena's gray stack for a
/// normal object, the general-purpose stack for a huge or prebuilt one).
/// This is the operation both root-scanning and the write barrier perform
/// (spec §4.4/§4.5).
pub fn shade(obj: GcPtr, allocator: &Allocator, general: &GrayStack, depth: &GrayDepth) {
    if obj.is_null() {
        return;
    }
    // SAFETY: obj is a live, registered GcPtr per the caller's contract.
    let header = unsafe { obj.header() };
    if header.is_gray() {
        return;
    }
    header.set_gray();

    if allocator.is_huge(obj) || header.is_prebuilt() {
        general.push(obj);
        depth.on_push();
        return;
    }

    let pushed = allocator.with_arenas(|arenas| {
        arenas.iter().find(|a| a.contains(obj.0 as usize)).map(|arena| {
            arena.gray_stack.push(obj);
        })
    });
    if pushed.is_some() {
        depth.on_push();
    } else {
        // Not in any known arena and not huge/prebuilt: nothing owns it.
        // Clear the bit we just set so future shades don't silently no-op.
        header.clear_gray();
    }
}

/// Blacken one already-popped object: mark it fully scanned and shade every
/// outgoing reference its tracer reports.
fn blacken(obj: GcPtr, allocator: &Allocator, general: &GrayStack, depth: &GrayDepth) {
    // SAFETY: obj came off a gray stack, so it was shaded from a live
    // GcPtr.
    let header = unsafe { obj.header() };
    header.clear_gray();

    if allocator.is_huge(obj) {
        allocator.huge.borrow_mut().mark(obj);
    } else if !header.is_prebuilt() {
        allocator.with_arenas(|arenas| {
            if let Some(arena) = arenas.iter().find(|a| a.contains(obj.0 as usize)) {
                let idx = arena.cell_index_of(obj.0 as usize);
                arena.set_block_type(idx, BlockType::Black);
            }
        });
    }

    header.trace(&mut |child| shade(child, allocator, general, depth));
}

/// Drain up to one stack's own sampled budget: spec §4.4 requires each gray
/// stack's increment to be floored independently by `INC_MARK_MIN`, not the
/// pooled total across every stack — a stack already at or below the floor
/// drains completely in a single increment, while a stack well past it only
/// does half its own work. `general` is passed separately from `stack`
/// because a popped object's children may be shaded onto any stack,
/// regardless of which one it was popped from.
fn drain_stack_budget(
    stack: &GrayStack,
    allocator: &Allocator,
    general: &GrayStack,
    depth: &GrayDepth,
    inc_mark_min: usize,
    incremental: bool,
) {
    let n = stack.len();
    if n == 0 {
        return;
    }
    let budget = if incremental {
        increment_budget(n, inc_mark_min)
    } else {
        n
    };
    for _ in 0..budget {
        let Some(obj) = stack.pop() else { break };
        depth.on_pop();
        blacken(obj, allocator, general, depth);
    }
}

/// Run one incremental mark step. `incremental` selects the halving rule,
/// sampled independently per stack (spec §4.4): the general-purpose stack's
/// own depth first, then every arena's own gray stack in insertion order. A
/// non-incremental (stop-the-world) call drains every stack in one go.
/// Returns `true` once the worklist is fully drained (phase can advance to
/// `COLLECT`).
pub fn mark_step(
    allocator: &Allocator,
    general: &GrayStack,
    depth: &GrayDepth,
    inc_mark_min: usize,
    incremental: bool,
) -> bool {
    if depth.is_zero() {
        return true;
    }
    drain_stack_budget(general, allocator, general, depth, inc_mark_min, incremental);
    allocator.with_arenas(|arenas| {
        for arena in arenas {
            drain_stack_budget(
                &arena.gray_stack,
                allocator,
                general,
                depth,
                inc_mark_min,
                incremental,
            );
        }
    });
    depth.is_zero()
}
