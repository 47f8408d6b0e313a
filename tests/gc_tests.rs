//! End-to-end collector scenarios.
//!
//! Each test below drives `Collector` the way a host object model would:
//! allocate, root via the shadow stack, mutate through the write barrier,
//! and force a collection. Mirrors the scenario-style coverage in
//! `otter-vm-gc`'s `tests/gc_tests.rs`, adapted to this crate's API instead
//! of that crate's `AllocationRegistry`.

use std::cell::Cell;

use qcgc::{Collector, Color, GcConfig, GcPtr, Trace};

struct Leaf(u32);
impl Trace for Leaf {
    fn trace(&self, _visit: &mut dyn FnMut(GcPtr)) {}
}

struct Node {
    next: Cell<GcPtr>,
}
impl Trace for Node {
    fn trace(&self, visit: &mut dyn FnMut(GcPtr)) {
        let next = self.next.get();
        if !next.is_null() {
            visit(next);
        }
    }
}

fn set_next(node: GcPtr, value: GcPtr) {
    // SAFETY: node was allocated as a Node by this test.
    unsafe {
        let boxed = &*(node.0 as *const qcgc::object::GcBox<Node>);
        boxed.value.next.set(value);
    }
}

/// S1: a linear chain of rooted nodes survives collection in full.
#[test]
fn s1_linear_chain_survives_collection() {
    let gc = Collector::new();
    let tail = gc.allocate(0, Leaf(3)).unwrap();
    let mid = gc.allocate(0, Node { next: Cell::new(tail) }).unwrap();
    let head = gc.allocate(0, Node { next: Cell::new(mid) }).unwrap();
    gc.shadowstack_push(head);

    gc.collect();

    assert_eq!(gc.get_mark_color(head), Color::White);
    assert_eq!(gc.get_mark_color(mid), Color::White);
    assert_eq!(gc.get_mark_color(tail), Color::White);
}

/// S2: dropping the root to a chain's tail, then collecting, reclaims the
/// now-unreachable suffix while the rooted prefix survives.
#[test]
fn s2_dropped_tail_is_reclaimed() {
    let gc = Collector::new();
    let tail = gc.allocate(0, Leaf(1)).unwrap();
    let head = gc.allocate(0, Node { next: Cell::new(tail) }).unwrap();
    gc.shadowstack_push(head);
    gc.collect();
    assert_eq!(gc.get_mark_color(tail), Color::White);

    // Sever the link and drop the only path to tail.
    set_next(head, GcPtr(std::ptr::null()));
    let report = gc.collect();

    assert!(report.reclaimed_cells > 0);
}

/// S3: a write-barrier-guarded store made mid-cycle keeps a freshly
/// allocated object reachable even though the collector already passed
/// over its container once.
#[test]
fn s3_barrier_rescues_late_reference() {
    let gc = Collector::with_config(GcConfig {
        major_collection: 1_000_000,
        incmark_threshold: 1,
    });
    let head = gc
        .allocate(0, Node { next: Cell::new(GcPtr(std::ptr::null())) })
        .unwrap();
    gc.shadowstack_push(head);
    gc.collect(); // idle baseline, head is white and not gray

    // Kick off a new cycle by hand so head gets traced once (and thus
    // blackened) before the new node is attached.
    gc.write_barrier(head); // no-op while Pause; exercise the guard regardless
    let fresh = gc.allocate(0, Leaf(9)).unwrap();
    set_next(head, fresh);
    gc.write_barrier(head);
    gc.collect();

    assert_eq!(gc.get_mark_color(fresh), Color::White);
}

/// S4: an allocation above the huge threshold is recognized as a huge
/// block, and reclaimed once unreachable.
#[test]
fn s4_huge_block_allocated_and_reclaimed() {
    let gc = Collector::new();
    struct Big([u8; 9000]);
    impl Trace for Big {
        fn trace(&self, _visit: &mut dyn FnMut(GcPtr)) {}
    }

    let big = gc.allocate(0, Big([0; 9000])).unwrap();
    assert_eq!(
        qcgc::arena::arena_base_of(big.0 as usize),
        big.0 as usize,
        "huge block must be arena-aligned at its own address"
    );

    let report = gc.collect();
    assert_eq!(report.reclaimed_huge, 1);
}

/// S5: a weak reference to a collected object is cleared, not left
/// dangling.
#[test]
fn s5_weakref_cleared_on_collection() {
    let gc = Collector::new();
    let target = gc.allocate(0, Leaf(7)).unwrap();
    let mut slot = target;
    // SAFETY: slot lives on this stack frame for the whole test.
    unsafe { gc.register_weakref(GcPtr(std::ptr::null()), &mut slot as *mut GcPtr) };

    gc.collect();

    assert!(slot.is_null());
}

/// S6: interleaved survivors fragment free space into many small holes
/// rather than one dominant run, biasing the allocator toward the fit
/// free-lists — and the next allocation is satisfied from a hole instead of
/// growing the arena pool.
#[test]
fn s6_fragmentation_biases_toward_fit_allocation() {
    let gc = Collector::new();
    let mut survivors = Vec::new();

    for i in 0..64 {
        let obj = gc.allocate(0, Leaf(i)).unwrap();
        if i % 2 == 0 {
            gc.shadowstack_push(obj);
            survivors.push(obj);
        }
        if i % 8 == 7 {
            gc.collect();
        }
    }
    gc.collect();

    assert!(
        !gc.use_bump_allocator(),
        "interleaved survivors should fragment free space into many small \
         holes, biasing the allocator toward the fit free-lists"
    );

    let arena_count_before = gc.arena_count();
    gc.allocate(0, Leaf(999)).unwrap();
    assert_eq!(
        gc.arena_count(),
        arena_count_before,
        "fit allocator should satisfy a small request from an existing hole, \
         not grow the arena pool"
    );

    for obj in survivors {
        assert_eq!(gc.get_mark_color(obj), Color::White);
    }
}
