//! The collector controller: phase state machine and public API.
//!
//! Wires together the allocator, gray stacks, shadow stack, weak-reference
//! bag, and huge-block table behind the `PAUSE → MARK → COLLECT → PAUSE`
//! state machine (spec §5). Grounded in the overall shape of
//! `otter-vm-gc/src/mark_sweep.rs`'s `AllocationRegistry` — same
//! allocate/collect/write-barrier surface — but single-threaded throughout,
//! as spec §5 requires (`otter-vm-gc`'s multi-threaded `concurrent.rs`
//! design is not used here).

use std::cell::{Cell, RefCell};

use crate::allocator::Allocator;
use crate::config::GcConfig;
use crate::graystack::{GrayDepth, GrayStack};
use crate::mark::{self, shade};
use crate::object::{Color, GcBox, GcPtr, Trace};
use crate::shadow_stack::ShadowStack;
use crate::sweep::{self, SweepReport};
use crate::weakref::WeakrefBag;

/// Default shadow-stack capacity. Arbitrary but generous; hosts needing a
/// different bound should size it to their actual call-depth budget.
const DEFAULT_SHADOW_STACK_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pause,
    Mark,
    Collect,
}

pub struct Collector {
    allocator: Allocator,
    general_gray: GrayStack,
    gray_depth: GrayDepth,
    shadow_stack: RefCell<ShadowStack>,
    weakrefs: RefCell<WeakrefBag>,
    prebuilt_roots: RefCell<Vec<GcPtr>>,
    config: GcConfig,
    phase: Cell<Phase>,
    /// Bytes allocated since the last major collection cycle began.
    bytes_since_collection: Cell<usize>,
    /// Bytes allocated since the last paced incremental mark step.
    bytes_since_incmark: Cell<usize>,
}

impl Collector {
    pub fn new() -> Self {
        Self::with_config(GcConfig::from_env())
    }

    pub fn with_config(config: GcConfig) -> Self {
        Self {
            allocator: Allocator::new(),
            general_gray: GrayStack::new(),
            gray_depth: GrayDepth::new(),
            shadow_stack: RefCell::new(ShadowStack::new(DEFAULT_SHADOW_STACK_CAPACITY)),
            weakrefs: RefCell::new(WeakrefBag::new()),
            prebuilt_roots: RefCell::new(Vec::new()),
            config,
            phase: Cell::new(Phase::Pause),
            bytes_since_collection: Cell::new(0),
            bytes_since_incmark: Cell::new(0),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    /// Diagnostic: whether the allocator is currently biased toward the
    /// bump strategy over the fit free-lists (spec §4.7, flipped by sweep).
    pub fn use_bump_allocator(&self) -> bool {
        self.allocator.use_bump_allocator.get()
    }

    /// Diagnostic: number of arenas currently backing the heap.
    pub fn arena_count(&self) -> usize {
        self.allocator.arena_count()
    }

    /// Allocate a new, managed `T`. Born white if the collector is idle, or
    /// already black if a cycle is in progress (spec §4.3: an object
    /// allocated mid-mark cannot be swept this cycle, since nothing would
    /// ever have discovered it to blacken it).
    ///
    /// Returns `None` on allocation failure (spec §7 — not a panic, not an
    /// error type, just absence).
    pub fn allocate<T: Trace>(&self, tag: u8, value: T) -> Option<GcPtr> {
        let black = self.phase.get() != Phase::Pause;
        let size = std::mem::size_of::<GcBox<T>>();
        let ptr = self.allocator.alloc(tag, value, black)?;

        self.bytes_since_collection
            .set(self.bytes_since_collection.get() + size);
        self.bytes_since_incmark
            .set(self.bytes_since_incmark.get() + size);
        #[cfg(feature = "gc_logging")]
        tracing::debug!(tag, size, "ALLOCATE_DONE");

        // Spec §4.2: crossing the major threshold runs a full synchronous
        // collection right here, reclaiming everything eligible before the
        // mutator is handed back control — not merely entering MARK.
        if self.bytes_since_collection.get() > self.config.major_collection as usize {
            self.collect();
        } else if self.bytes_since_incmark.get() > self.config.incmark_threshold as usize {
            self.bytes_since_incmark.set(0);
            if self.phase.get() == Phase::Pause {
                self.start_cycle();
            }
            self.incremental_step();
        }
        Some(ptr)
    }

    /// Dijkstra insertion barrier (spec §4.5): called whenever the mutator
    /// stores a reference inside `container`. During an active cycle this
    /// re-grays `container` so it gets retraced and its new children
    /// discovered, preserving the no-black-points-to-unshaded-white
    /// invariant without needing to know what was just stored.
    pub fn write_barrier(&self, container: GcPtr) {
        if self.phase.get() != Phase::Pause {
            shade(container, &self.allocator, &self.general_gray, &self.gray_depth);
        }
    }

    /// Push a new root. Re-shades it immediately if a cycle is active, so a
    /// root entering scope mid-cycle is never missed (spec §4.5).
    pub fn shadowstack_push(&self, root: GcPtr) {
        self.shadow_stack
            .borrow_mut()
            .push(root)
            .unwrap_or_else(|_| panic!("shadow stack overflow"));
        if self.phase.get() != Phase::Pause {
            shade(root, &self.allocator, &self.general_gray, &self.gray_depth);
        }
    }

    pub fn shadowstack_pop(&self) -> Option<GcPtr> {
        self.shadow_stack.borrow_mut().pop()
    }

    /// Register a prebuilt (statically reachable) object as a permanent
    /// root. Idempotent — re-registering a pointer already registered is a
    /// no-op (spec §3's `PREBUILT_REGISTERED` bit).
    ///
    /// # Safety
    /// `ptr` must point to a live header constructed with
    /// [`crate::object::GcHeader::new_prebuilt`].
    pub unsafe fn register_prebuilt(&self, ptr: GcPtr) {
        // SAFETY: forwarded from this function's contract.
        let header = unsafe { ptr.header() };
        debug_assert!(header.is_prebuilt());
        if !header.is_prebuilt_registered() {
            header.set_prebuilt_registered();
            self.prebuilt_roots.borrow_mut().push(ptr);
        }
    }

    /// Register a weak reference (spec §4.8).
    ///
    /// # Safety
    /// `target_slot` must point to a valid `GcPtr` for as long as it stays
    /// registered.
    pub unsafe fn register_weakref(&self, holder: GcPtr, target_slot: *mut GcPtr) {
        // SAFETY: forwarded from this function's contract.
        unsafe { self.weakrefs.borrow_mut().register(holder, target_slot) };
    }

    /// Diagnostic: the object's current derived tri-color state (spec §3).
    pub fn get_mark_color(&self, obj: GcPtr) -> Color {
        if obj.is_null() {
            return Color::White;
        }
        // SAFETY: caller supplies a live GcPtr.
        let header = unsafe { obj.header() };
        let gray = header.is_gray();

        if self.allocator.is_huge(obj) {
            let marked = self.allocator.huge.borrow().is_marked(obj);
            return match (marked, gray) {
                (false, false) => Color::White,
                (false, true) => Color::LightGray,
                (true, false) => Color::Black,
                (true, true) => Color::DarkGray,
            };
        }
        if header.is_prebuilt() {
            return if gray { Color::DarkGray } else { Color::Black };
        }
        self.allocator
            .with_arenas(|arenas| {
                arenas.iter().find(|a| a.contains(obj.0 as usize)).map(|a| {
                    Color::from_block_type(a.block_type(a.cell_index_of(obj.0 as usize)), gray)
                })
            })
            .unwrap_or(Color::White)
    }

    fn start_cycle(&self) {
        #[cfg(feature = "gc_logging")]
        tracing::info!("MARK_START");
        self.phase.set(Phase::Mark);
        for root in self.shadow_stack.borrow().iter() {
            shade(root, &self.allocator, &self.general_gray, &self.gray_depth);
        }
        for &root in self.prebuilt_roots.borrow().iter() {
            shade(root, &self.allocator, &self.general_gray, &self.gray_depth);
        }
    }

    /// Advance the collector by one paced unit of work: one incremental
    /// mark step while `MARK` is in progress, or the full sweep pass once
    /// the worklist has drained. Returns `true` once back at `PAUSE`.
    pub fn incremental_step(&self) -> bool {
        match self.phase.get() {
            Phase::Pause => true,
            Phase::Mark => {
                let drained = mark::mark_step(
                    &self.allocator,
                    &self.general_gray,
                    &self.gray_depth,
                    mark::INC_MARK_MIN,
                    true,
                );
                if drained {
                    #[cfg(feature = "gc_logging")]
                    tracing::info!("MARK_DONE");
                    self.phase.set(Phase::Collect);
                }
                false
            }
            Phase::Collect => {
                // A barrier fired after the worklist drained but before
                // sweep ran (e.g. a re-grayed container): go back and
                // retrace before reclaiming anything.
                if !self.gray_depth.is_zero() {
                    self.phase.set(Phase::Mark);
                    false
                } else {
                    self.run_sweep();
                    true
                }
            }
        }
    }

    fn run_sweep(&self) -> SweepReport {
        #[cfg(feature = "gc_logging")]
        tracing::info!("SWEEP_START");
        let mut weakrefs = self.weakrefs.borrow_mut();
        // SAFETY: every registered slot is guaranteed valid by the
        // `register_weakref` caller's contract.
        let report = unsafe { sweep::sweep(&self.allocator, &mut weakrefs) };
        self.phase.set(Phase::Pause);
        self.bytes_since_collection.set(0);
        self.bytes_since_incmark.set(0);
        #[cfg(feature = "gc_logging")]
        tracing::info!(
            reclaimed_cells = report.reclaimed_cells,
            reclaimed_huge = report.reclaimed_huge,
            "SWEEP_DONE"
        );
        report
    }

    /// Force a full, stop-the-world collection regardless of any in-flight
    /// incremental cycle: starts one if idle, then drains mark and sweep
    /// without the halving pacing. Useful as the synchronous entry point
    /// spec §6 names alongside the incremental API.
    pub fn collect(&self) -> SweepReport {
        if self.phase.get() == Phase::Pause {
            self.start_cycle();
        }
        while !self.gray_depth.is_zero() {
            mark::mark_step(
                &self.allocator,
                &self.general_gray,
                &self.gray_depth,
                mark::INC_MARK_MIN,
                false,
            );
        }
        self.phase.set(Phase::Collect);
        self.run_sweep()
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}
