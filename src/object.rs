//! Object header and the derived tri-color state.
//!
//! The header carries only the bits that are orthogonal to the heap's own
//! bookkeeping: whether the object is gray (pending trace), and whether it
//! lives outside managed arenas as a prebuilt root. The object's block-type
//! — `FREE`/`WHITE`/`BLACK`/`EXTENT` — is *not* stored here; it lives in the
//! owning arena's cell bitmap (see [`crate::arena`]). Color is always derived
//! from the pair, never stored directly.

use std::sync::atomic::{AtomicU8, Ordering};

/// Per-cell tag tracked by an arena's block bitmap.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// Cell is unallocated.
    Free = 0,
    /// Cell holds a live object not yet traced this cycle.
    White = 1,
    /// Cell holds a live object that has been fully traced this cycle.
    Black = 2,
    /// Cell belongs to the interior of a multi-cell object whose head cell
    /// carries the real tag.
    Extent = 3,
}

/// The derived tri-color state of an object (spec §3's color table).
///
/// Never stored directly — always computed from a block-type plus the
/// object's `GRAY` bit (or, for huge objects, the huge-block mark bit plus
/// `GRAY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// Unmarked, not enqueued.
    White,
    /// Unmarked, enqueued for tracing (white + pending trace).
    LightGray,
    /// Marked, but re-grayed by the write barrier after blackening.
    DarkGray,
    /// Marked and fully scanned.
    Black,
}

impl Color {
    /// Derive a color from a cell's block-type and the object's `GRAY` bit,
    /// per the table in spec §3.
    pub fn from_block_type(block_type: BlockType, gray: bool) -> Self {
        match (block_type, gray) {
            (BlockType::White, false) => Color::White,
            (BlockType::White, true) => Color::LightGray,
            (BlockType::Black, false) => Color::Black,
            (BlockType::Black, true) => Color::DarkGray,
            // FREE/EXTENT cells have no color; callers must not ask.
            _ => Color::White,
        }
    }
}

/// Header flags. Bit layout is deliberately sparse — only three bits are
/// meaningful today, but the type stays a byte so future flags don't change
/// `GcHeader`'s size.
mod flags {
    /// Tentative gray marker (spec §4.4).
    pub const GRAY: u8 = 1 << 0;
    /// Object lives outside managed arenas and is statically reachable.
    pub const PREBUILT: u8 = 1 << 1;
    /// This prebuilt object has been added to the prebuilt roots list.
    pub const PREBUILT_REGISTERED: u8 = 1 << 2;
}

/// Type-erased trace thunk: given the header, call the concrete object's
/// [`Trace::trace`] with `visit`. Captured at allocation time by
/// monomorphizing over the allocated type, the same "vtable pointer tucked
/// into the header" trick `otter-vm-gc`'s `GcTraceable` erasure uses to let
/// the collector walk a heap of mixed concrete types.
pub type TraceFn = unsafe fn(*const GcHeader, &mut dyn FnMut(GcPtr));

/// GC object header. Every managed object (normal, huge, or prebuilt) starts
/// with one of these.
#[repr(C)]
pub struct GcHeader {
    flags: AtomicU8,
    /// Object type tag, opaque to the collector — the mutator assigns and
    /// interprets it via its tracer.
    tag: u8,
    trace_fn: TraceFn,
}

impl GcHeader {
    /// Construct a header for a freshly allocated, white, non-prebuilt
    /// object of concrete type `T`.
    pub fn new<T: Trace>(tag: u8) -> Self {
        Self {
            flags: AtomicU8::new(0),
            tag,
            trace_fn: trace_thunk::<T>,
        }
    }

    /// Construct a header for a prebuilt object (statically reachable, lives
    /// outside managed arenas).
    pub fn new_prebuilt<T: Trace>(tag: u8) -> Self {
        Self {
            flags: AtomicU8::new(flags::PREBUILT),
            tag,
            trace_fn: trace_thunk::<T>,
        }
    }

    /// Trace this object's outgoing references. `self` must be the header
    /// embedded in a `GcBox<T>` matching the `T` used to construct it.
    #[inline]
    pub fn trace(&self, visit: &mut dyn FnMut(GcPtr)) {
        // SAFETY: trace_fn was captured for the exact concrete type this
        // header was constructed with.
        unsafe { (self.trace_fn)(self as *const GcHeader, visit) }
    }

    /// Object type tag.
    #[inline]
    pub fn tag(&self) -> u8 {
        self.tag
    }

    #[inline]
    pub fn is_gray(&self) -> bool {
        self.flags.load(Ordering::Acquire) & flags::GRAY != 0
    }

    #[inline]
    pub fn set_gray(&self) {
        self.flags.fetch_or(flags::GRAY, Ordering::AcqRel);
    }

    #[inline]
    pub fn clear_gray(&self) {
        self.flags.fetch_and(!flags::GRAY, Ordering::AcqRel);
    }

    #[inline]
    pub fn is_prebuilt(&self) -> bool {
        self.flags.load(Ordering::Acquire) & flags::PREBUILT != 0
    }

    #[inline]
    pub fn is_prebuilt_registered(&self) -> bool {
        self.flags.load(Ordering::Acquire) & flags::PREBUILT_REGISTERED != 0
    }

    #[inline]
    pub fn set_prebuilt_registered(&self) {
        self.flags
            .fetch_or(flags::PREBUILT_REGISTERED, Ordering::AcqRel);
    }
}

/// A type-erased, stable identity for any heap object: normal, huge, or
/// prebuilt. The collector never dereferences the pointee except through
/// [`Trace`] callbacks supplied by the mutator.
#[derive(Debug, Clone, Copy)]
pub struct GcPtr(pub *const GcHeader);

// SAFETY: GcPtr is passed only between collector entry points that all run
// on the single mutator thread (spec §5); there is no concurrent access to
// guard against.
unsafe impl Send for GcPtr {}
unsafe impl Sync for GcPtr {}

impl GcPtr {
    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// # Safety
    /// The pointer must be valid and point to a live `GcHeader`.
    #[inline]
    pub unsafe fn header(self) -> &'static GcHeader {
        unsafe { &*self.0 }
    }
}

impl PartialEq for GcPtr {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for GcPtr {}

impl std::hash::Hash for GcPtr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self.0 as usize).hash(state);
    }
}

/// The mutator-supplied tracing capability (spec §6): given an object,
/// enumerate its outgoing references to the visitor.
///
/// Modeled as a trait rather than a raw function pointer so host object
/// models can close over whatever type-tag dispatch they need — spec §9
/// treats this as "a capability", not a fixed calling convention.
pub trait Trace {
    /// Enumerate outgoing references of `self`, calling `visit` once per
    /// reference. Must be deterministic and must not mutate collector state
    /// outside of calling `visit` (spec §6).
    fn trace(&self, visit: &mut dyn FnMut(GcPtr));
}

/// Monomorphized per-`T` thunk captured into a header's `trace_fn`.
///
/// # Safety
/// `header` must point to the `GcHeader` field of a `GcBox<T>`.
unsafe fn trace_thunk<T: Trace>(header: *const GcHeader, visit: &mut dyn FnMut(GcPtr)) {
    // SAFETY: GcBox<T> is #[repr(C)] with header first, so the header
    // pointer and the box pointer share an address.
    let gcbox = header as *const GcBox<T>;
    unsafe { (*gcbox).value.trace(visit) }
}

/// The concrete, in-memory layout of a managed allocation: header
/// immediately followed by the mutator's value. `#[repr(C)]` so the header
/// address doubles as the allocation's address, matching spec §3's "object
/// header at cell 0 of its extent".
#[repr(C)]
pub struct GcBox<T: Trace> {
    pub header: GcHeader,
    pub value: T,
}

impl<T: Trace> GcBox<T> {
    pub fn new(tag: u8, value: T) -> Self {
        Self {
            header: GcHeader::new::<T>(tag),
            value,
        }
    }
}

/// Object type tags, left open for the host object model to extend.
pub mod tags {
    pub const OBJECT: u8 = 0;
}
