//! Weak-reference bag.
//!
//! Spec §3/§4.8: an unordered collection of `(holder, target_slot)` records.
//! `target_slot` is a raw pointer to wherever the holder stores its
//! reference to the target; after sweep, any slot whose target turned out
//! dead gets nulled out. Deliberately simpler than `otter-vm-gc`'s
//! `ephemeron.rs`/`weak_ref.rs` (WeakMap/WeakSet fixpoint semantics) — the
//! spec only wants plain weak-pointer clearing, not a liveness-dependent
//! value map, and explicitly disclaims finalizer ordering and resurrection.

use crate::object::GcPtr;

/// One weak reference: `holder` identifies the owning object purely for
/// diagnostics, `target_slot` is where the pointer to the (possibly dead)
/// target lives.
pub struct WeakrefEntry {
    pub holder: GcPtr,
    pub target_slot: *mut GcPtr,
}

// SAFETY: all bag operations run on the single mutator/collector thread
// (spec §5).
unsafe impl Send for WeakrefEntry {}

#[derive(Default)]
pub struct WeakrefBag {
    entries: Vec<WeakrefEntry>,
}

impl WeakrefBag {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a weak reference. `target_slot` must remain valid until
    /// either it is cleared by [`Self::resolve`] or the holder is collected
    /// (at which point the mutator is responsible for not dereferencing a
    /// dangling slot; the collector does not track holder liveness here).
    ///
    /// # Safety
    /// `target_slot` must point to a valid, currently-initialized `GcPtr`
    /// for as long as it remains registered.
    pub unsafe fn register(&mut self, holder: GcPtr, target_slot: *mut GcPtr) {
        self.entries.push(WeakrefEntry {
            holder,
            target_slot,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Post-sweep resolution (spec §4.8). For every entry, the holder's
    /// liveness is checked first: if the holder itself was reclaimed this
    /// cycle, the record is dropped *without* touching `target_slot` — that
    /// memory is no longer the holder's to write through. Otherwise, if the
    /// target is no longer live (per `target_live`), the slot is nulled and
    /// the entry dropped. Surviving entries are retained for the next cycle.
    ///
    /// # Safety
    /// Every registered `target_slot` must still be valid to write through
    /// whenever `holder_live` reports its holder alive.
    pub unsafe fn resolve(
        &mut self,
        holder_live: impl Fn(GcPtr) -> bool,
        target_live: impl Fn(GcPtr) -> bool,
    ) {
        self.entries.retain(|entry| {
            if !entry.holder.is_null() && !holder_live(entry.holder) {
                return false;
            }
            // SAFETY: caller's contract on target_slot validity, guarded by
            // the holder being live (or untracked).
            let target = unsafe { *entry.target_slot };
            if target.is_null() || target_live(target) {
                true
            } else {
                unsafe { *entry.target_slot = GcPtr(std::ptr::null()) };
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(n: usize) -> GcPtr {
        GcPtr(n as *const crate::object::GcHeader)
    }

    #[test]
    fn dead_targets_are_cleared() {
        let mut bag = WeakrefBag::new();
        let mut slot = dummy(0x42);
        unsafe { bag.register(dummy(0x1), &mut slot as *mut GcPtr) };

        unsafe { bag.resolve(|_| true, |_| false) };

        assert!(slot.is_null());
        assert!(bag.is_empty());
    }

    #[test]
    fn live_targets_survive() {
        let mut bag = WeakrefBag::new();
        let mut slot = dummy(0x42);
        unsafe { bag.register(dummy(0x1), &mut slot as *mut GcPtr) };

        unsafe { bag.resolve(|_| true, |_| true) };

        assert!(!slot.is_null());
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn dead_holder_drops_entry_without_touching_slot() {
        let mut bag = WeakrefBag::new();
        let mut slot = dummy(0x42);
        unsafe { bag.register(dummy(0x1), &mut slot as *mut GcPtr) };

        // holder_live always false; target_live would panic if consulted.
        unsafe {
            bag.resolve(
                |_| false,
                |_| panic!("target liveness must not be checked once the holder is dead"),
            )
        };

        assert!(!slot.is_null(), "slot must be left untouched");
        assert!(bag.is_empty());
    }
}
