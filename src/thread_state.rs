//! Per-thread registration record: two hazard slots, the thread's current
//! snapshot (if any), and its thread-local retired list.
//!
//! Grounded on `examples/original_source/list.c`'s `ll_thread_state_t`
//! (two `hp[2]` hazard slots, `active_txn_id`, an intrusive `retired_head`
//! reusing the node's own `next` field).
use crate::node::VersionedNode;
use crate::sync::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use crate::util::get_thread_id;
use std::cell::Cell;
use std::ptr;

/// Index of the hazard slot used for the "previous" cursor in a two-cursor
/// walk (`pop_first_visible`'s trailing pointer); `CURR` guards the node
/// currently being inspected.
pub(crate) const HAZARD_PREV: usize = 0;
pub(crate) const HAZARD_CURR: usize = 1;
const HAZARD_SLOTS: usize = 2;

pub(crate) struct ThreadState<T> {
    hazard: [AtomicPtr<VersionedNode<T>>; HAZARD_SLOTS],
    active_snapshot: AtomicU64,
    /// `true` once a live registration claims this slot. Slots are reused
    /// across register/unregister cycles rather than freed.
    in_use: AtomicBool,
    /// Diagnostic id of the thread that currently owns this slot, used only
    /// to assert single-owner access to `retired` below.
    owner_tid: Cell<i64>,
    /// Head of this thread's retired list. Touched only by the owning
    /// thread, never by a hazard scan, which is why it is a plain `Cell`
    /// rather than an atomic.
    retired: Cell<*mut VersionedNode<T>>,
}

// SAFETY: `hazard` and `active_snapshot` are genuinely shared (scanned by
// reclaimers on other threads). `retired` and `owner_tid` are touched only
// by the thread that currently holds the slot, which every `retired`-list
// method below asserts via `owner_tid`.
unsafe impl<T> Sync for ThreadState<T> {}

impl<T> Default for ThreadState<T> {
    fn default() -> Self {
        ThreadState {
            hazard: [
                AtomicPtr::new(ptr::null_mut()),
                AtomicPtr::new(ptr::null_mut()),
            ],
            active_snapshot: AtomicU64::new(0),
            in_use: AtomicBool::new(false),
            owner_tid: Cell::new(-1),
            retired: Cell::new(ptr::null_mut()),
        }
    }
}

impl<T> ThreadState<T> {
    #[inline]
    pub(crate) fn try_claim(&self) -> bool {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.owner_tid.set(get_thread_id());
            true
        } else {
            false
        }
    }

    #[inline]
    pub(crate) fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Release this slot back to the domain. A non-empty retired list is
    /// not an error: the nodes on it simply stay put for the next claimant
    /// of this slot to drain via `reclaim`, or for `Domain::drop` to free
    /// if no claimant ever comes.
    pub(crate) fn release(&self) {
        self.assert_owner();
        self.hazard[HAZARD_PREV].store(ptr::null_mut(), Ordering::Release);
        self.hazard[HAZARD_CURR].store(ptr::null_mut(), Ordering::Release);
        self.active_snapshot.store(0, Ordering::Release);
        self.owner_tid.set(-1);
        self.in_use.store(false, Ordering::Release);
    }

    #[inline]
    fn assert_owner(&self) {
        debug_assert_eq!(
            self.owner_tid.get(),
            get_thread_id(),
            "ThreadState retired-list access from a thread other than its owner"
        );
    }

    #[inline]
    pub(crate) fn set_hazard(&self, slot: usize, node: *mut VersionedNode<T>) {
        self.hazard[slot].store(node, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn clear_hazard(&self, slot: usize) {
        self.hazard[slot].store(ptr::null_mut(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn clear_all_hazards(&self) {
        self.clear_hazard(HAZARD_PREV);
        self.clear_hazard(HAZARD_CURR);
    }

    #[inline]
    pub(crate) fn hazard(&self, slot: usize) -> *mut VersionedNode<T> {
        self.hazard[slot].load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn begin_snapshot(&self, snapshot: u64) {
        self.active_snapshot.store(snapshot, Ordering::Release);
    }

    #[inline]
    pub(crate) fn end_snapshot(&self) {
        self.active_snapshot.store(0, Ordering::Release);
    }

    /// `0` means "no active snapshot": excluded from the reclamation
    /// horizon by every caller of [`crate::domain::min_active_snapshot`].
    #[inline]
    pub(crate) fn active_snapshot(&self) -> u64 {
        self.active_snapshot.load(Ordering::Acquire)
    }

    /// Push a node onto this thread's retired list. Owner-thread only.
    pub(crate) fn push_retired(&self, node: *mut VersionedNode<T>) {
        self.assert_owner();
        unsafe { (*node).set_next_relaxed(self.retired.get()) };
        self.retired.set(node);
    }

    /// Drain the retired list, handing each node to `is_safe` (true =
    /// no longer hazarded, free it via `free_node`) or relinking it back
    /// onto the list (still hazarded by some reader).
    pub(crate) fn drain_retired(
        &self,
        mut is_safe: impl FnMut(*mut VersionedNode<T>) -> bool,
        mut free_node: impl FnMut(*mut VersionedNode<T>),
    ) {
        self.assert_owner();
        let mut remaining: *mut VersionedNode<T> = ptr::null_mut();
        let mut cur = self.retired.get();
        while !cur.is_null() {
            let next = unsafe { (*cur).next_relaxed() };
            if is_safe(cur) {
                free_node(cur);
            } else {
                unsafe { (*cur).set_next_relaxed(remaining) };
                remaining = cur;
            }
            cur = next;
        }
        self.retired.set(remaining);
    }

    /// Free every node still on this slot's retired list, without touching
    /// its payload (the node's `payload` field is `ManuallyDrop`, so
    /// dropping the box here leaves it untouched — disposing of payloads is
    /// the owning list's job, not the domain's). Used only by
    /// `Domain::drop`, which by precondition runs with every registered
    /// thread already unregistered and owns every slot exclusively, so no
    /// `assert_owner` applies here.
    pub(crate) fn free_residual_retired(&self) {
        let mut cur = self.retired.get();
        while !cur.is_null() {
            let next = unsafe { (*cur).next_relaxed() };
            drop(unsafe { Box::from_raw(cur) });
            cur = next;
        }
        self.retired.set(ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive() {
        let ts: ThreadState<u32> = ThreadState::default();
        assert!(ts.try_claim());
        assert!(!ts.try_claim());
        ts.release();
        assert!(ts.try_claim());
    }

    #[test]
    fn hazard_slots_round_trip() {
        let ts: ThreadState<u32> = ThreadState::default();
        assert!(ts.try_claim());
        let fake = 0x10 as *mut VersionedNode<u32>;
        ts.set_hazard(HAZARD_CURR, fake);
        assert_eq!(ts.hazard(HAZARD_CURR), fake);
        ts.clear_hazard(HAZARD_CURR);
        assert!(ts.hazard(HAZARD_CURR).is_null());
    }

    #[test]
    fn snapshot_zero_means_inactive() {
        let ts: ThreadState<u32> = ThreadState::default();
        assert!(ts.try_claim());
        assert_eq!(ts.active_snapshot(), 0);
        ts.begin_snapshot(7);
        assert_eq!(ts.active_snapshot(), 7);
        ts.end_snapshot();
        assert_eq!(ts.active_snapshot(), 0);
    }
}
