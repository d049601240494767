//! The lock-free singly-linked list itself: insert, logical remove,
//! snapshot-visible pop, membership queries, and reclamation.
//!
//! Grounded on `examples/original_source/list.c`'s `ll_init`,
//! `ll_insert_head`, `ll_remove`, `ll_remove_first`, `ll_is_empty`,
//! `ll_contains`, `ll_count`, `ll_reclaim`, and `ll_destroy`.
use crate::domain::Domain;
use crate::error::{ListError, ListResult};
use crate::iter::SnapshotIter;
use crate::node::VersionedNode;
use crate::sync::{Arc, AtomicPtr, AtomicU64, Ordering};
use crate::thread_state::{ThreadState, HAZARD_CURR, HAZARD_PREV};
use std::marker::PhantomData;
use std::ptr;

/// A lock-free singly-linked list providing MVCC snapshot isolation for
/// readers and hazard-pointer-guarded deferred reclamation for writers.
///
/// Every thread that calls a method here must first call
/// [`Domain::register_thread`] against `domain()`; unregistered callers get
/// [`ListError::NotRegistered`].
pub struct List<T> {
    head: AtomicPtr<VersionedNode<T>>,
    /// Monotonic counter minted for every insert/remove and handed out as
    /// the snapshot id for every `iter_begin`. Starts at 1 so that `0`
    /// remains a reserved "never removed" / "no active snapshot" sentinel.
    commit_id: AtomicU64,
    domain: Arc<Domain<T>>,
    /// No field above stores a `T` directly (only raw-pointer-based atomics
    /// and `Arc<Domain<T>>`, both unconditionally `Send`/`Sync`), so without
    /// this marker the compiler would auto-derive `List<T>: Send + Sync` for
    /// every `T` regardless of whether `T` itself is. This crate does hand
    /// out `&T` (`contains`, `payload_ref`) and owned `T` (`pop_first_visible`,
    /// `reclaim`'s callback) across whichever threads are registered, so the
    /// real bound is `T: Sync` for concurrent `&T` access and `T: Send` for
    /// payload ownership moving between threads; this phantom field makes
    /// the auto-derived impls reflect that instead of ignoring `T` entirely.
    _marker: PhantomData<T>,
}

impl<T> List<T> {
    /// Build a list backed by `domain`. Taking `Arc<Domain<T>>` rather than
    /// a bare reference means the domain's lifetime is tracked for you —
    /// the original C's "destroy the domain only after every list using it
    /// is destroyed" precondition becomes a reference-count invariant
    /// instead of a programmer obligation.
    pub fn new(domain: Arc<Domain<T>>) -> Self {
        List {
            head: AtomicPtr::new(ptr::null_mut()),
            commit_id: AtomicU64::new(1),
            domain,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn domain(&self) -> &Arc<Domain<T>> {
        &self.domain
    }

    #[inline]
    fn thread_state(&self) -> ListResult<&ThreadState<T>> {
        self.domain.current_thread_state_or_err()
    }

    #[inline]
    pub(crate) fn head_ptr(&self) -> *mut VersionedNode<T> {
        self.head.load(Ordering::Acquire)
    }

    #[inline]
    fn mint_version(&self) -> u64 {
        self.commit_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Insert `payload` at the head of the list, minted with a fresh
    /// version so it is invisible to any snapshot already in flight.
    pub fn insert_head(&self, payload: T) -> ListResult<()> {
        self.thread_state()?;
        let version = self.mint_version();
        let node = Box::into_raw(VersionedNode::new_boxed(payload, version));
        loop {
            let head = self.head.load(Ordering::Acquire);
            unsafe { (*node).set_next(head) };
            match self.head.compare_exchange_weak(
                head,
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(_) => continue,
            }
        }
    }

    /// Logically remove the first reachable node whose payload equals
    /// `payload`. Marks `removed_version` via CAS-from-zero so a node can
    /// be removed at most once; does not unlink the node (that happens in
    /// [`List::reclaim`] once no reader can still observe it).
    pub fn remove(&self, payload: &T) -> ListResult<()>
    where
        T: PartialEq,
    {
        let ts = self.thread_state()?;
        // Minted unconditionally, before the walk even starts, so a
        // not-found call still advances `commit_id` — matching the
        // source's `txn_id` fetch preceding any traversal.
        let version = self.mint_version();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            ts.set_hazard(HAZARD_CURR, cur);
            // Re-read after publishing the hazard: `cur` may have been
            // retired and its allocation recycled by a concurrent
            // reclaimer between the initial load and the hazard store.
            if self.head_still_reachable(cur) {
                let node = unsafe { &*cur };
                if node.removed_version() == 0
                    && node.payload_ref() == payload
                    && node.try_mark_removed(version)
                {
                    ts.clear_hazard(HAZARD_CURR);
                    return Ok(());
                }
                // Either not a match, or someone else removed it first.
                cur = node.next();
                continue;
            }
            // Fell behind reclamation; restart the walk from head.
            cur = self.head.load(Ordering::Acquire);
        }
        ts.clear_hazard(HAZARD_CURR);
        Err(ListError::NotFound)
    }

    /// Best-effort reachability re-check used by `remove`'s hazard dance:
    /// cheap and approximate (walks from head), acceptable because a false
    /// negative only causes a harmless restart, never a use-after-free —
    /// the hazard slot set just before this call is what actually prevents
    /// the reclaimer from freeing `node` underneath us.
    fn head_still_reachable(&self, node: *mut VersionedNode<T>) -> bool {
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            if cur == node {
                return true;
            }
            cur = unsafe { (*cur).next() };
        }
        false
    }

    /// Pop the first node visible at a snapshot taken at call time,
    /// physically unlinking it from the live chain and freeing it the
    /// instant its own unlink CAS wins. Two-cursor walk using both hazard
    /// slots, matching `ll_remove_first`'s head-fast-path / interior-CAS
    /// split — including that it never marks `removed_version` (per
    /// spec.md §4.9, `LogicallyRemoved` is skipped entirely on this path)
    /// and never touches the retired list, unlike `remove`/`reclaim`.
    pub fn pop_first_visible(&self) -> ListResult<T> {
        let ts = self.thread_state()?;
        let snapshot = self.commit_id.load(Ordering::Acquire);
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return Err(ListError::NotFound);
            }
            ts.set_hazard(HAZARD_CURR, head);
            if self.head.load(Ordering::Acquire) != head {
                continue;
            }
            let head_node = unsafe { &*head };
            if head_node.visible_at(snapshot) {
                let next = head_node.next();
                match self.head.compare_exchange(
                    head,
                    next,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        ts.clear_hazard(HAZARD_CURR);
                        return Ok(unsafe { Self::free_unlinked(head) });
                    }
                    // Lost the race for `head`; retry from the top.
                    Err(_) => continue,
                }
            }

            // Head isn't visible at our snapshot (inserted after it, or
            // already removed before it); walk the tail with the second
            // cursor until we find a visible node or run off the list.
            ts.set_hazard(HAZARD_PREV, head);
            let mut prev = head;
            let mut cur = head_node.next();
            loop {
                if cur.is_null() {
                    ts.clear_all_hazards();
                    return Err(ListError::NotFound);
                }
                ts.set_hazard(HAZARD_CURR, cur);
                if unsafe { (*prev).next() } != cur {
                    break;
                }
                let cur_node = unsafe { &*cur };
                if cur_node.visible_at(snapshot) {
                    let next = cur_node.next();
                    if unsafe { &*prev }.next_cas(cur, next) {
                        ts.clear_all_hazards();
                        return Ok(unsafe { Self::free_unlinked(cur) });
                    }
                    // Lost the unlink race; break out to the outer retry.
                    break;
                }
                prev = cur;
                ts.set_hazard(HAZARD_PREV, prev);
                cur = unsafe { (*cur).next() };
            }
        }
    }

    /// Take ownership of a node's payload and free its allocation. Callers
    /// must guarantee `node` has just been physically unlinked by their own
    /// winning CAS, so it is reachable from no list chain.
    unsafe fn free_unlinked(node: *mut VersionedNode<T>) -> T {
        VersionedNode::take_payload(Box::from_raw(node))
    }

    /// `true` if no node is currently visible to a snapshot taken right
    /// now. Unprotected by hazard pointers, by design (matches
    /// `ll_is_empty`): a momentary false reading is acceptable for a
    /// best-effort emptiness check.
    pub fn is_empty(&self) -> bool {
        let snapshot = self.commit_id.load(Ordering::Acquire);
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let node = unsafe { &*cur };
            if node.visible_at(snapshot) {
                return false;
            }
            cur = node.next();
        }
        true
    }

    /// `true` if some currently-visible node's payload equals `payload`.
    /// Unprotected by hazard pointers, matching `ll_contains`.
    pub fn contains(&self, payload: &T) -> bool
    where
        T: PartialEq,
    {
        let snapshot = self.commit_id.load(Ordering::Acquire);
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let node = unsafe { &*cur };
            if node.visible_at(snapshot) && node.payload_ref() == payload {
                return true;
            }
            cur = node.next();
        }
        false
    }

    /// Count of currently visible nodes. Unprotected, matching `ll_count`.
    pub fn count(&self) -> usize {
        let snapshot = self.commit_id.load(Ordering::Acquire);
        let mut cur = self.head.load(Ordering::Acquire);
        let mut n = 0;
        while !cur.is_null() {
            let node = unsafe { &*cur };
            if node.visible_at(snapshot) {
                n += 1;
            }
            cur = node.next();
        }
        n
    }

    /// Begin a snapshot-isolated iteration. The returned iterator pins the
    /// snapshot id for its whole lifetime via the calling thread's
    /// `active_snapshot`, which excludes it from the reclamation horizon.
    pub fn iter_begin(&self) -> ListResult<SnapshotIter<'_, T>> {
        let ts = self.thread_state()?;
        let snapshot = self.commit_id.load(Ordering::Acquire);
        ts.begin_snapshot(snapshot);
        Ok(SnapshotIter::new(self, ts, snapshot))
    }

    /// Opportunistically unlink logically-removed nodes that are no longer
    /// visible to any possible past-or-future snapshot, then drain the
    /// calling thread's retired list, freeing any entry no hazard pointer
    /// still references. `free_cb`, if given, receives each freed payload
    /// instead of letting it drop silently — matches `ll_reclaim`'s
    /// optional free callback.
    pub fn reclaim(&self, mut free_cb: Option<impl FnMut(T)>) -> ListResult<()> {
        let ts = self.thread_state()?;
        // The oldest reader still able to care; if none is active, the
        // current commit id stands in (nothing can ever observe an older
        // removal than that).
        let min_active = self
            .domain
            .min_active_snapshot()
            .unwrap_or_else(|| self.commit_id.load(Ordering::Acquire));
        trace!("reclaim: min_active = {}", min_active);

        // Unlink phase: walk the chain once, CAS out nodes that are
        // removed and strictly older than every active reader's snapshot.
        // A failed weak CAS is not retried here — matching the source's
        // "best effort, next reclaim call will catch it" behavior — since
        // another thread's concurrent mutation already means the chain
        // moved on.
        let mut prev: *mut VersionedNode<T> = ptr::null_mut();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let node = unsafe { &*cur };
            let next = node.next();
            let removed = node.removed_version();
            let unlinkable = removed != 0 && removed < min_active;
            if unlinkable {
                let unlinked = if prev.is_null() {
                    self.head
                        .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                } else {
                    unsafe { &*prev }.next_cas(cur, next)
                };
                if unlinked {
                    trace!("reclaim: unlinked node removed at version {}", removed);
                    ts.push_retired(cur);
                    cur = next;
                    continue;
                }
            }
            prev = cur;
            cur = next;
        }

        // Drain phase: anything on the retired list that no hazard
        // pointer in the domain still references is safe to free now.
        let domain = &self.domain;
        ts.drain_retired(
            |node| !domain.any_hazard_equals(node),
            |node| {
                let boxed = unsafe { Box::from_raw(node) };
                let payload = unsafe { VersionedNode::take_payload(boxed) };
                if let Some(cb) = free_cb.as_mut() {
                    cb(payload);
                }
            },
        );
        Ok(())
    }

    /// Tear the list down explicitly, handing every still-attached node's
    /// payload to `free_cb` (if given) rather than letting it drop
    /// silently. Matches the external interface's `list_destroy(list,
    /// optional payload-free callback)`; consuming `self` means the
    /// fallback in `Drop` below runs afterward against an already-empty
    /// list, so no double-free.
    ///
    /// # Safety precondition
    /// Every thread registered against `domain()` must already be
    /// unregistered, and no other thread may be mid-operation on this
    /// list — matches `ll_destroy`'s precondition, not enforced at runtime.
    pub fn destroy(self, mut free_cb: Option<impl FnMut(T)>) {
        let mut cur = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        while !cur.is_null() {
            let boxed = unsafe { Box::from_raw(cur) };
            let next = boxed.next();
            let payload = unsafe { VersionedNode::take_payload(boxed) };
            if let Some(cb) = free_cb.as_mut() {
                cb(payload);
            }
            cur = next;
        }
    }
}

impl<T> Drop for List<T> {
    /// Frees every remaining node's payload via ordinary `Drop`, not via a
    /// caller-supplied callback. Use an explicit `reclaim`/unlink pass (or
    /// drain the list with `pop_first_visible`) beforehand if you need the
    /// callback to observe every payload; this is only the safety net that
    /// runs when a `List` is simply dropped with nodes still attached.
    ///
    /// # Safety precondition
    /// All threads registered against `domain()` must have unregistered
    /// before the last `List` referencing that domain is dropped — mirrors
    /// `ll_destroy`'s "no thread may be mid-operation" precondition, which
    /// this port does not attempt to detect at runtime.
    fn drop(&mut self) {
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let boxed = unsafe { Box::from_raw(cur) };
            let next = boxed.next();
            drop(unsafe { VersionedNode::take_payload(boxed) });
            cur = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (Arc<Domain<i32>>, List<i32>) {
        let domain = Arc::new(Domain::create(2).unwrap());
        domain.register_thread().unwrap();
        (domain.clone(), List::new(domain))
    }

    #[test]
    fn head_insert_then_pop_roundtrips() {
        let (domain, list) = fresh();
        list.insert_head(1).unwrap();
        assert_eq!(list.pop_first_visible().unwrap(), 1);
        domain.unregister_thread();
    }

    #[test]
    fn count_ignores_logically_removed_nodes() {
        let (domain, list) = fresh();
        list.insert_head(1).unwrap();
        list.insert_head(2).unwrap();
        list.remove(&1).unwrap();
        assert_eq!(list.count(), 1);
        domain.unregister_thread();
    }
}

/// Small, fixed-thread-count interleavings of the core CAS paths, checked
/// exhaustively by `loom` rather than sampled like the `#[test]`s above.
/// Run with `RUSTFLAGS="--cfg loom" cargo test --release --test '*' -- --ignored`
/// (loom's state-space search is too slow for a normal `cargo test` run).
#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::thread;

    #[test]
    fn concurrent_insert_and_pop_never_lose_or_duplicate() {
        loom::model(|| {
            let domain = Arc::new(Domain::<i32>::create(2).unwrap());
            let list = Arc::new(List::new(domain.clone()));
            domain.register_thread().unwrap();
            list.insert_head(1).unwrap();

            let d2 = domain.clone();
            let l2 = list.clone();
            let popper = thread::spawn(move || {
                d2.register_thread().unwrap();
                let result = l2.pop_first_visible();
                d2.unregister_thread();
                result
            });

            let popped_here = list.pop_first_visible();
            let popped_there = popper.join().unwrap();

            let total_ok = popped_here.is_ok() as u32 + popped_there.is_ok() as u32;
            assert_eq!(total_ok, 1, "exactly one of the two concurrent pops should see the single node");
            domain.unregister_thread();
        });
    }

    #[test]
    fn concurrent_remove_is_at_most_once() {
        loom::model(|| {
            let domain = Arc::new(Domain::<i32>::create(2).unwrap());
            let list = Arc::new(List::new(domain.clone()));
            domain.register_thread().unwrap();
            list.insert_head(7).unwrap();

            let d2 = domain.clone();
            let l2 = list.clone();
            let remover = thread::spawn(move || {
                d2.register_thread().unwrap();
                let result = l2.remove(&7);
                d2.unregister_thread();
                result
            });

            let removed_here = list.remove(&7);
            let removed_there = remover.join().unwrap();

            let total_ok = removed_here.is_ok() as u32 + removed_there.is_ok() as u32;
            assert_eq!(total_ok, 1, "remove must succeed exactly once across racing callers");
            domain.unregister_thread();
        });
    }
}
