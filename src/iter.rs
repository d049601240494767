//! Snapshot-isolated iteration, pinned to the snapshot id taken at
//! `iter_begin`. Grounded on `examples/original_source/list.c`'s
//! `ll_iterator_begin`/`ll_iterator_next`/`ll_iterator_end`.
use crate::list::List;
use crate::node::VersionedNode;
use crate::thread_state::{ThreadState, HAZARD_CURR};

/// Walks every node visible at the snapshot taken when this iterator was
/// created. While held, the owning thread's `active_snapshot` excludes
/// that snapshot from the domain's reclamation horizon, so a node visible
/// at creation time stays valid to read for the iterator's whole lifetime
/// even if concurrently removed and reclaimed from the writer's view.
pub struct SnapshotIter<'a, T> {
    list: &'a List<T>,
    ts: &'a ThreadState<T>,
    snapshot: u64,
    cursor: *mut VersionedNode<T>,
    started: bool,
    ended: bool,
}

impl<'a, T> SnapshotIter<'a, T> {
    pub(crate) fn new(list: &'a List<T>, ts: &'a ThreadState<T>, snapshot: u64) -> Self {
        SnapshotIter {
            list,
            ts,
            snapshot,
            cursor: std::ptr::null_mut(),
            started: false,
            ended: false,
        }
    }

    /// The snapshot id this iterator is pinned to.
    #[inline]
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// End the iteration early, releasing the snapshot pin. Called
    /// automatically on drop if not called explicitly.
    pub fn end(mut self) {
        self.end_inner();
    }

    fn end_inner(&mut self) {
        if !self.ended {
            self.ts.clear_hazard(HAZARD_CURR);
            self.ts.end_snapshot();
            self.ended = true;
        }
    }
}

impl<'a, T> Iterator for SnapshotIter<'a, T>
where
    T: Clone,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.ended {
            return None;
        }
        let mut cur = if self.started {
            unsafe { (*self.cursor).next() }
        } else {
            self.started = true;
            self.list.head_ptr()
        };
        while !cur.is_null() {
            self.ts.set_hazard(HAZARD_CURR, cur);
            let node = unsafe { &*cur };
            if node.visible_at(self.snapshot) {
                self.cursor = cur;
                return Some(node.payload_ref().clone());
            }
            cur = node.next();
        }
        self.end_inner();
        None
    }
}

impl<'a, T> Drop for SnapshotIter<'a, T> {
    fn drop(&mut self) {
        self.end_inner();
    }
}
