//! Small shared helpers: cache-line padding and a per-thread diagnostic id.
use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, Ordering};

static GLOBAL_THREAD_ID: AtomicI64 = AtomicI64::new(0);

thread_local! {
    static THREAD_ID: Cell<i64> = Cell::new(-1);
}

/// A small, process-wide-unique id assigned to the calling thread the first
/// time it is observed. Used only for diagnostics (log lines); it plays no
/// role in hazard-slot indexing, unlike the teacher's fixed-array design.
pub fn get_thread_id() -> i64 {
    THREAD_ID.with(|tid| {
        if tid.get() == -1 {
            tid.set(GLOBAL_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        }
        tid.get()
    })
}

/// Pads `T` out to a cache line so that independently-hot fields (e.g. a
/// Domain's `count` vs. its `resize_guard`) don't false-share.
#[repr(align(64))]
#[derive(Default)]
pub struct CachePadded<T>(pub T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Hint to the CPU that this is a busy-wait spin, same role as the teacher's
/// `util::pause` (which wrapped the since-removed
/// `atomic::spin_loop_hint`).
#[inline]
pub fn pause() {
    std::hint::spin_loop();
}

#[cfg(test)]
mod tests {
    use super::get_thread_id;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn thread_id_stable_within_thread() {
        assert_eq!(get_thread_id(), get_thread_id());
    }

    #[test]
    fn thread_id_unique_across_threads() {
        let ids: Vec<i64> = (0..8)
            .map(|_| thread::spawn(get_thread_id).join().unwrap())
            .collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
