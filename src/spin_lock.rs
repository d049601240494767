//! A minimal user-mode spin lock used to serialize `Domain` slot-table growth.
//!
//! Growth is rare and bounded (a single allocation + `memcpy`), so a spin
//! lock is preferable to pulling in a full mutex for this one call site.
use crate::sync::{AtomicBool, Ordering};
use crate::util::pause;

/// A TAS (test-and-set) spin lock over a single `AtomicBool`.
pub struct SpinLock {
    locked: AtomicBool,
}

impl Default for SpinLock {
    fn default() -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
        }
    }
}

impl SpinLock {
    /// Keep trying to lock until successful.
    pub fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.is_locked() {
                pause();
            }
        }
    }

    /// Lock and return a guard that unlocks on drop.
    #[inline]
    pub fn lock_guard(&self) -> SpinLockGuard<'_> {
        self.lock();
        SpinLockGuard { spin_lock: self }
    }

    /// Unlock. Panics if not currently locked.
    #[inline]
    pub fn unlock(&self) {
        let was_locked = self.locked.swap(false, Ordering::Release);
        assert!(was_locked, "unlock called on a SpinLock that was not held");
    }

    /// Return true if currently locked.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Return true if the lock was acquired without blocking.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

/// RAII guard for [`SpinLock`]. Unlocks when dropped.
pub struct SpinLockGuard<'a> {
    spin_lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.spin_lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::SpinLock;

    #[test]
    fn lock_unlock_round_trip() {
        let lock = SpinLock::default();
        lock.lock();
        assert!(lock.is_locked());
        lock.unlock();
        assert!(!lock.is_locked());

        {
            let _guard = lock.lock_guard();
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn try_lock_respects_contention() {
        let lock = SpinLock::default();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }
}
