//! Atomic primitives used throughout the crate, indirected so the `loom`
//! model checker can be swapped in under `cfg(loom)` (grounded in the same
//! convention used by `Johnabell-atom_box`'s `src/sync.rs` and the
//! `bee6523-cs492-concur` homework crate).

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
#[cfg(loom)]
pub use loom::sync::Arc;

#[cfg(not(loom))]
pub(crate) use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
#[cfg(not(loom))]
pub use std::sync::Arc;
