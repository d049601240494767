//! A lock-free singly-linked list with MVCC snapshot isolation for readers
//! and hazard-pointer-guarded deferred reclamation for writers.
//!
//! Readers call [`List::iter_begin`] to walk a consistent point-in-time
//! view of the list without blocking writers; writers call
//! [`List::insert_head`], [`List::remove`] and [`List::pop_first_visible`]
//! without blocking readers. Nodes logically removed while a reader might
//! still observe them are physically freed only once
//! [`List::reclaim`] determines no snapshot or hazard pointer can reach
//! them anymore.
#![allow(dead_code)]

mod domain;
mod error;
mod iter;
mod list;
mod node;
mod spin_lock;
mod sync;
mod thread_state;
mod util;

pub use domain::Domain;
pub use error::{ListError, ListResult};
pub use iter::SnapshotIter;
pub use list::List;

#[macro_use]
extern crate log;
