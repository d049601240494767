//! Pins worker threads to cores (where the platform allows it) and drives
//! concurrent inserts, pops, and reclamation against a single `Domain`,
//! exercising the slot table's growth path as threads join.
use core_affinity::CoreId;
use mvcc_list::{Domain, List};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const WORKERS: usize = 12;

fn main() {
    env_logger::init();

    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    let domain = Arc::new(Domain::<usize>::create(2).expect("domain"));
    let list = Arc::new(List::new(domain.clone()));
    let popped = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker_id| {
            let list = list.clone();
            let domain = domain.clone();
            let popped = popped.clone();
            let core: Option<CoreId> = core_ids.get(worker_id % core_ids.len().max(1)).copied();
            thread::spawn(move || {
                if let Some(core) = core {
                    core_affinity::set_for_current(core);
                }
                domain.register_thread().expect("register");
                for i in 0..200 {
                    list.insert_head(worker_id * 1000 + i).expect("insert");
                }
                while list.pop_first_visible().is_ok() {
                    popped.fetch_add(1, Ordering::Relaxed);
                }
                list.reclaim(None::<fn(usize)>).expect("reclaim");
                domain.unregister_thread();
            })
        })
        .collect();

    for h in handles {
        h.join().expect("worker thread panicked");
    }

    domain.register_thread().expect("register main");
    list.reclaim(None::<fn(usize)>).expect("final reclaim");
    domain.unregister_thread();

    println!(
        "popped {} nodes, {} remain visible",
        popped.load(Ordering::Relaxed),
        list.count()
    );
}
