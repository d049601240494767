//! Several writer threads insert and remove while a reader thread holds a
//! long-lived snapshot open, demonstrating that the reader's view stays
//! stable even as the list mutates underneath it.
use mvcc_list::{Domain, List};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
    env_logger::init();

    let domain = Arc::new(Domain::<i64>::with_default_capacity().expect("domain"));
    let list = Arc::new(List::new(domain.clone()));

    domain.register_thread().expect("register main");
    for i in 0..8 {
        list.insert_head(i).expect("seed insert");
    }

    let writer = {
        let list = list.clone();
        let domain = domain.clone();
        thread::spawn(move || {
            domain.register_thread().expect("register writer");
            for i in 100..108 {
                list.insert_head(i).expect("insert");
                let _ = list.remove(&i);
            }
            list.reclaim(None::<fn(i64)>).expect("reclaim");
            domain.unregister_thread();
        })
    };

    let snapshot_view: Vec<i64> = {
        let iter = list.iter_begin().expect("iter_begin");
        let snapshot = iter.snapshot();
        let view: Vec<i64> = iter.collect();
        println!("reader pinned to snapshot {snapshot}, saw {} nodes", view.len());
        view
    };

    writer.join().expect("writer thread panicked");
    thread::sleep(Duration::from_millis(10));

    println!("reader's original view: {snapshot_view:?}");
    println!("live count now: {}", list.count());

    domain.unregister_thread();
}
