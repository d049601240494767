//! End-to-end behavior of `List`/`Domain` from outside the crate.
use mvcc_list::{Domain, List};
use std::sync::Arc;
use std::thread;

fn fresh_list<T>() -> (Arc<Domain<T>>, List<T>) {
    let domain = Arc::new(Domain::create(4).expect("domain"));
    domain.register_thread().expect("register");
    let list = List::new(domain.clone());
    (domain, list)
}

#[test]
fn insert_head_is_lifo() {
    let (domain, list) = fresh_list::<i32>();
    list.insert_head(1).unwrap();
    list.insert_head(2).unwrap();
    list.insert_head(3).unwrap();

    let seen: Vec<i32> = list.iter_begin().unwrap().collect();
    assert_eq!(seen, vec![3, 2, 1]);
    domain.unregister_thread();
}

#[test]
fn snapshot_excludes_inserts_and_removes_after_it_was_taken() {
    let (domain, list) = fresh_list::<i32>();
    list.insert_head(1).unwrap();
    list.insert_head(2).unwrap();

    let iter = list.iter_begin().unwrap();
    let before: Vec<i32> = iter.collect();
    assert_eq!(before, vec![2, 1]);

    // Mutate after the snapshot id has already been handed out above.
    list.insert_head(3).unwrap();
    list.remove(&1).unwrap();

    let iter2 = list.iter_begin().unwrap();
    let after: Vec<i32> = iter2.collect();
    assert_eq!(after, vec![3, 2]);

    domain.unregister_thread();
}

#[test]
fn pop_first_visible_returns_in_list_order() {
    let (domain, list) = fresh_list::<&'static str>();
    list.insert_head("c").unwrap();
    list.insert_head("b").unwrap();
    list.insert_head("a").unwrap();

    assert_eq!(list.pop_first_visible().unwrap(), "a");
    assert_eq!(list.pop_first_visible().unwrap(), "b");
    assert_eq!(list.pop_first_visible().unwrap(), "c");
    assert!(list.pop_first_visible().is_err());

    domain.unregister_thread();
}

#[test]
fn remove_then_contains_is_false_but_old_snapshot_still_sees_it() {
    let (domain, list) = fresh_list::<i32>();
    list.insert_head(10).unwrap();
    let iter = list.iter_begin().unwrap();

    list.remove(&10).unwrap();
    assert!(!list.contains(&10));

    let still_visible: Vec<i32> = iter.collect();
    assert_eq!(still_visible, vec![10]);

    domain.unregister_thread();
}

#[test]
fn remove_missing_payload_is_not_found() {
    let (domain, list) = fresh_list::<i32>();
    list.insert_head(1).unwrap();
    assert!(matches!(
        list.remove(&999),
        Err(mvcc_list::ListError::NotFound)
    ));
    domain.unregister_thread();
}

#[test]
fn reclaim_frees_payload_via_callback() {
    let (domain, list) = fresh_list::<i32>();
    list.insert_head(1).unwrap();
    list.insert_head(2).unwrap();
    list.remove(&1).unwrap();

    let mut freed = Vec::new();
    list.reclaim(Some(|payload: i32| freed.push(payload)))
        .unwrap();

    assert_eq!(freed, vec![1]);
    assert!(!list.contains(&1));
    assert!(list.contains(&2));

    domain.unregister_thread();
}

#[test]
fn concurrent_inserts_preserve_count() {
    let domain = Arc::new(Domain::<i32>::create(2).expect("domain"));
    let list = Arc::new(List::new(domain.clone()));

    thread::scope(|scope| {
        for t in 0..8 {
            let list = &list;
            let domain = &domain;
            scope.spawn(move || {
                domain.register_thread().unwrap();
                for i in 0..50 {
                    list.insert_head(t * 50 + i).unwrap();
                }
                domain.unregister_thread();
            });
        }
    });

    domain.register_thread().unwrap();
    assert_eq!(list.count(), 400);
    domain.unregister_thread();
}

#[test]
fn unregistered_thread_gets_not_registered_error() {
    let domain: Arc<Domain<i32>> = Arc::new(Domain::create(1).unwrap());
    let list = List::new(domain);
    assert!(matches!(
        list.insert_head(1),
        Err(mvcc_list::ListError::NotRegistered)
    ));
}
