mod test_utils;

use std::{
    sync::{Arc, Barrier},
    thread,
};

use heap_db::{
    storage::page_id::PageId,
    transaction::{ConcurrentStatus, Transaction},
    types::Pod,
    utils::HandyRwLock,
    Database, DbError, HeapTable, Tuple,
};
use serial_test::serial;

use crate::test_utils::{insert_row, new_empty_table, search_key, setup};

/// Seed the table with one committed row holding `key`, so page 0 exists
/// on disk and can be locked.
fn seed(table: &HeapTable, key: i64) {
    let tx = Transaction::new().unwrap();
    insert_row(table, &tx, key);
    tx.commit().unwrap();
}

/// Read the own table under a shared lock, then write into the other
/// table. Run from two threads with the roles swapped this produces the
/// classic crossed S→X deadlock.
fn cross_writer(
    own: Pod<HeapTable>,
    other: Pod<HeapTable>,
    key: i64,
    barrier: Arc<Barrier>,
) -> Result<(), DbError> {
    let tx = Transaction::new().unwrap();

    // shared lock on the own table's only page
    assert!(search_key(&own.rl(), &tx, 0) >= 1);

    // both threads hold their read locks before anyone writes
    barrier.wait();

    let tuple = Tuple::new_int_tuples(key, 2);
    match other.rl().insert_tuple(&tx, &tuple) {
        Ok(()) => {
            tx.commit().unwrap();
            Ok(())
        }
        Err(e) => {
            tx.abort().unwrap();
            Err(e)
        }
    }
}

#[test]
#[serial]
/// Two transactions each hold a shared lock and want the other's page
/// exclusively. The one that closes the cycle is aborted; the survivor
/// commits and only its write is visible.
fn test_deadlock_victim_aborts() {
    setup("concurrent_deadlock");

    let table_rc_1 = new_empty_table("table_1", 2);
    let table_rc_2 = new_empty_table("table_2", 2);
    seed(&table_rc_1.rl(), 0);
    seed(&table_rc_2.rl(), 0);

    let barrier = Arc::new(Barrier::new(2));

    let handle_1 = {
        let own = Arc::clone(&table_rc_1);
        let other = Arc::clone(&table_rc_2);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || cross_writer(own, other, 11, barrier))
    };
    let handle_2 = {
        let own = Arc::clone(&table_rc_2);
        let other = Arc::clone(&table_rc_1);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || cross_writer(own, other, 22, barrier))
    };

    let result_1 = handle_1.join().unwrap();
    let result_2 = handle_2.join().unwrap();

    // exactly one of them was chosen as the victim
    assert_eq!(result_1.is_err() as usize + result_2.is_err() as usize, 1);
    for result in [&result_1, &result_2] {
        if let Err(e) = result {
            assert!(matches!(e, DbError::TransactionAborted(_)));
        }
    }

    // only the survivor's write is there
    let tx = Transaction::new().unwrap();
    let count_11 = search_key(&table_rc_2.rl(), &tx, 11);
    let count_22 = search_key(&table_rc_1.rl(), &tx, 22);
    if result_1.is_ok() {
        assert_eq!((count_11, count_22), (1, 0));
    } else {
        assert_eq!((count_11, count_22), (0, 1));
    }
    tx.commit().unwrap();
}

#[test]
#[serial]
/// A request blocked past the transaction's timeout fails with
/// `TransactionAborted` instead of waiting forever.
fn test_lock_timeout() {
    setup("concurrent_timeout");
    ConcurrentStatus::set_timeout(1);

    let table_rc = new_empty_table("table_1", 2);
    let table = table_rc.rl();
    seed(&table, 0);

    let tx_1 = Transaction::new().unwrap();
    insert_row(&table, &tx_1, 1);

    // tx_1 holds the exclusive lock and never yields it
    let tx_2 = Transaction::new().unwrap();
    let err = table.insert_tuple(&tx_2, &Tuple::new_int_tuples(2, 2)).unwrap_err();
    assert!(matches!(err, DbError::TransactionAborted(_)));
    tx_2.abort().unwrap();

    tx_1.commit().unwrap();

    let tx = Transaction::new().unwrap();
    assert_eq!(search_key(&table, &tx, 1), 1);
    assert_eq!(search_key(&table, &tx, 2), 0);
    tx.commit().unwrap();
}

#[test]
#[serial]
/// Shared locks coexist; the holders are both visible in the lock table
/// until they complete.
fn test_shared_readers() {
    setup("concurrent_shared_readers");

    let table_rc = new_empty_table("table_1", 2);
    let table = table_rc.rl();
    seed(&table, 0);

    let tx_1 = Transaction::new().unwrap();
    let tx_2 = Transaction::new().unwrap();
    assert_eq!(search_key(&table, &tx_1, 0), 1);
    assert_eq!(search_key(&table, &tx_2, 0), 1);

    let pid = PageId::new(table.get_id(), 0);
    {
        let cs = Database::concurrent_status();
        assert!(cs.holds_lock(tx_1.get_id(), &pid));
        assert!(cs.holds_lock(tx_2.get_id(), &pid));
    }

    tx_1.commit().unwrap();
    tx_2.commit().unwrap();
}

#[test]
#[serial]
/// The sole reader of a page may upgrade in place, and afterwards the
/// page really is exclusive.
fn test_upgrade_sole_reader() {
    setup("concurrent_upgrade");
    ConcurrentStatus::set_timeout(1);

    let table_rc = new_empty_table("table_1", 2);
    let table = table_rc.rl();
    seed(&table, 0);

    let tx_1 = Transaction::new().unwrap();
    assert_eq!(search_key(&table, &tx_1, 0), 1);
    insert_row(&table, &tx_1, 1);

    // the page is now exclusive, a reader cannot get in
    let tx_2 = Transaction::new().unwrap();
    let blocked: Result<Vec<_>, _> = table.scan(&tx_2).collect();
    assert!(matches!(blocked.unwrap_err(), DbError::TransactionAborted(_)));
    tx_2.abort().unwrap();

    tx_1.commit().unwrap();
}

#[test]
#[serial]
/// An upgrade request with other readers present waits for them instead
/// of kicking them out; here it runs into the timeout, and the other
/// reader's lock is untouched.
fn test_upgrade_waits_for_other_readers() {
    setup("concurrent_upgrade_blocked");
    ConcurrentStatus::set_timeout(1);

    let table_rc = new_empty_table("table_1", 2);
    let table = table_rc.rl();
    seed(&table, 0);

    let tx_1 = Transaction::new().unwrap();
    let tx_2 = Transaction::new().unwrap();
    assert_eq!(search_key(&table, &tx_1, 0), 1);
    assert_eq!(search_key(&table, &tx_2, 0), 1);

    let err = table.insert_tuple(&tx_1, &Tuple::new_int_tuples(1, 2)).unwrap_err();
    assert!(matches!(err, DbError::TransactionAborted(_)));

    // tx_2 kept its shared lock through tx_1's failed upgrade
    let pid = PageId::new(table.get_id(), 0);
    assert!(Database::concurrent_status().holds_lock(tx_2.get_id(), &pid));

    tx_1.abort().unwrap();
    assert_eq!(search_key(&table, &tx_2, 0), 1);
    tx_2.commit().unwrap();
}

#[test]
#[serial]
/// Many writers at once: every committed row is visible exactly once
/// afterwards.
fn test_concurrent_inserts() {
    setup("concurrent_inserts");

    let table_rc = new_empty_table("table_1", 2);

    let (sender, receiver) = crossbeam::channel::unbounded();

    let mut handles = Vec::new();
    for i in 0..50i64 {
        let local_table = Arc::clone(&table_rc);
        let local_sender = sender.clone();
        handles.push(thread::spawn(move || {
            let tx = Transaction::new().unwrap();
            insert_row(&local_table.rl(), &tx, 100 + i);
            tx.commit().unwrap();
            local_sender.send(100 + i).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    drop(sender);

    let inserted: Vec<i64> = receiver.iter().collect();
    assert_eq!(inserted.len(), 50);

    let table = table_rc.rl();
    let tx = Transaction::new().unwrap();
    for key in inserted {
        assert_eq!(search_key(&table, &tx, key), 1);
    }
    assert_eq!(test_utils::scan_all(&table, &tx).len(), 50);
    tx.commit().unwrap();
}
