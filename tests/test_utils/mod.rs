use std::{
    collections::HashSet,
    fs,
    sync::{Arc, RwLock},
};

use heap_db::{
    storage::buffer_pool::{BufferPool, DEFAULT_PAGE_SIZE},
    transaction::{ConcurrentStatus, Transaction, DEFAULT_TIMEOUT_SECS},
    utils::{self, HandyRwLock},
    Cell, Database, HeapTable, Schema, Tuple, WrappedTuple,
};
use rand::prelude::*;

/// # Conduct the initialization
///
/// - Setting up log configurations.
/// - Remove the data directory of this test.
/// - Restart the database (which runs recovery on the empty state).
///
/// Each test passes its own `db_name` so test binaries running in parallel
/// don't stomp on each other's files.
pub fn setup(db_name: &str) {
    utils::init_log();

    BufferPool::set_page_size(DEFAULT_PAGE_SIZE);
    BufferPool::set_capacity(heap_db::storage::buffer_pool::DEFAULT_CAPACITY);
    ConcurrentStatus::set_timeout(DEFAULT_TIMEOUT_SECS);

    let dir = format!("./data/{}", db_name);
    let _ = fs::remove_dir_all(&dir);
    Database::set_data_dir(&dir);

    Database::reset();

    // a fresh deployment, not a restart: forget earlier tests' tables
    Database::mut_catalog().clear();
}

/// Simulate a crash: all volatile state vanishes, the files survive, and
/// restart recovery runs before anything else.
pub fn crash() {
    Database::reset();
}

pub fn new_empty_table(table_name: &str, columns: usize) -> Arc<RwLock<HeapTable>> {
    let schema = Schema::small_int_schema(columns);
    let table_rc = Arc::new(RwLock::new(HeapTable::new(table_name, &schema)));
    Database::mut_catalog().add_table(Arc::clone(&table_rc));
    table_rc
}

/// Insert one row whose cells all hold `key`.
pub fn insert_row(table: &HeapTable, tx: &Transaction, key: i64) {
    let width = table.get_schema().get_width();
    let tuple = Tuple::new_int_tuples(key, width);
    table.insert_tuple(tx, &tuple).unwrap();
}

/// How many rows of the table have `key` in their first column.
pub fn search_key(table: &HeapTable, tx: &Transaction, key: i64) -> usize {
    table
        .scan(tx)
        .map(|t| t.unwrap())
        .filter(|t| t.get_cell(0) == Cell::Int64(key))
        .count()
}

pub fn scan_all(table: &HeapTable, tx: &Transaction) -> Vec<WrappedTuple> {
    table.scan(tx).map(|t| t.unwrap()).collect()
}

/// Force every dirty page to disk, defeating the NO-STEAL policy so a
/// later crash has something to undo. Guards are taken in the usual
/// log-then-buffer-pool order.
pub fn flush_all_pages() {
    let mut log_manager = Database::mut_log_manager();
    let buffer_pool = Database::buffer_pool();
    buffer_pool.flush_all_pages(&mut log_manager).unwrap();
}

pub fn log_checkpoint() {
    Database::mut_log_manager().log_checkpoint().unwrap();
}

/// Fill the table with `rows` committed rows of distinct random keys,
/// returning the keys. The log is reset afterwards so tests start from a
/// quiet baseline, as if the table had existed before the process started.
pub fn new_random_table(table_name: &str, columns: usize, rows: usize) -> (Arc<RwLock<HeapTable>>, Vec<i64>) {
    let table_rc = new_empty_table(table_name, columns);

    let mut rng = rand::thread_rng();
    let mut keys: HashSet<i64> = HashSet::new();
    while keys.len() < rows {
        keys.insert(rng.gen_range(-1_000_000, 1_000_000));
    }
    let keys: Vec<i64> = keys.into_iter().collect();

    let write_tx = Transaction::new().unwrap();
    {
        let table = table_rc.rl();
        for key in &keys {
            insert_row(&table, &write_tx, *key);
        }
    }
    write_tx.commit().unwrap();

    Database::mut_log_manager().reset();

    (table_rc, keys)
}
