use std::{
    mem,
    path::PathBuf,
    sync::{Arc, Once, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    catalog::Catalog,
    storage::buffer_pool::BufferPool,
    transaction::ConcurrentStatus,
    tx_log::LogManager,
    types::Pod,
    utils::HandyRwLock,
};

static DATA_DIR: RwLock<Option<String>> = RwLock::new(None);
const DEFAULT_DATA_DIR: &str = "data/default_db";

/// We collect the process-wide facilities here: the buffer pool, the
/// catalog, the lock table, and the log manager.
///
/// Their `RwLock`s are the coarse mutexes of the system: the log manager's
/// write guard is the log mutex, the lock table's write guard is the
/// table-wide mutex, and the buffer pool keeps its own internal map lock.
/// Paths that need several of them take them in a fixed order (log, then
/// buffer pool, then lock table) so they cannot deadlock each other.
pub struct Database {
    path: PathBuf,

    buffer_pool: Pod<BufferPool>,
    catalog: Pod<Catalog>,
    concurrent_status: Pod<ConcurrentStatus>,
    log_manager: Pod<LogManager>,
}

static mut SINGLETON: *mut Database = 0 as *mut Database;
static ONCE: Once = Once::new();

impl Database {
    fn new() -> Self {
        let db_path = Self::data_dir();
        if !db_path.exists() {
            std::fs::create_dir_all(&db_path)
                .unwrap_or_else(|e| panic!("cannot create data dir {:?}: {}", db_path, e));
        }

        let log_path = db_path.join("wal.log");

        Self {
            path: db_path,

            buffer_pool: Arc::new(RwLock::new(BufferPool::new())),
            catalog: Arc::new(RwLock::new(Catalog::new())),
            concurrent_status: Arc::new(RwLock::new(ConcurrentStatus::new())),
            log_manager: Arc::new(RwLock::new(LogManager::new(log_path))),
        }
    }

    /// Pick the directory holding the log and the table files. Call before
    /// the first use of `global` or `reset`; existing instances keep their
    /// already-open files.
    pub fn set_data_dir(path: &str) {
        *DATA_DIR.wl() = Some(path.to_string());
    }

    fn data_dir() -> PathBuf {
        match DATA_DIR.rl().as_ref() {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_DATA_DIR),
        }
    }

    /// (Re)start the database: throw away all volatile state, keep the
    /// catalog (read-mostly state populated at startup), and run crash
    /// recovery before any new transaction can begin.
    ///
    /// This doubles as the crash simulation in tests: the buffer pool,
    /// lock table, and log bookkeeping vanish exactly like they would in a
    /// dying process, while the files survive.
    pub fn reset() {
        let carried_catalog = unsafe {
            if SINGLETON.is_null() {
                None
            } else {
                Some(Self::global().catalog.clone())
            }
        };

        let mut instance = Self::new();
        if let Some(catalog) = carried_catalog {
            instance.catalog = catalog;
        }

        unsafe {
            if !SINGLETON.is_null() {
                // Drop the previous db instance if it's already initialized.
                mem::drop(Box::from_raw(SINGLETON));
            }

            // Put it in the heap so it can outlive this call.
            SINGLETON = mem::transmute(Box::new(instance));
        }

        // recovery failures are fatal; the next run re-attempts
        Self::mut_log_manager()
            .recover(&Self::buffer_pool())
            .unwrap_or_else(|e| panic!("recovery failed: {}", e));

        Self::mut_concurrent_status().clear();
    }

    pub fn global() -> &'static Self {
        ONCE.call_once(|| unsafe {
            // `reset` may already have installed an instance
            if SINGLETON.is_null() {
                // Put it in the heap so it can outlive this call
                SINGLETON = mem::transmute(Box::new(Self::new()));
            }
        });

        unsafe { SINGLETON.as_ref().unwrap() }
    }

    pub fn buffer_pool() -> RwLockReadGuard<'static, BufferPool> {
        Self::global().buffer_pool.rl()
    }

    pub fn catalog() -> RwLockReadGuard<'static, Catalog> {
        Self::global().catalog.rl()
    }

    pub fn mut_catalog() -> RwLockWriteGuard<'static, Catalog> {
        Self::global().catalog.wl()
    }

    pub fn concurrent_status() -> RwLockReadGuard<'static, ConcurrentStatus> {
        Self::global().concurrent_status.rl()
    }

    pub(crate) fn mut_concurrent_status() -> RwLockWriteGuard<'static, ConcurrentStatus> {
        Self::global().concurrent_status.wl()
    }

    pub fn log_manager() -> RwLockReadGuard<'static, LogManager> {
        Self::global().log_manager.rl()
    }

    pub fn mut_log_manager() -> RwLockWriteGuard<'static, LogManager> {
        Self::global().log_manager.wl()
    }

    pub fn get_path(&self) -> PathBuf {
        self.path.clone()
    }
}
