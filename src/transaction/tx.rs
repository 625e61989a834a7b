use core::fmt;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::{error::DbError, types::DbResult, utils, Database};

pub type TransactionID = u64;

static TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, PartialEq, Debug)]
pub enum TransactionStatus {
    Active,
    Aborted,
    Committed,
}

/// A handle on one running transaction.
///
/// Creating the handle is "begin": it draws the next id, stamps the start
/// time used by the lock timeout, writes the BEGIN record, and registers
/// the transaction as active. Begin fails when the BEGIN record cannot be
/// appended. The handle is then threaded through every page access until
/// `commit` or `abort` finishes the transaction.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    // increase monotonically by 1
    id: TransactionID,

    // wall-clock millis at begin, the anchor for the lock timeout
    start_ms: u64,
}

impl Transaction {
    pub fn new() -> Result<Self, DbError> {
        let id = TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        let instance = Self {
            id,
            start_ms: utils::now_millis(),
        };

        Database::mut_log_manager().log_start(&instance)?;

        Database::mut_concurrent_status().set_status(id, TransactionStatus::Active);

        Ok(instance)
    }

    /// Make the transaction durable.
    ///
    /// On return every page it dirtied is on disk, the COMMIT record is
    /// forced, and its locks are released. An error means the caller has
    /// to `abort` instead.
    pub fn commit(&self) -> DbResult {
        // step 1: flush dirty pages (update records included) and write
        // the COMMIT record, all while the locks are still held
        {
            let mut log_manager = Database::mut_log_manager();
            let buffer_pool = Database::buffer_pool();
            buffer_pool.tx_complete(self, true, &mut log_manager)?;
        }

        // step 2: release the locks, a memory operation that can happen
        // after the COMMIT record is durable
        let mut concurrent_status = Database::mut_concurrent_status();
        concurrent_status.release_all(self.id);
        concurrent_status.set_status(self.id, TransactionStatus::Committed);

        Ok(())
    }

    /// Undo the transaction.
    ///
    /// On return every page it wrote is back to its pre-transaction image
    /// on disk, its cached pages are discarded, the ABORT record is
    /// forced, and its locks are released.
    pub fn abort(&self) -> DbResult {
        // step 1: rollback from the log and write the ABORT record; the
        // locks are still held, so the pages cannot change underneath
        {
            let mut log_manager = Database::mut_log_manager();
            let buffer_pool = Database::buffer_pool();
            buffer_pool.tx_complete(self, false, &mut log_manager)?;
        }

        // step 2: release the locks
        let mut concurrent_status = Database::mut_concurrent_status();
        concurrent_status.release_all(self.id);
        concurrent_status.set_status(self.id, TransactionStatus::Aborted);

        Ok(())
    }

    pub fn get_id(&self) -> TransactionID {
        self.id
    }

    /// How long this transaction has existed; the lock table compares this
    /// against its timeout.
    pub fn age(&self) -> Duration {
        Duration::from_millis(utils::now_millis().saturating_sub(self.start_ms))
    }
}

impl std::hash::Hash for Transaction {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
