use core::fmt;
use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
    thread::sleep,
    time::Duration,
};

use log::debug;

use crate::{
    error::DbError,
    storage::page_id::PageId,
    transaction::{wait_for_graph::WaitForGraph, Transaction, TransactionID, TransactionStatus},
    types::DbResult,
    Database,
};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
static TIMEOUT_SECS: AtomicU64 = AtomicU64::new(DEFAULT_TIMEOUT_SECS);

// How long a blocked requester yields before retrying.
const RETRY_INTERVAL_MS: u64 = 10;

#[derive(Debug, PartialEq)]
pub enum Lock {
    SLock,
    XLock,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn to_lock(&self) -> Lock {
        match self {
            Permission::ReadOnly => Lock::SLock,
            Permission::ReadWrite => Lock::XLock,
        }
    }
}

/// The page-level lock table, plus the per-transaction bookkeeping that
/// hangs off it.
///
/// One process-wide instance lives in the `Database`, and its `RwLock`
/// there is the single mutex all lock-table operations serialize under.
/// Requests that cannot be granted release that mutex, yield, and retry,
/// so holders can make progress in between.
pub struct ConcurrentStatus {
    s_lock_map: HashMap<PageId, HashSet<TransactionID>>,
    x_lock_map: HashMap<PageId, TransactionID>,

    // every page a transaction has locked, for release_all
    hold_pages: HashMap<TransactionID, HashSet<PageId>>,

    // Transaction status, used for transaction isolation, the idea is from
    // PostgreSQL: given a transaction id, it gives the transaction state
    // (running, aborted, committed).
    transaction_status: HashMap<TransactionID, TransactionStatus>,

    wait_for_graph: WaitForGraph,
}

impl ConcurrentStatus {
    pub fn new() -> Self {
        Self {
            s_lock_map: HashMap::new(),
            x_lock_map: HashMap::new(),
            hold_pages: HashMap::new(),
            transaction_status: HashMap::new(),
            wait_for_graph: WaitForGraph::new(),
        }
    }

    pub fn set_timeout(secs: u64) {
        TIMEOUT_SECS.store(secs, Ordering::Relaxed);
    }

    pub fn get_timeout() -> u64 {
        TIMEOUT_SECS.load(Ordering::Relaxed)
    }

    /// Request a lock on the given page. This api is blocking.
    ///
    /// Fails with `TransactionAborted` when the requester closes a cycle
    /// in the wait-for graph (the requester is always the victim, being
    /// the most recent participant) or when the transaction has outlived
    /// its timeout. The caller is expected to run the abort path then.
    pub(crate) fn acquire(tx: &Transaction, lock: &Lock, pid: &PageId) -> DbResult {
        loop {
            // acquire the table-wide mutex
            {
                let mut cs = Database::mut_concurrent_status();

                if cs.add_lock(tx.get_id(), lock, pid) {
                    // the request was granted, so tx no longer waits on
                    // anyone
                    cs.wait_for_graph.remove_waiter(tx.get_id());
                    return Ok(());
                }

                // blocked: re-record who we are waiting for, then look
                // for a cycle through ourselves
                cs.wait_for_graph.remove_waiter(tx.get_id());
                cs.add_wait_edges(tx.get_id(), lock, pid);

                if cs.wait_for_graph.cycle_through(tx.get_id()) {
                    cs.wait_for_graph.remove_waiter(tx.get_id());
                    debug!(
                        "deadlock detected, {:?} aborts while requesting {:?} on {:?}\n{}",
                        tx, lock, pid, cs
                    );
                    return Err(DbError::TransactionAborted(format!(
                        "deadlock detected, {:?} requesting {:?} on page {:?}",
                        tx, lock, pid
                    )));
                }
            }
            // release the table-wide mutex across the yield

            if tx.age() > Duration::from_secs(Self::get_timeout()) {
                return Err(DbError::TransactionAborted(format!(
                    "{:?} timed out requesting {:?} on page {:?}",
                    tx, lock, pid
                )));
            }

            sleep(Duration::from_millis(RETRY_INTERVAL_MS));
        }
    }

    /// Try to grant the lock, mutating the holder sets on success. This is
    /// idempotent for locks the transaction already holds.
    ///
    /// # Return
    ///
    /// Whether the lock was granted.
    fn add_lock(&mut self, tid: TransactionID, lock: &Lock, pid: &PageId) -> bool {
        if let Some(&holder) = self.x_lock_map.get(pid) {
            if holder != tid {
                return false;
            }

            // tid already holds the exclusive lock, which subsumes both
            // request kinds
            self.hold_pages.entry(tid).or_insert_with(HashSet::new).insert(*pid);
            return true;
        }

        match lock {
            Lock::SLock => {
                self.s_lock_map.entry(*pid).or_insert_with(HashSet::new).insert(tid);
            }
            Lock::XLock => {
                if let Some(holders) = self.s_lock_map.get(pid) {
                    if holders.iter().any(|holder| *holder != tid) {
                        // wait for the other shared holders to drain
                        return false;
                    }
                }

                // either no shared holder, or tid alone: promote in place
                if let Some(holders) = self.s_lock_map.get_mut(pid) {
                    holders.remove(&tid);
                    if holders.is_empty() {
                        self.s_lock_map.remove(pid);
                    }
                }

                self.x_lock_map.insert(*pid, tid);
            }
        }

        self.hold_pages.entry(tid).or_insert_with(HashSet::new).insert(*pid);
        true
    }

    /// Record the wait-for edges of a blocked request: everyone waits for
    /// an exclusive holder, and an exclusive request additionally waits
    /// for every shared holder.
    fn add_wait_edges(&mut self, tid: TransactionID, lock: &Lock, pid: &PageId) {
        if let Some(&holder) = self.x_lock_map.get(pid) {
            if holder != tid {
                self.wait_for_graph.add_edge(tid, holder);
            }
        }

        if lock == &Lock::XLock {
            if let Some(holders) = self.s_lock_map.get(pid) {
                for &holder in holders {
                    if holder != tid {
                        self.wait_for_graph.add_edge(tid, holder);
                    }
                }
            }
        }
    }

    pub fn holds_lock(&self, tid: TransactionID, pid: &PageId) -> bool {
        if self.x_lock_map.get(pid) == Some(&tid) {
            return true;
        }
        self.s_lock_map
            .get(pid)
            .map(|holders| holders.contains(&tid))
            .unwrap_or(false)
    }

    pub(crate) fn release_lock(&mut self, tid: TransactionID, pid: &PageId) {
        if let Some(holders) = self.s_lock_map.get_mut(pid) {
            holders.remove(&tid);
            if holders.is_empty() {
                self.s_lock_map.remove(pid);
            }
        }

        if self.x_lock_map.get(pid) == Some(&tid) {
            self.x_lock_map.remove(pid);
        }
    }

    /// Drop every lock `tid` holds. Only called once the transaction has
    /// committed or finished aborting; until then strict two-phase locking
    /// keeps all of them.
    pub(crate) fn release_all(&mut self, tid: TransactionID) {
        if let Some(pids) = self.hold_pages.remove(&tid) {
            for pid in pids {
                self.release_lock(tid, &pid);
            }
        }

        self.wait_for_graph.remove_waiter(tid);
    }

    pub(crate) fn set_status(&mut self, tid: TransactionID, status: TransactionStatus) {
        self.transaction_status.insert(tid, status);
    }

    pub fn get_status(&self, tid: TransactionID) -> Option<TransactionStatus> {
        self.transaction_status.get(&tid).cloned()
    }

    pub fn clear(&mut self) {
        self.s_lock_map.clear();
        self.x_lock_map.clear();
        self.hold_pages.clear();
        self.transaction_status.clear();
        self.wait_for_graph = WaitForGraph::new();
    }
}

impl fmt::Display for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "s_lock_map: {{")?;
        for (pid, holders) in &self.s_lock_map {
            writeln!(f, "\t{:?} -> {:?}", pid, holders)?;
        }
        writeln!(f, "}}")?;

        writeln!(f, "x_lock_map: {{")?;
        for (pid, holder) in &self.x_lock_map {
            writeln!(f, "\t{:?} -> tx_{}", pid, holder)?;
        }
        writeln!(f, "}}")?;

        writeln!(f, "hold_pages: {{")?;
        for (tid, pids) in &self.hold_pages {
            writeln!(f, "\ttx_{} -> {:?}", tid, pids)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
