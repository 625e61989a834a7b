use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

use itertools::Itertools;
use log::debug;

use crate::{
    error::DbError,
    storage::{
        heap_page::HeapPage,
        page_id::PageId,
        tuple::{Tuple, WrappedTuple},
    },
    transaction::{ConcurrentStatus, Permission, Transaction, TransactionID},
    tx_log::LogManager,
    types::{DbResult, Pod, ResultPod},
    utils::HandyRwLock,
    Database,
};

pub const DEFAULT_PAGE_SIZE: usize = 4096;
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

pub const DEFAULT_CAPACITY: usize = 50;
static CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_CAPACITY);

/// The bounded page cache every page access goes through.
///
/// `get_page` first takes the page lock in the lock table (this is the
/// call that may block), then serves the image from the cache, loading it
/// from the table file on a miss.
///
/// Write-ahead rule, enforced at every flush with no exception: the UPDATE
/// record for a page is appended and forced before the page bytes go to
/// its table file. Eviction only ever picks clean pages, so eviction
/// itself never writes; when every frame is dirty the pool gives up with
/// `OutOfBufferSpace` instead of stealing.
pub struct BufferPool {
    buffer: RwLock<HashMap<PageId, Pod<HeapPage>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            buffer: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_page_size(page_size: usize) {
        PAGE_SIZE.store(page_size, Ordering::Relaxed);
    }

    pub fn get_page_size() -> usize {
        PAGE_SIZE.load(Ordering::Relaxed)
    }

    pub fn set_capacity(capacity: usize) {
        CAPACITY.store(capacity, Ordering::Relaxed);
    }

    pub fn get_capacity() -> usize {
        CAPACITY.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.buffer.wl().clear();
    }

    pub fn cached_pages_count(&self) -> usize {
        self.buffer.rl().len()
    }

    /// Retrieve the page with the requested permission, blocking until the
    /// matching lock is granted. On a miss the page comes from disk,
    /// evicting a clean page first when the pool is full.
    pub fn get_page(&self, tx: &Transaction, perm: Permission, pid: &PageId) -> ResultPod<HeapPage> {
        ConcurrentStatus::acquire(tx, &perm.to_lock(), pid)?;

        // fast path, no table lookup
        if let Some(page_rc) = self.buffer.rl().get(pid) {
            return Ok(page_rc.clone());
        }

        let table_rc = Database::catalog()
            .get_table(&pid.table_id)
            .ok_or_else(|| DbError::Page(format!("page {:?} belongs to no table", pid)))?;
        let table = table_rc.rl();

        let mut buffer = self.buffer.wl();

        // a racing reader may have loaded it while we resolved the table
        if let Some(page_rc) = buffer.get(pid) {
            return Ok(page_rc.clone());
        }

        if buffer.len() >= Self::get_capacity() {
            Self::evict_page(&mut buffer)?;
        }

        let bytes = table.read_page_from_disk(pid.page_index)?;
        let page = HeapPage::new(pid, &bytes, table.get_schema())?;
        let page_rc = Arc::new(RwLock::new(page));
        buffer.insert(*pid, page_rc.clone());
        Ok(page_rc)
    }

    /// Drop one clean page, scanning in page-id order so the choice is
    /// deterministic. Fails when every cached page is dirty.
    fn evict_page(buffer: &mut HashMap<PageId, Pod<HeapPage>>) -> DbResult {
        let victim = buffer
            .iter()
            .sorted_by(|a, b| a.0.cmp(b.0))
            .find(|(_, page_rc)| page_rc.rl().is_dirty().is_none())
            .map(|(pid, _)| *pid);

        match victim {
            Some(pid) => {
                debug!("evicting clean page {:?}", pid);
                buffer.remove(&pid);
                Ok(())
            }
            None => Err(DbError::OutOfBufferSpace),
        }
    }

    /// Add a tuple to the specified table on behalf of `tx`. The table
    /// walks its pages through `get_page`, so locks and dirty tagging
    /// happen there.
    pub fn insert_tuple(&self, tx: &Transaction, table_id: u32, tuple: &Tuple) -> DbResult {
        let table_rc = Database::catalog()
            .get_table(&table_id)
            .ok_or_else(|| DbError::Page(format!("no table with id {}", table_id)))?;
        let table = table_rc.rl();
        table.insert_tuple(tx, tuple)
    }

    /// Remove a previously scanned tuple on behalf of `tx`.
    pub fn delete_tuple(&self, tx: &Transaction, tuple: &WrappedTuple) -> DbResult {
        let table_id = tuple.get_pid().table_id;
        let table_rc = Database::catalog()
            .get_table(&table_id)
            .ok_or_else(|| DbError::Page(format!("no table with id {}", table_id)))?;
        let table = table_rc.rl();
        table.delete_tuple(tx, tuple)
    }

    /// Finish `tx` inside the pool.
    ///
    /// Commit: force every page it dirtied to disk (update record first,
    /// then the page), append and force COMMIT, then promote the flushed
    /// images to before-images. The transaction still holds its exclusive
    /// locks through all of this, so nobody can observe the page between
    /// the COMMIT record and the before-image update.
    ///
    /// Abort: roll the transaction back from the log, then drop whatever
    /// it dirtied from the cache.
    pub fn tx_complete(&self, tx: &Transaction, commit: bool, log_manager: &mut LogManager) -> DbResult {
        if !commit {
            log_manager.log_abort(tx, self)?;

            for pid in self.pages_dirtied_by(tx.get_id()) {
                self.discard_page(&pid);
            }
            return Ok(());
        }

        let dirtied = self.pages_dirtied_by(tx.get_id());

        for pid in &dirtied {
            self.flush_page(pid, tx.get_id(), log_manager)?;
        }

        log_manager.log_commit(tx)?;

        for pid in &dirtied {
            if let Some(page_rc) = self.buffer.rl().get(pid) {
                let mut page = page_rc.wl();
                page.set_before_image();
                page.mark_dirty(None);
            }
        }

        Ok(())
    }

    /// Force every dirty page to disk, whoever dirtied it. Diagnostic and
    /// checkpoint path; before-images are left untouched and the pages stay
    /// tagged, so their transactions still own them.
    pub fn flush_all_pages(&self, log_manager: &mut LogManager) -> DbResult {
        for (pid, dirtier) in self.dirty_pages() {
            self.flush_page(&pid, dirtier, log_manager)?;
        }
        Ok(())
    }

    /// Write one page to its table file, appending and forcing the UPDATE
    /// record first.
    fn flush_page(&self, pid: &PageId, dirtier: TransactionID, log_manager: &mut LogManager) -> DbResult {
        let page_rc = self
            .buffer
            .rl()
            .get(pid)
            .cloned()
            .ok_or_else(|| DbError::Page(format!("page {:?} is not cached", pid)))?;

        let (before, after) = {
            let page = page_rc.rl();
            (page.get_before_image(), page.get_page_data())
        };

        log_manager.log_update(dirtier, pid, &before, &after)?;
        log_manager.force()?;

        let table_rc = Database::catalog()
            .get_table(&pid.table_id)
            .ok_or_else(|| DbError::Page(format!("page {:?} belongs to no table", pid)))?;
        table_rc.rl().write_page_to_disk(pid.page_index, &after)?;

        debug!("flushed page {:?} for tx_{}", pid, dirtier);
        Ok(())
    }

    /// Remove the page from the cache without writing it. Rollback and
    /// recovery use this so later reads refetch the restored bytes.
    pub fn discard_page(&self, pid: &PageId) {
        self.buffer.wl().remove(pid);
    }

    fn pages_dirtied_by(&self, tid: TransactionID) -> Vec<PageId> {
        self.buffer
            .rl()
            .iter()
            .filter(|(_, page_rc)| page_rc.rl().is_dirty() == Some(tid))
            .map(|(pid, _)| *pid)
            .sorted()
            .collect()
    }

    fn dirty_pages(&self) -> Vec<(PageId, TransactionID)> {
        self.buffer
            .rl()
            .iter()
            .filter_map(|(pid, page_rc)| page_rc.rl().is_dirty().map(|tid| (*pid, tid)))
            .sorted()
            .collect()
    }
}
