use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;

use crate::{
    error::DbError,
    storage::{
        disk::TableFile,
        page_id::PageId,
        schema::Schema,
        tuple::{Tuple, WrappedTuple},
    },
    transaction::{Permission, Transaction},
    types::DbResult,
    utils::HandyRwLock,
    Database,
};

static TABLE_ID: AtomicU32 = AtomicU32::new(1);

/// A table stored as a heap file: pages in no particular order, tuples in
/// the first slot that fits.
///
/// All page access goes through the buffer pool, which is where locks are
/// taken; this type never touches a page image without the pool having
/// granted it first. The only direct file operations are the ones the pool
/// and the recovery path delegate back down here.
pub struct HeapTable {
    name: String,
    table_id: u32,
    file: TableFile,
    schema: Schema,
}

impl HeapTable {
    /// Create a handle over `<data dir>/<name>.table`, creating the file
    /// when missing.
    pub fn new(name: &str, schema: &Schema) -> Self {
        let path = Database::global().get_path().join(format!("{}.table", name));
        let file = TableFile::new(&path)
            .unwrap_or_else(|e| panic!("cannot open table file {:?}: {}", path, e));

        Self {
            name: name.to_string(),
            table_id: TABLE_ID.fetch_add(1, Ordering::Relaxed),
            file,
            schema: schema.clone(),
        }
    }

    pub fn get_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_pages(&self) -> Result<usize, DbError> {
        self.file.num_pages()
    }

    pub(crate) fn read_page_from_disk(&self, page_index: u32) -> Result<Vec<u8>, DbError> {
        self.file.read_page(page_index)
    }

    pub(crate) fn write_page_to_disk(&self, page_index: u32, bytes: &[u8]) -> DbResult {
        self.file.write_page(page_index, bytes)
    }

    /// Add a tuple on behalf of `tx`.
    ///
    /// Walks the existing pages under write locks until one has a free
    /// slot, extending the file with a fresh page when all are full. Every
    /// page it locks stays locked until the transaction completes, and the
    /// page that takes the tuple is tagged dirty with `tx`.
    pub fn insert_tuple(&self, tx: &Transaction, tuple: &Tuple) -> DbResult {
        if tuple.get_width() != self.schema.get_width() {
            return Err(DbError::Tuple(format!(
                "tuple {} has {} cells, table {} expects {}",
                tuple,
                tuple.get_width(),
                self.name,
                self.schema.get_width()
            )));
        }

        let bp = Database::buffer_pool();

        for i in 0..self.num_pages()? {
            let pid = PageId::new(self.table_id, i as u32);
            let page_rc = bp.get_page(tx, Permission::ReadWrite, &pid)?;

            let mut page = page_rc.wl();
            if page.empty_slots_count() > 0 {
                page.insert_tuple(tuple)?;
                page.mark_dirty(Some(tx.get_id()));
                return Ok(());
            }
        }

        // every page is full, extend the file
        let page_index = self.file.append_empty_page()?;
        debug!(
            "table {} full, appended page {} for {:?}",
            self.name, page_index, tx
        );

        let pid = PageId::new(self.table_id, page_index);
        let page_rc = bp.get_page(tx, Permission::ReadWrite, &pid)?;
        let mut page = page_rc.wl();
        page.insert_tuple(tuple)?;
        page.mark_dirty(Some(tx.get_id()));
        Ok(())
    }

    /// Remove a previously scanned tuple on behalf of `tx`.
    pub fn delete_tuple(&self, tx: &Transaction, tuple: &WrappedTuple) -> DbResult {
        let pid = tuple.get_pid();
        let page_rc = Database::buffer_pool().get_page(tx, Permission::ReadWrite, &pid)?;

        let mut page = page_rc.wl();
        page.delete_tuple(tuple.get_slot())?;
        page.mark_dirty(Some(tx.get_id()));
        Ok(())
    }

    /// Stream the table's tuples page by page. Each visited page is read
    /// under a shared lock that persists until `tx` completes.
    pub fn scan<'a>(&'a self, tx: &'a Transaction) -> HeapTableScan<'a> {
        HeapTableScan {
            table: self,
            tx,
            next_page_index: 0,
            current: Vec::new(),
            cursor: 0,
            failed: false,
        }
    }
}

pub struct HeapTableScan<'a> {
    table: &'a HeapTable,
    tx: &'a Transaction,
    next_page_index: u32,
    current: Vec<WrappedTuple>,
    cursor: usize,
    failed: bool,
}

impl HeapTableScan<'_> {
    fn load_next_page(&mut self) -> Result<bool, DbError> {
        if self.next_page_index as usize >= self.table.num_pages()? {
            return Ok(false);
        }

        let pid = PageId::new(self.table.get_id(), self.next_page_index);
        let page_rc = Database::buffer_pool().get_page(self.tx, Permission::ReadOnly, &pid)?;

        self.current = page_rc.rl().tuples();
        self.cursor = 0;
        self.next_page_index += 1;
        Ok(true)
    }
}

impl Iterator for HeapTableScan<'_> {
    type Item = Result<WrappedTuple, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            if self.cursor < self.current.len() {
                let tuple = self.current[self.cursor].clone();
                self.cursor += 1;
                return Some(Ok(tuple));
            }

            match self.load_next_page() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
