use std::{collections::HashMap, io::SeekFrom, path::Path};

use itertools::Itertools;
use log::debug;

use crate::{
    error::DbError,
    io::{read_exact, read_into, DbFile, Decodeable, Encodeable},
    storage::{buffer_pool::BufferPool, page_id::PageId},
    transaction::{Transaction, TransactionID},
    types::DbResult,
    utils::HandyRwLock,
    Database,
};

/// Value of the file header while no checkpoint has been taken.
const NO_CHECKPOINT: i64 = -1;

#[derive(Debug, PartialEq, Clone, Copy)]
enum RecordType {
    BEGIN = 1,
    UPDATE = 2,
    COMMIT = 3,
    ABORT = 4,
    CHECKPOINT = 5,
}

impl RecordType {
    fn from_u32(value: u32) -> Self {
        match value {
            1 => RecordType::BEGIN,
            2 => RecordType::UPDATE,
            3 => RecordType::COMMIT,
            4 => RecordType::ABORT,
            5 => RecordType::CHECKPOINT,
            _ => panic!("invalid record type: {}", value),
        }
    }
}

impl Encodeable for RecordType {
    fn encode(&self) -> Vec<u8> {
        (*self as u32).to_le_bytes().to_vec()
    }
}

impl Decodeable for RecordType {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        RecordType::from_u32(read_into(reader))
    }
}

/// The write-ahead log: one append-only file.
///
/// Layout: an 8-byte signed header holding the offset of the last
/// checkpoint record (−1 until one exists), then records back to back.
/// Every record is a 4-byte type tag, a type-specific payload, and an
/// 8-byte trailer repeating the record's own start offset, so a reader can
/// chain backwards and sanity-check boundaries.
///
/// - BEGIN / COMMIT / ABORT payload: `txid(8)`
/// - UPDATE payload: `txid(8) | page id(8) | before len(4) | after len(4)
///   | before image | after image`
/// - CHECKPOINT payload: `count(4) | count × (txid(8), first offset(8))`
///
/// The instance lives behind the database's log mutex; holding `&mut self`
/// here is what makes append+force atomic against other writers.
pub struct LogManager {
    /// Offset of each live transaction's BEGIN record. Entries are added
    /// when BEGIN is appended and dropped with the COMMIT/ABORT record;
    /// rollback and checkpoints read it.
    first_offset: HashMap<TransactionID, u64>,

    file: DbFile,

    /// The absolute position appends continue from.
    current_offset: u64,

    total_records: usize,
}

impl LogManager {
    /// Open (or create) the log at `file_path`. An existing file is left
    /// untouched until `recover` decides what it means.
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let mut file = DbFile::new(&file_path)
            .unwrap_or_else(|e| panic!("cannot open log file: {}", e));

        let size = file.get_size().unwrap_or_else(|e| panic!("io error: {}", e));
        if size > 0 {
            file.seek(SeekFrom::End(0))
                .unwrap_or_else(|e| panic!("io error: {}", e));
        }

        Self {
            first_offset: HashMap::new(),
            file,
            current_offset: size,
            total_records: 0,
        }
    }

    /// Truncate the log back to an empty header. Used by tests and by the
    /// recovery epilogue.
    pub fn reset(&mut self) {
        self.reset_file()
            .unwrap_or_else(|e| panic!("cannot reset log file: {}", e));
        self.total_records = 0;
    }

    pub fn records_count(&self) -> usize {
        self.total_records
    }

    fn reset_file(&mut self) -> DbResult {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write(&NO_CHECKPOINT)?;
        self.current_offset = self.file.get_current_position()?;
        self.first_offset.clear();
        Ok(())
    }

    /// Position the cursor for an append, writing the header first when
    /// the file is brand new. Reads (rollback, the debug dump) move the
    /// cursor, so appends never trust it.
    fn pre_append(&mut self) -> DbResult {
        self.total_records += 1;

        if self.file.get_size()? == 0 {
            self.file.seek(SeekFrom::Start(0))?;
            self.file.write(&NO_CHECKPOINT)?;
            self.current_offset = self.file.get_current_position()?;
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(self.current_offset))?;
        Ok(())
    }

    pub fn log_start(&mut self, tx: &Transaction) -> DbResult {
        self.pre_append()?;

        let start = self.current_offset;
        self.file.write(&RecordType::BEGIN)?;
        self.file.write(&tx.get_id())?;
        self.file.write(&start)?;

        self.first_offset.insert(tx.get_id(), start);
        self.current_offset = self.file.get_current_position()?;
        Ok(())
    }

    /// Append an UPDATE record carrying both full page images. The caller
    /// forces the log before the page itself goes to disk.
    pub fn log_update(
        &mut self,
        tid: TransactionID,
        pid: &PageId,
        before: &[u8],
        after: &[u8],
    ) -> DbResult {
        self.pre_append()?;

        let start = self.current_offset;
        self.file.write(&RecordType::UPDATE)?;
        self.file.write(&tid)?;
        self.file.write(pid)?;
        self.file.write(&(before.len() as u32))?;
        self.file.write(&(after.len() as u32))?;
        self.file.write_bytes(before)?;
        self.file.write_bytes(after)?;
        self.file.write(&start)?;

        self.current_offset = self.file.get_current_position()?;
        Ok(())
    }

    /// Append the COMMIT record and force the log. Once this returns the
    /// transaction is durable.
    pub fn log_commit(&mut self, tx: &Transaction) -> DbResult {
        self.pre_append()?;

        let start = self.current_offset;
        self.file.write(&RecordType::COMMIT)?;
        self.file.write(&tx.get_id())?;
        self.file.write(&start)?;

        self.current_offset = self.file.get_current_position()?;
        self.first_offset.remove(&tx.get_id());
        self.force()
    }

    /// Roll the transaction back, then seal it with a forced ABORT record.
    /// Must be called while the transaction still holds all its locks.
    pub fn log_abort(&mut self, tx: &Transaction, buffer_pool: &BufferPool) -> DbResult {
        // make the tail durable before trusting it for undo
        self.force()?;
        self.rollback(tx.get_id(), buffer_pool)?;

        self.pre_append()?;

        let start = self.current_offset;
        self.file.write(&RecordType::ABORT)?;
        self.file.write(&tx.get_id())?;
        self.file.write(&start)?;

        self.current_offset = self.file.get_current_position()?;
        self.first_offset.remove(&tx.get_id());
        self.force()
    }

    /// Write a checkpoint: force every dirty buffer (each flush logging
    /// its own UPDATE record first), append a CHECKPOINT record listing
    /// the transactions still in flight, and point the file header at it.
    /// The caller holds the log mutex, so no other writer can interleave.
    pub fn log_checkpoint(&mut self) -> DbResult {
        let buffer_pool = Database::buffer_pool();

        self.pre_append()?;
        self.force()?;

        buffer_pool.flush_all_pages(self)?;

        let start = self.current_offset;
        self.file.write(&RecordType::CHECKPOINT)?;
        self.file.write(&(self.first_offset.len() as u32))?;
        for (tid, first) in self.first_offset.iter().sorted() {
            self.file.write(tid)?;
            self.file.write(first)?;
        }
        self.file.write(&start)?;
        self.current_offset = self.file.get_current_position()?;

        // record the new anchor in the header, then make it all durable
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write(&(start as i64))?;
        self.file.seek(SeekFrom::Start(self.current_offset))?;
        self.force()?;

        debug!(
            "checkpoint at offset {}, {} active transactions",
            start,
            self.first_offset.len()
        );
        Ok(())
    }

    /// Flush OS buffers and fsync the log file.
    pub fn force(&mut self) -> DbResult {
        self.file.force()
    }

    /// Rollback the specified transaction, setting the state of any pages
    /// it updated to their pre-updated state.
    ///
    /// Must not be called on a transaction that has already committed.
    fn rollback(&mut self, tid: TransactionID, buffer_pool: &BufferPool) -> DbResult {
        match self.first_offset.get(&tid).copied() {
            Some(start) => self.undo_transaction(tid, start, buffer_pool),
            // a transaction with no BEGIN on record has nothing to undo
            None => Ok(()),
        }
    }

    /// Scan forward from `start` to the end of the log and write the
    /// before-image of every UPDATE belonging to `tid` back to its table
    /// file, dropping the page from the cache so later reads refetch the
    /// restored bytes.
    ///
    /// Other transactions' records are skipped: `tid` held exclusive locks
    /// on everything it wrote, so nobody else's images can overlap. When
    /// the same page appears several times the restores are idempotent,
    /// because the before-image of a page never changes between a
    /// transaction's first touch and its end.
    fn undo_transaction(
        &mut self,
        tid: TransactionID,
        start: u64,
        buffer_pool: &BufferPool,
    ) -> DbResult {
        let end = self.file.get_size()?;
        self.file.seek(SeekFrom::Start(start))?;

        while self.file.get_current_position()? < end {
            let record_type: RecordType = read_into(&mut self.file);
            match record_type {
                RecordType::BEGIN | RecordType::COMMIT | RecordType::ABORT => {
                    let _tid: u64 = read_into(&mut self.file);
                    let _trailer: u64 = read_into(&mut self.file);
                }
                RecordType::UPDATE => {
                    let owner: u64 = read_into(&mut self.file);
                    let pid: PageId = read_into(&mut self.file);
                    let before_len: u32 = read_into(&mut self.file);
                    let after_len: u32 = read_into(&mut self.file);

                    if owner == tid {
                        let before = read_exact(&mut self.file, before_len as usize);
                        self.file.seek(SeekFrom::Current(after_len as i64))?;
                        let _trailer: u64 = read_into(&mut self.file);

                        debug!("undo write of tx_{} on page {:?}", tid, pid);
                        write_page_to_disk(&pid, &before)?;
                        buffer_pool.discard_page(&pid);
                    } else {
                        self.file
                            .seek(SeekFrom::Current(before_len as i64 + after_len as i64))?;
                        let _trailer: u64 = read_into(&mut self.file);
                    }
                }
                RecordType::CHECKPOINT => {
                    let count: u32 = read_into(&mut self.file);
                    self.file.seek(SeekFrom::Current(count as i64 * 16))?;
                    let _trailer: u64 = read_into(&mut self.file);
                }
            }
        }

        Ok(())
    }

    /// Recover the database after an unclean shutdown: reinstall the
    /// updates of committed transactions and take back the updates of
    /// transactions that never finished.
    ///
    /// Called exactly once, before any transaction begins.
    ///
    /// 1. Anchor: read the header; when it points at a checkpoint, seed
    ///    the in-flight set from that record and scan from there,
    ///    otherwise scan the whole log.
    /// 2. Redo + analyze: walk forward once. Every after-image is
    ///    reinstalled unconditionally (the checkpoint forced all dirty
    ///    buffers, so pre-checkpoint state is already on disk); BEGIN
    ///    records grow the in-flight set, COMMIT records shrink it, and
    ///    an ABORT record undoes its transaction on the spot, since the
    ///    redo just reapplied writes that were rolled back before the
    ///    crash.
    /// 3. Undo: every transaction still in flight at the end of the log
    ///    is a loser; restore its before-images. Redo must finish first,
    ///    because loser updates interleave with winners' on other pages.
    ///
    /// Afterwards the log is reset to an empty header: every image it
    /// described now lives in the table files, and a stale loser must not
    /// be undone again in some later lifetime after new transactions
    /// overwrite its pages.
    pub fn recover(&mut self, buffer_pool: &BufferPool) -> DbResult {
        let size = self.file.get_size()?;
        if size == 0 {
            debug!("log file is empty, nothing to recover");
            return Ok(());
        }

        // step 1: locate the scan anchor
        self.file.seek(SeekFrom::Start(0))?;
        let last_checkpoint: i64 = read_into(&mut self.file);

        // in-flight transactions and their BEGIN offsets
        let mut active: HashMap<TransactionID, u64> = HashMap::new();

        if last_checkpoint != NO_CHECKPOINT {
            self.file.seek(SeekFrom::Start(last_checkpoint as u64))?;

            let record_type: RecordType = read_into(&mut self.file);
            if record_type != RecordType::CHECKPOINT {
                return Err(DbError::Log(format!(
                    "header points at offset {} but there is no checkpoint there",
                    last_checkpoint
                )));
            }

            let count: u32 = read_into(&mut self.file);
            for _ in 0..count {
                let tid: u64 = read_into(&mut self.file);
                let first: u64 = read_into(&mut self.file);
                active.insert(tid, first);
            }
            let _trailer: u64 = read_into(&mut self.file);
        }

        // step 2: redo forward from the anchor
        while self.file.get_current_position()? < size {
            let record_type: RecordType = read_into(&mut self.file);
            match record_type {
                RecordType::BEGIN => {
                    let tid: u64 = read_into(&mut self.file);
                    let start: u64 = read_into(&mut self.file);
                    active.insert(tid, start);
                }
                RecordType::UPDATE => {
                    let _tid: u64 = read_into(&mut self.file);
                    let pid: PageId = read_into(&mut self.file);
                    let before_len: u32 = read_into(&mut self.file);
                    let after_len: u32 = read_into(&mut self.file);

                    self.file.seek(SeekFrom::Current(before_len as i64))?;
                    let after = read_exact(&mut self.file, after_len as usize);
                    let _trailer: u64 = read_into(&mut self.file);

                    write_page_to_disk(&pid, &after)?;
                    buffer_pool.discard_page(&pid);
                }
                RecordType::COMMIT => {
                    let tid: u64 = read_into(&mut self.file);
                    let _trailer: u64 = read_into(&mut self.file);
                    active.remove(&tid);
                }
                RecordType::ABORT => {
                    let tid: u64 = read_into(&mut self.file);
                    let _trailer: u64 = read_into(&mut self.file);

                    if let Some(first) = active.remove(&tid) {
                        let resume = self.file.get_current_position()?;
                        self.undo_transaction(tid, first, buffer_pool)?;
                        self.file.seek(SeekFrom::Start(resume))?;
                    }
                }
                RecordType::CHECKPOINT => {
                    let count: u32 = read_into(&mut self.file);
                    self.file.seek(SeekFrom::Current(count as i64 * 16))?;
                    let _trailer: u64 = read_into(&mut self.file);
                }
            }
        }

        // step 3: undo the losers
        for (tid, first) in active.iter().sorted() {
            debug!("recovery undoes loser tx_{} from offset {}", tid, first);
            self.undo_transaction(*tid, *first, buffer_pool)?;
        }

        // step 4: start the next lifetime on a fresh log
        self.reset_file()?;
        self.force()?;
        Ok(())
    }

    /// Dump the whole log through `debug!`, for eyeballing test failures.
    pub fn show_log_contents(&mut self) {
        let original_offset = match self.file.get_current_position() {
            Ok(offset) => offset,
            Err(_) => return,
        };

        let mut depiction = String::new();
        if self.render_log_contents(&mut depiction).is_err() {
            depiction.push_str("...truncated record\n");
        }
        debug!("log content:\n{}", depiction);

        let _ = self.file.seek(SeekFrom::Start(original_offset));
    }

    fn render_log_contents(&mut self, out: &mut String) -> DbResult {
        let size = self.file.get_size()?;
        if size == 0 {
            out.push_str("(empty)\n");
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(0))?;
        let last_checkpoint: i64 = read_into(&mut self.file);
        if last_checkpoint == NO_CHECKPOINT {
            out.push_str("├── [8 bytes] no checkpoint\n");
        } else {
            out.push_str(&format!(
                "├── [8 bytes] last checkpoint: {}\n",
                last_checkpoint
            ));
        }

        while self.file.get_current_position()? < size {
            let offset = self.file.get_current_position()?;
            let record_type: RecordType = read_into(&mut self.file);
            out.push_str(&format!("├── {:?} at {}\n", record_type, offset));

            match record_type {
                RecordType::BEGIN | RecordType::COMMIT | RecordType::ABORT => {
                    let tid: u64 = read_into(&mut self.file);
                    let trailer: u64 = read_into(&mut self.file);
                    out.push_str(&format!(
                        "│   ├── tid: {}\n│   └── start offset: {}\n",
                        tid, trailer
                    ));
                }
                RecordType::UPDATE => {
                    let tid: u64 = read_into(&mut self.file);
                    let pid: PageId = read_into(&mut self.file);
                    let before_len: u32 = read_into(&mut self.file);
                    let after_len: u32 = read_into(&mut self.file);
                    let before = read_exact(&mut self.file, before_len as usize);
                    let after = read_exact(&mut self.file, after_len as usize);
                    let trailer: u64 = read_into(&mut self.file);
                    out.push_str(&format!(
                        "│   ├── tid: {}\n│   ├── pid: {:?}\n│   ├── [{} bytes] before: {}..\n│   ├── [{} bytes] after: {}..\n│   └── start offset: {}\n",
                        tid,
                        pid,
                        before.len(),
                        hex::encode(&before[..16.min(before.len())]),
                        after.len(),
                        hex::encode(&after[..16.min(after.len())]),
                        trailer
                    ));
                }
                RecordType::CHECKPOINT => {
                    let count: u32 = read_into(&mut self.file);
                    out.push_str(&format!("│   ├── active tx count: {}\n", count));
                    for _ in 0..count {
                        let tid: u64 = read_into(&mut self.file);
                        let first: u64 = read_into(&mut self.file);
                        out.push_str(&format!("│   │   ├── tx_{} from {}\n", tid, first));
                    }
                    let trailer: u64 = read_into(&mut self.file);
                    out.push_str(&format!("│   └── start offset: {}\n", trailer));
                }
            }
        }

        Ok(())
    }
}

/// Install a page image straight into the owning table's file, bypassing
/// the buffer pool. Only rollback and recovery write pages this way.
fn write_page_to_disk(pid: &PageId, bytes: &[u8]) -> DbResult {
    let table_rc = Database::catalog()
        .get_table(&pid.table_id)
        .ok_or_else(|| DbError::Page(format!("page {:?} belongs to no table", pid)))?;
    let table = table_rc.rl();
    table.write_page_to_disk(pid.page_index, bytes)
}
