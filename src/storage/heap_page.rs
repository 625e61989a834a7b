use bit_vec::BitVec;

use crate::{
    error::DbError,
    io::Encodeable,
    storage::{
        buffer_pool::BufferPool,
        page_id::PageId,
        schema::Schema,
        tuple::{Tuple, WrappedTuple},
    },
    transaction::TransactionID,
    types::DbResult,
};

/// One cached page of a heap table.
///
/// Layout on disk: a slot-occupancy bitmap (one bit per slot, rounded up to
/// whole bytes) followed by the fixed-size tuple slots, zero-padded to the
/// page size.
///
/// Besides the live content the image carries two bookkeeping fields:
///
/// - `before_image`: the last committed bytes of this page. On entry to the
///   buffer pool it equals the bytes on disk; it only moves forward at
///   commit time.
/// - `dirty_by`: the transaction holding the most recent uncommitted
///   modification, absent while the page is clean.
#[derive(Debug)]
pub struct HeapPage {
    pid: PageId,
    schema: Schema,

    // indicate slots' status: true means occupied, false means empty
    header: BitVec,

    // all tuple slots, empty ones hold zeroed placeholders
    tuples: Vec<Tuple>,

    before_image: Vec<u8>,

    dirty_by: Option<TransactionID>,
}

impl HeapPage {
    pub fn new(pid: &PageId, bytes: &[u8], schema: &Schema) -> Result<Self, DbError> {
        let page_size = BufferPool::get_page_size();
        if bytes.len() != page_size {
            return Err(DbError::Page(format!(
                "page {:?} has {} bytes, expect {}",
                pid,
                bytes.len(),
                page_size
            )));
        }

        let slot_count = Self::slot_count(schema);
        let header_size = Self::header_size(schema);

        let header = BitVec::from_bytes(&bytes[..header_size]);

        let tuple_size = schema.get_size();
        let mut tuples = Vec::with_capacity(slot_count);
        for i in 0..slot_count {
            let start = header_size + i * tuple_size;
            let mut reader = &bytes[start..start + tuple_size];
            tuples.push(Tuple::read_from(&mut reader, schema));
        }

        Ok(Self {
            pid: *pid,
            schema: schema.clone(),
            header,
            tuples,
            before_image: bytes.to_vec(),
            dirty_by: None,
        })
    }

    /// How many tuples fit in one page: each slot costs its tuple bytes
    /// plus one header bit.
    pub fn slot_count(schema: &Schema) -> usize {
        let page_size = BufferPool::get_page_size();
        (page_size * 8) / (schema.get_size() * 8 + 1)
    }

    fn header_size(schema: &Schema) -> usize {
        (Self::slot_count(schema) + 7) / 8
    }

    pub fn get_pid(&self) -> PageId {
        self.pid
    }

    /// Serialize the current state to a full page image.
    pub fn get_page_data(&self) -> Vec<u8> {
        let page_size = BufferPool::get_page_size();
        let mut bytes = Vec::with_capacity(page_size);
        bytes.extend_from_slice(&self.header.to_bytes());
        for tuple in &self.tuples {
            bytes.extend_from_slice(&tuple.encode());
        }
        bytes.resize(page_size, 0);
        bytes
    }

    pub fn get_before_image(&self) -> Vec<u8> {
        self.before_image.clone()
    }

    /// Only called right after a commit-time flush, when the current bytes
    /// are known to be the committed version on disk.
    pub fn set_before_image(&mut self) {
        self.before_image = self.get_page_data();
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionID>) {
        self.dirty_by = tid;
    }

    pub fn is_dirty(&self) -> Option<TransactionID> {
        self.dirty_by
    }

    pub fn empty_slots_count(&self) -> usize {
        let slot_count = Self::slot_count(&self.schema);
        (0..slot_count)
            .filter(|i| !self.header.get(*i).unwrap_or(false))
            .count()
    }

    /// Put the tuple into the first empty slot, returning that slot.
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> Result<usize, DbError> {
        let slot_count = Self::slot_count(&self.schema);
        for i in 0..slot_count {
            if !self.header.get(i).unwrap_or(false) {
                self.header.set(i, true);
                self.tuples[i] = tuple.clone();
                return Ok(i);
            }
        }
        Err(DbError::Tuple(format!("page {:?} is full", self.pid)))
    }

    pub fn delete_tuple(&mut self, slot: usize) -> DbResult {
        if !self.header.get(slot).unwrap_or(false) {
            return Err(DbError::Tuple(format!(
                "slot {} of page {:?} is empty",
                slot, self.pid
            )));
        }
        self.header.set(slot, false);
        Ok(())
    }

    /// The occupied tuples of this page, each wrapped with its location.
    pub fn tuples(&self) -> Vec<WrappedTuple> {
        let slot_count = Self::slot_count(&self.schema);
        (0..slot_count)
            .filter(|i| self.header.get(*i).unwrap_or(false))
            .map(|i| WrappedTuple::new(self.tuples[i].clone(), i, self.pid))
            .collect()
    }
}

pub fn empty_page_data() -> Vec<u8> {
    vec![0; BufferPool::get_page_size()]
}
