use std::fmt;

use crate::io::{read_into, Decodeable, Encodeable};

/// Identifies a unique page: which table file it lives in and its position
/// inside that file, starting from 0.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub table_id: u32,
    pub page_index: u32,
}

impl PageId {
    pub fn new(table_id: u32, page_index: u32) -> Self {
        Self {
            table_id,
            page_index,
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}", self.table_id, self.page_index)
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// # Format
///
/// - 4 bytes: table id
/// - 4 bytes: page index
impl Encodeable for PageId {
    fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(&self.table_id.to_le_bytes());
        bytes.extend_from_slice(&self.page_index.to_le_bytes());
        bytes
    }
}

impl Decodeable for PageId {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let table_id = read_into(reader);
        let page_index = read_into(reader);
        Self {
            table_id,
            page_index,
        }
    }
}
