use std::fmt;

use crate::{
    io::{read_into, Encodeable},
    storage::{
        page_id::PageId,
        schema::{Schema, Type},
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int64(i64),
}

impl Encodeable for Cell {
    fn encode(&self) -> Vec<u8> {
        match self {
            Cell::Int64(v) => v.encode(),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct Tuple {
    cells: Vec<Cell>,
}

impl Tuple {
    pub fn read_from<R: std::io::Read>(reader: &mut R, schema: &Schema) -> Self {
        let mut cells: Vec<Cell> = Vec::new();
        for field in &schema.fields {
            match field.t {
                Type::Int64 => {
                    cells.push(Cell::Int64(read_into(reader)));
                }
            }
        }
        Tuple { cells }
    }

    /// A tuple of `width` Int64 cells, all holding `value`.
    pub fn new_int_tuples(value: i64, width: usize) -> Self {
        let cells = vec![Cell::Int64(value); width];
        Tuple { cells }
    }

    pub fn get_cell(&self, i: usize) -> Cell {
        self.cells[i].clone()
    }

    pub fn get_width(&self) -> usize {
        self.cells.len()
    }
}

impl Encodeable for Tuple {
    fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for cell in &self.cells {
            bytes.append(&mut cell.encode());
        }
        bytes
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content: Vec<String> = self.cells.iter().map(|c| format!("{:?}", c)).collect();
        write!(f, "{{{}}}", content.join(", "))
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// A tuple together with the slot it came from, so callers can hand it back
/// to `delete_tuple`.
#[derive(Clone, PartialEq)]
pub struct WrappedTuple {
    internal: Tuple,
    slot: usize,
    pid: PageId,
}

impl std::ops::Deref for WrappedTuple {
    type Target = Tuple;
    fn deref(&self) -> &Self::Target {
        &self.internal
    }
}

impl WrappedTuple {
    pub fn new(internal: Tuple, slot: usize, pid: PageId) -> Self {
        Self {
            internal,
            slot,
            pid,
        }
    }

    pub fn get_slot(&self) -> usize {
        self.slot
    }

    pub fn get_pid(&self) -> PageId {
        self.pid
    }
}

impl Eq for WrappedTuple {}

impl fmt::Display for WrappedTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{:?}/{}", self.internal, self.pid, self.slot)
    }
}

impl fmt::Debug for WrappedTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
