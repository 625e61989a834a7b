use std::collections::HashMap;

use crate::{storage::heap_table::HeapTable, types::Pod, utils::HandyRwLock};

/// The table registry: read-mostly process-wide state, populated during
/// startup before any transaction runs. The storage core only needs it to
/// turn a page's table id back into the backing file.
pub struct Catalog {
    tables: HashMap<u32, Pod<HeapTable>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    pub fn add_table(&mut self, table: Pod<HeapTable>) {
        let table_id = table.rl().get_id();
        self.tables.insert(table_id, table);
    }

    pub fn get_table(&self, table_id: &u32) -> Option<Pod<HeapTable>> {
        self.tables.get(table_id).cloned()
    }

    pub fn search_table(&self, name: &str) -> Option<Pod<HeapTable>> {
        self.tables
            .values()
            .find(|t| t.rl().get_name() == name)
            .cloned()
    }

    pub fn tables_count(&self) -> usize {
        self.tables.len()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
