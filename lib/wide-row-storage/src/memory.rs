//! In-memory column-family datastore.
//!
//! Rows are kept per table as `row -> column -> bytes`. Operation counters
//! make the request pattern observable to callers, e.g. to check that no
//! whole-row delete was issued by an update.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::{
    ColumnAddress, Datastore, Delete, Put, RowSnapshot, StorageError, TableHandle, TableSchema,
};

type Rows = BTreeMap<Vec<u8>, BTreeMap<ColumnAddress, Vec<u8>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub puts: u64,
    pub column_deletes: u64,
    pub row_deletes: u64,
    pub opens: u64,
    pub closes: u64,
}

#[derive(Default)]
struct MemoryTableData {
    families: BTreeSet<String>,
    rows: Rows,
}

#[derive(Default)]
struct Shared {
    tables: RwLock<HashMap<String, Arc<RwLock<MemoryTableData>>>>,
    stats: Mutex<MemoryStats>,
    failing_closes: Mutex<HashSet<String>>,
}

#[derive(Clone, Default)]
pub struct MemoryDatastore {
    shared: Arc<Shared>,
    strict: bool,
}

impl MemoryDatastore {
    /// Tables are created on first open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables must exist (via `create_schema`) before they can be opened.
    pub fn strict() -> Self {
        Self {
            shared: Arc::default(),
            strict: true,
        }
    }

    pub fn stats(&self) -> MemoryStats {
        *self.shared.stats.lock()
    }

    /// Make every later `close` of handles for `table` fail.
    pub fn fail_close_for(&self, table: &str) {
        self.shared.failing_closes.lock().insert(table.to_string());
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.shared.tables.read().contains_key(table)
    }

    pub fn families(&self, table: &str) -> BTreeSet<String> {
        self.shared
            .tables
            .read()
            .get(table)
            .map(|t| t.read().families.clone())
            .unwrap_or_default()
    }

    /// Raw cells of one row, for assertions.
    pub fn row(&self, table: &str, row: &[u8]) -> Option<BTreeMap<ColumnAddress, Vec<u8>>> {
        let tables = self.shared.tables.read();
        let data = tables.get(table)?.read();
        data.rows.get(row).cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.shared
            .tables
            .read()
            .get(table)
            .map(|t| t.read().rows.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    type Table = MemoryTable;

    async fn open_table(&self, name: &str) -> Result<MemoryTable, StorageError> {
        let data = {
            let existing = self.shared.tables.read().get(name).cloned();
            match existing {
                Some(data) => data,
                None if self.strict => {
                    return Err(StorageError::datastore_message(format!(
                        "table {} does not exist",
                        name
                    )));
                }
                None => self
                    .shared
                    .tables
                    .write()
                    .entry(name.to_string())
                    .or_default()
                    .clone(),
            }
        };
        self.shared.stats.lock().opens += 1;
        Ok(MemoryTable {
            name: name.to_string(),
            data,
            shared: self.shared.clone(),
        })
    }

    async fn create_schema(&self, schema: &TableSchema) -> Result<(), StorageError> {
        let data = self
            .shared
            .tables
            .write()
            .entry(schema.table.clone())
            .or_default()
            .clone();
        data.write().families.extend(schema.families.iter().cloned());
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryTable {
    name: String,
    data: Arc<RwLock<MemoryTableData>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl TableHandle for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, row: &[u8]) -> Result<RowSnapshot, StorageError> {
        let cells = self.data.read().rows.get(row).cloned().unwrap_or_default();
        Ok(RowSnapshot {
            row: row.to_vec(),
            cells,
        })
    }

    async fn scan(&self) -> Result<Vec<RowSnapshot>, StorageError> {
        let rows = self
            .data
            .read()
            .rows
            .iter()
            .map(|(row, cells)| RowSnapshot {
                row: row.clone(),
                cells: cells.clone(),
            })
            .collect();
        Ok(rows)
    }

    async fn exists(&self, row: &[u8]) -> Result<bool, StorageError> {
        Ok(self.data.read().rows.contains_key(row))
    }

    async fn put(&self, put: Put) -> Result<(), StorageError> {
        {
            let mut data = self.data.write();
            data.rows.entry(put.row).or_default().extend(put.cells);
        }
        self.shared.stats.lock().puts += 1;
        Ok(())
    }

    async fn delete(&self, delete: Delete) -> Result<(), StorageError> {
        let whole_row = delete.is_whole_row();
        {
            let mut data = self.data.write();
            if whole_row {
                data.rows.remove(&delete.row);
            } else if let Some(cells) = data.rows.get_mut(&delete.row) {
                for column in &delete.columns {
                    cells.remove(column);
                }
                if cells.is_empty() {
                    data.rows.remove(&delete.row);
                }
            }
        }
        let mut stats = self.shared.stats.lock();
        if whole_row {
            stats.row_deletes += 1;
        } else {
            stats.column_deletes += 1;
        }
        Ok(())
    }

    async fn increment_column_value(
        &self,
        row: &[u8],
        column: &ColumnAddress,
        amount: i64,
    ) -> Result<i64, StorageError> {
        let mut data = self.data.write();
        let cells = data.rows.entry(row.to_vec()).or_default();
        let current = match cells.get(column) {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::decode(column.to_string(), "counter cell is not 8 bytes")
                })?;
                i64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current.wrapping_add(amount);
        cells.insert(column.clone(), next.to_be_bytes().to_vec());
        Ok(next)
    }

    async fn close(&self) -> Result<(), StorageError> {
        if self.shared.failing_closes.lock().contains(&self.name) {
            return Err(StorageError::datastore_message(format!(
                "close failed for table {}",
                self.name
            )));
        }
        self.shared.stats.lock().closes += 1;
        Ok(())
    }
}
