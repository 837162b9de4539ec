use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use fjall::{PartitionHandle, PersistMode};
use tracing::trace;
use wide_row_storage::{ColumnAddress, Delete, Put, RowSnapshot, StorageError, TableHandle};

use crate::{Inner, keys};

/// Handle to one table partition.
#[derive(Clone)]
pub struct FjallTable {
    name: Arc<str>,
    partition: PartitionHandle,
    inner: Arc<Inner>,
}

impl FjallTable {
    pub(crate) fn new(name: &str, partition: PartitionHandle, inner: Arc<Inner>) -> Self {
        Self {
            name: Arc::from(name),
            partition,
            inner,
        }
    }

    fn require_family(&self, family: &str) -> Result<(), StorageError> {
        if family.len() <= keys::MAX_FAMILY_LEN && self.inner.has_family(&self.name, family)? {
            Ok(())
        } else {
            Err(StorageError::datastore_message(format!(
                "column family {} does not exist in table {}",
                family, self.name
            )))
        }
    }

    fn row_keys(&self, row: &[u8]) -> Result<Vec<Vec<u8>>, StorageError> {
        self.partition
            .prefix(keys::row_prefix(row))
            .map(|entry| {
                entry
                    .map(|(key, _)| key.to_vec())
                    .map_err(|e| self.read_error(e))
            })
            .collect()
    }

    fn read_error(&self, e: fjall::Error) -> StorageError {
        StorageError::datastore(format!("failed to read table {}", self.name), e)
    }

    fn write_error(&self, e: fjall::Error) -> StorageError {
        StorageError::datastore(format!("failed to write table {}", self.name), e)
    }
}

#[async_trait]
impl TableHandle for FjallTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, row: &[u8]) -> Result<RowSnapshot, StorageError> {
        let mut cells = BTreeMap::new();
        for entry in self.partition.prefix(keys::row_prefix(row)) {
            let (key, value) = entry.map_err(|e| self.read_error(e))?;
            let column = keys::cell_column(row, &key).ok_or_else(|| {
                StorageError::datastore_message(format!(
                    "malformed cell key in table {}",
                    self.name
                ))
            })?;
            cells.insert(column, value.to_vec());
        }
        Ok(RowSnapshot {
            row: row.to_vec(),
            cells,
        })
    }

    async fn scan(&self) -> Result<Vec<RowSnapshot>, StorageError> {
        let mut rows: Vec<RowSnapshot> = Vec::new();
        for entry in self.partition.iter() {
            let (key, value) = entry.map_err(|e| self.read_error(e))?;
            let (row, column) = keys::split_cell_key(&key).ok_or_else(|| {
                StorageError::datastore_message(format!(
                    "malformed cell key in table {}",
                    self.name
                ))
            })?;
            // A row's cells are contiguous, so a new row starts a new snapshot.
            match rows.last_mut() {
                Some(current) if current.row == row => {
                    current.cells.insert(column, value.to_vec());
                }
                _ => {
                    let mut snapshot = RowSnapshot::empty(row.to_vec());
                    snapshot.cells.insert(column, value.to_vec());
                    rows.push(snapshot);
                }
            }
        }
        trace!(table = %self.name, rows = rows.len(), "scan");
        Ok(rows)
    }

    async fn exists(&self, row: &[u8]) -> Result<bool, StorageError> {
        match self.partition.prefix(keys::row_prefix(row)).next() {
            Some(entry) => entry.map(|_| true).map_err(|e| self.read_error(e)),
            None => Ok(false),
        }
    }

    async fn put(&self, put: Put) -> Result<(), StorageError> {
        for column in put.cells.keys() {
            self.require_family(&column.family)?;
        }

        let mut batch = self.inner.keyspace.batch();
        for (column, value) in &put.cells {
            batch.insert(
                &self.partition,
                keys::cell_key(&put.row, column),
                value.clone(),
            );
        }
        batch.commit().map_err(|e| self.write_error(e))?;
        trace!(table = %self.name, cells = put.cells.len(), "put");
        Ok(())
    }

    async fn delete(&self, delete: Delete) -> Result<(), StorageError> {
        let targets = if delete.is_whole_row() {
            self.row_keys(&delete.row)?
        } else {
            for column in &delete.columns {
                self.require_family(&column.family)?;
            }
            delete
                .columns
                .iter()
                .map(|column| keys::cell_key(&delete.row, column))
                .collect()
        };

        let mut batch = self.inner.keyspace.batch();
        for key in targets {
            batch.remove(&self.partition, key);
        }
        batch.commit().map_err(|e| self.write_error(e))?;
        trace!(table = %self.name, whole_row = delete.is_whole_row(), "delete");
        Ok(())
    }

    async fn increment_column_value(
        &self,
        row: &[u8],
        column: &ColumnAddress,
        amount: i64,
    ) -> Result<i64, StorageError> {
        self.require_family(&column.family)?;
        let key = keys::cell_key(row, column);

        let _guard = self.inner.counters.lock();
        let current = match self.partition.get(&key).map_err(|e| self.read_error(e))? {
            Some(bytes) => {
                let raw = <[u8; 8]>::try_from(&bytes[..]).map_err(|_| {
                    StorageError::decode(column.to_string(), "counter cell is not 8 bytes")
                })?;
                i64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current.wrapping_add(amount);
        self.partition
            .insert(key, next.to_be_bytes())
            .map_err(|e| self.write_error(e))?;
        Ok(next)
    }

    /// Handles share the keyspace, so closing one only flushes the journal.
    async fn close(&self) -> Result<(), StorageError> {
        self.inner
            .keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| self.write_error(e))?;
        trace!(table = %self.name, "closed table handle");
        Ok(())
    }
}
