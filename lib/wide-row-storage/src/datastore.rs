//! Datastore traits implemented by backends.
//!
//! - `Datastore`: opens table handles and applies schema changes
//! - `TableHandle`: single-row reads and writes, plus a full-table scan

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::{ColumnAddress, Delete, Put, RowSnapshot, StorageError};

/// Table and column families a persistent type needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub families: BTreeSet<String>,
}

/// A column-family datastore.
///
/// Implementations must be safe to share between connections; each managed
/// connection opens its own handles through `open_table`.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    type Table: TableHandle;

    /// Open a handle to an existing table.
    async fn open_table(&self, name: &str) -> Result<Self::Table, StorageError>;

    /// Create the table if missing and add any listed family it lacks.
    async fn create_schema(&self, schema: &TableSchema) -> Result<(), StorageError>;
}

#[async_trait]
pub trait TableHandle: Clone + Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Read every cell of a row. An absent row yields an empty snapshot.
    async fn get(&self, row: &[u8]) -> Result<RowSnapshot, StorageError>;

    /// Every row of the table. Row order is the backend's key order.
    async fn scan(&self) -> Result<Vec<RowSnapshot>, StorageError>;

    /// Existence check that does not materialize the row.
    async fn exists(&self, row: &[u8]) -> Result<bool, StorageError>;

    /// Write all cells of `put` as one atomic single-row mutation.
    async fn put(&self, put: Put) -> Result<(), StorageError>;

    /// Remove the listed columns, or the whole row when none are listed.
    async fn delete(&self, delete: Delete) -> Result<(), StorageError>;

    /// Atomically add `amount` to a counter cell and return the new value.
    /// A missing cell counts from zero.
    async fn increment_column_value(
        &self,
        row: &[u8],
        column: &ColumnAddress,
        amount: i64,
    ) -> Result<i64, StorageError>;

    async fn close(&self) -> Result<(), StorageError>;
}
