//! fjall implementation for wide-row-storage.
//!
//! Each table is a fjall partition. A cell is stored under a composite key of
//! row, family and qualifier, so one row is a contiguous key range and a row
//! read is a prefix scan. Column families are recorded per table in a schema
//! partition; writes to an unknown family are rejected.
//!
//! # Example
//!
//! ```text
//! let datastore = FjallDatastore::open("/var/lib/app/rows")?;
//! let store = StoreManager::open(datastore, StoreConfig::new().auto_create_schema(true))?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod keys;
mod table;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use parking_lot::Mutex;
use tracing::{debug, info};

pub use table::FjallTable;

// Re-export core types for convenience
pub use wide_row_storage::{Datastore, StorageError, TableHandle, TableSchema};

const SCHEMA_PARTITION: &str = "__schema__";

pub(crate) struct Inner {
    keyspace: Keyspace,
    schema: PartitionHandle,
    /// Serializes read-modify-write counter updates.
    counters: Mutex<()>,
}

/// Column-family datastore on an fjall keyspace.
#[derive(Clone)]
pub struct FjallDatastore {
    inner: Arc<Inner>,
}

/// Partition names are limited to ASCII alphanumerics and `_ - . # $`.
fn check_table_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name.len() <= 255
        && name != SCHEMA_PARTITION
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '#' | '$'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::Usage(format!(
            "table name {:?} is not a valid partition name",
            name
        )))
    }
}

/// Family names must fit the two-byte length in a cell key.
fn check_family_name(table: &str, family: &str) -> Result<(), StorageError> {
    if family.len() <= keys::MAX_FAMILY_LEN {
        Ok(())
    } else {
        Err(StorageError::Usage(format!(
            "column family name in table {} is {} bytes, the limit is {}",
            table,
            family.len(),
            keys::MAX_FAMILY_LEN
        )))
    }
}

impl FjallDatastore {
    /// Open or create a keyspace at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        info!(path = ?path, "opening fjall datastore");
        let keyspace = Config::new(path)
            .open()
            .map_err(|e| StorageError::datastore("failed to open keyspace", e))?;
        let schema = keyspace
            .open_partition(SCHEMA_PARTITION, PartitionCreateOptions::default())
            .map_err(|e| StorageError::datastore("failed to open schema partition", e))?;
        Ok(Self {
            inner: Arc::new(Inner {
                keyspace,
                schema,
                counters: Mutex::new(()),
            }),
        })
    }

    pub fn has_table(&self, table: &str) -> bool {
        check_table_name(table).is_ok() && self.inner.keyspace.partition_exists(table)
    }

    /// Column families registered for `table`.
    pub fn families(&self, table: &str) -> Result<BTreeSet<String>, StorageError> {
        self.inner.families(table)
    }

    /// Flush the journal to disk.
    pub fn persist(&self) -> Result<(), StorageError> {
        self.inner
            .keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| StorageError::datastore("failed to persist keyspace", e))
    }
}

impl Inner {
    pub(crate) fn families(&self, table: &str) -> Result<BTreeSet<String>, StorageError> {
        let mut families = BTreeSet::new();
        for entry in self.schema.prefix(keys::schema_prefix(table)) {
            let (key, _) =
                entry.map_err(|e| StorageError::datastore("failed to read schema", e))?;
            if let Some(family) = keys::schema_family(table, &key) {
                families.insert(family);
            }
        }
        Ok(families)
    }

    pub(crate) fn has_family(&self, table: &str, family: &str) -> Result<bool, StorageError> {
        self.schema
            .contains_key(keys::schema_key(table, family))
            .map_err(|e| StorageError::datastore("failed to read schema", e))
    }
}

#[async_trait]
impl Datastore for FjallDatastore {
    type Table = FjallTable;

    async fn open_table(&self, name: &str) -> Result<FjallTable, StorageError> {
        check_table_name(name)?;
        if !self.inner.keyspace.partition_exists(name) {
            return Err(StorageError::datastore_message(format!(
                "table {} does not exist",
                name
            )));
        }
        let partition = self
            .inner
            .keyspace
            .open_partition(name, PartitionCreateOptions::default())
            .map_err(|e| StorageError::datastore(format!("failed to open table {}", name), e))?;
        debug!(table = name, "opened table");
        Ok(FjallTable::new(name, partition, self.inner.clone()))
    }

    async fn create_schema(&self, schema: &TableSchema) -> Result<(), StorageError> {
        check_table_name(&schema.table)?;
        for family in &schema.families {
            check_family_name(&schema.table, family)?;
        }
        self.inner
            .keyspace
            .open_partition(&schema.table, PartitionCreateOptions::default())
            .map_err(|e| {
                StorageError::datastore(format!("failed to create table {}", schema.table), e)
            })?;

        let mut batch = self.inner.keyspace.batch();
        for family in &schema.families {
            batch.insert(
                &self.inner.schema,
                keys::schema_key(&schema.table, family),
                Vec::<u8>::new(),
            );
        }
        batch
            .commit()
            .map_err(|e| StorageError::datastore("failed to record column families", e))?;
        debug!(table = %schema.table, families = schema.families.len(), "created schema");
        Ok(())
    }
}
