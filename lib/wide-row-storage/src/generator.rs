//! Primary-key value generators.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::{ColumnAddress, ConnectionPool, Datastore, StorageError, TableHandle};

const DEFAULT_SEQUENCE_NAME: &str = "__sequence__";

/// Where a sequence counter lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceConfig {
    pub table: String,
    pub family: String,
    pub qualifier: String,
    pub name: String,
    /// Appended to the counter row key, e.g. to isolate test runs.
    pub postfix: String,
    pub allocation_size: i64,
}

impl SequenceConfig {
    /// Counter stored in `table`, family named after the table.
    pub fn for_table(table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            family: table.clone(),
            table,
            qualifier: DEFAULT_SEQUENCE_NAME.to_string(),
            name: DEFAULT_SEQUENCE_NAME.to_string(),
            postfix: String::new(),
            allocation_size: 1,
        }
    }

    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.family = family.into();
        self
    }

    pub fn qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn postfix(mut self, postfix: impl Into<String>) -> Self {
        self.postfix = postfix.into();
        self
    }

    pub fn allocation_size(mut self, size: i64) -> Self {
        self.allocation_size = size;
        self
    }

    fn row(&self) -> Vec<u8> {
        format!("{}{}", self.name, self.postfix).into_bytes()
    }

    fn column(&self) -> ColumnAddress {
        ColumnAddress::new(self.family.clone(), self.qualifier.clone())
    }
}

/// Hands out `i64` ids from blocks reserved with an atomic counter
/// increment.
pub struct SequenceGenerator<D: Datastore> {
    pool: Arc<ConnectionPool<D>>,
    config: SequenceConfig,
    reserved: Mutex<VecDeque<i64>>,
}

impl<D: Datastore> SequenceGenerator<D> {
    pub fn new(pool: Arc<ConnectionPool<D>>, config: SequenceConfig) -> Self {
        Self {
            pool,
            config,
            reserved: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Reserve `size` ids. When the counter moves to `max`, the block is
    /// `max - size + 1 ..= max`.
    pub async fn reserve_block(&self, size: i64) -> Result<Vec<i64>, StorageError> {
        if size <= 0 {
            return Err(StorageError::Usage(format!(
                "sequence block size must be positive, got {}",
                size
            )));
        }

        let connection = self.pool.get().await?;
        let reserved = async {
            let table = connection.get_table(&self.config.table).await?;
            table
                .increment_column_value(&self.config.row(), &self.config.column(), size)
                .await
        }
        .await;
        let released = connection.release();
        let max = reserved?;
        released?;

        debug!(sequence = %self.config.name, max, size, "reserved sequence block");
        Ok((max - size + 1..=max).collect())
    }

    /// Next id, reserving a new block when the current one is used up.
    pub async fn next(&self) -> Result<i64, StorageError> {
        if let Some(id) = self.reserved.lock().pop_front() {
            return Ok(id);
        }
        let mut block = self.reserve_block(self.config.allocation_size).await?;
        let first = block.remove(0);
        self.reserved.lock().extend(block);
        Ok(first)
    }
}

/// Random v4 UUID strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl UuidGenerator {
    pub fn next(&self) -> String {
        Uuid::new_v4().to_string()
    }

    pub fn reserve_block(&self, size: usize) -> Vec<String> {
        (0..size).map(|_| self.next()).collect()
    }
}
