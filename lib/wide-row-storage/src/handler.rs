//! Row operations for persistent objects.
//!
//! Each operation checks out exactly one pooled connection and releases it on
//! every path, including errors and cancellation. Nothing here retries;
//! that is left to the caller.

use std::sync::Arc;

use tracing::debug;

use crate::field_mapper::{FetchFieldMapper, InsertFieldMapper, referenced_objects};
use crate::identifier::{display_identifier, row_identifier};
use crate::{
    Datastore, Delete, ExecutionContext, ObjectProvider, Persistable, PooledConnection,
    StorageError, StoreManager, TableHandle, TypeDescriptor, Value, ValueStrategy,
};

pub struct PersistenceHandler<D: Datastore> {
    store: Arc<StoreManager<D>>,
}

impl<D: Datastore> Clone for PersistenceHandler<D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

/// Release the connection, then surface the operation's error first.
fn finish<D: Datastore, T>(
    connection: PooledConnection<D>,
    outcome: Result<T, StorageError>,
) -> Result<T, StorageError> {
    let released = connection.release();
    let value = outcome?;
    released?;
    Ok(value)
}

impl<D: Datastore> PersistenceHandler<D> {
    pub fn new(store: Arc<StoreManager<D>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<StoreManager<D>> {
        &self.store
    }

    /// Insert a new row holding every persistent field of `object`.
    ///
    /// Fails with `DuplicateIdentity` when a row with the same identifier
    /// already exists; that row is left untouched.
    pub async fn insert_object(
        &self,
        context: &dyn ExecutionContext,
        object: &dyn ObjectProvider,
    ) -> Result<(), StorageError> {
        let descriptor = self.managed(object).await?;
        self.store.assert_writable(context, &descriptor)?;

        let key = self.primary_key_value(&descriptor, object)?;
        let row = row_identifier(&descriptor, &key)?;

        let connection = self.store.connection().await?;
        let outcome = async {
            let table = connection.get_table(&descriptor.table).await?;
            if table.exists(&row).await? {
                return Err(StorageError::DuplicateIdentity(display_identifier(&key)));
            }

            let mut mapper = InsertFieldMapper::new(&descriptor, context);
            mapper
                .store_fields(object, &descriptor.all_positions())
                .await?;
            // A new row has nothing to clear, so only the additive half is sent.
            let (put, _) = mapper.into_intent().into_requests(&row);
            if let Some(put) = put {
                debug!(type_name = %descriptor.name, columns = put.cells.len(), "insert");
                table.put(put).await?;
            }
            Ok(())
        }
        .await;
        finish(connection, outcome)
    }

    /// Write the fields at `positions`. Cleared fields become column deletes;
    /// no delete is sent when nothing was cleared.
    pub async fn update_object(
        &self,
        context: &dyn ExecutionContext,
        object: &dyn ObjectProvider,
        positions: &[usize],
    ) -> Result<(), StorageError> {
        let descriptor = self.managed(object).await?;
        self.store.assert_writable(context, &descriptor)?;

        let key = self.primary_key_value(&descriptor, object)?;
        let row = row_identifier(&descriptor, &key)?;

        let connection = self.store.connection().await?;
        let outcome = async {
            let table = connection.get_table(&descriptor.table).await?;

            let mut mapper = InsertFieldMapper::new(&descriptor, context);
            mapper.store_fields(object, positions).await?;
            let (put, delete) = mapper.into_intent().into_requests(&row);
            debug!(
                type_name = %descriptor.name,
                puts = put.as_ref().map_or(0, |p| p.cells.len()),
                deletes = delete.as_ref().map_or(0, |d| d.columns.len()),
                "update"
            );
            if let Some(put) = put {
                table.put(put).await?;
            }
            if let Some(delete) = delete {
                table.delete(delete).await?;
            }
            Ok::<(), StorageError>(())
        }
        .await;
        finish(connection, outcome)
    }

    /// Delete the object's row. Cascade-owned related objects are deleted
    /// first, in the order they are found, and the owner row last.
    pub async fn delete_object(
        &self,
        context: &dyn ExecutionContext,
        object: &dyn ObjectProvider,
    ) -> Result<(), StorageError> {
        let descriptor = self.managed(object).await?;
        self.store.assert_writable(context, &descriptor)?;

        let key = self.primary_key_value(&descriptor, object)?;
        let row = row_identifier(&descriptor, &key)?;

        let connection = self.store.connection().await?;
        let outcome = async {
            let table = connection.get_table(&descriptor.table).await?;

            let cascades: Vec<_> = descriptor
                .fields
                .iter()
                .filter(|f| f.is_relation() && f.cascade_delete)
                .collect();
            if !cascades.is_empty() {
                let snapshot = table.get(&row).await?;
                let mapper = FetchFieldMapper::new(&descriptor, context, &snapshot);
                for field in cascades {
                    let value = mapper.fetch_field(field).await?;
                    for related in referenced_objects(&value) {
                        debug!(type_name = %descriptor.name, field = %field.name, related = %related.type_name, "cascade delete");
                        context.delete_object(&related).await?;
                    }
                }
            }

            debug!(type_name = %descriptor.name, "delete");
            table.delete(Delete::row(row.clone())).await
        }
        .await;
        finish(connection, outcome)
    }

    /// Load the fields at `positions` into `object`.
    pub async fn fetch_object(
        &self,
        context: &dyn ExecutionContext,
        object: &mut dyn ObjectProvider,
        positions: &[usize],
    ) -> Result<(), StorageError> {
        let descriptor = self.managed(&*object).await?;

        let key = self.primary_key_value(&descriptor, &*object)?;
        let row = row_identifier(&descriptor, &key)?;

        let connection = self.store.connection().await?;
        let outcome = async {
            let table = connection.get_table(&descriptor.table).await?;
            let snapshot = table.get(&row).await?;
            if snapshot.is_empty() {
                return Err(StorageError::NotFound(format!(
                    "{} with id {}",
                    descriptor.name,
                    display_identifier(&key)
                )));
            }

            debug!(type_name = %descriptor.name, fields = positions.len(), "fetch");
            FetchFieldMapper::new(&descriptor, context, &snapshot)
                .fetch_fields(object, positions)
                .await
        }
        .await;
        finish(connection, outcome)
    }

    /// Every stored object of type `T`, with all fields loaded.
    ///
    /// Rows without a primary-key cell, such as a sequence counter kept in
    /// the same table, are skipped.
    pub async fn fetch_extent<T>(&self, context: &dyn ExecutionContext) -> Result<Vec<T>, StorageError>
    where
        T: Persistable + Default,
    {
        let template = T::default();
        let descriptor = self.managed(&template).await?;
        let key_column = descriptor.primary_key()?.column.clone();
        let positions = descriptor.all_positions();

        let connection = self.store.connection().await?;
        let outcome = async {
            let table = connection.get_table(&descriptor.table).await?;
            let rows = table.scan().await?;
            let mut objects = Vec::with_capacity(rows.len());
            for snapshot in rows.iter().filter(|row| row.value(&key_column).is_some()) {
                let mut object = T::default();
                FetchFieldMapper::new(&descriptor, context, snapshot)
                    .fetch_fields(&mut object, &positions)
                    .await?;
                objects.push(object);
            }
            debug!(type_name = %descriptor.name, rows = rows.len(), objects = objects.len(), "fetch extent");
            Ok::<_, StorageError>(objects)
        }
        .await;
        finish(connection, outcome)
    }

    /// Whether a row exists for the object's identifier.
    pub async fn locate_object(&self, object: &dyn ObjectProvider) -> Result<bool, StorageError> {
        let descriptor = self.managed(object).await?;
        let key = self.primary_key_value(&descriptor, object)?;
        let row = row_identifier(&descriptor, &key)?;

        let connection = self.store.connection().await?;
        let outcome = async {
            let table = connection.get_table(&descriptor.table).await?;
            table.exists(&row).await
        }
        .await;
        finish(connection, outcome)
    }

    /// Row key the object is stored under.
    pub fn identity_of(&self, object: &dyn ObjectProvider) -> Result<Vec<u8>, StorageError> {
        let descriptor = self.store.describe(object)?;
        let key = self.primary_key_value(&descriptor, object)?;
        row_identifier(&descriptor, &key)
    }

    /// Fill an unset generated primary key. Returns whether a value was
    /// assigned; keys that already hold a value are left alone.
    pub async fn assign_identity(&self, object: &mut dyn ObjectProvider) -> Result<bool, StorageError> {
        let descriptor = self.managed(&*object).await?;
        let key_field = descriptor.primary_key()?;
        let Some(strategy) = key_field.value_strategy else {
            return Ok(false);
        };

        let current = object.provide_field(key_field.position)?;
        let unset = matches!(current, Value::Null | Value::Long(0))
            || matches!(&current, Value::String(s) if s.is_empty());
        if !unset {
            return Ok(false);
        }

        let generated = match strategy {
            ValueStrategy::Sequence { .. } => {
                Value::Long(self.store.sequence_for(&descriptor).next().await?)
            }
            ValueStrategy::Uuid => Value::String(self.store.uuids().next()),
        };
        debug!(type_name = %descriptor.name, key = ?generated, "assigned identity");
        object.replace_field(key_field.position, generated)?;
        Ok(true)
    }

    /// Validated metadata for the object's type, with its schema ensured.
    async fn managed(
        &self,
        object: &dyn ObjectProvider,
    ) -> Result<Arc<TypeDescriptor>, StorageError> {
        let descriptor = self.store.describe(object)?;
        self.store.add_class(&descriptor).await?;
        Ok(descriptor)
    }

    fn primary_key_value(
        &self,
        descriptor: &TypeDescriptor,
        object: &dyn ObjectProvider,
    ) -> Result<Value, StorageError> {
        let key_field = descriptor.primary_key()?;
        object.provide_field(key_field.position)
    }
}
