//! Field-by-field translation between objects and rows.
//!
//! [`InsertFieldMapper`] turns field values into a [`MutationIntent`];
//! [`FetchFieldMapper`] reads fields back out of a [`RowSnapshot`]. Both
//! route relation fields through the [`ExecutionContext`] so only
//! identifiers are ever stored.

use tracing::warn;

use crate::codec::{decode_generic, decode_value, encode_generic, encode_value};
use crate::{
    CollectionKind, ExecutionContext, FieldDescriptor, FieldType, MutationIntent, ObjectProvider,
    ObjectRef, RowSnapshot, StorageError, TypeDescriptor, Value,
};

pub struct InsertFieldMapper<'a> {
    descriptor: &'a TypeDescriptor,
    context: &'a dyn ExecutionContext,
    intent: MutationIntent,
}

impl<'a> InsertFieldMapper<'a> {
    pub fn new(descriptor: &'a TypeDescriptor, context: &'a dyn ExecutionContext) -> Self {
        Self {
            descriptor,
            context,
            intent: MutationIntent::new(),
        }
    }

    pub async fn store_fields(
        &mut self,
        object: &dyn ObjectProvider,
        positions: &[usize],
    ) -> Result<(), StorageError> {
        for &position in positions {
            let field = self.descriptor.field(position)?;
            let value = object.provide_field(position)?;
            self.store_field(field, value).await?;
        }
        Ok(())
    }

    /// Null clears the column; anything else is encoded into the additive set.
    pub async fn store_field(
        &mut self,
        field: &FieldDescriptor,
        value: Value,
    ) -> Result<(), StorageError> {
        if value.is_null() {
            self.intent.delete(field.column.clone());
            return Ok(());
        }

        let bytes = if field.is_relation() {
            let identifiers = self.resolve_relation(value).await?;
            encode_generic(&identifiers)?
        } else {
            encode_value(field.field_type, &value)?
        };
        self.intent.put(field.column.clone(), bytes);
        Ok(())
    }

    pub fn into_intent(self) -> MutationIntent {
        self.intent
    }

    /// Persist every referenced object and swap it for its identifier.
    /// To-many relations become an ordered list of identifiers; maps keep
    /// their entries in key order.
    async fn resolve_relation(&self, value: Value) -> Result<Value, StorageError> {
        match value {
            Value::Collection(_, items) => {
                let mut identifiers = Vec::with_capacity(items.len());
                for item in items {
                    identifiers.push(self.resolve_one(item).await?);
                }
                Ok(Value::Collection(CollectionKind::List, identifiers))
            }
            Value::Map(entries) => {
                let mut resolved = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    resolved.push((self.resolve_one(key).await?, self.resolve_one(value).await?));
                }
                Ok(Value::sorted_map(resolved))
            }
            other => self.resolve_one(other).await,
        }
    }

    async fn resolve_one(&self, value: Value) -> Result<Value, StorageError> {
        match value {
            Value::Object(object) => self.context.persist_or_fetch(&object).await,
            other => Ok(other),
        }
    }
}

pub struct FetchFieldMapper<'a> {
    descriptor: &'a TypeDescriptor,
    context: &'a dyn ExecutionContext,
    snapshot: &'a RowSnapshot,
}

impl<'a> FetchFieldMapper<'a> {
    pub fn new(
        descriptor: &'a TypeDescriptor,
        context: &'a dyn ExecutionContext,
        snapshot: &'a RowSnapshot,
    ) -> Self {
        Self {
            descriptor,
            context,
            snapshot,
        }
    }

    pub async fn fetch_fields(
        &self,
        object: &mut dyn ObjectProvider,
        positions: &[usize],
    ) -> Result<(), StorageError> {
        for &position in positions {
            let field = self.descriptor.field(position)?;
            let value = self.fetch_field(field).await?;
            object.replace_field(position, value)?;
        }
        Ok(())
    }

    /// Decode one field. A missing column is "no value": `Null`, or an empty
    /// container for to-many relations.
    pub async fn fetch_field(&self, field: &FieldDescriptor) -> Result<Value, StorageError> {
        let column = field.column.to_string();
        let Some(bytes) = self.snapshot.value(&field.column) else {
            return Ok(if field.is_relation() {
                field.field_type.empty_value()
            } else {
                Value::Null
            });
        };

        if !field.is_relation() {
            return decode_value(field.field_type, &column, bytes);
        }

        let identifiers = decode_generic(&column, bytes)?;
        self.materialize_relation(field, identifiers).await
    }

    async fn materialize_relation(
        &self,
        field: &FieldDescriptor,
        identifiers: Value,
    ) -> Result<Value, StorageError> {
        match (field.field_type, identifiers) {
            (FieldType::Map, Value::Map(entries)) => {
                let mut objects = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.materialize_one(key, field.key_target_type.as_deref()).await?;
                    let value = self.materialize_one(value, field.target_type.as_deref()).await?;
                    objects.push((key, value));
                }
                Ok(Value::sorted_map(objects))
            }
            (field_type, Value::Collection(_, ids)) => {
                let kind = match field_type {
                    FieldType::Collection(kind) => kind,
                    _ => CollectionKind::List,
                };
                let target = Some(self.target_of(field)?);
                let mut objects = Vec::with_capacity(ids.len());
                for id in ids {
                    objects.push(self.materialize_one(id, target).await?);
                }
                Ok(Value::Collection(kind, kind.normalize(objects)))
            }
            (_, id) => {
                let target = self.target_of(field)?;
                self.materialize_one(id, Some(target)).await
            }
        }
    }

    async fn materialize_one(&self, id: Value, target: Option<&str>) -> Result<Value, StorageError> {
        match (target, id) {
            (_, Value::Null) => Ok(Value::Null),
            (Some(target), id) => Ok(Value::Object(self.context.materialize(&id, target).await?)),
            (None, value) => Ok(value),
        }
    }

    fn target_of<'f>(&self, field: &'f FieldDescriptor) -> Result<&'f str, StorageError> {
        field.target_type.as_deref().ok_or_else(|| {
            StorageError::validation(
                &self.descriptor.name,
                Some(field.name.as_str()),
                "Relation field has no target type",
            )
        })
    }
}

/// Every object a relation value refers to, in discovery order.
pub fn referenced_objects(value: &Value) -> Vec<ObjectRef> {
    let mut objects = Vec::new();
    match value {
        Value::Object(object) => objects.push(object.clone()),
        Value::Collection(_, items) => {
            objects.extend(items.iter().filter_map(Value::as_object).cloned());
        }
        Value::Map(entries) => {
            for (key, value) in entries {
                objects.extend(key.as_object().cloned());
                objects.extend(value.as_object().cloned());
            }
        }
        Value::Null => {}
        other => warn!(value = ?other, "relation value holds no object references"),
    }
    objects
}
