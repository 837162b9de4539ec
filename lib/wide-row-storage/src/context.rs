//! Traits the surrounding persistence engine implements.

use async_trait::async_trait;

use crate::{ObjectRef, Persistable, StorageError, TypeDescriptor, Value};

/// Field-level access to one live persistent object.
///
/// Every [`Persistable`] is an `ObjectProvider`; engines holding objects
/// behind other indirections can implement it directly.
pub trait ObjectProvider: Send + Sync {
    fn type_name(&self) -> &str;

    /// Full metadata for this object's type. Only consulted the first time a
    /// type is seen; the result is cached by type name.
    fn describe(&self) -> TypeDescriptor;

    fn provide_field(&self, position: usize) -> Result<Value, StorageError>;

    fn replace_field(&mut self, position: usize, value: Value) -> Result<(), StorageError>;
}

impl<T: Persistable> ObjectProvider for T {
    fn type_name(&self) -> &str {
        <T as Persistable>::type_name()
    }

    fn describe(&self) -> TypeDescriptor {
        <T as Persistable>::descriptor()
    }

    fn provide_field(&self, position: usize) -> Result<Value, StorageError> {
        self.field_value(position)
    }

    fn replace_field(&mut self, position: usize, value: Value) -> Result<(), StorageError> {
        self.set_field_value(position, value)
    }
}

/// Services the mapper needs from the persistence engine.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Make `object` durable if it is not already and return its primary-key
    /// value.
    async fn persist_or_fetch(&self, object: &ObjectRef) -> Result<Value, StorageError>;

    /// Fetch or attach the object of `target_type` with primary key `key`.
    async fn materialize(&self, key: &Value, target_type: &str) -> Result<ObjectRef, StorageError>;

    /// Delete a related object, as part of a cascading delete.
    async fn delete_object(&self, object: &ObjectRef) -> Result<(), StorageError>;

    fn is_read_only(&self, _type_name: &str) -> bool {
        false
    }
}
