#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use wide_row_storage::{
    Datastore, ExecutionContext, ObjectRef, PersistenceHandler, Persistent, StorageError,
    StoreConfig, StoreManager, Value,
};

#[derive(Persistent, Debug, Clone, Default, PartialEq)]
#[persistent(table = "pets")]
pub struct Pet {
    #[primary_key]
    pub key: String,
    pub species: String,
    pub age: i32,
}

#[derive(Persistent, Debug, Clone, Default, PartialEq)]
#[persistent(table = "people")]
pub struct Person {
    #[primary_key]
    pub key: String,
    #[column(name = "details:full_name")]
    pub name: String,
    pub nickname: Option<String>,
    pub lucky_number: Option<i32>,
    pub tags: BTreeSet<String>,
    #[relation(one_to_many, target = "Pet", cascade)]
    pub pets: Vec<ObjectRef>,
    #[relation(many_to_one, target = "Pet")]
    pub favourite: Option<ObjectRef>,
    #[column(skip)]
    pub scratch: u32,
}

impl Person {
    pub const KEY: usize = 0;
    pub const NAME: usize = 1;
    pub const NICKNAME: usize = 2;
    pub const LUCKY_NUMBER: usize = 3;
    pub const TAGS: usize = 4;
    pub const PETS: usize = 5;
    pub const FAVOURITE: usize = 6;

    pub fn keyed(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Persistent, Debug, Clone, Default, PartialEq)]
#[persistent(table = "tickets")]
pub struct Ticket {
    #[primary_key(sequence)]
    pub id: i64,
    pub title: String,
}

#[derive(Persistent, Debug, Clone, Default, PartialEq)]
#[persistent(table = "sessions")]
pub struct Session {
    #[primary_key(uuid)]
    pub id: String,
    pub user: String,
}

/// Config with the background evictor off; tests drive eviction directly.
pub fn config() -> StoreConfig {
    StoreConfig::new()
        .eviction_interval(Duration::ZERO)
        .auto_create_schema(true)
}

/// Minimal persistence engine: owns the live `Pet` objects that `Person`
/// relations point at and persists them through the same handler.
pub struct Engine<D: Datastore> {
    pub handler: PersistenceHandler<D>,
    pets: Mutex<HashMap<u64, Pet>>,
    next_handle: AtomicU64,
    pub deleted: Mutex<Vec<ObjectRef>>,
    read_only: Mutex<HashSet<String>>,
}

impl<D: Datastore> Engine<D> {
    pub fn new(store: Arc<StoreManager<D>>) -> Self {
        Self {
            handler: PersistenceHandler::new(store),
            pets: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            deleted: Mutex::new(Vec::new()),
            read_only: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<StoreManager<D>> {
        self.handler.store()
    }

    /// Hand a pet to the engine and get back a reference to it.
    pub fn attach(&self, pet: Pet) -> ObjectRef {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.pets.lock().insert(handle, pet);
        ObjectRef::new("Pet", handle)
    }

    pub fn pet(&self, object: &ObjectRef) -> Option<Pet> {
        self.pets.lock().get(&object.handle).cloned()
    }

    pub fn mark_read_only(&self, type_name: &str) {
        self.read_only.lock().insert(type_name.to_string());
    }

    fn handle_for_key(&self, key: &str) -> Option<u64> {
        self.pets
            .lock()
            .iter()
            .find(|(_, pet)| pet.key == key)
            .map(|(handle, _)| *handle)
    }
}

#[async_trait]
impl<D: Datastore> ExecutionContext for Engine<D> {
    async fn persist_or_fetch(&self, object: &ObjectRef) -> Result<Value, StorageError> {
        let pet = self
            .pet(object)
            .ok_or_else(|| StorageError::NotFound(format!("handle {}", object.handle)))?;
        if !self.handler.locate_object(&pet).await? {
            self.handler.insert_object(self, &pet).await?;
        }
        Ok(Value::String(pet.key))
    }

    async fn materialize(&self, key: &Value, target_type: &str) -> Result<ObjectRef, StorageError> {
        let Value::String(key) = key else {
            return Err(StorageError::UnsupportedType(format!("{:?}", key)));
        };
        if target_type != "Pet" {
            return Err(StorageError::UnsupportedType(target_type.to_string()));
        }
        if let Some(handle) = self.handle_for_key(key) {
            return Ok(ObjectRef::new("Pet", handle));
        }

        let mut pet = Pet {
            key: key.clone(),
            ..Default::default()
        };
        self.handler.fetch_object(self, &mut pet, &[1, 2]).await?;
        Ok(self.attach(pet))
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), StorageError> {
        let pet = self
            .pet(object)
            .ok_or_else(|| StorageError::NotFound(format!("handle {}", object.handle)))?;
        self.handler.delete_object(self, &pet).await?;
        self.deleted.lock().push(object.clone());
        Ok(())
    }

    fn is_read_only(&self, type_name: &str) -> bool {
        self.read_only.lock().contains(type_name)
    }
}
