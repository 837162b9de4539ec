//! Wide Row Storage - Object-to-row mapping for column-family datastores.
//!
//! This crate translates persistent objects into single-row mutations against a
//! column-family key-value store and back, and manages the pooled connections
//! those mutations travel over.
//!
//! # Core Concepts
//!
//! - **Row Identifier**: the byte-encoded primary key used as the row key.
//! - **Column Address**: the (family, qualifier) pair a field is stored under.
//! - **Managed Connection**: a pooled, reference-counted connection caching
//!   one handle per table, disposed by a background evictor once idle.
//! - **Mutation Intent**: the additive/subtractive changeset built for one
//!   write.
//!
//! # Traits
//!
//! - [`Persistable`]: Static metadata and field access for a persistent type
//! - [`ObjectProvider`]: Field access to one live object
//! - [`ExecutionContext`]: Relationship services supplied by the persistence engine
//! - [`Datastore`] / [`TableHandle`]: Backends, with single-row access and a full-table scan
//!
//! # Example
//!
//! ```text
//! let store = StoreManager::open(MemoryDatastore::new(), StoreConfig::default())?;
//! let handler = PersistenceHandler::new(store);
//! handler.insert_object(&engine, &person).await?;
//! handler.fetch_object(&engine, &mut person, &[1, 2]).await?;
//! ```
//!
//! Misspelled mapping attributes are rejected at compile time:
//!
//! ```compile_fail
//! #[derive(wide_row_storage::Persistent, Default)]
//! struct Owner {
//!     #[primary_key]
//!     key: String,
//!     #[relation(one_to_mny, target = "Pet")]
//!     pets: Vec<wide_row_storage::ObjectRef>,
//! }
//! ```
//!
//! ```compile_fail
//! #[derive(wide_row_storage::Persistent, Default)]
//! struct Ticket {
//!     #[primary_key(seqence)]
//!     id: i64,
//! }
//! ```

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::unwrap_in_result,
        clippy::panic
    )
)]

// Lets `#[derive(Persistent)]` paths resolve inside this crate's own tests.
extern crate self as wide_row_storage;

pub mod codec;
mod config;
mod connection;
mod context;
mod datastore;
mod error;
pub mod field_mapper;
mod generator;
mod handler;
pub mod identifier;
pub mod memory;
mod metadata;
mod mutation;
mod pool;
mod store;
mod validator;
mod value;

pub use config::{IgnorableMetadataBehavior, StoreConfig};
pub use connection::{ConnectionListener, ConnectionStatus, ManagedConnection, PooledConnection};
pub use context::{ExecutionContext, ObjectProvider};
pub use datastore::{Datastore, TableHandle, TableSchema};
pub use error::StorageError;
pub use generator::{SequenceConfig, SequenceGenerator, UuidGenerator};
pub use handler::PersistenceHandler;
pub use memory::MemoryDatastore;
pub use metadata::{
    ColumnAddress, DescriptorRegistry, FieldDescriptor, FieldType, Persistable, RelationKind,
    TypeDescriptor, TypeDescriptorBuilder, ValueStrategy,
};
pub use mutation::{Delete, MutationIntent, Put, RowSnapshot};
pub use pool::{Clock, ConnectionPool, EvictionOutcome, EvictorHandle, ManualClock, SystemClock};
pub use store::StoreManager;
pub use validator::MetadataValidator;
pub use value::{CollectionKind, FieldValue, ObjectRef, Value};

// Re-export derive macro
pub use wide_row_storage_derive::Persistent;
