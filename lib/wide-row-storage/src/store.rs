//! Store manager: configuration, pool, metadata and schema bookkeeping for one
//! datastore.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    Clock, ConnectionPool, Datastore, DescriptorRegistry, EvictorHandle, ExecutionContext,
    MetadataValidator, ObjectProvider, Persistable, PooledConnection, SequenceConfig,
    SequenceGenerator, StorageError, StoreConfig, SystemClock, TypeDescriptor, UuidGenerator,
};

pub struct StoreManager<D: Datastore> {
    config: StoreConfig,
    pool: Arc<ConnectionPool<D>>,
    evictor: Mutex<Option<EvictorHandle>>,
    registry: DescriptorRegistry,
    validator: MetadataValidator,
    /// Types whose schema has been ensured.
    managed: Mutex<HashSet<String>>,
    sequences: Mutex<HashMap<String, Arc<SequenceGenerator<D>>>>,
    uuids: UuidGenerator,
}

impl<D: Datastore> StoreManager<D> {
    /// Build the store and start the background evictor when enabled.
    ///
    /// Starting the evictor needs a running tokio runtime.
    pub fn open(datastore: D, config: StoreConfig) -> Result<Arc<Self>, StorageError> {
        Self::open_with_clock(datastore, config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        datastore: D,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, StorageError> {
        config.validate()?;

        let pool = Arc::new(ConnectionPool::with_clock(
            Arc::new(datastore),
            Duration::from_millis(config.idle_timeout_millis),
            clock,
        ));
        let evictor = match config.eviction_period() {
            Some(period) => Some(pool.start_evictor(period)?),
            None => None,
        };

        info!(
            idle_timeout_millis = config.idle_timeout_millis,
            eviction_interval_millis = config.eviction_interval_millis,
            "opened store"
        );
        Ok(Arc::new(Self {
            validator: MetadataValidator::new(config.ignorable_metadata_behavior),
            config,
            pool,
            evictor: Mutex::new(evictor),
            registry: DescriptorRegistry::new(),
            managed: Mutex::new(HashSet::new()),
            sequences: Mutex::new(HashMap::new()),
            uuids: UuidGenerator,
        }))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<D>> {
        &self.pool
    }

    pub fn datastore(&self) -> &Arc<D> {
        self.pool.datastore()
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    pub async fn connection(&self) -> Result<PooledConnection<D>, StorageError> {
        self.pool.get().await
    }

    /// Make a type's metadata known up front, so relations pointing at it can
    /// be checked.
    pub fn register<T: Persistable>(&self) -> Arc<TypeDescriptor> {
        self.registry.get_or_insert_with(<T as Persistable>::type_name(), <T as Persistable>::descriptor)
    }

    /// Validated metadata for `object`'s type.
    pub fn describe(&self, object: &dyn ObjectProvider) -> Result<Arc<TypeDescriptor>, StorageError> {
        let descriptor = self
            .registry
            .get_or_insert_with(object.type_name(), || object.describe());
        self.validator.validate(&descriptor, &self.registry)?;
        Ok(descriptor)
    }

    /// Start managing `descriptor`'s type, creating its table and column
    /// families when auto-creation is configured.
    pub async fn add_class(&self, descriptor: &TypeDescriptor) -> Result<(), StorageError> {
        if self.is_managed(&descriptor.name) {
            return Ok(());
        }
        if self.config.creates_tables() {
            let schema = descriptor.table_schema(self.config.creates_columns());
            self.datastore().create_schema(&schema).await?;
            debug!(table = %schema.table, families = schema.families.len(), "ensured schema");
        }
        self.managed.lock().insert(descriptor.name.clone());
        info!(type_name = %descriptor.name, table = %descriptor.table, "managing type");
        Ok(())
    }

    pub fn is_managed(&self, type_name: &str) -> bool {
        self.managed.lock().contains(type_name)
    }

    pub fn assert_writable(
        &self,
        context: &dyn ExecutionContext,
        descriptor: &TypeDescriptor,
    ) -> Result<(), StorageError> {
        if context.is_read_only(&descriptor.name) {
            return Err(StorageError::Usage(format!(
                "{} is read-only and cannot be written",
                descriptor.name
            )));
        }
        Ok(())
    }

    /// Sequence generator for a type's key, created on first use with its
    /// counter in the type's own table.
    pub fn sequence_for(&self, descriptor: &TypeDescriptor) -> Arc<SequenceGenerator<D>> {
        self.sequences
            .lock()
            .entry(descriptor.name.clone())
            .or_insert_with(|| {
                Arc::new(SequenceGenerator::new(
                    self.pool.clone(),
                    SequenceConfig::for_table(descriptor.table.clone()),
                ))
            })
            .clone()
    }

    pub fn uuids(&self) -> &UuidGenerator {
        &self.uuids
    }

    /// Stop the evictor and dispose every connection.
    pub async fn close(&self) -> Result<(), StorageError> {
        let evictor = self.evictor.lock().take();
        if let Some(evictor) = evictor {
            evictor.shutdown().await;
        }
        self.pool.close().await?;
        info!("closed store");
        Ok(())
    }
}
