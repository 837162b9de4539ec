//! Reference-counted connections that cache per-table handles.
//!
//! A connection moves `Active(n)` → `Idle { expires_at }` → `Disposed`. Idle
//! connections keep their table handles open and may be retained again until
//! the deadline passes; disposal closes every handle and is terminal.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::pool::Clock;
use crate::{Datastore, StorageError, TableHandle};

/// Notified when a connection's last holder releases it.
pub trait ConnectionListener: Send + Sync {
    fn pre_close(&self, connection_id: u64);

    fn post_close(&self, connection_id: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Active(usize),
    Idle { expires_at: u64 },
    Disposed,
}

#[derive(Debug)]
struct ConnectionState {
    ref_count: usize,
    /// `None` while the connection is held.
    expires_at: Option<u64>,
    disposed: bool,
}

pub struct ManagedConnection<D: Datastore> {
    id: u64,
    datastore: Arc<D>,
    tables: Mutex<HashMap<String, D::Table>>,
    state: Mutex<ConnectionState>,
    listeners: Mutex<Vec<Arc<dyn ConnectionListener>>>,
    idle_timeout_millis: u64,
    clock: Arc<dyn Clock>,
}

impl<D: Datastore> ManagedConnection<D> {
    /// A new connection, already retained once by its creator.
    pub(crate) fn new(
        id: u64,
        datastore: Arc<D>,
        idle_timeout_millis: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            datastore,
            tables: Mutex::new(HashMap::new()),
            state: Mutex::new(ConnectionState {
                ref_count: 1,
                expires_at: None,
                disposed: false,
            }),
            listeners: Mutex::new(Vec::new()),
            idle_timeout_millis,
            clock,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> ConnectionStatus {
        let state = self.state.lock();
        if state.disposed {
            ConnectionStatus::Disposed
        } else if state.ref_count > 0 {
            ConnectionStatus::Active(state.ref_count)
        } else {
            ConnectionStatus::Idle {
                expires_at: state.expires_at.unwrap_or_default(),
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub fn cached_tables(&self) -> usize {
        self.tables.lock().len()
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners.lock().push(listener);
    }

    /// Return the cached handle for `table`, opening it on first use.
    pub async fn get_table(&self, table: &str) -> Result<D::Table, StorageError> {
        if self.is_disposed() {
            return Err(StorageError::Usage(format!(
                "connection {} has been disposed",
                self.id
            )));
        }
        if let Some(handle) = self.tables.lock().get(table).cloned() {
            return Ok(handle);
        }

        let opened = self.datastore.open_table(table).await?;
        debug!(connection = self.id, table, "opened table handle");
        let handle = self
            .tables
            .lock()
            .entry(table.to_string())
            .or_insert(opened)
            .clone();
        Ok(handle)
    }

    /// Retain for another holder. Fails for disposed connections and idle ones
    /// whose deadline has passed.
    pub(crate) fn try_retain(&self, now: u64) -> bool {
        let mut state = self.state.lock();
        if state.disposed || state.expires_at.is_some_and(|deadline| deadline <= now) {
            return false;
        }
        state.ref_count += 1;
        state.expires_at = None;
        true
    }

    /// Drop one reference. The last release notifies listeners and arms the
    /// idle deadline; table handles stay open.
    pub fn release(&self) -> Result<(), StorageError> {
        let now_idle = {
            let mut state = self.state.lock();
            if state.ref_count == 0 {
                return Err(StorageError::Usage(format!(
                    "Too many calls on release(): connection {}",
                    self.id
                )));
            }
            state.ref_count -= 1;
            if state.ref_count == 0 {
                state.expires_at =
                    Some(self.clock.now_millis().saturating_add(self.idle_timeout_millis));
                true
            } else {
                false
            }
        };

        if now_idle {
            let listeners = std::mem::take(&mut *self.listeners.lock());
            for listener in &listeners {
                listener.pre_close(self.id);
            }
            for listener in &listeners {
                listener.post_close(self.id);
            }
            debug!(connection = self.id, "connection idle");
        }
        Ok(())
    }

    /// Mark disposed if idle past its deadline. Exclusive with `try_retain`.
    pub(crate) fn take_if_expired(&self, now: u64) -> bool {
        let mut state = self.state.lock();
        let expired = !state.disposed
            && state.ref_count == 0
            && state.expires_at.is_some_and(|deadline| deadline <= now);
        if expired {
            state.disposed = true;
        }
        expired
    }

    /// Close every cached table handle and mark the connection disposed.
    ///
    /// One handle failing to close does not stop the others; all failures
    /// are reported together.
    pub async fn dispose(&self) -> Result<(), StorageError> {
        self.state.lock().disposed = true;
        let tables: Vec<D::Table> = self.tables.lock().drain().map(|(_, t)| t).collect();

        let mut failures = Vec::new();
        for table in tables {
            if let Err(e) = table.close().await {
                error!(connection = self.id, table = table.name(), error = %e, "failed to close table handle");
                failures.push(format!("{}: {}", table.name(), e));
            }
        }
        debug!(connection = self.id, "connection disposed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::datastore_message(format!(
                "connection {} failed to close {} table(s): {}",
                self.id,
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}

/// A checked-out connection. Dropping it releases the reference.
pub struct PooledConnection<D: Datastore> {
    connection: Arc<ManagedConnection<D>>,
    released: bool,
}

impl<D: Datastore> PooledConnection<D> {
    pub(crate) fn new(connection: Arc<ManagedConnection<D>>) -> Self {
        Self {
            connection,
            released: false,
        }
    }

    /// Release now and surface any error instead of logging it.
    pub fn release(mut self) -> Result<(), StorageError> {
        self.released = true;
        self.connection.release()
    }

    pub fn shared(&self) -> Arc<ManagedConnection<D>> {
        self.connection.clone()
    }
}

impl<D: Datastore> Deref for PooledConnection<D> {
    type Target = ManagedConnection<D>;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<D: Datastore> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.connection.release() {
            error!(connection = self.connection.id(), error = %e, "failed to release connection");
        }
    }
}
