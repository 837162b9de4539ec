//! Connection pool with idle eviction.
//!
//! Connections are shared: `acquire` hands out any live connection with its
//! reference count incremented, and only creates a new one when none can be
//! retained. Connections idle past their deadline are pulled out of the pool
//! on the next acquire or eviction pass and disposed; a background task runs
//! those passes when eviction is enabled.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Datastore, ManagedConnection, PooledConnection, StorageError};

/// Millisecond time source for idle deadlines.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Result of one eviction pass.
#[derive(Debug, Default)]
pub struct EvictionOutcome {
    pub evicted: usize,
    /// Connections that were removed but failed to close cleanly.
    pub failures: Vec<StorageError>,
}

pub struct ConnectionPool<D: Datastore> {
    datastore: Arc<D>,
    connections: Mutex<Vec<Arc<ManagedConnection<D>>>>,
    /// Expired connections already out of the pool, waiting to be closed.
    retired: Mutex<Vec<Arc<ManagedConnection<D>>>>,
    next_id: AtomicU64,
    idle_timeout_millis: u64,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl<D: Datastore> ConnectionPool<D> {
    pub fn new(datastore: Arc<D>, idle_timeout: Duration) -> Self {
        Self::with_clock(datastore, idle_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(datastore: Arc<D>, idle_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            datastore,
            connections: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            idle_timeout_millis: u64::try_from(idle_timeout.as_millis()).unwrap_or(u64::MAX),
            clock,
            closed: AtomicBool::new(false),
        }
    }

    pub fn datastore(&self) -> &Arc<D> {
        &self.datastore
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Retain a live pooled connection, or create one if none can be reused.
    ///
    /// Expired idle connections found on the way are removed from the pool.
    /// Their handles are closed by the next `get` or eviction pass.
    pub fn acquire(&self) -> Result<Arc<ManagedConnection<D>>, StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Usage("connection pool is closed".to_string()));
        }

        let now = self.clock.now_millis();
        let mut connections = self.connections.lock();
        self.retire_expired(&mut connections, now);
        if let Some(connection) = connections.iter().find(|c| c.try_retain(now)) {
            debug!(connection = connection.id(), "reusing pooled connection");
            return Ok(connection.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(ManagedConnection::new(
            id,
            self.datastore.clone(),
            self.idle_timeout_millis,
            self.clock.clone(),
        ));
        connections.push(connection.clone());
        debug!(connection = id, pooled = connections.len(), "created connection");
        Ok(connection)
    }

    /// Acquire wrapped in a guard that releases on drop, then close whatever
    /// the acquire retired.
    pub async fn get(&self) -> Result<PooledConnection<D>, StorageError> {
        let connection = self.acquire().map(PooledConnection::new)?;
        let outcome = self.dispose_retired().await;
        for failure in &outcome.failures {
            warn!(error = %failure, "retired connection did not close cleanly");
        }
        Ok(connection)
    }

    pub fn release(&self, connection: &ManagedConnection<D>) -> Result<(), StorageError> {
        connection.release()
    }

    /// Dispose and remove every connection idle past its deadline, along with
    /// any an earlier acquire already retired.
    pub async fn evict_expired(&self) -> EvictionOutcome {
        let now = self.clock.now_millis();
        {
            let mut connections = self.connections.lock();
            self.retire_expired(&mut connections, now);
        }
        let outcome = self.dispose_retired().await;
        for failure in &outcome.failures {
            warn!(error = %failure, "evicted connection did not close cleanly");
        }
        if outcome.evicted > 0 {
            debug!(evicted = outcome.evicted, "evicted idle connections");
        }
        outcome
    }

    /// Move expired connections out of `connections`. Each one is marked
    /// disposed under its own lock, so no acquire can retain it afterwards.
    fn retire_expired(&self, connections: &mut Vec<Arc<ManagedConnection<D>>>, now: u64) {
        let mut retired = self.retired.lock();
        connections.retain(|c| {
            if c.take_if_expired(now) {
                retired.push(c.clone());
                false
            } else {
                true
            }
        });
    }

    async fn dispose_retired(&self) -> EvictionOutcome {
        let retired = std::mem::take(&mut *self.retired.lock());
        let mut outcome = EvictionOutcome::default();
        for connection in retired {
            outcome.evicted += 1;
            if let Err(e) = connection.dispose().await {
                outcome.failures.push(e);
            }
        }
        outcome
    }

    /// Spawn the periodic evictor on the current tokio runtime.
    ///
    /// The task holds only a weak reference and stops on its own once the
    /// pool is dropped.
    pub fn start_evictor(self: &Arc<Self>, period: Duration) -> Result<EvictorHandle, StorageError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            StorageError::Configuration(format!("connection evictor needs a tokio runtime: {}", e))
        })?;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let pool: Weak<Self> = Arc::downgrade(self);
        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        pool.evict_expired().await;
                    }
                }
            }
            debug!("connection evictor stopped");
        });

        info!(period_millis = period.as_millis() as u64, "started connection evictor");
        Ok(EvictorHandle {
            token,
            task: Some(task),
        })
    }

    /// Close the pool and dispose every connection, held or not.
    pub async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        let mut connections: Vec<Arc<ManagedConnection<D>>> =
            std::mem::take(&mut *self.connections.lock());
        connections.append(&mut self.retired.lock());

        let mut failures = Vec::new();
        for connection in connections {
            if let Err(e) = connection.dispose().await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::datastore_message(failures.join("; ")))
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Cancels the evictor task.
pub struct EvictorHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl EvictorHandle {
    pub async fn shutdown(mut self) {
        self.token.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            warn!(error = %e, "connection evictor ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for EvictorHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
