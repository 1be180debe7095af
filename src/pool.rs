//! A bounded pool of connections to one tool-provider server.

use crate::connection::{Connection, ConnectionId, ConnectionInfo, Status};
use crate::factory::{Handle, ResourceId, SharedFactory};
use crate::lease::Lease;
use crate::policy::PoolConfig;

use debug_ignore::DebugIgnore;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{event, instrument, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error("No pool registered for this resource")]
    PoolNotFound,

    #[error("Failed to create a connection to this resource")]
    ConnectionFailed,

    #[error("Timed out waiting for an idle connection")]
    AcquireTimeout,
}

/// Point-in-time statistics for one pool.
///
/// `total_connections` counts every tracked record, including those still
/// initializing; `active_connections + idle_connections` excludes the
/// transitional states.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolStats {
    pub total_connections: usize,
    pub active_connections: usize,
    pub idle_connections: usize,
    /// Creations that failed, cumulative over the pool's lifetime.
    pub failed_connections: usize,
    /// Running two-sample average of creation latency.
    pub average_connection_time: Duration,
    /// Running two-sample average of how long acquired connections stay out.
    pub average_response_time: Duration,
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    /// Age of the most recent health sweep at the time of the snapshot.
    pub last_health_check: Option<Duration>,
}

impl PoolStats {
    fn enter_state(&mut self, status: Status) {
        match status {
            Status::Idle => self.idle_connections += 1,
            Status::Active => self.active_connections += 1,
            Status::Initializing | Status::Error | Status::Disposed => (),
        }
    }

    fn exit_state(&mut self, status: Status) {
        match status {
            Status::Idle => self.idle_connections -= 1,
            Status::Active => self.active_connections -= 1,
            Status::Initializing | Status::Error | Status::Disposed => (),
        }
    }
}

/// Outcome of one bounded-parallel creation batch.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct BatchOutcome {
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
    pub(crate) elapsed: Duration,
}

struct PoolInner<Conn: Handle> {
    connections: BTreeMap<ConnectionId, Connection<Conn>>,
    stats: PoolStats,
    last_health_check: Option<Instant>,
    next_connection_id: u64,
}

/// The set of connections for one resource id.
///
/// All state lives behind a single mutex which is never held across an
/// await; every capacity decision is re-checked after each suspension
/// point. Capacity for an in-flight creation is reserved up front with an
/// [Status::Initializing] record, so the `max_connections` bound holds at
/// all times, not only between operations.
pub(crate) struct ConnectionPool<Conn: Handle> {
    resource: ResourceId,
    config: PoolConfig,
    inner: Mutex<PoolInner<Conn>>,

    // Signaled each time a connection becomes idle, waking wait-for-available.
    available: Notify,
}

impl<Conn: Handle> ConnectionPool<Conn> {
    pub(crate) fn new(resource: ResourceId, config: PoolConfig) -> Self {
        Self {
            resource,
            config,
            inner: Mutex::new(PoolInner {
                connections: BTreeMap::new(),
                stats: PoolStats::default(),
                last_health_check: None,
                next_connection_id: 0,
            }),
            available: Notify::new(),
        }
    }

    pub(crate) fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner<Conn>> {
        self.inner.lock().unwrap()
    }

    /// Checks a connection out of the pool.
    ///
    /// Prefers an idle connection; creates one when below capacity; at
    /// capacity, waits for an idle connection until `connection_timeout`
    /// elapses.
    #[instrument(level = "debug", skip(self, factory), err, name = "ConnectionPool::acquire", fields(resource = %self.resource))]
    pub(crate) async fn acquire(&self, factory: &SharedFactory<Conn>) -> Result<Lease<Conn>, Error> {
        self.lock().stats.total_requests += 1;
        let result = self.acquire_inner(factory).await;
        let mut inner = self.lock();
        match &result {
            Ok(_) => inner.stats.successful_requests += 1,
            Err(_) => inner.stats.failed_requests += 1,
        }
        result
    }

    async fn acquire_inner(&self, factory: &SharedFactory<Conn>) -> Result<Lease<Conn>, Error> {
        if let Some(lease) = self.try_claim_idle() {
            return Ok(lease);
        }

        if let Some(id) = self.try_reserve() {
            // The caller that triggered the creation gets the connection;
            // it skips the idle population entirely.
            return match self.settle_creation(factory, id, Status::Active).await {
                Ok(Some(lease)) => Ok(lease),
                // Creation resolved, but the record was dropped meanwhile.
                Ok(None) => Err(Error::ConnectionFailed),
                Err(_) => Err(Error::ConnectionFailed),
            };
        }

        // Wait-for-available. The Notified future must be registered before
        // re-checking the pool, or an idle arrival between the check and the
        // await would be lost.
        let deadline = Instant::now() + self.config.connection_timeout;
        loop {
            let notified = self.available.notified();
            if let Some(lease) = self.try_claim_idle() {
                return Ok(lease);
            }
            if timeout_at(deadline, notified).await.is_err() {
                event!(
                    Level::WARN,
                    resource = %self.resource,
                    timeout_ms = self.config.connection_timeout.as_millis() as u64,
                    "Timed out waiting for an idle connection"
                );
                return Err(Error::AcquireTimeout);
            }
        }
    }

    // Claims any idle connection, if one exists.
    fn try_claim_idle(&self) -> Option<Lease<Conn>> {
        let mut inner = self.lock();
        let PoolInner {
            connections, stats, ..
        } = &mut *inner;
        for (id, record) in connections.iter_mut() {
            if record.status != Status::Idle {
                continue;
            }
            let Some(handle) = record.shared_handle() else {
                continue;
            };
            record.status = Status::Active;
            record.last_used_at = Instant::now();
            stats.exit_state(Status::Idle);
            stats.enter_state(Status::Active);
            return Some(Lease::new(*id, self.resource.clone(), handle));
        }
        None
    }

    // Reserves one capacity slot with an Initializing record.
    fn try_reserve(&self) -> Option<ConnectionId> {
        let mut inner = self.lock();
        if inner.connections.len() >= self.config.max_connections {
            return None;
        }
        Some(reserve_record(&mut inner))
    }

    // Reserves up to `wanted` capacity slots in one critical section.
    fn reserve_many(&self, wanted: usize) -> Vec<ConnectionId> {
        let mut inner = self.lock();
        let space = self
            .config
            .max_connections
            .saturating_sub(inner.connections.len());
        (0..wanted.min(space))
            .map(|_| reserve_record(&mut inner))
            .collect()
    }

    // Runs the factory for a reserved record and settles the outcome.
    //
    // Returns a Lease only when `target` is Active. If the record vanished
    // while the factory was connecting (the pool was cleaned up), the fresh
    // handle is terminated here so it is still disposed exactly once.
    async fn settle_creation(
        &self,
        factory: &SharedFactory<Conn>,
        id: ConnectionId,
        target: Status,
    ) -> Result<Option<Lease<Conn>>, crate::factory::Error> {
        let started = Instant::now();
        match factory.connect(&self.resource).await {
            Ok(handle) => {
                let elapsed = started.elapsed();
                let handle = Arc::new(handle);

                // Settle the record within an isolated scope, so the guard
                // is provably gone before any await.
                let settled = {
                    let mut inner = self.lock();
                    match inner.connections.get_mut(&id) {
                        Some(record) => {
                            record.handle = Some(DebugIgnore(Arc::clone(&handle)));
                            record.status = target;
                            record.last_used_at = Instant::now();
                            inner.stats.enter_state(target);
                            inner.stats.average_connection_time =
                                fold_average(inner.stats.average_connection_time, elapsed);
                            true
                        }
                        None => false,
                    }
                };

                if !settled {
                    // The record was drained (cleanup) while the factory was
                    // connecting; the fresh handle is ours to terminate.
                    event!(
                        Level::DEBUG,
                        resource = %self.resource,
                        id = %id,
                        "Record dropped mid-creation; terminating the fresh handle"
                    );
                    if let Err(err) = factory.disconnect(&handle).await {
                        event!(
                            Level::WARN,
                            err = ?err,
                            resource = %self.resource,
                            "Failed to terminate an orphaned handle"
                        );
                    }
                    return Ok(None);
                }

                if target == Status::Active {
                    Ok(Some(Lease::new(id, self.resource.clone(), handle)))
                } else {
                    self.available.notify_waiters();
                    Ok(None)
                }
            }
            Err(err) => {
                event!(
                    Level::WARN,
                    err = ?err,
                    resource = %self.resource,
                    id = %id,
                    "Failed to create connection"
                );
                let mut inner = self.lock();
                if inner.connections.remove(&id).is_some() {
                    inner.stats.total_connections -= 1;
                    inner.stats.failed_connections += 1;
                }
                Err(err)
            }
        }
    }

    /// Creates up to `wanted` connections in a bounded-parallel batch,
    /// adding each success to the idle population.
    ///
    /// All creations are issued and all outcomes collected; one failure
    /// never short-circuits the rest of the batch. Starting or restoring
    /// with fewer connections than asked for is expected and non-fatal.
    #[instrument(level = "debug", skip(self, factory), name = "ConnectionPool::prewarm", fields(resource = %self.resource))]
    pub(crate) async fn prewarm(
        &self,
        factory: &SharedFactory<Conn>,
        wanted: usize,
    ) -> BatchOutcome {
        let ids = self.reserve_many(wanted);
        if ids.is_empty() {
            return BatchOutcome::default();
        }
        let started = Instant::now();
        let results: Vec<_> = futures::stream::iter(
            ids.into_iter()
                .map(|id| async move { self.settle_creation(factory, id, Status::Idle).await }),
        )
        .buffer_unordered(self.config.parallel_initialization_limit)
        .collect()
        .await;

        let succeeded = results.iter().filter(|result| result.is_ok()).count();
        let failed = results.len() - succeeded;
        if failed > 0 {
            event!(
                Level::WARN,
                resource = %self.resource,
                succeeded,
                failed,
                "Creation batch partially failed"
            );
        }
        BatchOutcome {
            succeeded,
            failed,
            elapsed: started.elapsed(),
        }
    }

    /// Returns a connection to the pool, or disposes it when the caller
    /// reports it unusable.
    ///
    /// On the error path the caller receives the handle back for
    /// termination; the record is already removed, so a failed termination
    /// never blocks bookkeeping. Unknown ids and redundant releases of an
    /// already-idle connection are logged no-ops.
    pub(crate) fn release(&self, id: ConnectionId, is_error: bool) -> Option<Arc<Conn>> {
        let mut inner = self.lock();
        let Some(status) = inner.connections.get(&id).map(|record| record.status) else {
            event!(
                Level::ERROR,
                resource = %self.resource,
                id = %id,
                "Released a connection this pool does not track"
            );
            return None;
        };

        match (status, is_error) {
            (Status::Active | Status::Idle, true) => {
                let mut record = inner
                    .connections
                    .remove(&id)
                    .expect("record present; checked above");
                record.error_count += 1;
                record.status = Status::Error;
                inner.stats.exit_state(status);
                inner.stats.total_connections -= 1;
                event!(
                    Level::WARN,
                    resource = %self.resource,
                    id = %id,
                    "Connection reported unusable; disposing"
                );
                record.status = Status::Disposed;
                record.shared_handle()
            }
            (Status::Active, false) => {
                let PoolInner {
                    connections, stats, ..
                } = &mut *inner;
                let record = connections
                    .get_mut(&id)
                    .expect("record present; checked above");
                let active_for = record.last_used_at.elapsed();
                record.status = Status::Idle;
                record.last_used_at = Instant::now();
                stats.exit_state(Status::Active);
                stats.enter_state(Status::Idle);
                stats.average_response_time = fold_average(stats.average_response_time, active_for);
                drop(inner);
                self.available.notify_waiters();
                None
            }
            (Status::Idle, false) => {
                event!(
                    Level::WARN,
                    resource = %self.resource,
                    id = %id,
                    "Connection is already idle; release ignored"
                );
                None
            }
            _ => {
                event!(
                    Level::ERROR,
                    resource = %self.resource,
                    id = %id,
                    status = status.as_str(),
                    "Connection in unexpected state on release; ignored"
                );
                None
            }
        }
    }

    /// Removes idle connections whose last use is older than `idle_timeout`.
    ///
    /// Returns the evicted handles; termination is the caller's job, after
    /// the lock is gone.
    pub(crate) fn evict_expired(&self) -> Vec<(ConnectionId, Arc<Conn>)> {
        let mut inner = self.lock();
        let now = Instant::now();
        let expired: Vec<ConnectionId> = inner
            .connections
            .values()
            .filter(|record| {
                record.status == Status::Idle
                    && now.duration_since(record.last_used_at) > self.config.idle_timeout
            })
            .map(|record| record.id)
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for id in expired {
            let Some(mut record) = inner.connections.remove(&id) else {
                continue;
            };
            record.status = Status::Disposed;
            inner.stats.exit_state(Status::Idle);
            inner.stats.total_connections -= 1;
            event!(
                Level::INFO,
                resource = %self.resource,
                id = %id,
                "Evicting idle connection"
            );
            if let Some(handle) = record.shared_handle() {
                evicted.push((id, handle));
            }
        }
        evicted
    }

    /// How many connections a restoration batch should create.
    pub(crate) fn restoration_shortfall(&self) -> usize {
        let inner = self.lock();
        self.config
            .min_connections
            .saturating_sub(inner.connections.len())
    }

    pub(crate) fn stamp_health_check(&self) {
        self.lock().last_health_check = Some(Instant::now());
    }

    /// Removes every record and returns the handles awaiting termination.
    pub(crate) fn drain_all(&self) -> Vec<Arc<Conn>> {
        let mut inner = self.lock();
        let connections = std::mem::take(&mut inner.connections);
        inner.stats.total_connections = 0;
        inner.stats.active_connections = 0;
        inner.stats.idle_connections = 0;

        let mut handles = Vec::new();
        for (_, mut record) in connections {
            record.status = Status::Disposed;
            if let Some(handle) = record.shared_handle() {
                handles.push(handle);
            }
        }
        handles
    }

    pub(crate) fn snapshot_stats(&self) -> PoolStats {
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.last_health_check = inner.last_health_check.map(|at| at.elapsed());
        stats
    }

    pub(crate) fn connection_infos(&self) -> Vec<ConnectionInfo> {
        self.lock()
            .connections
            .values()
            .map(|record| record.info())
            .collect()
    }
}

fn reserve_record<Conn: Handle>(inner: &mut PoolInner<Conn>) -> ConnectionId {
    let id = ConnectionId(inner.next_connection_id);
    inner.next_connection_id += 1;
    inner.connections.insert(id, Connection::reserved(id));
    inner.stats.total_connections += 1;
    id
}

// Running two-sample average: each new sample carries half the weight.
fn fold_average(average: Duration, sample: Duration) -> Duration {
    if average.is_zero() {
        sample
    } else {
        (average + sample) / 2
    }
}
