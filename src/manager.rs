//! A registry of pools, keyed by resource id, with a shared health sweep.

use crate::connection::{ConnectionId, ConnectionInfo};
use crate::factory::{Handle, ResourceId, SharedFactory};
use crate::lease::Lease;
use crate::policy::PoolConfig;
use crate::pool::{BatchOutcome, ConnectionPool, Error, PoolStats};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{event, instrument, Level};

/// Debug snapshot of one pool, as returned by
/// [PoolManager::get_pool_info]. Carries per-connection summaries, never
/// the opaque handles.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolInfo {
    pub resource: ResourceId,
    pub config: PoolConfig,
    pub stats: PoolStats,
    pub connections: Vec<ConnectionInfo>,
}

/// Manager-wide metrics, sampled by [PoolManager::performance_metrics].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GlobalMetrics {
    /// Per-pool statistics at the time of the snapshot.
    pub pools: BTreeMap<ResourceId, PoolStats>,
    /// Cumulative wall-clock time spent pre-warming pools at registration.
    pub initialization_time: Duration,
    /// Creations that succeeded across all pre-warm and restoration batches.
    pub parallel_connections_success: usize,
    /// Creations that failed across all pre-warm and restoration batches.
    pub parallel_connections_failure: usize,
    /// Mean creation latency across currently registered pools.
    pub avg_connection_latency: Duration,
    pub total_servers_managed: usize,
}

// Counters accumulated incrementally; everything derived is computed at
// snapshot time.
#[derive(Debug, Default)]
struct MetricsInner {
    initialization_time: Duration,
    parallel_connections_success: usize,
    parallel_connections_failure: usize,
    total_servers_managed: usize,
}

impl MetricsInner {
    fn note_batch(&mut self, outcome: &BatchOutcome) {
        self.parallel_connections_success += outcome.succeeded;
        self.parallel_connections_failure += outcome.failed;
    }
}

// State shared with the health task.
struct Shared<Conn: Handle> {
    factory: SharedFactory<Conn>,
    pools: Mutex<HashMap<ResourceId, Arc<ConnectionPool<Conn>>>>,
    metrics: Mutex<MetricsInner>,
}

struct HealthTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Manages a set of bounded connection pools to tool-provider servers.
///
/// Each instance is self-contained: independent managers never share state,
/// so several can coexist within one process.
///
/// ```no_run
/// use std::sync::Arc;
/// use toolpool::factories::tcp::TcpFactory;
/// use toolpool::manager::PoolManager;
/// use toolpool::policy::PoolConfig;
///
/// # async {
/// // Create the factory -- here, plain TCP to a fixed address.
/// let factory = Arc::new(TcpFactory::new([("search", "[::1]:9301".parse().unwrap())]));
///
/// // Create the manager and register a pool, pre-warmed to two connections.
/// let manager = PoolManager::new(factory, PoolConfig::default());
/// manager
///     .initialize_pool(
///         "search",
///         PoolConfig {
///             min_connections: 2,
///             max_connections: 4,
///             ..Default::default()
///         },
///     )
///     .await;
///
/// // Check a connection out, use it, and give it back.
/// let lease = manager.acquire("search").await.unwrap();
/// let id = lease.id();
/// drop(lease);
/// manager.release(id, "search", false).await;
///
/// // Tear everything down.
/// manager.cleanup().await;
/// # };
/// ```
pub struct PoolManager<Conn: Handle> {
    shared: Arc<Shared<Conn>>,
    defaults: PoolConfig,
    health: Mutex<Option<HealthTask>>,
}

impl<Conn: Handle> PoolManager<Conn> {
    /// Creates a new pool manager.
    ///
    /// - factory: Describes how connections to a specific resource
    ///   should be made and torn down.
    /// - defaults: The baseline configuration; its `health_check_interval`
    ///   drives the manager-wide health sweep.
    ///
    /// The health sweep starts immediately and runs until [Self::cleanup].
    pub fn new(factory: SharedFactory<Conn>, defaults: PoolConfig) -> Self {
        let defaults = defaults.normalized();
        let shared = Arc::new(Shared {
            factory,
            pools: Mutex::new(HashMap::new()),
            metrics: Mutex::new(MetricsInner::default()),
        });
        let health = spawn_health_task(&shared, defaults.health_check_interval);
        Self {
            shared,
            defaults,
            health: Mutex::new(Some(health)),
        }
    }

    /// The baseline configuration, for struct-update overrides per pool.
    pub fn defaults(&self) -> &PoolConfig {
        &self.defaults
    }

    /// Registers a pool for `resource` and pre-warms it to
    /// `min_connections`.
    ///
    /// Registration is idempotent by resource id: a pool that already
    /// exists is left untouched, regardless of any configuration
    /// difference. Partial pre-warm success is non-fatal; the health sweep
    /// keeps restoring the population toward the minimum.
    pub async fn initialize_pool(&self, resource: impl Into<ResourceId>, config: PoolConfig) {
        let resource = resource.into();
        let pool = {
            let mut pools = self.shared.pools.lock().unwrap();
            if pools.contains_key(&resource) {
                event!(
                    Level::INFO,
                    resource = %resource,
                    "Pool already initialized; ignoring"
                );
                return;
            }
            let pool = Arc::new(ConnectionPool::new(resource.clone(), config.normalized()));
            pools.insert(resource.clone(), Arc::clone(&pool));
            pool
        };
        self.shared.metrics.lock().unwrap().total_servers_managed += 1;
        self.ensure_health_task();

        let wanted = pool.config().min_connections;
        let outcome = pool.prewarm(&self.shared.factory, wanted).await;
        let mut metrics = self.shared.metrics.lock().unwrap();
        metrics.initialization_time += outcome.elapsed;
        metrics.note_batch(&outcome);
        event!(
            Level::INFO,
            resource = %resource,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "Pool initialized"
        );
    }

    /// Checks a connection out of the pool registered for `resource`.
    ///
    /// Fails fast with [Error::PoolNotFound] when no pool is registered --
    /// a caller-configuration error, never retried here.
    #[instrument(level = "debug", skip(self), err, name = "PoolManager::acquire")]
    pub async fn acquire(&self, resource: &str) -> Result<Lease<Conn>, Error> {
        let Some(pool) = self.lookup(resource) else {
            event!(
                Level::ERROR,
                resource,
                "Acquire against a resource with no registered pool"
            );
            return Err(Error::PoolNotFound);
        };
        pool.acquire(&self.shared.factory).await
    }

    /// Returns a connection to its pool.
    ///
    /// With `is_error` set, the connection is disposed instead of going
    /// back to the idle population. Unknown resource ids and connection
    /// ids are logged no-ops.
    pub async fn release(&self, id: ConnectionId, resource: &str, is_error: bool) {
        let Some(pool) = self.lookup(resource) else {
            event!(
                Level::ERROR,
                resource,
                id = %id,
                "Release against a resource with no registered pool"
            );
            return;
        };
        let Some(handle) = pool.release(id, is_error) else {
            return;
        };
        if let Err(err) = self.shared.factory.disconnect(&handle).await {
            event!(
                Level::WARN,
                err = ?err,
                resource,
                id = %id,
                "Failed to terminate a disposed connection; dropping it"
            );
        }
    }

    /// Samples statistics for one pool.
    pub fn get_pool_stats(&self, resource: &str) -> Option<PoolStats> {
        self.lookup(resource).map(|pool| pool.snapshot_stats())
    }

    /// Samples a debug snapshot of one pool.
    pub fn get_pool_info(&self, resource: &str) -> Option<PoolInfo> {
        let pool = self.lookup(resource)?;
        Some(PoolInfo {
            resource: pool.resource().clone(),
            config: pool.config().clone(),
            stats: pool.snapshot_stats(),
            connections: pool.connection_infos(),
        })
    }

    /// Samples manager-wide metrics.
    ///
    /// The returned value is an owned snapshot, not a live view.
    pub fn performance_metrics(&self) -> GlobalMetrics {
        let pools: Vec<Arc<ConnectionPool<Conn>>> = self
            .shared
            .pools
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();

        let mut per_pool = BTreeMap::new();
        let mut latency_sum = Duration::ZERO;
        for pool in &pools {
            let stats = pool.snapshot_stats();
            latency_sum += stats.average_connection_time;
            per_pool.insert(pool.resource().clone(), stats);
        }
        let avg_connection_latency = if per_pool.is_empty() {
            Duration::ZERO
        } else {
            latency_sum / per_pool.len() as u32
        };

        let metrics = self.shared.metrics.lock().unwrap();
        GlobalMetrics {
            pools: per_pool,
            initialization_time: metrics.initialization_time,
            parallel_connections_success: metrics.parallel_connections_success,
            parallel_connections_failure: metrics.parallel_connections_failure,
            avg_connection_latency,
            total_servers_managed: metrics.total_servers_managed,
        }
    }

    /// Stops the health sweep and disposes every connection in every pool.
    ///
    /// Safe to call when already cleaned up. On return no further sweep
    /// runs -- a tick in flight is waited out before disposal begins --
    /// and the manager is back in its just-constructed state;
    /// [Self::initialize_pool] restarts the sweep.
    #[instrument(skip(self), name = "PoolManager::cleanup")]
    pub async fn cleanup(&self) {
        // Stop the sweep before touching pool contents, so no tick runs
        // concurrently with disposal.
        let health = self.health.lock().unwrap().take();
        if let Some(HealthTask {
            shutdown_tx,
            handle,
        }) = health
        {
            let _ = shutdown_tx.send(true);
            match handle.await {
                Ok(()) => (),
                Err(err) if err.is_cancelled() => (),
                Err(err) if err.is_panic() => std::panic::panic_any(err.into_panic()),
                Err(err) => panic!("Unexpected join error from the health task: {err}"),
            }
        }

        let pools: Vec<Arc<ConnectionPool<Conn>>> = {
            let mut registry = self.shared.pools.lock().unwrap();
            registry.drain().map(|(_, pool)| pool).collect()
        };

        let mut disposals = Vec::new();
        for pool in &pools {
            for handle in pool.drain_all() {
                let factory = Arc::clone(&self.shared.factory);
                let resource = pool.resource().clone();
                disposals.push(async move {
                    if let Err(err) = factory.disconnect(&handle).await {
                        event!(
                            Level::WARN,
                            err = ?err,
                            resource = %resource,
                            "Failed to terminate a connection during cleanup"
                        );
                    }
                });
            }
        }
        futures::future::join_all(disposals).await;

        *self.shared.metrics.lock().unwrap() = MetricsInner::default();
        event!(Level::INFO, "Connection pools cleaned up");
    }

    fn lookup(&self, resource: &str) -> Option<Arc<ConnectionPool<Conn>>> {
        self.shared.pools.lock().unwrap().get(resource).cloned()
    }

    fn ensure_health_task(&self) {
        let mut health = self.health.lock().unwrap();
        if health.is_none() {
            *health = Some(spawn_health_task(
                &self.shared,
                self.defaults.health_check_interval,
            ));
        }
    }
}

fn spawn_health_task<Conn: Handle>(shared: &Arc<Shared<Conn>>, period: Duration) -> HealthTask {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shared = Arc::clone(shared);
    let handle = tokio::task::spawn(async move {
        let mut sweep_interval = interval(period);
        sweep_interval.reset();
        loop {
            tokio::select! {
                _ = sweep_interval.tick() => {
                    reconcile_all(&shared).await;
                }
                // Fires on explicit shutdown, and when the manager itself
                // is dropped without a cleanup call.
                _ = shutdown_rx.changed() => {
                    return;
                }
            }
        }
    });
    HealthTask {
        shutdown_tx,
        handle,
    }
}

// One sweep over every registered pool. Each pool reconciles in isolation;
// trouble in one pool is logged there and never aborts the others.
async fn reconcile_all<Conn: Handle>(shared: &Shared<Conn>) {
    let pools: Vec<Arc<ConnectionPool<Conn>>> =
        shared.pools.lock().unwrap().values().cloned().collect();
    for pool in pools {
        reconcile_pool(shared, &pool).await;
    }
}

#[instrument(level = "debug", skip(shared, pool), fields(resource = %pool.resource()))]
async fn reconcile_pool<Conn: Handle>(shared: &Shared<Conn>, pool: &ConnectionPool<Conn>) {
    let evicted = pool.evict_expired();
    if !evicted.is_empty() {
        let disposals = evicted.into_iter().map(|(id, handle)| {
            let factory = Arc::clone(&shared.factory);
            async move {
                if let Err(err) = factory.disconnect(&handle).await {
                    event!(
                        Level::WARN,
                        err = ?err,
                        id = %id,
                        "Failed to terminate an evicted connection"
                    );
                }
            }
        });
        futures::future::join_all(disposals).await;
    }

    let shortfall = pool.restoration_shortfall();
    if shortfall > 0 {
        event!(
            Level::INFO,
            shortfall,
            "Restoring pool to its minimum population"
        );
        let outcome = pool.prewarm(&shared.factory, shortfall).await;
        shared.metrics.lock().unwrap().note_batch(&outcome);
    }

    pool.stamp_health_check();
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{TestConnection, TestFactory};

    fn setup_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    fn manager_with(
        defaults: PoolConfig,
    ) -> (PoolManager<TestConnection>, Arc<TestFactory>) {
        let factory = Arc::new(TestFactory::new());
        let shared: SharedFactory<TestConnection> = factory.clone();
        (PoolManager::new(shared, defaults), factory)
    }

    #[tokio::test]
    async fn initialize_prewarms_to_minimum() {
        setup_tracing_subscriber();
        let (manager, factory) = manager_with(PoolConfig::default());
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 2,
                    max_connections: 3,
                    ..Default::default()
                },
            )
            .await;

        let stats = manager.get_pool_stats("s1").unwrap();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.idle_connections, 2);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(factory.connects(), 2);

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn initialize_is_idempotent_per_resource() {
        let (manager, factory) = manager_with(PoolConfig::default());
        let config = PoolConfig {
            min_connections: 2,
            max_connections: 3,
            ..Default::default()
        };
        manager.initialize_pool("s1", config.clone()).await;
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 5,
                    max_connections: 9,
                    ..config
                },
            )
            .await;

        // The second call changed nothing, not even the configuration.
        assert_eq!(factory.connects(), 2);
        let info = manager.get_pool_info("s1").unwrap();
        assert_eq!(info.config.max_connections, 3);
        assert_eq!(
            manager.performance_metrics().total_servers_managed,
            1
        );

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn acquire_drains_idle_then_creates() {
        let (manager, factory) = manager_with(PoolConfig::default());
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 2,
                    max_connections: 3,
                    ..Default::default()
                },
            )
            .await;

        let first = manager.acquire("s1").await.unwrap();
        let second = manager.acquire("s1").await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(factory.connects(), 2);

        let stats = manager.get_pool_stats("s1").unwrap();
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.idle_connections, 0);

        // With the idle population drained, the next acquire creates.
        let third = manager.acquire("s1").await.unwrap();
        assert_eq!(factory.connects(), 3);
        assert_eq!(
            manager.get_pool_stats("s1").unwrap().active_connections,
            3
        );
        drop((first, second, third));

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn waiter_at_capacity_receives_released_connection() {
        tokio::time::pause();
        let (manager, _factory) = manager_with(PoolConfig::default());
        let manager = Arc::new(manager);
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 2,
                    max_connections: 3,
                    connection_timeout: Duration::from_millis(500),
                    ..Default::default()
                },
            )
            .await;

        let leases = [
            manager.acquire("s1").await.unwrap(),
            manager.acquire("s1").await.unwrap(),
            manager.acquire("s1").await.unwrap(),
        ];

        let waiter = tokio::task::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.acquire("s1").await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let released = leases[0].id();
        manager.release(released, "s1", false).await;

        let reacquired = waiter.await.unwrap().unwrap();
        assert_eq!(reacquired.id(), released);

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn waiter_at_capacity_times_out_without_release() {
        tokio::time::pause();
        let (manager, _factory) = manager_with(PoolConfig::default());
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 1,
                    max_connections: 1,
                    connection_timeout: Duration::from_millis(100),
                    ..Default::default()
                },
            )
            .await;

        let _held = manager.acquire("s1").await.unwrap();
        let result = manager.acquire("s1").await;
        assert!(matches!(result, Err(Error::AcquireTimeout)));

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn acquire_against_unknown_resource_fails_fast() {
        let (manager, factory) = manager_with(PoolConfig::default());
        let result = manager.acquire("nowhere").await;
        assert!(matches!(result, Err(Error::PoolNotFound)));
        assert_eq!(factory.connects(), 0);

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn release_against_unknown_ids_is_ignored() {
        let (manager, factory) = manager_with(PoolConfig::default());
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 1,
                    ..Default::default()
                },
            )
            .await;

        manager.release(ConnectionId(42), "s1", false).await;
        manager.release(ConnectionId(0), "nowhere", false).await;
        assert_eq!(manager.get_pool_stats("s1").unwrap().total_connections, 1);
        assert_eq!(factory.disconnects(), 0);

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn release_with_error_terminates_the_handle() {
        let (manager, factory) = manager_with(PoolConfig::default());
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 1,
                    max_connections: 2,
                    ..Default::default()
                },
            )
            .await;

        let lease = manager.acquire("s1").await.unwrap();
        let id = lease.id();
        drop(lease);
        manager.release(id, "s1", true).await;

        assert_eq!(factory.disconnects(), 1);
        let stats = manager.get_pool_stats("s1").unwrap();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn sweep_evicts_expired_idle_without_restoring_at_minimum() {
        setup_tracing_subscriber();
        tokio::time::pause();
        let (manager, factory) = manager_with(PoolConfig {
            health_check_interval: Duration::from_millis(200),
            ..Default::default()
        });
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 2,
                    max_connections: 3,
                    idle_timeout: Duration::from_millis(1000),
                    ..Default::default()
                },
            )
            .await;

        // Take all three out (the third is created on demand), then put one
        // back so exactly one connection sits idle.
        let l1 = manager.acquire("s1").await.unwrap();
        let l2 = manager.acquire("s1").await.unwrap();
        let l3 = manager.acquire("s1").await.unwrap();
        assert_eq!(factory.connects(), 3);
        manager.release(l3.id(), "s1", false).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;

        // The idle connection aged out; the pool is back at its minimum, so
        // no restoration fires.
        let stats = manager.get_pool_stats("s1").unwrap();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.idle_connections, 0);
        assert_eq!(factory.connects(), 3);
        assert_eq!(factory.disconnects(), 1);
        assert!(stats.last_health_check.is_some());
        drop((l1, l2));

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn sweep_restores_population_below_minimum() {
        tokio::time::pause();
        let (manager, factory) = manager_with(PoolConfig {
            health_check_interval: Duration::from_millis(200),
            ..Default::default()
        });
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 2,
                    max_connections: 3,
                    idle_timeout: Duration::from_millis(1000),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(factory.connects(), 2);

        // Both pre-warmed connections age out untouched; the sweep evicts
        // them and restores the pool to its minimum.
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let stats = manager.get_pool_stats("s1").unwrap();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.idle_connections, 2);
        assert_eq!(factory.disconnects(), 2);
        assert_eq!(factory.connects(), 4);

        let metrics = manager.performance_metrics();
        assert_eq!(metrics.parallel_connections_success, 4);

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn sweep_failure_in_one_pool_does_not_stall_others() {
        tokio::time::pause();
        let (manager, factory) = manager_with(PoolConfig {
            health_check_interval: Duration::from_millis(200),
            ..Default::default()
        });
        for resource in ["s1", "s2"] {
            manager
                .initialize_pool(
                    resource,
                    PoolConfig {
                        min_connections: 1,
                        max_connections: 2,
                        idle_timeout: Duration::from_millis(500),
                        ..Default::default()
                    },
                )
                .await;
        }

        // Every further creation fails: the sweep evicts both pools and
        // keeps attempting restoration without one pool's failures
        // stopping the other's reconciliation.
        factory.set_connectable(false);
        tokio::time::sleep(Duration::from_millis(1000)).await;

        for resource in ["s1", "s2"] {
            let stats = manager.get_pool_stats(resource).unwrap();
            assert_eq!(stats.idle_connections, 0, "pool {resource}");
            assert!(stats.failed_connections > 0, "pool {resource}");
            assert!(stats.last_health_check.is_some(), "pool {resource}");
        }

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn pool_info_reports_connection_summaries() {
        let (manager, _factory) = manager_with(PoolConfig::default());
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 2,
                    max_connections: 3,
                    ..Default::default()
                },
            )
            .await;
        let lease = manager.acquire("s1").await.unwrap();

        let info = manager.get_pool_info("s1").unwrap();
        assert_eq!(info.resource.as_str(), "s1");
        assert_eq!(info.config.max_connections, 3);
        assert_eq!(info.connections.len(), 2);
        let active = info
            .connections
            .iter()
            .filter(|conn| conn.status == crate::connection::Status::Active)
            .count();
        assert_eq!(active, 1);
        assert!(info
            .connections
            .iter()
            .all(|conn| conn.connection_attempts == 1));
        drop(lease);

        assert!(manager.get_pool_info("nowhere").is_none());
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn metrics_accumulate_batch_outcomes() {
        let (manager, factory) = manager_with(PoolConfig::default());
        factory.set_connect_budget(1);
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 2,
                    max_connections: 3,
                    ..Default::default()
                },
            )
            .await;

        let metrics = manager.performance_metrics();
        assert_eq!(metrics.total_servers_managed, 1);
        assert_eq!(metrics.parallel_connections_success, 1);
        assert_eq!(metrics.parallel_connections_failure, 1);
        assert!(metrics.pools.contains_key("s1"));
        assert_eq!(manager.get_pool_stats("s1").unwrap().failed_connections, 1);

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn cleanup_disposes_everything_and_stops_the_sweep() {
        tokio::time::pause();
        let (manager, factory) = manager_with(PoolConfig {
            health_check_interval: Duration::from_millis(200),
            ..Default::default()
        });
        manager
            .initialize_pool(
                "s1",
                PoolConfig {
                    min_connections: 2,
                    max_connections: 3,
                    idle_timeout: Duration::from_millis(100),
                    ..Default::default()
                },
            )
            .await;

        manager.cleanup().await;
        assert!(manager.get_pool_stats("s1").is_none());
        assert_eq!(factory.disconnects(), 2);
        assert_eq!(manager.performance_metrics().total_servers_managed, 0);

        // No further sweep fires: nothing is evicted or restored while we
        // wait out several would-be ticks.
        let connects = factory.connects();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(factory.connects(), connects);
        assert_eq!(factory.disconnects(), 2);

        // A second cleanup is a harmless no-op.
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn manager_is_reusable_after_cleanup() {
        tokio::time::pause();
        let (manager, factory) = manager_with(PoolConfig {
            health_check_interval: Duration::from_millis(200),
            ..Default::default()
        });
        let config = PoolConfig {
            min_connections: 1,
            max_connections: 2,
            idle_timeout: Duration::from_millis(300),
            ..Default::default()
        };
        manager.initialize_pool("s1", config.clone()).await;
        manager.cleanup().await;

        manager.initialize_pool("s1", config).await;
        let stats = manager.get_pool_stats("s1").unwrap();
        assert_eq!(stats.total_connections, 1);
        assert_eq!(manager.performance_metrics().total_servers_managed, 1);

        // The health sweep came back with the new pool: the idle
        // connection ages out and restoration replaces it.
        let connects = factory.connects();
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(factory.connects() > connects);

        manager.cleanup().await;
    }
}
