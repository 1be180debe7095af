//! Configuration options which can alter the behavior of a pool.

use tokio::time::Duration;

/// Per-resource pool configuration.
///
/// [PoolConfig::default] supplies the defaults; callers override individual
/// fields with struct-update syntax:
///
/// ```
/// use toolpool::policy::PoolConfig;
///
/// let config = PoolConfig {
///     max_connections: 3,
///     min_connections: 2,
///     ..Default::default()
/// };
/// # drop(config);
/// ```
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolConfig {
    /// The maximum number of connections the pool may hold.
    pub max_connections: usize,

    /// The population the pool is pre-warmed and restored to.
    ///
    /// Clamped to `max_connections` when the pool is registered.
    pub min_connections: usize,

    /// How long an acquire may wait for an idle connection before giving up.
    pub connection_timeout: Duration,

    /// How long a connection may sit idle before the health sweep evicts it.
    pub idle_timeout: Duration,

    /// Creation retry budget. Carried in the configuration but not consulted
    /// by the acquisition or pre-warm paths; a failed creation is reported,
    /// not retried.
    pub retry_attempts: u32,

    /// Delay between creation retries. Carried but not consulted, as with
    /// `retry_attempts`.
    pub retry_delay: Duration,

    /// Period of the health sweep. The sweep runs on one manager-wide timer,
    /// driven by the manager's default configuration.
    pub health_check_interval: Duration,

    /// How many creations a pre-warm or restoration batch runs concurrently.
    pub parallel_initialization_limit: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            min_connections: 2,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(60),
            parallel_initialization_limit: 4,
        }
    }
}

impl PoolConfig {
    /// Repairs inconsistent settings instead of rejecting them.
    pub(crate) fn normalized(mut self) -> Self {
        self.min_connections = self.min_connections.min(self.max_connections);
        self.parallel_initialization_limit = self.parallel_initialization_limit.max(1);
        self
    }
}
