//! Connection records tracked by a pool.

use debug_ignore::DebugIgnore;
use derive_where::derive_where;
use std::sync::Arc;
use tokio::time::Instant;

/// Uniquely identifies a connection for its lifetime.
///
/// Ids are never reused, even after the connection is disposed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ConnectionId(pub(crate) u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The lifecycle state of a tracked connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Status {
    /// The factory call is still in flight.
    ///
    /// - (On success) Status becomes Idle, or Active when created on behalf
    ///   of a waiting caller.
    /// - (On failure) The record is removed; the id is never reused.
    Initializing,

    /// Connected and ready for the next acquire.
    ///
    /// - (On acquire) Status becomes Active.
    /// - (On idle expiry or cleanup) Status becomes Disposed.
    Idle,

    /// Checked out to a caller.
    ///
    /// - (On release) Status becomes Idle.
    /// - (On release with an error report) Status becomes Error.
    Active,

    /// Reported unusable. Always immediately followed by Disposed; an
    /// errored connection is never returned to the idle population.
    Error,

    /// Terminal. The record is removed from the pool.
    Disposed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Initializing => "initializing",
            Status::Idle => "idle",
            Status::Active => "active",
            Status::Error => "error",
            Status::Disposed => "disposed",
        }
    }
}

/// One tracked connection within a pool.
#[derive_where(Debug)]
pub(crate) struct Connection<Conn> {
    pub(crate) id: ConnectionId,
    pub(crate) status: Status,

    /// The opaque handle produced by the factory.
    ///
    /// None while the record is still Initializing. The `Arc` is shared with
    /// at most one outstanding lease; the factory's `disconnect` runs at
    /// most once per handle.
    pub(crate) handle: Option<DebugIgnore<Arc<Conn>>>,

    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,

    pub(crate) connection_attempts: u32,
    pub(crate) error_count: u32,
}

impl<Conn> Connection<Conn> {
    pub(crate) fn reserved(id: ConnectionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            status: Status::Initializing,
            handle: None,
            created_at: now,
            last_used_at: now,
            connection_attempts: 1,
            error_count: 0,
        }
    }

    /// A clone of the underlying handle, if the factory has produced one.
    pub(crate) fn shared_handle(&self) -> Option<Arc<Conn>> {
        self.handle.as_ref().map(|handle| Arc::clone(&handle.0))
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            status: self.status,
            age: self.created_at.elapsed(),
            idle_for: self.last_used_at.elapsed(),
            connection_attempts: self.connection_attempts,
            error_count: self.error_count,
        }
    }
}

/// Debug summary of one connection, as reported by
/// [crate::manager::PoolManager::get_pool_info]. Never exposes the handle.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub status: Status,
    /// Time since the record was created.
    pub age: std::time::Duration,
    /// Time since the connection was last acquired or released.
    pub idle_for: std::time::Duration,
    pub connection_attempts: u32,
    pub error_count: u32,
}
