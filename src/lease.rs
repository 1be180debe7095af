//! Connections which are checked out of a pool.

use crate::connection::ConnectionId;
use crate::factory::{Handle, ResourceId};
use std::sync::Arc;

/// A connection checked out by [crate::manager::PoolManager::acquire].
///
/// Note that this type implements [std::ops::Deref] for the generic `Conn`
/// type, and generally, clients should transparently use a lease as a
/// connection. The caller returns it with
/// [crate::manager::PoolManager::release], passing [Lease::id] and
/// reporting whether the connection is still usable.
pub struct Lease<Conn: Handle> {
    id: ConnectionId,
    resource: ResourceId,
    conn: Arc<Conn>,
}

impl<Conn: Handle> Lease<Conn> {
    pub(crate) fn new(id: ConnectionId, resource: ResourceId, conn: Arc<Conn>) -> Self {
        Self { id, resource, conn }
    }

    /// The id to pass back to `release`.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The pool this lease was acquired from.
    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }
}

impl<Conn: Handle> std::ops::Deref for Lease<Conn> {
    type Target = Conn;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<Conn: Handle> std::fmt::Debug for Lease<Conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}
