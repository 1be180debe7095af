//! The interface for identifying and connecting to tool-provider servers.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(anyhow::Error),
}

/// Names the external server a pool manages connections for.
#[derive(Clone, PartialEq, Eq, Ord, PartialOrd, Debug, Hash)]
pub struct ResourceId(pub Arc<str>);

impl ResourceId {
    pub fn new(id: impl ToString) -> Self {
        Self(id.to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ResourceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&'_ str> for ResourceId {
    fn from(s: &'_ str) -> Self {
        Self(s.into())
    }
}

impl std::borrow::Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Interface for raw connection handles.
///
/// The pool places no constraints on the handle's protocol; it only manages
/// the handle's lifecycle.
pub trait Handle: Send + Sync + 'static {}

impl<T> Handle for T where T: Send + Sync + 'static {}

/// Describes how a connection to a tool-provider server should be
/// constructed and torn down.
#[async_trait]
pub trait Factory: Send + Sync {
    type Handle: Handle;

    /// Produces a live handle to the named server.
    async fn connect(&self, resource: &ResourceId) -> Result<Self::Handle, Error>;

    /// Terminates a handle.
    ///
    /// Must tolerate handles that are already dead; the pool calls this at
    /// most once per handle, and treats failures as non-fatal.
    ///
    /// By default this method does nothing: for most transports, dropping
    /// the last reference to the handle closes it.
    async fn disconnect(&self, _handle: &Self::Handle) -> Result<(), Error> {
        Ok(())
    }
}

pub type SharedFactory<Conn> = Arc<dyn Factory<Handle = Conn>>;
