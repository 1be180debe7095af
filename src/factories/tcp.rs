//! Implementation of [Factory] for TCP.

use crate::factory::{Error, Factory, ResourceId};

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Connects resources to fixed TCP addresses.
///
/// Suitable for tool-provider servers reachable at known endpoints. A
/// disposed stream is closed when its last reference is dropped, so the
/// default no-op `disconnect` is enough here.
pub struct TcpFactory {
    addresses: HashMap<ResourceId, SocketAddr>,
}

impl TcpFactory {
    pub fn new<R: Into<ResourceId>>(addresses: impl IntoIterator<Item = (R, SocketAddr)>) -> Self {
        Self {
            addresses: addresses
                .into_iter()
                .map(|(resource, address)| (resource.into(), address))
                .collect(),
        }
    }
}

#[async_trait]
impl Factory for TcpFactory {
    type Handle = TcpStream;

    async fn connect(&self, resource: &ResourceId) -> Result<TcpStream, Error> {
        let Some(address) = self.addresses.get(resource) else {
            return Err(Error::Other(anyhow::anyhow!(
                "no address known for resource {resource}"
            )));
        };
        TcpStream::connect(address).await.map_err(|e| e.into())
    }
}
