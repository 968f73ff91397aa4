use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{self, BoxFuture};

use thingmesh_app::ports::{Request, RequestHandler, Transport};
use thingmesh_domain::error::MeshError;
use thingmesh_domain::value::Value;

use crate::error::LoopbackError;

/// URI scheme of every loopback node.
pub const SCHEME: &str = "loop";

/// Authority reaching every node of the network.
pub const MULTICAST_AUTHORITY: &str = "all";

/// Registry of the nodes sharing one process.
#[derive(Default)]
pub struct LoopbackNetwork {
    /// Authority → handler, `None` until the node listens.
    nodes: Mutex<HashMap<String, Option<Arc<dyn RequestHandler>>>>,
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Option<Arc<dyn RequestHandler>>>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a node reachable at `authority`.
    ///
    /// # Errors
    ///
    /// Returns [`LoopbackError::AuthorityTaken`] when another node uses
    /// `authority` and [`LoopbackError::ReservedAuthority`] for the
    /// multicast authority.
    pub fn join(self: &Arc<Self>, authority: &str) -> Result<Arc<LoopbackTransport>, LoopbackError> {
        if authority == MULTICAST_AUTHORITY {
            return Err(LoopbackError::ReservedAuthority(authority.to_string()));
        }
        let mut nodes = self.lock();
        if nodes.contains_key(authority) {
            return Err(LoopbackError::AuthorityTaken(authority.to_string()));
        }
        nodes.insert(authority.to_string(), None);
        tracing::debug!(authority, "node joined loopback network");
        Ok(Arc::new(LoopbackTransport {
            network: Arc::clone(self),
            authority: authority.to_string(),
        }))
    }

    /// Authorities of the nodes currently joined.
    #[must_use]
    pub fn authorities(&self) -> Vec<String> {
        let mut authorities: Vec<_> = self.lock().keys().cloned().collect();
        authorities.sort();
        authorities
    }
}

/// One node's view of a [`LoopbackNetwork`]. Leaves the network when
/// dropped.
pub struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
    authority: String,
}

impl LoopbackTransport {
    /// Every listening node except this one.
    fn peers(&self) -> Vec<(String, Arc<dyn RequestHandler>)> {
        self.network
            .lock()
            .iter()
            .filter(|(authority, _)| **authority != self.authority)
            .filter_map(|(authority, handler)| Some((authority.clone(), handler.clone()?)))
            .collect()
    }

    fn multicast(&self, request: Request) -> BoxFuture<'static, Result<Option<Value>, MeshError>> {
        let deliveries: Vec<_> = self
            .peers()
            .into_iter()
            .map(|(authority, handler)| {
                handler.handle(request.clone()).map(move |result| {
                    if let Err(err) = result {
                        tracing::warn!(%authority, error = %err, "multicast delivery failed");
                    }
                })
            })
            .collect();
        future::join_all(deliveries).map(|_| Ok(None)).boxed()
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.network.lock().remove(&self.authority);
    }
}

impl Transport for LoopbackTransport {
    fn scheme(&self) -> &str {
        SCHEME
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn multicast_authority(&self) -> &str {
        MULTICAST_AUTHORITY
    }

    fn send(&self, request: Request) -> BoxFuture<'static, Result<Option<Value>, MeshError>> {
        let unknown = |request: &Request| MeshError::UnknownResource {
            uri: request.uri.to_string(),
        };
        if request.uri.scheme() != Some(SCHEME) {
            return future::ready(Err(unknown(&request))).boxed();
        }
        match request.uri.authority() {
            Some(MULTICAST_AUTHORITY) => self.multicast(request),
            Some(authority) => {
                let handler = self.network.lock().get(authority).cloned().flatten();
                match handler {
                    Some(handler) => handler.handle(request),
                    None => future::ready(Err(unknown(&request))).boxed(),
                }
            }
            None => future::ready(Err(unknown(&request))).boxed(),
        }
    }

    fn listen(&self, handler: Arc<dyn RequestHandler>) -> Result<(), MeshError> {
        self.network
            .lock()
            .insert(self.authority.clone(), Some(handler));
        tracing::debug!(authority = %self.authority, "node listening");
        Ok(())
    }
}
