//! Transport port — URI-addressed request/response between nodes.
//!
//! A transport delivers [`Request`]s to the node named by the URI
//! authority. Requests whose authority is the transport's multicast
//! authority reach every other node and never produce a reply.

use std::sync::Arc;

use futures::future::BoxFuture;

use thingmesh_domain::error::MeshError;
use thingmesh_domain::uri::Uri;
use thingmesh_domain::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub uri: Uri,
    pub method: Method,
    pub payload: Option<Value>,
}

impl Request {
    #[must_use]
    pub fn new(uri: Uri, method: Method, payload: Option<Value>) -> Self {
        Self { uri, method, payload }
    }
}

/// Serves requests addressed to this node.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: Request) -> BoxFuture<'static, Result<Option<Value>, MeshError>>;
}

/// Sends requests to other nodes.
///
/// Object safe: technologies hold an `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    /// URI scheme this transport serves (`loop`, `coap`, …).
    fn scheme(&self) -> &str;

    /// Authority under which this node is reachable.
    fn authority(&self) -> &str;

    /// Authority that addresses every node at once.
    fn multicast_authority(&self) -> &str;

    fn send(&self, request: Request) -> BoxFuture<'static, Result<Option<Value>, MeshError>>;

    /// Route incoming requests to `handler`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an adapter error when the transport cannot accept requests.
    fn listen(&self, handler: Arc<dyn RequestHandler>) -> Result<(), MeshError>;
}
