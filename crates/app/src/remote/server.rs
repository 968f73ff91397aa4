//! Serves requests from other nodes against things hosted here.

use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;

use thingmesh_domain::catalog;
use thingmesh_domain::error::{InternalError, InvalidValueError, MeshError};
use thingmesh_domain::modifier::Mutation;
use thingmesh_domain::uri::Uri;
use thingmesh_domain::value::{Value, ValueMap};
use thingmesh_domain::value_type::ValueType;

use crate::path::{self, ResourcePath, Root, Target};
use crate::ports::{Method, Request, RequestHandler, Technology};
use crate::remote::TransportTechnology;
use crate::thing::Thing;

pub(crate) struct Server {
    technology: Weak<TransportTechnology>,
}

impl Server {
    pub(crate) fn new(technology: Weak<TransportTechnology>) -> Self {
        Self { technology }
    }
}

fn unknown(uri: &Uri) -> MeshError {
    MeshError::UnknownResource { uri: uri.to_string() }
}

/// The hosted thing a request path names, and what it targets on it.
///
/// Group paths resolve to the group's serving group so a request arriving
/// through multicast reaches only the members hosted here.
fn resolve(technology: &TransportTechnology, uri: &Uri) -> Result<(Thing, Target), MeshError> {
    let path = ResourcePath::parse(uri.path())?;
    let root = match &path.root {
        Root::Index(index) => technology.hosted_at(*index),
        Root::Group(group_id) => technology.hosted_group(group_id).and_then(|group| {
            let serving = group.as_group()?.serving_group(&group);
            Some(serving)
        }),
    }
    .ok_or_else(|| unknown(uri))?;
    let thing = path::walk_children(root, &path.children).ok_or_else(|| unknown(uri))?;
    Ok((thing, path.target))
}

/// Replace thing handles with their URIs so the value can travel.
fn encode_result(technology: &TransportTechnology, value: Value) -> Result<Value, MeshError> {
    match value {
        Value::Handle(handle) => {
            let thing = handle
                .downcast_ref::<Thing>()
                .ok_or(InternalError::Invariant("method returned a foreign handle"))?;
            Ok(Value::Uri(technology.native_uri_for_thing(thing)?))
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| encode_result(technology, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other),
    }
}

fn payload_map(payload: Option<Value>) -> Result<ValueMap, MeshError> {
    match payload {
        None => Ok(ValueMap::new()),
        Some(value) => value
            .into_map()
            .ok_or_else(|| InvalidValueError::MissingParameter("map payload").into()),
    }
}

async fn serve(technology: Arc<TransportTechnology>, request: Request) -> Result<Option<Value>, MeshError> {
    let (thing, target) = resolve(&technology, &request.uri)?;
    let modifiers = path::modifiers(&request.uri);
    tracing::debug!(uri = %request.uri, method = ?request.method, "serving request");

    match (request.method, target) {
        (Method::Get, Target::Thing) => {
            let keys = thing.fetch_supported_keys().await?;
            Ok(Some(Value::Array(keys.into_iter().map(Value::String).collect())))
        }
        (Method::Post, Target::Thing) => {
            thing
                .apply_properties_with(payload_map(request.payload)?, &modifiers)
                .await?;
            Ok(None)
        }
        (Method::Delete, Target::Thing) => Ok(Some(Value::Bool(thing.delete().await?))),
        (Method::Get, Target::Section(section)) => {
            let values = thing.fetch_section_with(section, &modifiers).await?;
            Ok(Some(Value::Map(values)))
        }
        (Method::Get, Target::Children(trait_id)) => {
            let children = thing.fetch_children_for_trait(&trait_id).await?;
            let ids = children
                .iter()
                .filter_map(|child| thing.id_for_child(child))
                .map(Value::String)
                .collect();
            Ok(Some(Value::Array(ids)))
        }
        (Method::Get, Target::Property(key)) => thing.fetch_value(&key, &modifiers).await,
        (Method::Put, Target::Property(key)) => {
            let value = request
                .payload
                .ok_or(InvalidValueError::MissingParameter("value"))?;
            thing.set_value(&key, value, &modifiers).await?;
            Ok(None)
        }
        (Method::Post, Target::Property(key)) => {
            let mutation = path::mutation_token(&request.uri)
                .and_then(|token| Mutation::from_query(token, request.payload.clone()))
                .ok_or_else(|| unknown(&request.uri))?;
            thing.mutate_value(&key, mutation, &modifiers).await?;
            Ok(None)
        }
        (Method::Post, Target::Method(method)) => {
            let returns = catalog::method(&method).map_or(ValueType::Map, |descriptor| descriptor.returns);
            let value = thing
                .invoke_value(&method, payload_map(request.payload)?, returns)
                .await?;
            Ok(Some(encode_result(&technology, value)?))
        }
        _ => Err(unknown(&request.uri)),
    }
}

impl RequestHandler for Server {
    fn handle(&self, request: Request) -> BoxFuture<'static, Result<Option<Value>, MeshError>> {
        let technology = self.technology.upgrade();
        async move {
            let technology = technology.ok_or(InternalError::Invariant("server outlived its technology"))?;
            serve(technology, request).await
        }
        .boxed()
    }
}
