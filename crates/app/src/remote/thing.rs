//! Proxies for things reached through a transport.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thingmesh_domain::error::{InternalError, MeshError, Rejection};
use thingmesh_domain::id::TechnologyId;
use thingmesh_domain::modifier::{Modifier, Mutation};
use thingmesh_domain::section::Section;
use thingmesh_domain::uri::Uri;
use thingmesh_domain::value::{Handle, Value, ValueMap};
use thingmesh_domain::value_type::ValueType;

use crate::executor::Task;
use crate::path;
use crate::ports::{Method, Request, Technology};
use crate::remote::TransportTechnology;
use crate::thing::Thing;
use crate::thing::capability::{Hostable, PropertyAccessible};

/// A thing on another node, addressed by its base URI.
///
/// Values read or written through the proxy are cached; listeners fire
/// when the cache changes.
pub struct RemoteThing {
    technology: Weak<TransportTechnology>,
    technology_id: TechnologyId,
    base: Uri,
    cache: Mutex<ValueMap>,
}

/// Update the cache of the proxy behind `thing` and notify listeners of
/// every entry that changed.
fn remember(thing: &Thing, values: Vec<(String, Option<Value>)>) {
    let Some(remote) = thing.as_remote() else {
        return;
    };
    let changed: Vec<_> = {
        let mut cache = remote.lock();
        values
            .into_iter()
            .filter(|(key, value)| {
                let previous = match value {
                    Some(value) => cache.insert(key.clone(), value.clone()),
                    None => cache.remove(key),
                };
                previous != *value
            })
            .collect()
    };
    if !changed.is_empty() {
        thing.notify_changes(&changed);
    }
}

fn forget(thing: &Thing, key: &str) {
    if let Some(remote) = thing.as_remote() {
        remote.lock().remove(key);
    }
}

/// Turn a reply naming a thing into a handle to its proxy.
fn resolve_handle(technology: &TransportTechnology, value: Value) -> Result<Value, MeshError> {
    let uri: Uri = match value {
        Value::Uri(uri) => uri,
        Value::String(text) => text.parse()?,
        Value::Array(items) => {
            return items
                .into_iter()
                .map(|item| resolve_handle(technology, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array);
        }
        other => return Ok(other),
    };
    let thing = technology.thing_for_native_uri(&uri)?;
    Ok(Value::Handle(Handle::new(thing)))
}

fn upgrade(technology: &Weak<TransportTechnology>) -> Result<Arc<TransportTechnology>, MeshError> {
    technology
        .upgrade()
        .ok_or_else(|| InternalError::Invariant("proxy outlived its technology").into())
}

impl RemoteThing {
    pub(crate) fn new(technology: Weak<TransportTechnology>, technology_id: TechnologyId, base: Uri) -> Self {
        Self {
            technology,
            technology_id,
            base,
            cache: Mutex::default(),
        }
    }

    pub(crate) fn technology_id(&self) -> TechnologyId {
        self.technology_id
    }

    /// URI of this thing, ending with `/`.
    pub(crate) fn base(&self) -> &Uri {
        &self.base
    }

    fn lock(&self) -> MutexGuard<'_, ValueMap> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, this: &Thing, suffix: &str, method: Method, payload: Option<Value>) -> Task<Option<Value>> {
        let uri = match self.base.join(suffix) {
            Ok(uri) => uri,
            Err(err) => return Task::failed(err),
        };
        let technology = match upgrade(&self.technology) {
            Ok(technology) => technology,
            Err(err) => return Task::failed(err),
        };
        tracing::debug!(uri = %uri, ?method, "sending request");
        this.executor()
            .spawn(technology.transport().send(Request::new(uri, method, payload)))
    }
}

impl PropertyAccessible for RemoteThing {
    fn fetch_value(&self, this: &Thing, key: &str, modifiers: &[Modifier]) -> Task<Option<Value>> {
        let suffix = format!("{key}{}", path::query(None, modifiers));
        let (thing, key) = (this.clone(), key.to_string());
        self.send(this, &suffix, Method::Get, None).map(move |value| {
            remember(&thing, vec![(key, value.clone())]);
            Ok(value)
        })
    }

    fn cached_value(&self, _this: &Thing, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    fn set_value(&self, this: &Thing, key: &str, value: Value, modifiers: &[Modifier]) -> Task<()> {
        let suffix = format!("{key}{}", path::query(None, modifiers));
        let (thing, key) = (this.clone(), key.to_string());
        self.send(this, &suffix, Method::Put, Some(value.clone()))
            .map(move |_| {
                remember(&thing, vec![(key, Some(value))]);
                Ok(())
            })
    }

    /// The outcome is computed remotely, so the cached value is dropped.
    fn mutate_value(&self, this: &Thing, key: &str, mutation: Mutation, modifiers: &[Modifier]) -> Task<()> {
        let suffix = format!("{key}{}", path::query(Some(&mutation), modifiers));
        let (thing, key) = (this.clone(), key.to_string());
        self.send(this, &suffix, Method::Post, mutation.operand().cloned())
            .map(move |_| {
                forget(&thing, &key);
                Ok(())
            })
    }

    fn apply_properties(&self, this: &Thing, properties: ValueMap, modifiers: &[Modifier]) -> Task<()> {
        let thing = this.clone();
        let changes = properties
            .iter()
            .map(|(key, value)| (key.clone(), Some(value.clone())))
            .collect();
        self.send(
            this,
            &path::query(None, modifiers),
            Method::Post,
            Some(Value::Map(properties)),
        )
        .map(move |_| {
            remember(&thing, changes);
            Ok(())
        })
    }

    fn fetch_section(&self, this: &Thing, section: Section, modifiers: &[Modifier]) -> Task<ValueMap> {
        let suffix = format!(
            "{}{}",
            path::section_suffix(section),
            path::query(None, modifiers)
        );
        let thing = this.clone();
        self.send(this, &suffix, Method::Get, None).map(move |value| {
            let values = value.and_then(Value::into_map).unwrap_or_default();
            remember(
                &thing,
                values
                    .iter()
                    .map(|(key, value)| (key.clone(), Some(value.clone())))
                    .collect(),
            );
            Ok(values)
        })
    }

    fn copy_cached_section(&self, _this: &Thing, section: Section) -> ValueMap {
        self.lock()
            .iter()
            .filter(|(key, _)| section.contains(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn fetch_supported_keys(&self, this: &Thing) -> Task<BTreeSet<String>> {
        self.send(this, "", Method::Get, None).map(|value| {
            Ok(match value {
                Some(Value::Array(keys)) => keys
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => BTreeSet::new(),
            })
        })
    }

    /// A reply without payload, as from a multicast address, yields an
    /// empty map.
    fn invoke_method(&self, this: &Thing, method: &str, args: ValueMap, returns: ValueType) -> Task<Value> {
        let technology = self.technology.clone();
        self.send(this, method, Method::Post, Some(Value::Map(args)))
            .map(move |value| match value {
                None => Ok(Value::Map(ValueMap::new())),
                Some(value) if returns == ValueType::Handle => {
                    let technology = upgrade(&technology)?;
                    resolve_handle(&technology, value)
                }
                Some(value) => Ok(value),
            })
    }

    fn fetch_children_for_trait(&self, this: &Thing, trait_id: &str) -> Task<Vec<Thing>> {
        let technology = self.technology.clone();
        let base = self.base.clone();
        let trait_id = trait_id.to_string();
        self.send(this, &path::children_suffix(&trait_id), Method::Get, None)
            .map(move |value| {
                let Some(Value::Array(ids)) = value else {
                    return Ok(Vec::new());
                };
                let technology = upgrade(&technology)?;
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(|child_id| {
                        let uri = base.join(&path::child_suffix(&trait_id, child_id))?;
                        technology.thing_for_native_uri(&uri)
                    })
                    .collect()
            })
    }

    fn id_for_child(&self, _this: &Thing, child: &Thing) -> Option<String> {
        let rest = child
            .as_remote()?
            .base
            .as_str()
            .strip_prefix(self.base.as_str())?;
        match rest.split('/').collect::<Vec<_>>().as_slice() {
            ["ch", _, child_id, ""] => Some((*child_id).to_string()),
            _ => None,
        }
    }

    /// A successful delete also drops the cached proxies of the deleted
    /// thing and its children.
    fn delete(&self, this: &Thing) -> Task<bool> {
        let (technology, base) = (self.technology.clone(), self.base.clone());
        self.send(this, "", Method::Delete, None).map(move |value| {
            let deleted = value.as_ref().and_then(Value::as_bool).unwrap_or(false);
            if deleted && let Some(technology) = technology.upgrade() {
                technology.forget_proxies_under(&base);
            }
            Ok(deleted)
        })
    }
}

impl Hostable for RemoteThing {
    /// A proxy cannot be served by the technology it proxies for.
    fn on_hosted(&self, this: &Thing, technology: TechnologyId) -> Result<(), MeshError> {
        if technology == self.technology_id {
            return Err(Rejection::NotHostable(this.id().to_string()).into());
        }
        Ok(())
    }

    fn on_unhosted(&self, _this: &Thing, _technology: TechnologyId) {}
}
