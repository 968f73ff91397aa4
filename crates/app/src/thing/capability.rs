//! Capability traits implemented by each kind of thing.

use std::collections::BTreeSet;

use thingmesh_domain::error::MeshError;
use thingmesh_domain::id::TechnologyId;
use thingmesh_domain::modifier::{Modifier, Mutation};
use thingmesh_domain::section::Section;
use thingmesh_domain::value::{Value, ValueMap};
use thingmesh_domain::value_type::ValueType;

use crate::executor::Task;
use crate::thing::Thing;

/// Untyped property, method and child access.
///
/// `this` is the [`Thing`] wrapping the implementor; implementations use it
/// to fire listeners and to hand out references to themselves.
pub trait PropertyAccessible: Send + Sync {
    fn fetch_value(&self, this: &Thing, key: &str, modifiers: &[Modifier]) -> Task<Option<Value>>;

    /// Last known value, without any IO.
    fn cached_value(&self, this: &Thing, key: &str) -> Option<Value>;

    fn set_value(&self, this: &Thing, key: &str, value: Value, modifiers: &[Modifier]) -> Task<()>;

    fn mutate_value(
        &self,
        this: &Thing,
        key: &str,
        mutation: Mutation,
        modifiers: &[Modifier],
    ) -> Task<()>;

    /// Write several properties as one operation.
    fn apply_properties(&self, this: &Thing, properties: ValueMap, modifiers: &[Modifier]) -> Task<()>;

    fn fetch_section(&self, this: &Thing, section: Section, modifiers: &[Modifier]) -> Task<ValueMap>;

    fn copy_cached_section(&self, this: &Thing, section: Section) -> ValueMap;

    fn fetch_supported_keys(&self, this: &Thing) -> Task<BTreeSet<String>>;

    /// Invoke `method`; `returns` tells remote proxies how to decode the
    /// reply.
    fn invoke_method(&self, this: &Thing, method: &str, args: ValueMap, returns: ValueType) -> Task<Value>;

    fn fetch_children_for_trait(&self, this: &Thing, trait_id: &str) -> Task<Vec<Thing>>;

    /// Children known without IO, reported to newly registered child
    /// listeners.
    fn cached_children(&self, _this: &Thing, _trait_id: &str) -> Vec<Thing> {
        Vec::new()
    }

    fn id_for_child(&self, this: &Thing, child: &Thing) -> Option<String>;

    /// Delete this thing from its parent. Yields whether anything was
    /// removed.
    fn delete(&self, this: &Thing) -> Task<bool>;

    /// The thing whose registry holds this thing's listeners.
    fn listener_target(&self, this: &Thing) -> Thing {
        this.clone()
    }
}

/// Hooks called by a technology when it starts or stops hosting a thing.
pub trait Hostable: Send + Sync {
    /// # Errors
    ///
    /// Returns [`MeshError::UnacceptableThing`] when this thing cannot be
    /// hosted.
    fn on_hosted(&self, this: &Thing, technology: TechnologyId) -> Result<(), MeshError>;

    fn on_unhosted(&self, this: &Thing, technology: TechnologyId);
}

/// Group membership management.
pub trait GroupMembership: Send + Sync {
    fn group_id(&self) -> &str;

    fn add_member(&self, this: &Thing, member: &Thing) -> Task<()>;

    fn remove_member(&self, this: &Thing, member: &Thing) -> Task<()>;

    fn fetch_members(&self, this: &Thing) -> Task<Vec<Thing>>;

    /// Whether at least one member is hosted on this node.
    fn has_local_members(&self) -> bool;
}
