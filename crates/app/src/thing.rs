//! Things: the uniform handle over local devices, remote proxies and
//! groups.
//!
//! A [`Thing`] is a cheap, clonable reference. Two handles are equal when
//! they refer to the same thing. The behavior behind a handle is one of
//! three closed kinds; callers only see the typed API below.

pub mod capability;
pub mod listener;

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use thingmesh_domain::error::{InvalidValueError, MeshError};
use thingmesh_domain::id::{TechnologyId, ThingId};
use thingmesh_domain::key::{MethodKey, PropertyKey, PropertyType};
use thingmesh_domain::modifier::{Modifier, Mutation};
use thingmesh_domain::section::Section;
use thingmesh_domain::value::{Handle, Value, ValueMap};
use thingmesh_domain::value_type::ValueType;

use crate::executor::{Executor, Task};
use crate::group::GroupThing;
use crate::local::LocalThing;
use crate::persistence::{PersistentState, StateListener};
use crate::remote::RemoteThing;

use self::capability::{GroupMembership, Hostable, PropertyAccessible};
use self::listener::{ChildListener, ListenerRegistry, PropertyListener, SectionListener};

/// Handle to a local device, a remote proxy or a group.
#[derive(Clone)]
pub struct Thing {
    inner: Arc<ThingInner>,
}

/// Non-owning reference to a [`Thing`].
#[derive(Clone)]
pub struct WeakThing(Weak<ThingInner>);

struct ThingInner {
    id: ThingId,
    executor: Executor,
    parent: Option<WeakThing>,
    listeners: ListenerRegistry,
    kind: ThingKind,
}

pub(crate) enum ThingKind {
    Local(LocalThing),
    Remote(RemoteThing),
    Group(GroupThing),
}

impl WeakThing {
    #[must_use]
    pub fn upgrade(&self) -> Option<Thing> {
        self.0.upgrade().map(|inner| Thing { inner })
    }
}

impl Thing {
    pub(crate) fn new(executor: Executor, parent: Option<&Thing>, kind: ThingKind) -> Self {
        Self {
            inner: Arc::new(ThingInner {
                id: ThingId::new(),
                executor,
                parent: parent.map(Thing::downgrade),
                listeners: ListenerRegistry::default(),
                kind,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> ThingId {
        self.inner.id
    }

    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    /// The thing this one is a child of, if it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Thing> {
        self.inner.parent.as_ref().and_then(WeakThing::upgrade)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakThing {
        WeakThing(Arc::downgrade(&self.inner))
    }

    /// Short name of this thing's kind, for logs.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match &self.inner.kind {
            ThingKind::Local(_) => "local",
            ThingKind::Remote(_) => "remote",
            ThingKind::Group(_) => "group",
        }
    }

    /// Technology that owns this thing natively, for proxies and groups.
    #[must_use]
    pub fn technology_id(&self) -> Option<TechnologyId> {
        match &self.inner.kind {
            ThingKind::Local(_) => None,
            ThingKind::Remote(remote) => Some(remote.technology_id()),
            ThingKind::Group(group) => Some(group.technology_id()),
        }
    }

    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self.inner.kind, ThingKind::Group(_))
    }

    pub(crate) fn as_local(&self) -> Option<&LocalThing> {
        match &self.inner.kind {
            ThingKind::Local(local) => Some(local),
            _ => None,
        }
    }

    pub(crate) fn as_remote(&self) -> Option<&RemoteThing> {
        match &self.inner.kind {
            ThingKind::Remote(remote) => Some(remote),
            _ => None,
        }
    }

    pub(crate) fn as_group(&self) -> Option<&GroupThing> {
        match &self.inner.kind {
            ThingKind::Group(group) => Some(group),
            _ => None,
        }
    }

    fn access(&self) -> &dyn PropertyAccessible {
        match &self.inner.kind {
            ThingKind::Local(local) => local,
            ThingKind::Remote(remote) => remote,
            ThingKind::Group(group) => group,
        }
    }

    fn hostable(&self) -> &dyn Hostable {
        match &self.inner.kind {
            ThingKind::Local(local) => local,
            ThingKind::Remote(remote) => remote,
            ThingKind::Group(group) => group,
        }
    }

    fn membership(&self) -> Result<&dyn GroupMembership, MeshError> {
        self.as_group()
            .map(|group| group as &dyn GroupMembership)
            .ok_or(MeshError::GroupsNotSupported)
    }

    // Untyped access.

    pub fn fetch_value(&self, key: &str, modifiers: &[Modifier]) -> Task<Option<Value>> {
        self.access().fetch_value(self, key, modifiers)
    }

    #[must_use]
    pub fn cached_value(&self, key: &str) -> Option<Value> {
        self.access().cached_value(self, key)
    }

    pub fn set_value(&self, key: &str, value: Value, modifiers: &[Modifier]) -> Task<()> {
        self.access().set_value(self, key, value, modifiers)
    }

    pub fn mutate_value(&self, key: &str, mutation: Mutation, modifiers: &[Modifier]) -> Task<()> {
        self.access().mutate_value(self, key, mutation, modifiers)
    }

    pub fn invoke_value(&self, method: &str, args: ValueMap, returns: ValueType) -> Task<Value> {
        self.access().invoke_method(self, method, args, returns)
    }

    // Typed access.

    pub fn fetch_property<T: PropertyType>(&self, key: &PropertyKey<T>) -> Task<Option<T>> {
        self.fetch_property_with(key, &[])
    }

    pub fn fetch_property_with<T: PropertyType>(
        &self,
        key: &PropertyKey<T>,
        modifiers: &[Modifier],
    ) -> Task<Option<T>> {
        self.fetch_value(key.name(), modifiers).map(|value| {
            value
                .map(|value| T::coerce(&value))
                .transpose()
                .map_err(MeshError::from)
        })
    }

    /// Last known value of `key`, without any IO.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidValue`] when the cached value does not
    /// coerce into `T`.
    pub fn cached_property<T: PropertyType>(&self, key: &PropertyKey<T>) -> Result<Option<T>, MeshError> {
        Ok(self
            .cached_value(key.name())
            .map(|value| T::coerce(&value))
            .transpose()?)
    }

    pub fn set_property<T: PropertyType>(&self, key: &PropertyKey<T>, value: T) -> Task<()> {
        self.set_property_with(key, value, &[])
    }

    pub fn set_property_with<T: PropertyType>(
        &self,
        key: &PropertyKey<T>,
        value: T,
        modifiers: &[Modifier],
    ) -> Task<()> {
        self.set_value(key.name(), value.into_value(), modifiers)
    }

    /// Add `amount` to the committed value of a numeric property.
    pub fn increment_property<T: PropertyType>(&self, key: &PropertyKey<T>, amount: T) -> Task<()> {
        self.increment_property_with(key, amount, &[])
    }

    pub fn increment_property_with<T: PropertyType>(
        &self,
        key: &PropertyKey<T>,
        amount: T,
        modifiers: &[Modifier],
    ) -> Task<()> {
        self.mutate_value(key.name(), Mutation::Increment(amount.into_value()), modifiers)
    }

    pub fn toggle_property(&self, key: &PropertyKey<bool>) -> Task<()> {
        self.mutate_value(key.name(), Mutation::Toggle, &[])
    }

    pub fn insert_value_into_property<T: PropertyType>(&self, key: &PropertyKey<Vec<T>>, item: T) -> Task<()>
    where
        Vec<T>: PropertyType,
    {
        self.mutate_value(key.name(), Mutation::Insert(item.into_value()), &[])
    }

    pub fn remove_value_from_property<T: PropertyType>(&self, key: &PropertyKey<Vec<T>>, item: T) -> Task<()>
    where
        Vec<T>: PropertyType,
    {
        self.mutate_value(key.name(), Mutation::Remove(item.into_value()), &[])
    }

    pub fn apply_properties(&self, properties: ValueMap) -> Task<()> {
        self.apply_properties_with(properties, &[])
    }

    pub fn apply_properties_with(&self, properties: ValueMap, modifiers: &[Modifier]) -> Task<()> {
        self.access().apply_properties(self, properties, modifiers)
    }

    pub fn fetch_section(&self, section: Section) -> Task<ValueMap> {
        self.fetch_section_with(section, &[])
    }

    pub fn fetch_section_with(&self, section: Section, modifiers: &[Modifier]) -> Task<ValueMap> {
        self.access().fetch_section(self, section, modifiers)
    }

    #[must_use]
    pub fn copy_cached_section(&self, section: Section) -> ValueMap {
        self.access().copy_cached_section(self, section)
    }

    pub fn fetch_supported_keys(&self) -> Task<BTreeSet<String>> {
        self.access().fetch_supported_keys(self)
    }

    pub fn invoke_method<R: PropertyType>(&self, method: &MethodKey<R>, args: ValueMap) -> Task<R> {
        self.invoke_value(method.name(), args, R::TYPE)
            .map(|value| R::coerce(&value).map_err(MeshError::from))
    }

    // Children.

    pub fn fetch_children_for_trait(&self, trait_id: &str) -> Task<Vec<Thing>> {
        self.access().fetch_children_for_trait(self, trait_id)
    }

    /// Children known without IO.
    pub(crate) fn cached_children(&self, trait_id: &str) -> Vec<Thing> {
        self.access().cached_children(self, trait_id)
    }

    #[must_use]
    pub fn id_for_child(&self, child: &Thing) -> Option<String> {
        self.access().id_for_child(self, child)
    }

    /// Remove this thing from its parent; yields `false` when it cannot be
    /// deleted or is already gone.
    pub fn delete(&self) -> Task<bool> {
        self.access().delete(self)
    }

    // Hosting.

    pub(crate) fn on_hosted(&self, technology: TechnologyId) -> Result<(), MeshError> {
        self.hostable().on_hosted(self, technology)
    }

    pub(crate) fn on_unhosted(&self, technology: TechnologyId) {
        self.hostable().on_unhosted(self, technology);
    }

    // Groups.

    /// Identifier of this group, or `None` when this is not a group.
    #[must_use]
    pub fn group_id(&self) -> Option<&str> {
        self.as_group().map(|group| group.group_id())
    }

    pub fn add_member(&self, member: &Thing) -> Task<()> {
        match self.membership() {
            Ok(group) => group.add_member(self, member),
            Err(err) => Task::failed(err),
        }
    }

    pub fn remove_member(&self, member: &Thing) -> Task<()> {
        match self.membership() {
            Ok(group) => group.remove_member(self, member),
            Err(err) => Task::failed(err),
        }
    }

    pub fn fetch_members(&self) -> Task<Vec<Thing>> {
        match self.membership() {
            Ok(group) => group.fetch_members(self),
            Err(err) => Task::failed(err),
        }
    }

    #[must_use]
    pub fn has_local_members(&self) -> bool {
        self.membership()
            .is_ok_and(|group| group.has_local_members())
    }

    // Listeners.

    fn listener_target(&self) -> Thing {
        self.access().listener_target(self)
    }

    /// Returns `false` when `listener` was already registered for `key`.
    pub fn register_property_listener<T>(&self, key: &PropertyKey<T>, listener: Arc<dyn PropertyListener>) -> bool {
        self.register_value_listener(key.name(), listener)
    }

    pub fn register_value_listener(&self, key: &str, listener: Arc<dyn PropertyListener>) -> bool {
        self.listener_target().inner.listeners.register_property(key, listener)
    }

    pub fn unregister_property_listener<T>(&self, key: &PropertyKey<T>, listener: &Arc<dyn PropertyListener>) -> bool {
        self.listener_target()
            .inner
            .listeners
            .unregister_property(key.name(), listener)
    }

    pub fn register_section_listener(&self, section: Section, listener: Arc<dyn SectionListener>) -> bool {
        self.listener_target().inner.listeners.register_section(section, listener)
    }

    pub fn unregister_section_listener(&self, listener: &Arc<dyn SectionListener>) -> bool {
        self.listener_target().inner.listeners.unregister_section(listener)
    }

    /// Register for child changes under `trait_id`. A new registration is
    /// immediately told about every existing child.
    pub fn register_child_listener(&self, trait_id: &str, listener: Arc<dyn ChildListener>) -> bool {
        let target = self.listener_target();
        if !target
            .inner
            .listeners
            .register_child(trait_id, Arc::clone(&listener))
        {
            return false;
        }
        for child in target.access().cached_children(&target, trait_id) {
            let parent = target.clone();
            let trait_id = trait_id.to_string();
            let listener = Arc::clone(&listener);
            target.deliver(move || listener.on_child_added(&parent, &trait_id, &child));
        }
        true
    }

    pub fn unregister_child_listener(&self, trait_id: &str, listener: &Arc<dyn ChildListener>) -> bool {
        self.listener_target()
            .inner
            .listeners
            .unregister_child(trait_id, listener)
    }

    /// Fire property listeners for each change, then section listeners once
    /// per touched section.
    pub(crate) fn notify_changes(&self, changes: &[(String, Option<Value>)]) {
        let mut sections = BTreeSet::new();
        for (key, value) in changes {
            for listener in self.inner.listeners.property_listeners(key) {
                let thing = self.clone();
                let key = key.clone();
                let value = value.clone();
                self.deliver(move || listener.on_property_changed(&thing, &key, value.as_ref()));
            }
            sections.extend(Section::of_key(key));
        }
        for section in sections {
            let listeners = self.inner.listeners.section_listeners(section);
            if listeners.is_empty() {
                continue;
            }
            let values = Arc::new(self.copy_cached_section(section));
            for listener in listeners {
                let thing = self.clone();
                let values = Arc::clone(&values);
                self.deliver(move || listener.on_section_changed(&thing, section, &values));
            }
        }
    }

    pub(crate) fn notify_child_added(&self, trait_id: &str, child: &Thing) {
        for listener in self.inner.listeners.child_listeners(trait_id) {
            let (parent, child, trait_id) = (self.clone(), child.clone(), trait_id.to_string());
            self.deliver(move || listener.on_child_added(&parent, &trait_id, &child));
        }
    }

    pub(crate) fn notify_child_removed(&self, trait_id: &str, child: &Thing) {
        for listener in self.inner.listeners.child_listeners(trait_id) {
            let (parent, child, trait_id) = (self.clone(), child.clone(), trait_id.to_string());
            self.deliver(move || listener.on_child_removed(&parent, &trait_id, &child));
        }
    }

    /// Queue one listener callback on the executor's serial lane, isolated
    /// from the others. Callbacks run in the order changes were made.
    fn deliver<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.id();
        self.inner.executor.run_serially(move || {
            if std::panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                tracing::warn!(thing = %id, "listener panicked");
            }
        });
    }
}

impl PartialEq for Thing {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Thing {}

impl Hash for Thing {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Thing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thing")
            .field("id", &self.inner.id)
            .field("kind", &self.kind_name())
            .finish_non_exhaustive()
    }
}

impl PropertyType for Thing {
    const TYPE: ValueType = ValueType::Handle;

    fn into_value(self) -> Value {
        Value::Handle(Handle::new(self))
    }

    fn from_value(value: Value) -> Result<Self, InvalidValueError> {
        match &value {
            Value::Handle(handle) => handle
                .downcast_ref::<Thing>()
                .cloned()
                .ok_or(InvalidValueError::Unsupported {
                    from: value.kind(),
                    to: ValueType::Handle,
                }),
            other => Err(InvalidValueError::Unsupported {
                from: other.kind(),
                to: ValueType::Handle,
            }),
        }
    }
}

/// Only local things carry persistent state; other kinds persist nothing.
impl PersistentState for Thing {
    fn copy_state(&self) -> ValueMap {
        self.as_local()
            .map(|local| local.copy_state())
            .unwrap_or_default()
    }

    fn init_with_state(&self, state: Option<ValueMap>) {
        if let Some(local) = self.as_local() {
            local.init_with_state(self, state);
        }
    }

    fn set_state_listener(&self, listener: Option<Arc<dyn StateListener>>) {
        if let Some(local) = self.as_local() {
            local.set_state_listener(listener);
        }
    }
}
