//! Things implemented in this process.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use thingmesh_domain::catalog::{
    MethodDescriptor, PropertyDescriptor, TraitDescriptor, base, level, onoff, scene, transition,
};
use thingmesh_domain::coerce::coerce;
use thingmesh_domain::error::{MeshError, Rejection};
use thingmesh_domain::id::{TechnologyId, short_token};
use thingmesh_domain::key::PropertyType;
use thingmesh_domain::modifier::{Modifier, Mutation};
use thingmesh_domain::section::Section;
use thingmesh_domain::value::{Value, ValueMap};
use thingmesh_domain::value_type::ValueType;

use crate::executor::{Executor, Task};
use crate::local::scene::SceneManager;
use crate::local::transition::TransitionEngine;
use crate::persistence::StateListener;
use crate::thing::capability::{Hostable, PropertyAccessible};
use crate::thing::{Thing, ThingKind, WeakThing};

const STATE_VALUES: &str = "v";
const STATE_SCENES: &str = "scenes";

pub(crate) enum Role {
    Device,
    /// Stored snapshot owned by the parent's scene manager.
    Scene { parent: WeakThing, scene_id: String },
}

/// Builds a local [`Thing`] from a set of traits.
///
/// The `base` trait is always present. Adding the `tran` trait makes
/// numeric state fade; adding `scen` enables saved scenes.
#[derive(Debug, Clone)]
pub struct LocalThingBuilder {
    traits: Vec<&'static TraitDescriptor>,
    metadata: ValueMap,
}

impl Default for LocalThingBuilder {
    fn default() -> Self {
        Self {
            traits: vec![&base::TRAIT],
            metadata: ValueMap::new(),
        }
    }
}

impl LocalThingBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// On/off, level, transition and scene traits.
    #[must_use]
    pub fn dimmable_light() -> Self {
        Self::new()
            .with_trait(&onoff::TRAIT)
            .with_trait(&level::TRAIT)
            .with_trait(&transition::TRAIT)
            .with_trait(&scene::TRAIT)
    }

    #[must_use]
    pub fn with_trait(mut self, descriptor: &'static TraitDescriptor) -> Self {
        if !self.traits.iter().any(|known| known.id == descriptor.id) {
            self.traits.push(descriptor);
        }
        self
    }

    #[must_use]
    pub fn name(self, name: impl Into<String>) -> Self {
        self.metadata(base::META_NAME.name(), name.into())
    }

    #[must_use]
    pub fn manufacturer(self, manufacturer: impl Into<String>) -> Self {
        self.metadata(base::META_MANUFACTURER.name(), manufacturer.into())
    }

    #[must_use]
    pub fn model(self, model: impl Into<String>) -> Self {
        self.metadata(base::META_MODEL.name(), model.into())
    }

    fn metadata(mut self, key: &str, value: String) -> Self {
        self.metadata.insert(key.to_string(), Value::String(value));
        self
    }

    #[must_use]
    pub fn build(self, executor: &Executor) -> Thing {
        let has = |id: &str| self.traits.iter().any(|known| known.id == id);
        let transitions = has(transition::TRAIT_ID).then(TransitionEngine::default);
        let scenes = has(scene::TRAIT_ID).then(SceneManager::default);
        let properties: Vec<_> = self
            .traits
            .iter()
            .flat_map(|descriptor| descriptor.properties.iter())
            .collect();
        let mut defaults: ValueMap = properties
            .iter()
            .filter_map(|property| Some((property.name.to_string(), property.initial.to_value()?)))
            .collect();
        defaults.extend(self.metadata);
        let local = LocalThing {
            trait_ids: self.traits.iter().map(|descriptor| descriptor.id).collect(),
            methods: self
                .traits
                .iter()
                .flat_map(|descriptor| descriptor.methods.iter())
                .collect(),
            properties,
            values: Mutex::new(defaults.clone()),
            defaults,
            role: Role::Device,
            transitions,
            scenes,
            hosts: Mutex::default(),
            state_listener: Mutex::default(),
        };
        Thing::new(executor.clone(), None, ThingKind::Local(local))
    }
}

/// A thing whose properties live in this process.
pub struct LocalThing {
    trait_ids: Vec<&'static str>,
    properties: Vec<&'static PropertyDescriptor>,
    methods: Vec<&'static MethodDescriptor>,
    /// Live values. While a transition runs these trail the committed
    /// targets held by the engine.
    values: Mutex<ValueMap>,
    defaults: ValueMap,
    role: Role,
    transitions: Option<TransitionEngine>,
    scenes: Option<SceneManager>,
    hosts: Mutex<BTreeSet<TechnologyId>>,
    state_listener: Mutex<Option<Arc<dyn StateListener>>>,
}

impl LocalThing {
    /// Child thing holding one scene snapshot of `parent`.
    pub(crate) fn scene_child(parent: &Thing, scene_id: String, snapshot: ValueMap) -> Option<Thing> {
        let local = parent.as_local()?;
        let properties: Vec<_> = local
            .properties
            .iter()
            .copied()
            .filter(|property| property.in_scene)
            .collect();
        let child = LocalThing {
            trait_ids: vec![scene::TRAIT_ID],
            properties,
            methods: Vec::new(),
            values: Mutex::new(snapshot.clone()),
            defaults: snapshot,
            role: Role::Scene {
                parent: parent.downgrade(),
                scene_id,
            },
            transitions: None,
            scenes: None,
            hosts: Mutex::default(),
            state_listener: Mutex::default(),
        };
        Some(Thing::new(
            parent.executor().clone(),
            Some(parent),
            ThingKind::Local(child),
        ))
    }

    pub(crate) fn transitions(&self) -> Option<&TransitionEngine> {
        self.transitions.as_ref()
    }

    pub(crate) fn scenes(&self) -> Option<&SceneManager> {
        self.scenes.as_ref()
    }

    pub(crate) fn is_scene(&self) -> bool {
        matches!(self.role, Role::Scene { .. })
    }

    pub(crate) fn descriptor(&self, key: &str) -> Option<&'static PropertyDescriptor> {
        self.properties.iter().copied().find(|property| property.name == key)
    }

    /// Trait id and child id under which `child` is reachable.
    pub(crate) fn child_path(&self, child: &Thing) -> Option<(&'static str, String)> {
        let id = self.scenes.as_ref()?.id_for(child)?;
        Some((scene::TRAIT_ID, id))
    }

    fn lock_values(&self) -> std::sync::MutexGuard<'_, ValueMap> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current live value, derived properties included.
    pub(crate) fn live_value(&self, this: &Thing, key: &str) -> Option<Value> {
        if key == base::META_UID.name() {
            let uid = match &self.role {
                Role::Device => this.id().to_string(),
                Role::Scene { scene_id, .. } => scene_id.clone(),
            };
            return Some(Value::String(uid));
        }
        if key == base::META_TRAITS.name() {
            return self.descriptor(key).map(|_| {
                Value::Array(self.trait_ids.iter().map(|id| Value::from(*id)).collect())
            });
        }
        if key == transition::STAT_DURATION.name() {
            let engine = self.transitions.as_ref()?;
            return Some(Value::Float(engine.remaining_secs()));
        }
        if key == scene::STAT_SCENE_ID.name() {
            let scenes = self.scenes.as_ref()?;
            return scenes.active_scene_id(self).map(Value::String);
        }
        self.lock_values().get(key).cloned()
    }

    /// Value a property will settle on, ignoring any running transition.
    pub(crate) fn committed_value(&self, key: &str) -> Option<Value> {
        self.transitions
            .as_ref()
            .and_then(|engine| engine.target(key))
            .or_else(|| self.lock_values().get(key).cloned())
    }

    fn section_values(&self, this: &Thing, section: Section) -> ValueMap {
        self.properties
            .iter()
            .filter(|property| section.contains(property.name))
            .filter_map(|property| Some((property.name.to_string(), self.live_value(this, property.name)?)))
            .collect()
    }

    /// Committed values of the properties captured by scenes.
    pub(crate) fn scene_state(&self) -> ValueMap {
        self.properties
            .iter()
            .filter(|property| property.in_scene)
            .filter_map(|property| Some((property.name.to_string(), self.committed_value(property.name)?)))
            .collect()
    }

    /// Stored values of a scene child.
    pub(crate) fn scene_values(&self) -> ValueMap {
        self.lock_values().clone()
    }

    /// Store `changes` as live values and notify listeners of the ones that
    /// differ.
    pub(crate) fn commit(&self, this: &Thing, changes: ValueMap) {
        let changed: Vec<(String, Option<Value>)> = {
            let mut values = self.lock_values();
            changes
                .into_iter()
                .filter_map(|(key, value)| {
                    let previous = values.insert(key.clone(), value.clone());
                    (previous.as_ref() != Some(&value)).then_some((key, Some(value)))
                })
                .collect()
        };
        if !changed.is_empty() {
            this.notify_changes(&changed);
        }
    }

    /// Coerce and clamp one write against this thing's declarations.
    fn validate(&self, key: &str, value: &Value) -> Result<Value, MeshError> {
        let descriptor = self.descriptor(key).ok_or_else(|| MeshError::PropertyNotFound {
            key: key.to_string(),
        })?;
        if !descriptor.writable {
            return Err(MeshError::PropertyReadOnly { key: key.to_string() });
        }
        Ok(descriptor.clamp(coerce(value, descriptor.value_type)?))
    }

    /// Validate every write, then apply them as one operation.
    pub(crate) fn write(&self, this: &Thing, properties: ValueMap, modifiers: &[Modifier]) -> Result<(), MeshError> {
        let mut duration = Modifier::transition_duration(modifiers);
        let mut recall = None;
        let mut validated = ValueMap::new();
        for (key, value) in properties {
            let value = self.validate(&key, &value)?;
            if key == transition::STAT_DURATION.name() {
                duration = duration.or(value.as_f64());
            } else if key == scene::STAT_SCENE_ID.name() {
                recall = value.as_str().map(str::to_string);
            } else {
                validated.insert(key, value);
            }
        }

        if let (Some(scene_id), Some(scenes)) = (recall, &self.scenes) {
            match scenes.snapshot(&scene_id) {
                Some(snapshot) => {
                    tracing::debug!(thing = %this.id(), scene = %scene_id, "recalling scene");
                    for (key, value) in &snapshot {
                        validated.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                    scenes.set_active(scene_id, snapshot);
                }
                None => tracing::warn!(thing = %this.id(), scene = %scene_id, "unknown scene id"),
            }
        }

        if validated.is_empty() {
            return Ok(());
        }
        match (&self.role, &self.transitions) {
            (Role::Device, Some(engine)) => engine.start(this, self, validated, duration),
            _ => self.commit(this, validated),
        }
        self.mark_dirty();
        Ok(())
    }

    fn mutate(&self, this: &Thing, key: &str, mutation: &Mutation, modifiers: &[Modifier]) -> Result<(), MeshError> {
        let descriptor = self.descriptor(key).ok_or_else(|| MeshError::PropertyNotFound {
            key: key.to_string(),
        })?;
        let next = mutation.apply(self.committed_value(key).as_ref(), descriptor.value_type)?;
        self.write(this, ValueMap::from([(key.to_string(), next)]), modifiers)
    }

    fn invoke(&self, this: &Thing, method: &str, args: &ValueMap) -> Result<Value, MeshError> {
        if !self.methods.iter().any(|known| known.name == method) {
            return Err(MeshError::MethodNotFound {
                method: method.to_string(),
            });
        }
        match (method, &self.scenes) {
            (scene::METHOD_SAVE, Some(scenes)) => {
                let scene_id = scene::PARAM_SCENE_ID.get(args)?.unwrap_or_else(short_token);
                let child = scenes.save(this, self, scene_id)?;
                self.mark_dirty();
                Ok(child.into_value())
            }
            _ => Err(MeshError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }

    /// Tell the persistence layer this thing has unsaved state.
    pub(crate) fn mark_dirty(&self) {
        if let Role::Scene { parent, .. } = &self.role {
            if let Some(parent) = parent.upgrade()
                && let Some(local) = parent.as_local()
            {
                local.mark_dirty();
            }
            return;
        }
        let listener = self
            .state_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener
            && let Err(err) = listener.state_changed()
        {
            tracing::warn!(error = %err, "failed to flush thing state");
        }
    }

    pub(crate) fn copy_state(&self) -> ValueMap {
        let values: ValueMap = self
            .properties
            .iter()
            .filter(|property| property.writable && !property.derived)
            .filter_map(|property| Some((property.name.to_string(), self.committed_value(property.name)?)))
            .collect();
        let mut state = ValueMap::from([(STATE_VALUES.to_string(), Value::Map(values))]);
        if let Some(scenes) = &self.scenes {
            state.insert(STATE_SCENES.to_string(), Value::Map(scenes.export()));
        }
        state
    }

    /// Restore persisted state, or return to defaults when there is none.
    pub(crate) fn init_with_state(&self, this: &Thing, state: Option<ValueMap>) {
        if let Some(engine) = &self.transitions {
            engine.cancel_all();
        }
        let mut state = state.unwrap_or_default();
        let mut restored = self.defaults.clone();
        if let Some(Value::Map(values)) = state.remove(STATE_VALUES) {
            restored.extend(self.restore_values(values));
        }
        let removed: Vec<(String, Option<Value>)> = {
            let mut values = self.lock_values();
            let removed = values
                .keys()
                .filter(|key| !restored.contains_key(*key))
                .map(|key| (key.clone(), None))
                .collect();
            values.clear();
            removed
        };
        self.commit(this, restored);
        if !removed.is_empty() {
            this.notify_changes(&removed);
        }
        if let Some(scenes) = &self.scenes {
            let snapshots = match state.remove(STATE_SCENES) {
                Some(Value::Map(snapshots)) => snapshots
                    .into_iter()
                    .filter_map(|(scene_id, snapshot)| Some((scene_id, self.restore_values(snapshot.into_map()?))))
                    .collect(),
                _ => BTreeMap::new(),
            };
            scenes.import(this, snapshots);
        }
    }

    /// Keep the stored entries that still validate, dropping the rest.
    fn restore_values(&self, values: ValueMap) -> ValueMap {
        values
            .into_iter()
            .filter_map(|(key, value)| match self.validate(&key, &value) {
                Ok(value) => Some((key, value)),
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "dropping stored value");
                    None
                }
            })
            .collect()
    }

    pub(crate) fn set_state_listener(&self, listener: Option<Arc<dyn StateListener>>) {
        *self
            .state_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }
}

impl PropertyAccessible for LocalThing {
    fn fetch_value(&self, this: &Thing, key: &str, _modifiers: &[Modifier]) -> Task<Option<Value>> {
        Task::ready(self.live_value(this, key))
    }

    fn cached_value(&self, this: &Thing, key: &str) -> Option<Value> {
        self.live_value(this, key)
    }

    fn set_value(&self, this: &Thing, key: &str, value: Value, modifiers: &[Modifier]) -> Task<()> {
        Task::from_result(self.write(this, ValueMap::from([(key.to_string(), value)]), modifiers))
    }

    fn mutate_value(&self, this: &Thing, key: &str, mutation: Mutation, modifiers: &[Modifier]) -> Task<()> {
        Task::from_result(self.mutate(this, key, &mutation, modifiers))
    }

    fn apply_properties(&self, this: &Thing, properties: ValueMap, modifiers: &[Modifier]) -> Task<()> {
        Task::from_result(self.write(this, properties, modifiers))
    }

    fn fetch_section(&self, this: &Thing, section: Section, _modifiers: &[Modifier]) -> Task<ValueMap> {
        Task::ready(self.section_values(this, section))
    }

    fn copy_cached_section(&self, this: &Thing, section: Section) -> ValueMap {
        self.section_values(this, section)
    }

    fn fetch_supported_keys(&self, _this: &Thing) -> Task<BTreeSet<String>> {
        let properties = self.properties.iter().map(|property| property.name);
        let methods = self.methods.iter().map(|method| method.name);
        Task::ready(properties.chain(methods).map(str::to_string).collect())
    }

    fn invoke_method(&self, this: &Thing, method: &str, args: ValueMap, _returns: ValueType) -> Task<Value> {
        Task::from_result(self.invoke(this, method, &args))
    }

    fn fetch_children_for_trait(&self, this: &Thing, trait_id: &str) -> Task<Vec<Thing>> {
        Task::ready(self.cached_children(this, trait_id))
    }

    fn cached_children(&self, _this: &Thing, trait_id: &str) -> Vec<Thing> {
        match &self.scenes {
            Some(scenes) if trait_id == scene::TRAIT_ID => scenes.children(),
            _ => Vec::new(),
        }
    }

    fn id_for_child(&self, _this: &Thing, child: &Thing) -> Option<String> {
        self.child_path(child).map(|(_, id)| id)
    }

    fn delete(&self, _this: &Thing) -> Task<bool> {
        let Role::Scene { parent, scene_id } = &self.role else {
            return Task::ready(false);
        };
        let deleted = parent.upgrade().is_some_and(|parent| {
            parent
                .as_local()
                .and_then(LocalThing::scenes)
                .is_some_and(|scenes| scenes.delete(&parent, scene_id))
        });
        if deleted {
            self.mark_dirty();
        }
        Task::ready(deleted)
    }
}

impl Hostable for LocalThing {
    fn on_hosted(&self, this: &Thing, technology: TechnologyId) -> Result<(), MeshError> {
        if self.is_scene() {
            return Err(Rejection::NotHostable(this.id().to_string()).into());
        }
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(technology);
        Ok(())
    }

    fn on_unhosted(&self, _this: &Thing, technology: TechnologyId) {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&technology);
    }
}
