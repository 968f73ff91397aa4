//! Group that applies every operation to each of its members.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use thingmesh_domain::error::{InternalError, MeshError, Rejection};
use thingmesh_domain::modifier::{Modifier, Mutation};
use thingmesh_domain::section::Section;
use thingmesh_domain::value::{Value, ValueMap};
use thingmesh_domain::value_type::ValueType;

use crate::executor::Task;
use crate::ports::Technology;
use crate::thing::Thing;
use crate::thing::capability::PropertyAccessible;

/// Members are things hosted by the owning technology.
///
/// Writes notify the group's listeners as soon as they are dispatched.
/// Reads ask every member and keep the first answer, in membership order.
pub(crate) struct FanOut {
    technology: Weak<dyn Technology>,
    members: Mutex<Vec<Thing>>,
}

/// Successful outcomes in order; failures are logged and skipped.
fn answers<T>(results: Vec<Result<T, MeshError>>) -> impl Iterator<Item = T> {
    results.into_iter().filter_map(|result| {
        result
            .inspect_err(|err| tracing::warn!(error = %err, "group member failed to answer"))
            .ok()
    })
}

impl FanOut {
    pub(crate) fn new(technology: Weak<dyn Technology>) -> Self {
        Self {
            technology,
            members: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Thing>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn members(&self) -> Vec<Thing> {
        self.lock().clone()
    }

    pub(crate) fn has_members(&self) -> bool {
        !self.lock().is_empty()
    }

    pub(crate) fn add_member(&self, this: &Thing, member: &Thing) -> Task<()> {
        let Some(technology) = self.technology.upgrade() else {
            return Task::failed(InternalError::Invariant("group outlived its technology"));
        };
        if member == this || (member.is_group() && member.technology_id() == Some(technology.id())) {
            return Task::failed(Rejection::NativeGroup);
        }
        if !technology.is_hosted(member) {
            return Task::failed(Rejection::NotHostedLocally(member.id().to_string()));
        }
        let mut members = self.lock();
        if !members.contains(member) {
            members.push(member.clone());
        }
        Task::ready(())
    }

    pub(crate) fn remove_member(&self, member: &Thing) -> Task<()> {
        self.lock().retain(|known| known != member);
        Task::ready(())
    }

    fn for_each<T, F>(&self, operation: F) -> Vec<Task<T>>
    where
        T: Send + 'static,
        F: Fn(&Thing) -> Task<T>,
    {
        self.members().iter().map(operation).collect()
    }

    fn write(&self, this: &Thing, tasks: Vec<Task<()>>, changes: &[(String, Option<Value>)]) -> Task<()> {
        if !tasks.is_empty() && !changes.is_empty() {
            this.notify_changes(changes);
        }
        Task::join_all(tasks).map(|_| Ok(()))
    }
}

impl PropertyAccessible for FanOut {
    fn fetch_value(&self, _this: &Thing, key: &str, modifiers: &[Modifier]) -> Task<Option<Value>> {
        let tasks = self.for_each(|member| member.fetch_value(key, modifiers));
        Task::settle_all(tasks).map(|results| Ok(answers(results).flatten().next()))
    }

    fn cached_value(&self, _this: &Thing, key: &str) -> Option<Value> {
        self.members().iter().find_map(|member| member.cached_value(key))
    }

    fn set_value(&self, this: &Thing, key: &str, value: Value, modifiers: &[Modifier]) -> Task<()> {
        let tasks = self.for_each(|member| member.set_value(key, value.clone(), modifiers));
        self.write(this, tasks, &[(key.to_string(), Some(value))])
    }

    fn mutate_value(&self, this: &Thing, key: &str, mutation: Mutation, modifiers: &[Modifier]) -> Task<()> {
        let tasks = self.for_each(|member| member.mutate_value(key, mutation.clone(), modifiers));
        let group = this.clone();
        let key = key.to_string();
        Task::join_all(tasks).map(move |_| {
            let value = group.cached_value(&key);
            group.notify_changes(&[(key, value)]);
            Ok(())
        })
    }

    fn apply_properties(&self, this: &Thing, properties: ValueMap, modifiers: &[Modifier]) -> Task<()> {
        let tasks = self.for_each(|member| member.apply_properties_with(properties.clone(), modifiers));
        let changes: Vec<_> = properties
            .into_iter()
            .map(|(key, value)| (key, Some(value)))
            .collect();
        self.write(this, tasks, &changes)
    }

    fn fetch_section(&self, _this: &Thing, section: Section, modifiers: &[Modifier]) -> Task<ValueMap> {
        let tasks = self.for_each(|member| member.fetch_section_with(section, modifiers));
        Task::settle_all(tasks).map(|results| {
            let mut merged = ValueMap::new();
            for values in answers(results) {
                for (key, value) in values {
                    merged.entry(key).or_insert(value);
                }
            }
            Ok(merged)
        })
    }

    fn copy_cached_section(&self, _this: &Thing, section: Section) -> ValueMap {
        let mut merged = ValueMap::new();
        for member in self.members() {
            for (key, value) in member.copy_cached_section(section) {
                merged.entry(key).or_insert(value);
            }
        }
        merged
    }

    fn fetch_supported_keys(&self, _this: &Thing) -> Task<BTreeSet<String>> {
        let tasks = self.for_each(Thing::fetch_supported_keys);
        Task::settle_all(tasks).map(|results| Ok(answers(results).flatten().collect()))
    }

    /// Yields one result per member, in membership order.
    fn invoke_method(&self, _this: &Thing, method: &str, args: ValueMap, returns: ValueType) -> Task<Value> {
        let tasks = self.for_each(|member| member.invoke_value(method, args.clone(), returns));
        Task::join_all(tasks).map(|results| Ok(Value::Array(results)))
    }

    fn fetch_children_for_trait(&self, _this: &Thing, _trait_id: &str) -> Task<Vec<Thing>> {
        Task::ready(Vec::new())
    }

    fn id_for_child(&self, _this: &Thing, _child: &Thing) -> Option<String> {
        None
    }

    fn delete(&self, _this: &Thing) -> Task<bool> {
        Task::ready(false)
    }
}
