//! The local technology: things implemented in this process.
//!
//! Hosted things are addressed as `local:/{index}/` and groups as
//! `local:/g/{group-id}/`. Groups created here fan every operation out to
//! their members.

mod scene;
mod thing;
mod transition;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thingmesh_domain::error::{MeshError, Rejection};
use thingmesh_domain::id::{TechnologyId, short_token};
use thingmesh_domain::uri::Uri;
use thingmesh_domain::value::{Value, ValueMap};

use crate::executor::{Executor, Task};
use crate::group::GroupThing;
use crate::path::{self, ResourcePath, Root};
use crate::persistence::{PersistentState, StateListener};
use crate::ports::Technology;
use crate::thing::Thing;

pub use self::thing::{LocalThing, LocalThingBuilder};

const SCHEME: &str = "local";
const STATE_GROUPS: &str = "groups";

/// Technology owning in-process groups and hosting local things.
pub struct LocalTechnology {
    id: TechnologyId,
    executor: Executor,
    me: Weak<Self>,
    /// Slot `i` holds the thing at index `i + 1`; unhosting leaves a hole
    /// so other indexes stay stable.
    hosted: Mutex<Vec<Option<Thing>>>,
    hosted_groups: Mutex<BTreeSet<String>>,
    groups: Mutex<BTreeMap<String, Thing>>,
    state_listener: Mutex<Option<Arc<dyn StateListener>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalTechnology {
    #[must_use]
    pub fn new(executor: Executor) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: TechnologyId::new(),
            executor,
            me: me.clone(),
            hosted: Mutex::default(),
            hosted_groups: Mutex::default(),
            groups: Mutex::default(),
            state_listener: Mutex::default(),
        })
    }

    fn index_of(&self, thing: &Thing) -> Option<usize> {
        lock(&self.hosted)
            .iter()
            .position(|slot| slot.as_ref() == Some(thing))
            .map(|position| position + 1)
    }

    fn is_own_group(&self, thing: &Thing) -> bool {
        thing.is_group() && thing.technology_id() == Some(self.id)
    }

    fn group_with_id(&self, group_id: &str) -> Thing {
        let (group, created) = {
            let mut groups = lock(&self.groups);
            if let Some(group) = groups.get(group_id) {
                (group.clone(), false)
            } else {
                let technology: Weak<dyn Technology> = self.me.clone();
                let group = GroupThing::fan_out(&self.executor, technology, self.id, group_id.to_string());
                groups.insert(group_id.to_string(), group.clone());
                (group, true)
            }
        };
        if created {
            tracing::debug!(group = %group_id, "local group created");
            self.mark_dirty();
        }
        group
    }

    fn mark_dirty(&self) {
        let listener = lock(&self.state_listener).clone();
        if let Some(listener) = listener
            && let Err(err) = listener.state_changed()
        {
            tracing::warn!(error = %err, "failed to flush local technology state");
        }
    }
}

impl Technology for LocalTechnology {
    fn id(&self) -> TechnologyId {
        self.id
    }

    fn name(&self) -> &'static str {
        "local"
    }

    fn executor(&self) -> &Executor {
        &self.executor
    }

    fn prepare_to_host(&self) -> Result<(), MeshError> {
        Ok(())
    }

    #[tracing::instrument(skip(self, thing), fields(thing = %thing.id()))]
    fn host(&self, thing: &Thing) -> Result<(), MeshError> {
        if let Some(group_id) = thing.group_id() {
            if !self.is_own_group(thing) {
                return Err(Rejection::NotHostable(thing.id().to_string()).into());
            }
            thing.on_hosted(self.id)?;
            lock(&self.hosted_groups).insert(group_id.to_string());
            return Ok(());
        }
        if self.index_of(thing).is_some() {
            return Ok(());
        }
        thing.on_hosted(self.id)?;
        lock(&self.hosted).push(Some(thing.clone()));
        tracing::info!(kind = thing.kind_name(), "thing hosted");
        Ok(())
    }

    #[tracing::instrument(skip(self, thing), fields(thing = %thing.id()))]
    fn unhost(&self, thing: &Thing) {
        let removed = match thing.group_id() {
            Some(group_id) => lock(&self.hosted_groups).remove(group_id),
            None => lock(&self.hosted)
                .iter_mut()
                .find(|slot| slot.as_ref() == Some(thing))
                .and_then(Option::take)
                .is_some(),
        };
        if removed {
            thing.on_unhosted(self.id);
            tracing::info!("thing unhosted");
        }
    }

    fn copy_hosted_things(&self) -> Vec<Thing> {
        let mut things: Vec<Thing> = lock(&self.hosted).iter().flatten().cloned().collect();
        let hosted_groups = lock(&self.hosted_groups).clone();
        let groups = lock(&self.groups);
        things.extend(hosted_groups.iter().filter_map(|group_id| groups.get(group_id).cloned()));
        things
    }

    fn native_uri_for_thing(&self, thing: &Thing) -> Result<Uri, MeshError> {
        let uri = if self.is_own_group(thing) {
            thing
                .group_id()
                .and_then(|group_id| format!("{SCHEME}:{}", path::group_path(group_id)).parse().ok())
        } else {
            path::resolve_child_uri(thing, |candidate| {
                let index = self.index_of(candidate)?;
                format!("{SCHEME}:{}", path::thing_path(index)).parse().ok()
            })
        };
        uri.ok_or_else(|| MeshError::UnassociatedResource {
            resource: thing.id().to_string(),
        })
    }

    fn thing_for_native_uri(&self, uri: &Uri) -> Result<Thing, MeshError> {
        if uri.scheme() != Some(SCHEME) {
            return Err(MeshError::UnassociatedResource { resource: uri.to_string() });
        }
        let unknown = || MeshError::UnknownResource { uri: uri.to_string() };
        let path = ResourcePath::parse(uri.path())?;
        let root = match &path.root {
            Root::Index(index) => lock(&self.hosted).get(index - 1).cloned().flatten(),
            Root::Group(group_id) => lock(&self.groups).get(group_id).cloned(),
        }
        .ok_or_else(unknown)?;
        path::walk_children(root, &path.children).ok_or_else(unknown)
    }

    fn create_new_group(&self) -> Task<Thing> {
        Task::ready(self.group_with_id(&short_token()))
    }

    fn fetch_or_create_group_with_id(&self, group_id: &str) -> Task<Thing> {
        Task::ready(self.group_with_id(group_id))
    }
}

/// Persists the ids of the groups created here. Membership is rebuilt by
/// whoever hosts the members.
impl PersistentState for LocalTechnology {
    fn copy_state(&self) -> ValueMap {
        let ids = lock(&self.groups).keys().cloned().map(Value::String).collect();
        ValueMap::from([(STATE_GROUPS.to_string(), Value::Array(ids))])
    }

    fn init_with_state(&self, state: Option<ValueMap>) {
        let Some(Value::Array(ids)) = state.and_then(|mut state| state.remove(STATE_GROUPS)) else {
            return;
        };
        let technology: Weak<dyn Technology> = self.me.clone();
        let mut groups = lock(&self.groups);
        for group_id in ids.iter().filter_map(Value::as_str) {
            groups.entry(group_id.to_string()).or_insert_with(|| {
                GroupThing::fan_out(&self.executor, technology.clone(), self.id, group_id.to_string())
            });
        }
    }

    fn set_state_listener(&self, listener: Option<Arc<dyn StateListener>>) {
        *lock(&self.state_listener) = listener;
    }
}
