use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thingmesh_domain::error::{MeshError, PersistenceError};
use thingmesh_domain::value::{Value, ValueMap};

use crate::persistence::{PersistentState, StateListener};

/// Persistent object made of named children, so several objects can be
/// stored under one name of a [`PersistentStateManager`].
///
/// Snapshots of children that are not registered yet are kept until they
/// are, and stay in the aggregate snapshot meanwhile.
///
/// [`PersistentStateManager`]: crate::persistence::PersistentStateManager
pub struct NestedStateManager {
    me: Weak<Self>,
    children: Mutex<BTreeMap<String, Arc<dyn PersistentState>>>,
    stored: Mutex<ValueMap>,
    listener: Mutex<Option<Arc<dyn StateListener>>>,
}

/// Forwards a child's dirty signal to whoever listens to the parent.
struct Relay {
    parent: Weak<NestedStateManager>,
}

impl StateListener for Relay {
    fn state_changed(&self) -> Result<(), MeshError> {
        match self.parent.upgrade() {
            Some(parent) => parent.signal(),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NestedStateManager {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            children: Mutex::default(),
            stored: Mutex::default(),
            listener: Mutex::default(),
        })
    }

    fn signal(&self) -> Result<(), MeshError> {
        let listener = lock(&self.listener).clone();
        listener.map_or(Ok(()), |listener| listener.state_changed())
    }

    /// Register `object` under `name` and restore it from the part of the
    /// parent snapshot it owns.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::AlreadyManaged`] when `name` is taken.
    #[tracing::instrument(skip(self, object))]
    pub fn start_managing(&self, name: &str, object: Arc<dyn PersistentState>) -> Result<(), MeshError> {
        {
            let mut children = lock(&self.children);
            if children.contains_key(name) {
                return Err(PersistenceError::AlreadyManaged(name.to_string()).into());
            }
            children.insert(name.to_string(), Arc::clone(&object));
        }
        let snapshot = lock(&self.stored).get(name).and_then(Value::as_map).cloned();
        object.init_with_state(snapshot);
        object.set_state_listener(Some(Arc::new(Relay {
            parent: self.me.clone(),
        })));
        Ok(())
    }

    /// Unregister `name`. Its last snapshot stays part of the aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotManaged`] for an unknown name.
    #[tracing::instrument(skip(self))]
    pub fn stop_managing(&self, name: &str) -> Result<(), MeshError> {
        let object = lock(&self.children)
            .remove(name)
            .ok_or_else(|| PersistenceError::NotManaged(name.to_string()))?;
        lock(&self.stored).insert(name.to_string(), Value::Map(object.copy_state()));
        object.set_state_listener(None);
        Ok(())
    }
}

impl PersistentState for NestedStateManager {
    fn copy_state(&self) -> ValueMap {
        let children: Vec<_> = lock(&self.children)
            .iter()
            .map(|(name, child)| (name.clone(), Arc::clone(child)))
            .collect();
        let mut state = lock(&self.stored).clone();
        for (name, child) in children {
            state.insert(name, Value::Map(child.copy_state()));
        }
        state
    }

    fn init_with_state(&self, state: Option<ValueMap>) {
        let state = state.unwrap_or_default();
        let children: Vec<_> = lock(&self.children)
            .iter()
            .map(|(name, child)| (name.clone(), Arc::clone(child)))
            .collect();
        for (name, child) in children {
            child.init_with_state(state.get(&name).and_then(Value::as_map).cloned());
        }
        *lock(&self.stored) = state;
    }

    fn set_state_listener(&self, listener: Option<Arc<dyn StateListener>>) {
        *lock(&self.listener) = listener;
    }
}

#[cfg(test)]
mod tests {
    use thingmesh_domain::catalog::level;

    use super::*;
    use crate::codec::JsonCodec;
    use crate::executor::Executor;
    use crate::local::{LocalTechnology, LocalThingBuilder};
    use crate::persistence::{MemoryStateStore, PersistentStateManager};
    use crate::ports::Technology;

    #[tokio::test]
    async fn should_restore_children_when_parent_is_managed() {
        let executor = Executor::current().unwrap();
        let store = MemoryStateStore::new();

        let manager = PersistentStateManager::open(store.clone(), JsonCodec, executor.clone())
            .await
            .unwrap();
        let nested = NestedStateManager::new();
        let technology = LocalTechnology::new(executor.clone());
        let bulb = LocalThingBuilder::dimmable_light().build(&executor);
        technology.host(&bulb).unwrap();
        nested.start_managing("local", technology.clone()).unwrap();
        nested.start_managing("bulb", Arc::new(bulb.clone())).unwrap();
        manager.start_managing("node", nested.clone()).unwrap();

        technology.fetch_or_create_group_with_id("hall").await.unwrap();
        bulb.set_property(&level::STAT_VALUE, 0.5).await.unwrap();
        manager.close().await.unwrap();

        let manager = PersistentStateManager::open(store, JsonCodec, executor.clone())
            .await
            .unwrap();
        let nested = NestedStateManager::new();
        manager.start_managing("node", nested.clone()).unwrap();
        let technology = LocalTechnology::new(executor.clone());
        let bulb = LocalThingBuilder::dimmable_light().build(&executor);
        nested.start_managing("local", technology.clone()).unwrap();
        nested.start_managing("bulb", Arc::new(bulb.clone())).unwrap();

        assert_eq!(bulb.cached_property(&level::STAT_VALUE).unwrap(), Some(0.5));
        assert_eq!(
            technology.copy_state().get("groups"),
            Some(&Value::Array(vec![Value::from("hall")]))
        );
    }

    #[tokio::test]
    async fn should_reject_duplicate_child() {
        let nested = NestedStateManager::new();
        nested
            .start_managing("a", NestedStateManager::new())
            .unwrap();
        let err = nested
            .start_managing("a", NestedStateManager::new())
            .unwrap_err();
        assert!(matches!(err, MeshError::Persistence(PersistenceError::AlreadyManaged(_))));
        assert!(nested.stop_managing("b").is_err());
    }
}
