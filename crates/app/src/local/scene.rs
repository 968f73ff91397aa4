//! Saved scenes of a local thing.
//!
//! Each scene is a child thing holding a snapshot of the parent's scene
//! state. The snapshot lives in the child, so writing to the child changes
//! what the next recall applies.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thingmesh_domain::catalog::scene;
use thingmesh_domain::error::{InternalError, MeshError};
use thingmesh_domain::value::{Value, ValueMap};

use crate::local::LocalThing;
use crate::thing::Thing;

#[derive(Default)]
pub(crate) struct SceneManager {
    scenes: Mutex<BTreeMap<String, Thing>>,
    /// Last recalled scene and the snapshot it applied.
    active: Mutex<Option<(String, ValueMap)>>,
}

fn snapshot_of(child: &Thing) -> ValueMap {
    child
        .as_local()
        .map(LocalThing::scene_values)
        .unwrap_or_default()
}

impl SceneManager {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Thing>> {
        self.scenes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<(String, ValueMap)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Capture the parent's committed scene state under `scene_id`.
    ///
    /// Saving over an existing id overwrites its snapshot in place; only a
    /// new id creates a child and notifies child listeners.
    pub(crate) fn save(&self, parent: &Thing, local: &LocalThing, scene_id: String) -> Result<Thing, MeshError> {
        let snapshot = local.scene_state();
        let existing = self.lock().get(&scene_id).cloned();
        if let Some(child) = existing {
            if let Some(child_local) = child.as_local() {
                child_local.commit(&child, snapshot);
            }
            tracing::debug!(thing = %parent.id(), scene = %scene_id, "scene overwritten");
            return Ok(child);
        }
        let child = LocalThing::scene_child(parent, scene_id.clone(), snapshot)
            .ok_or(InternalError::Invariant("scene parent is not a local thing"))?;
        self.lock().insert(scene_id.clone(), child.clone());
        tracing::debug!(thing = %parent.id(), scene = %scene_id, "scene saved");
        parent.notify_child_added(scene::TRAIT_ID, &child);
        Ok(child)
    }

    pub(crate) fn snapshot(&self, scene_id: &str) -> Option<ValueMap> {
        let child = self.lock().get(scene_id).cloned()?;
        Some(snapshot_of(&child))
    }

    pub(crate) fn set_active(&self, scene_id: String, snapshot: ValueMap) {
        *self.lock_active() = Some((scene_id, snapshot));
    }

    /// Id of the recalled scene while the committed state still matches it.
    pub(crate) fn active_scene_id(&self, local: &LocalThing) -> Option<String> {
        let (scene_id, snapshot) = self.lock_active().clone()?;
        snapshot
            .iter()
            .all(|(key, value)| local.committed_value(key).as_ref() == Some(value))
            .then_some(scene_id)
    }

    /// Remove a scene. Returns `false` when no scene has this id.
    pub(crate) fn delete(&self, parent: &Thing, scene_id: &str) -> bool {
        let Some(child) = self.lock().remove(scene_id) else {
            return false;
        };
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|(id, _)| id == scene_id) {
            *active = None;
        }
        drop(active);
        tracing::debug!(thing = %parent.id(), scene = %scene_id, "scene deleted");
        parent.notify_child_removed(scene::TRAIT_ID, &child);
        true
    }

    pub(crate) fn children(&self) -> Vec<Thing> {
        self.lock().values().cloned().collect()
    }

    pub(crate) fn id_for(&self, child: &Thing) -> Option<String> {
        self.lock()
            .iter()
            .find_map(|(scene_id, known)| (known == child).then(|| scene_id.clone()))
    }

    /// Every snapshot keyed by scene id.
    pub(crate) fn export(&self) -> ValueMap {
        self.lock()
            .iter()
            .map(|(scene_id, child)| (scene_id.clone(), Value::Map(snapshot_of(child))))
            .collect()
    }

    /// Replace all scenes with `snapshots` without notifying listeners.
    pub(crate) fn import(&self, parent: &Thing, snapshots: BTreeMap<String, ValueMap>) {
        let restored = snapshots
            .into_iter()
            .filter_map(|(scene_id, snapshot)| {
                let child = LocalThing::scene_child(parent, scene_id.clone(), snapshot)?;
                Some((scene_id, child))
            })
            .collect();
        *self.lock() = restored;
        *self.lock_active() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use thingmesh_domain::catalog::{level, onoff};
    use thingmesh_domain::modifier::Modifier;

    use crate::executor::Executor;
    use crate::local::LocalThingBuilder;
    use crate::persistence::PersistentState;
    use crate::thing::listener::ChildListener;

    use super::*;

    fn bulb() -> Thing {
        LocalThingBuilder::dimmable_light().build(&Executor::current().unwrap())
    }

    async fn save(thing: &Thing, scene_id: &str) -> Thing {
        thing
            .invoke_method(
                &scene::save_method::<Thing>(),
                scene::PARAM_SCENE_ID.with(scene_id.to_string()),
            )
            .await
            .unwrap()
    }

    async fn set(thing: &Thing, on: bool, level: f32) {
        thing
            .apply_properties_with(
                ValueMap::from([
                    ("s/onof/v".to_string(), Value::Bool(on)),
                    ("s/levl/v".to_string(), Value::Float(f64::from(level))),
                ]),
                &[Modifier::Duration(0.0)],
            )
            .await
            .unwrap();
    }

    async fn recall(thing: &Thing, scene_id: &str) {
        thing
            .set_property(&scene::STAT_SCENE_ID, scene_id.to_string())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    async fn state(thing: &Thing) -> (bool, f32) {
        (
            thing.fetch_property(&onoff::STAT_VALUE).await.unwrap().unwrap(),
            thing.fetch_property(&level::STAT_VALUE).await.unwrap().unwrap(),
        )
    }

    #[derive(Default)]
    struct Children {
        added: std::sync::Mutex<Vec<Thing>>,
        removed: std::sync::Mutex<Vec<Thing>>,
    }

    impl ChildListener for Children {
        fn on_child_added(&self, _: &Thing, _: &str, child: &Thing) {
            self.added.lock().unwrap().push(child.clone());
        }

        fn on_child_removed(&self, _: &Thing, _: &str, child: &Thing) {
            self.removed.lock().unwrap().push(child.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_recall_scenes_and_reflect_child_edits() {
        let thing = bulb();
        set(&thing, false, 0.0).await;
        save(&thing, "off").await;
        set(&thing, true, 1.0).await;
        save(&thing, "on").await;
        set(&thing, true, 0.25).await;
        let dim = save(&thing, "dim").await;

        recall(&thing, "on").await;
        assert_eq!(state(&thing).await, (true, 1.0));

        recall(&thing, "off").await;
        assert_eq!(state(&thing).await, (false, 0.0));

        dim.set_property(&level::STAT_VALUE, 0.5).await.unwrap();
        recall(&thing, "dim").await;
        assert_eq!(state(&thing).await, (true, 0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn should_forget_active_scene_when_state_diverges() {
        let thing = bulb();
        set(&thing, true, 0.25).await;
        save(&thing, "dim").await;
        set(&thing, true, 1.0).await;

        recall(&thing, "dim").await;
        let active = thing.fetch_property(&scene::STAT_SCENE_ID).await.unwrap();
        assert_eq!(active.as_deref(), Some("dim"));

        set(&thing, true, 0.75).await;
        assert_eq!(thing.fetch_property(&scene::STAT_SCENE_ID).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn should_ignore_unknown_scene_id() {
        let thing = bulb();
        set(&thing, true, 0.3).await;
        recall(&thing, "missing").await;
        assert_eq!(state(&thing).await, (true, 0.3));
    }

    #[tokio::test]
    async fn should_keep_one_child_when_saving_same_id_twice() {
        let thing = bulb();
        let listener = Arc::new(Children::default());
        thing.register_child_listener(scene::TRAIT_ID, listener.clone());

        let first = save(&thing, "dim").await;
        let second = save(&thing, "dim").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(first, second);
        assert_eq!(thing.fetch_children_for_trait(scene::TRAIT_ID).await.unwrap().len(), 1);
        assert_eq!(listener.added.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_fire_one_removal_and_keep_other_scenes_when_deleting() {
        let thing = bulb();
        let listener = Arc::new(Children::default());
        thing.register_child_listener(scene::TRAIT_ID, listener.clone());
        thing.register_child_listener(scene::TRAIT_ID, listener.clone());

        set(&thing, true, 0.25).await;
        let dim = save(&thing, "dim").await;
        set(&thing, true, 1.0).await;
        let on = save(&thing, "on").await;

        assert_eq!(thing.id_for_child(&dim).as_deref(), Some("dim"));
        assert!(dim.delete().await.unwrap());
        assert!(!dim.delete().await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(*listener.removed.lock().unwrap(), vec![dim]);
        let remaining = thing.fetch_children_for_trait(scene::TRAIT_ID).await.unwrap();
        assert_eq!(remaining, vec![on.clone()]);
        assert_eq!(
            on.fetch_property(&level::STAT_VALUE).await.unwrap(),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn should_report_existing_children_to_new_listener() {
        let thing = bulb();
        save(&thing, "a").await;
        save(&thing, "b").await;
        let listener = Arc::new(Children::default());
        thing.register_child_listener(scene::TRAIT_ID, listener.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(listener.added.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn should_restore_scenes_from_state() {
        let source = bulb();
        set(&source, true, 0.25).await;
        save(&source, "dim").await;
        let state = source.copy_state();

        let target = bulb();
        target.init_with_state(Some(state));
        let children = target.fetch_children_for_trait(scene::TRAIT_ID).await.unwrap();
        assert_eq!(children.len(), 1);
        recall(&target, "dim").await;
        assert_eq!(self::state(&target).await, (true, 0.25));
    }
}
