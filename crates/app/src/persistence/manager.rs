use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thingmesh_domain::error::{CorruptStateError, MeshError, PersistenceError};
use thingmesh_domain::value::{Value, ValueMap};

use crate::executor::Executor;
use crate::persistence::{PersistentState, StateListener};
use crate::ports::{Codec, StateStore};

/// Keeps named objects in sync with one blob in a [`StateStore`].
///
/// Dirty signals update the in-memory image right away. A single
/// background writer then stores the latest image, so a burst of signals
/// costs one write. [`close`](Self::close) waits for that writer and
/// stores the final image.
pub struct PersistentStateManager<S, C> {
    inner: Arc<Inner<S, C>>,
}

struct Inner<S, C> {
    store: S,
    codec: C,
    executor: Executor,
    shared: Mutex<Shared>,
    writer: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct Shared {
    snapshots: ValueMap,
    managed: BTreeMap<String, Arc<dyn PersistentState>>,
    /// Last stamp handed out. Taken before each `copy_state`.
    stamp: u64,
    /// Stamp of the snapshot held for each name.
    stamps: BTreeMap<String, u64>,
    /// Stamp of the last `reset_all`.
    reset_stamp: u64,
    pending: bool,
    writing: bool,
    closed: bool,
}

impl Shared {
    fn check_open(&self) -> Result<(), MeshError> {
        if self.closed {
            return Err(PersistenceError::Closed.into());
        }
        Ok(())
    }

    fn next_stamp(&mut self) -> u64 {
        self.stamp += 1;
        self.stamp
    }

    /// Whether a snapshot pulled under `stamp` is older than what is held.
    fn is_stale(&self, name: &str, stamp: u64) -> bool {
        stamp < self.reset_stamp || self.stamps.get(name).is_some_and(|held| *held > stamp)
    }
}

/// Listener handed to each managed object.
struct Flusher<S, C> {
    manager: Weak<Inner<S, C>>,
    name: String,
}

impl<S, C> StateListener for Flusher<S, C>
where
    S: StateStore + 'static,
    C: Codec + 'static,
{
    fn state_changed(&self) -> Result<(), MeshError> {
        match self.manager.upgrade() {
            Some(manager) => manager.flush(&self.name),
            None => Ok(()),
        }
    }
}

impl<S, C> Inner<S, C>
where
    S: StateStore + 'static,
    C: Codec + 'static,
{
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pull the snapshot of `name` into the image and schedule a write.
    ///
    /// The snapshot is encoded alone first: when that fails, the image
    /// keeps the previous snapshot. Concurrent flushes of one name may
    /// finish in any order; a snapshot pulled before the one already held
    /// is dropped.
    fn flush(self: &Arc<Self>, name: &str) -> Result<(), MeshError> {
        let (object, stamp) = {
            let mut shared = self.lock();
            shared.check_open()?;
            let object = shared
                .managed
                .get(name)
                .cloned()
                .ok_or_else(|| PersistenceError::NotManaged(name.to_string()))?;
            (object, shared.next_stamp())
        };
        let snapshot = object.copy_state();
        self.codec.encode(&snapshot)?;
        {
            let mut shared = self.lock();
            if !shared.managed.contains_key(name) {
                return Ok(());
            }
            if shared.is_stale(name, stamp) {
                tracing::debug!(name, stamp, "dropped stale snapshot");
                return Ok(());
            }
            shared.snapshots.insert(name.to_string(), Value::Map(snapshot));
            shared.stamps.insert(name.to_string(), stamp);
        }
        tracing::debug!(name, "flushed state");
        self.schedule_write();
        Ok(())
    }

    fn schedule_write(self: &Arc<Self>) {
        {
            let mut shared = self.lock();
            shared.pending = true;
            if shared.writing || shared.closed {
                return;
            }
            shared.writing = true;
        }
        let inner = Arc::clone(self);
        self.executor.execute(async move { inner.write_pending().await });
    }

    async fn write_pending(&self) {
        loop {
            let _writer = self.writer.lock().await;
            let image = {
                let mut shared = self.lock();
                if !shared.pending || shared.closed {
                    shared.writing = false;
                    return;
                }
                shared.pending = false;
                shared.snapshots.clone()
            };
            if let Err(err) = self.write_image(&image).await {
                tracing::warn!(error = %err, "failed to write state");
            }
        }
    }

    async fn write_image(&self, image: &ValueMap) -> Result<(), MeshError> {
        let blob = self.codec.encode(image)?;
        self.store.write(blob).await
    }
}

impl<S, C> PersistentStateManager<S, C>
where
    S: StateStore + 'static,
    C: Codec + 'static,
{
    /// Read the current image from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::CorruptPersistentState`] when the store cannot
    /// be read, the stored blob does not decode, or one of its entries is
    /// not a map.
    #[tracing::instrument(skip_all)]
    pub async fn open(store: S, codec: C, executor: Executor) -> Result<Self, MeshError> {
        let blob = store
            .read()
            .await
            .map_err(|err| CorruptStateError::Unreadable(Box::new(err)))?;
        let snapshots = match blob {
            Some(blob) => codec.decode(&blob).map_err(CorruptStateError::Undecodable)?,
            None => ValueMap::new(),
        };
        if let Some((name, _)) = snapshots.iter().find(|(_, snapshot)| snapshot.as_map().is_none()) {
            return Err(CorruptStateError::NotAMap(name.clone()).into());
        }
        tracing::debug!(entries = snapshots.len(), "opened state store");
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                codec,
                executor,
                shared: Mutex::new(Shared {
                    snapshots,
                    ..Shared::default()
                }),
                writer: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Restore `object` from the snapshot stored under `name` and follow
    /// its dirty signals from now on.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::AlreadyManaged`] when `name` is taken and
    /// [`PersistenceError::Closed`] after [`close`](Self::close).
    #[tracing::instrument(skip(self, object))]
    pub fn start_managing(&self, name: &str, object: Arc<dyn PersistentState>) -> Result<(), MeshError> {
        let snapshot = {
            let mut shared = self.inner.lock();
            shared.check_open()?;
            if shared.managed.contains_key(name) {
                return Err(PersistenceError::AlreadyManaged(name.to_string()).into());
            }
            shared.managed.insert(name.to_string(), Arc::clone(&object));
            shared.snapshots.get(name).and_then(Value::as_map).cloned()
        };
        object.init_with_state(snapshot);
        object.set_state_listener(Some(Arc::new(Flusher {
            manager: Arc::downgrade(&self.inner),
            name: name.to_string(),
        })));
        Ok(())
    }

    /// Stop following `name`. What was already flushed stays stored.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotManaged`] for an unknown name.
    #[tracing::instrument(skip(self))]
    pub fn stop_managing(&self, name: &str) -> Result<(), MeshError> {
        let object = {
            let mut shared = self.inner.lock();
            shared.check_open()?;
            shared
                .managed
                .remove(name)
                .ok_or_else(|| PersistenceError::NotManaged(name.to_string()))?
        };
        object.set_state_listener(None);
        Ok(())
    }

    /// Store the current snapshot of `name` whether or not it signalled.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotManaged`] for an unknown name and
    /// [`MeshError::Codec`] when the snapshot cannot be encoded.
    pub fn refresh(&self, name: &str) -> Result<(), MeshError> {
        self.inner.flush(name)
    }

    /// [`refresh`](Self::refresh) every managed object.
    ///
    /// # Errors
    ///
    /// Every object is refreshed even when some fail; the first failure is
    /// returned.
    pub fn refresh_all(&self) -> Result<(), MeshError> {
        let names: Vec<String> = {
            let shared = self.inner.lock();
            shared.check_open()?;
            shared.managed.keys().cloned().collect()
        };
        let mut first = None;
        for name in names {
            if let Err(err) = self.inner.flush(&name) {
                tracing::warn!(name = %name, error = %err, "failed to refresh state");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Discard the snapshot stored under `name`. A managed object starts
    /// over fresh.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Closed`] after [`close`](Self::close).
    #[tracing::instrument(skip(self))]
    pub fn reset(&self, name: &str) -> Result<(), MeshError> {
        let object = {
            let mut shared = self.inner.lock();
            shared.check_open()?;
            shared.snapshots.remove(name);
            let stamp = shared.next_stamp();
            shared.stamps.insert(name.to_string(), stamp);
            shared.managed.get(name).cloned()
        };
        if let Some(object) = object {
            object.init_with_state(None);
        }
        self.inner.schedule_write();
        Ok(())
    }

    /// Discard every stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Closed`] after [`close`](Self::close).
    #[tracing::instrument(skip(self))]
    pub fn reset_all(&self) -> Result<(), MeshError> {
        let objects: Vec<_> = {
            let mut shared = self.inner.lock();
            shared.check_open()?;
            shared.snapshots.clear();
            shared.reset_stamp = shared.next_stamp();
            shared.managed.values().cloned().collect()
        };
        for object in objects {
            object.init_with_state(None);
        }
        self.inner.schedule_write();
        Ok(())
    }

    /// Names currently managed.
    #[must_use]
    pub fn managed_names(&self) -> Vec<String> {
        self.inner.lock().managed.keys().cloned().collect()
    }

    /// Write the final image and release the store. Later calls fail with
    /// [`PersistenceError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns the store error when the final write or the release fails.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self) -> Result<(), MeshError> {
        let objects = {
            let mut shared = self.inner.lock();
            shared.check_open()?;
            shared.closed = true;
            std::mem::take(&mut shared.managed)
        };
        for object in objects.values() {
            object.set_state_listener(None);
        }
        let _writer = self.inner.writer.lock().await;
        let image = self.inner.lock().snapshots.clone();
        self.inner.write_image(&image).await?;
        self.inner.store.close().await?;
        tracing::info!(entries = image.len(), "closed state store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use thingmesh_domain::catalog::{level, onoff, scene};
    use thingmesh_domain::error::CodecError;
    use thingmesh_domain::value::Handle;

    use super::*;
    use crate::codec::JsonCodec;
    use crate::local::LocalThingBuilder;
    use crate::persistence::MemoryStateStore;
    use crate::thing::Thing;

    /// Object whose state is a plain map, signalling on every write.
    #[derive(Default)]
    struct Record {
        state: Mutex<ValueMap>,
        listener: Mutex<Option<Arc<dyn StateListener>>>,
    }

    impl Record {
        fn put(&self, key: &str, value: Value) -> Result<(), MeshError> {
            self.state.lock().unwrap().insert(key.to_string(), value);
            let listener = self.listener.lock().unwrap().clone();
            listener.map_or(Ok(()), |listener| listener.state_changed())
        }

        fn get(&self, key: &str) -> Option<Value> {
            self.state.lock().unwrap().get(key).cloned()
        }
    }

    impl PersistentState for Record {
        fn copy_state(&self) -> ValueMap {
            self.state.lock().unwrap().clone()
        }

        fn init_with_state(&self, state: Option<ValueMap>) {
            *self.state.lock().unwrap() = state.unwrap_or_default();
        }

        fn set_state_listener(&self, listener: Option<Arc<dyn StateListener>>) {
            *self.listener.lock().unwrap() = listener;
        }
    }

    async fn open(store: &MemoryStateStore) -> PersistentStateManager<MemoryStateStore, JsonCodec> {
        PersistentStateManager::open(store.clone(), JsonCodec, Executor::current().unwrap())
            .await
            .unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn should_recover_state_when_reopened_after_close() {
        let store = MemoryStateStore::new();
        let manager = open(&store).await;
        let record = Arc::new(Record::default());
        manager.start_managing("record", record.clone()).unwrap();
        record.put("answer", Value::Int(42)).unwrap();
        manager.close().await.unwrap();

        let manager = open(&store).await;
        let restored = Arc::new(Record::default());
        manager.start_managing("record", restored.clone()).unwrap();
        assert_eq!(restored.get("answer"), Some(Value::Int(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_recover_bulb_and_scenes_when_reopened() {
        let store = MemoryStateStore::new();
        let executor = Executor::current().unwrap();
        let manager = open(&store).await;
        let bulb = LocalThingBuilder::dimmable_light().build(&executor);
        manager.start_managing("bulb", Arc::new(bulb.clone())).unwrap();

        bulb.set_property(&onoff::STAT_VALUE, true).await.unwrap();
        bulb.set_property(&level::STAT_VALUE, 0.25).await.unwrap();
        bulb.invoke_method(&scene::save_method::<Thing>(), scene::PARAM_SCENE_ID.with("evening".into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        manager.close().await.unwrap();

        let manager = open(&store).await;
        let restored = LocalThingBuilder::dimmable_light().build(&executor);
        manager.start_managing("bulb", Arc::new(restored.clone())).unwrap();
        assert_eq!(restored.cached_property(&onoff::STAT_VALUE).unwrap(), Some(true));
        assert_eq!(restored.cached_property(&level::STAT_VALUE).unwrap(), Some(0.25));
        let scenes = restored.fetch_children_for_trait(scene::TRAIT.id).await.unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(restored.id_for_child(&scenes[0]).as_deref(), Some("evening"));
    }

    #[tokio::test]
    async fn should_write_through_without_close() {
        let store = MemoryStateStore::new();
        let manager = open(&store).await;
        let record = Arc::new(Record::default());
        manager.start_managing("record", record.clone()).unwrap();
        record.put("answer", Value::Int(1)).unwrap();
        record.put("answer", Value::Int(2)).unwrap();
        settle().await;

        let image = JsonCodec.decode(&store.blob().unwrap()).unwrap();
        let snapshot = image.get("record").and_then(Value::as_map).unwrap();
        assert_eq!(snapshot.get("answer"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn should_start_fresh_when_reset() {
        let store = MemoryStateStore::new();
        let manager = open(&store).await;
        let record = Arc::new(Record::default());
        manager.start_managing("record", record.clone()).unwrap();
        record.put("answer", Value::Int(42)).unwrap();

        manager.reset("record").unwrap();
        assert_eq!(record.get("answer"), None);
        manager.close().await.unwrap();

        let manager = open(&store).await;
        let restored = Arc::new(Record::default());
        restored.put("stale", Value::Bool(true)).unwrap();
        manager.start_managing("record", restored.clone()).unwrap();
        assert!(restored.copy_state().is_empty());
    }

    #[tokio::test]
    async fn should_lose_mutation_when_stopped_before_flush() {
        let store = MemoryStateStore::new();
        let manager = open(&store).await;
        let record = Arc::new(Record::default());
        manager.start_managing("record", record.clone()).unwrap();
        record.put("answer", Value::Int(1)).unwrap();
        manager.stop_managing("record").unwrap();
        record.put("answer", Value::Int(2)).unwrap();
        manager.close().await.unwrap();

        let manager = open(&store).await;
        let restored = Arc::new(Record::default());
        manager.start_managing("record", restored.clone()).unwrap();
        assert_eq!(restored.get("answer"), Some(Value::Int(1)));
    }

    #[tokio::test]
    async fn should_keep_previous_snapshot_when_state_does_not_encode() {
        let store = MemoryStateStore::new();
        let manager = open(&store).await;
        let broken = Arc::new(Record::default());
        let healthy = Arc::new(Record::default());
        manager.start_managing("broken", broken.clone()).unwrap();
        manager.start_managing("healthy", healthy.clone()).unwrap();
        broken.put("answer", Value::Int(1)).unwrap();

        let err = broken
            .put("thing", Value::Handle(Handle::new(Arc::new(()))))
            .unwrap_err();
        assert!(matches!(err, MeshError::Codec(CodecError::Encode(_))));
        healthy.put("answer", Value::Int(2)).unwrap();

        assert!(manager.refresh_all().is_err());
        manager.close().await.unwrap();

        let manager = open(&store).await;
        let (broken, healthy) = (Arc::new(Record::default()), Arc::new(Record::default()));
        manager.start_managing("broken", broken.clone()).unwrap();
        manager.start_managing("healthy", healthy.clone()).unwrap();
        assert_eq!(broken.copy_state(), ValueMap::from([("answer".to_string(), Value::Int(1))]));
        assert_eq!(healthy.get("answer"), Some(Value::Int(2)));
    }

    #[tokio::test]
    async fn should_fail_open_when_store_is_corrupt() {
        let store = MemoryStateStore::with_blob(b"not json".to_vec());
        let result = PersistentStateManager::open(store, JsonCodec, Executor::current().unwrap()).await;
        assert!(matches!(
            result.err(),
            Some(MeshError::CorruptPersistentState(CorruptStateError::Undecodable(_)))
        ));

        let store = MemoryStateStore::with_blob(br#"{"record": 3}"#.to_vec());
        let result = PersistentStateManager::open(store, JsonCodec, Executor::current().unwrap()).await;
        assert!(matches!(
            result.err(),
            Some(MeshError::CorruptPersistentState(CorruptStateError::NotAMap(name))) if name == "record"
        ));
    }

    /// Record whose next `copy_state` pauses after reading, until released.
    #[derive(Default)]
    struct Gated {
        record: Record,
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl PersistentState for Gated {
        fn copy_state(&self) -> ValueMap {
            let state = self.record.copy_state();
            let gate = self.gate.lock().unwrap().take();
            if let Some((copied, release)) = gate {
                copied.send(()).unwrap();
                release.recv().unwrap();
            }
            state
        }

        fn init_with_state(&self, state: Option<ValueMap>) {
            self.record.init_with_state(state);
        }

        fn set_state_listener(&self, listener: Option<Arc<dyn StateListener>>) {
            self.record.set_state_listener(listener);
        }
    }

    #[tokio::test]
    async fn should_keep_newest_snapshot_when_flushes_overlap() {
        let store = MemoryStateStore::new();
        let manager = open(&store).await;
        let gated = Arc::new(Gated::default());
        manager.start_managing("record", gated.clone()).unwrap();
        gated.record.put("first", Value::Int(1)).unwrap();

        let (copied_tx, copied_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *gated.gate.lock().unwrap() = Some((copied_tx, release_rx));
        std::thread::scope(|scope| {
            let slow = scope.spawn(|| manager.refresh("record"));
            copied_rx.recv().unwrap();
            gated.record.put("second", Value::Int(2)).unwrap();
            release_tx.send(()).unwrap();
            slow.join().unwrap().unwrap();
        });
        manager.close().await.unwrap();

        let manager = open(&store).await;
        let restored = Arc::new(Record::default());
        manager.start_managing("record", restored.clone()).unwrap();
        assert_eq!(restored.get("first"), Some(Value::Int(1)));
        assert_eq!(restored.get("second"), Some(Value::Int(2)));
    }

    /// Store whose medium is gone.
    struct Unreachable;

    impl StateStore for Unreachable {
        async fn read(&self) -> Result<Option<Vec<u8>>, MeshError> {
            Err(MeshError::Storage("medium unreachable".into()))
        }

        async fn write(&self, _blob: Vec<u8>) -> Result<(), MeshError> {
            Err(MeshError::Storage("medium unreachable".into()))
        }
    }

    #[tokio::test]
    async fn should_fail_open_as_corrupt_when_store_is_unreadable() {
        let result = PersistentStateManager::open(Unreachable, JsonCodec, Executor::current().unwrap()).await;
        assert!(matches!(
            result.err(),
            Some(MeshError::CorruptPersistentState(CorruptStateError::Unreadable(_)))
        ));
    }

    #[tokio::test]
    async fn should_reject_misuse() {
        let manager = open(&MemoryStateStore::new()).await;
        manager.start_managing("record", Arc::new(Record::default())).unwrap();

        let err = manager
            .start_managing("record", Arc::new(Record::default()))
            .unwrap_err();
        assert!(matches!(err, MeshError::Persistence(PersistenceError::AlreadyManaged(_))));
        let err = manager.stop_managing("other").unwrap_err();
        assert!(matches!(err, MeshError::Persistence(PersistenceError::NotManaged(_))));

        manager.close().await.unwrap();
        let err = manager.close().await.unwrap_err();
        assert!(matches!(err, MeshError::Persistence(PersistenceError::Closed)));
        assert!(manager.managed_names().is_empty());
    }
}
