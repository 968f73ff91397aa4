//! The transport technology: things on other nodes, reached through a
//! [`Transport`].
//!
//! Things on another node are represented by proxies, created lazily from
//! their URIs and cached per URI. Things hosted here are served to other
//! nodes under `{scheme}://{authority}/{index}/`. Groups live at
//! `{scheme}://{multicast}/g/{group-id}/`.

mod server;
mod thing;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thingmesh_domain::error::{MeshError, Rejection};
use thingmesh_domain::id::{TechnologyId, short_token};
use thingmesh_domain::uri::Uri;

use crate::executor::{Executor, Task};
use crate::group::{Forwarder, GroupThing};
use crate::path::{self, ResourcePath, Root};
use crate::ports::{Technology, Transport};
use crate::thing::{Thing, ThingKind};

use self::server::Server;

pub use self::thing::RemoteThing;

pub struct TransportTechnology {
    id: TechnologyId,
    executor: Executor,
    transport: Arc<dyn Transport>,
    me: Weak<Self>,
    serving: AtomicBool,
    /// Slot `i` holds the thing at index `i + 1`.
    hosted: Mutex<Vec<Option<Thing>>>,
    hosted_groups: Mutex<BTreeSet<String>>,
    groups: Mutex<BTreeMap<String, Thing>>,
    proxies: Mutex<HashMap<Uri, Thing>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TransportTechnology {
    #[must_use]
    pub fn new(executor: Executor, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: TechnologyId::new(),
            executor,
            transport,
            me: me.clone(),
            serving: AtomicBool::new(false),
            hosted: Mutex::default(),
            hosted_groups: Mutex::default(),
            groups: Mutex::default(),
            proxies: Mutex::default(),
        })
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn hosts_group(&self, group_id: &str) -> bool {
        lock(&self.hosted_groups).contains(group_id)
    }

    pub(crate) fn hosted_at(&self, index: usize) -> Option<Thing> {
        lock(&self.hosted).get(index.checked_sub(1)?).cloned().flatten()
    }

    pub(crate) fn hosted_group(&self, group_id: &str) -> Option<Thing> {
        if !self.hosts_group(group_id) {
            return None;
        }
        lock(&self.groups).get(group_id).cloned()
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

    fn node_uri(&self, path_and_query: &str) -> Result<Uri, MeshError> {
        Ok(Uri::from_parts(
            self.transport.scheme(),
            self.transport.authority(),
            path_and_query,
        )?)
    }

    fn group_uri(&self, group_id: &str) -> Result<Uri, MeshError> {
        Ok(Uri::from_parts(
            self.transport.scheme(),
            self.transport.multicast_authority(),
            &path::group_path(group_id),
        )?)
    }

    fn new_proxy(&self, base: Uri, parent: Option<&Thing>) -> Thing {
        let remote = RemoteThing::new(self.me.clone(), self.id, base);
        Thing::new(self.executor.clone(), parent, ThingKind::Remote(remote))
    }

    fn proxy(&self, base: Uri, parent: Option<&Thing>) -> Thing {
        lock(&self.proxies)
            .entry(base)
            .or_insert_with_key(|base| self.new_proxy(base.clone(), parent))
            .clone()
    }

    /// Drop the cached proxies for `base` and everything below it.
    pub(crate) fn forget_proxies_under(&self, base: &Uri) {
        let mut proxies = lock(&self.proxies);
        let before = proxies.len();
        proxies.retain(|uri, _| !uri.as_str().starts_with(base.as_str()));
        tracing::debug!(uri = %base, forgotten = before - proxies.len(), "proxies forgotten");
    }

    /// Proxy for a thing on the node at `authority`, with one proxy per
    /// generation of children.
    fn remote_thing(&self, authority: &str, path: &ResourcePath) -> Result<Thing, MeshError> {
        let scheme = self.transport.scheme();
        let mut prefix = match &path.root {
            Root::Index(index) => path::thing_path(*index),
            Root::Group(group_id) => path::group_path(group_id),
        };
        let mut thing = self.proxy(Uri::from_parts(scheme, authority, &prefix)?, None);
        for (trait_id, child_id) in &path.children {
            prefix.push_str(&path::child_suffix(trait_id, child_id));
            thing = self.proxy(Uri::from_parts(scheme, authority, &prefix)?, Some(&thing));
        }
        Ok(thing)
    }

    fn group_with_id(&self, group_id: &str) -> Result<Thing, MeshError> {
        if let Some(group) = lock(&self.groups).get(group_id) {
            return Ok(group.clone());
        }
        let proxy = self.new_proxy(self.group_uri(group_id)?, None);
        let members: Weak<dyn Technology> = self.me.clone();
        let local_group = GroupThing::fan_out(&self.executor, members, self.id, group_id.to_string());
        let forwarder = Forwarder::new(group_id.to_string(), self.me.clone(), proxy, local_group);
        let group = GroupThing::forwarding(&self.executor, forwarder, self.id, group_id.to_string());
        let group = lock(&self.groups)
            .entry(group_id.to_string())
            .or_insert(group)
            .clone();
        tracing::debug!(group = %group_id, "transport group ready");
        Ok(group)
    }
}

impl Technology for TransportTechnology {
    fn id(&self) -> TechnologyId {
        self.id
    }

    fn name(&self) -> &'static str {
        "transport"
    }

    fn executor(&self) -> &Executor {
        &self.executor
    }

    fn prepare_to_host(&self) -> Result<(), MeshError> {
        if self.serving.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.transport.listen(Arc::new(Server::new(self.me.clone()))) {
            self.serving.store(false, Ordering::SeqCst);
            return Err(err);
        }
        tracing::info!(authority = self.transport.authority(), "serving hosted things");
        Ok(())
    }

    #[tracing::instrument(skip(self, thing), fields(thing = %thing.id()))]
    fn host(&self, thing: &Thing) -> Result<(), MeshError> {
        self.prepare_to_host()?;
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
        if let Some(remote) = thing.as_remote()
            && remote.technology_id() == self.id
        {
            return Ok(remote.base().clone());
        }
        if self.is_own_group(thing)
            && let Some(group_id) = thing.group_id()
        {
            return self.group_uri(group_id);
        }
        path::resolve_child_uri(thing, |candidate| {
            let index = self.index_of(candidate)?;
            self.node_uri(&path::thing_path(index)).ok()
        })
        .ok_or_else(|| MeshError::UnassociatedResource {
            resource: thing.id().to_string(),
        })
    }

    fn thing_for_native_uri(&self, uri: &Uri) -> Result<Thing, MeshError> {
        if uri.scheme() != Some(self.transport.scheme()) {
            return Err(MeshError::UnassociatedResource { resource: uri.to_string() });
        }
        let unknown = || MeshError::UnknownResource { uri: uri.to_string() };
        let authority = uri.authority().ok_or_else(unknown)?;
        let path = ResourcePath::parse(uri.path())?;

        if authority == self.transport.multicast_authority() {
            return match &path.root {
                Root::Group(group_id) if path.children.is_empty() => self.group_with_id(group_id),
                _ => Err(unknown()),
            };
        }
        if authority == self.transport.authority() {
            let root = match &path.root {
                Root::Index(index) => self.hosted_at(*index),
                Root::Group(group_id) => lock(&self.groups).get(group_id).cloned(),
            }
            .ok_or_else(unknown)?;
            return path::walk_children(root, &path.children).ok_or_else(unknown);
        }
        self.remote_thing(authority, &path)
    }

    fn create_new_group(&self) -> Task<Thing> {
        Task::from_result(self.group_with_id(&short_token()))
    }

    fn fetch_or_create_group_with_id(&self, group_id: &str) -> Task<Thing> {
        Task::from_result(self.group_with_id(group_id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures::FutureExt;
    use futures::future::{self, BoxFuture};

    use thingmesh_domain::catalog::{level, onoff, scene};
    use thingmesh_domain::value::Value;

    use super::*;
    use crate::local::LocalThingBuilder;
    use crate::ports::{Method, Request, RequestHandler};

    /// Transport that records requests and answers them from a script.
    ///
    /// While `stall` is set, sends never complete; `dropped` counts the
    /// stalled sends whose future was dropped before answering.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub sent: Mutex<Vec<Request>>,
        pub replies: Mutex<HashMap<String, Value>>,
        pub handler: Mutex<Option<Arc<dyn RequestHandler>>>,
        pub stall: AtomicBool,
        pub dropped: Arc<AtomicUsize>,
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl FakeTransport {
        pub(crate) fn reply(&self, uri: &str, value: Value) {
            self.replies.lock().unwrap().insert(uri.to_string(), value);
        }

        pub(crate) fn sent(&self) -> Vec<(Method, String)> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|request| (request.method, request.uri.to_string()))
                .collect()
        }

        pub(crate) fn handler(&self) -> Arc<dyn RequestHandler> {
            self.handler.lock().unwrap().clone().unwrap()
        }
    }

    impl Transport for FakeTransport {
        fn scheme(&self) -> &str {
            "fake"
        }

        fn authority(&self) -> &str {
            "here"
        }

        fn multicast_authority(&self) -> &str {
            "all"
        }

        fn send(&self, request: Request) -> BoxFuture<'static, Result<Option<Value>, MeshError>> {
            let reply = self.replies.lock().unwrap().get(request.uri.as_str()).cloned();
            self.sent.lock().unwrap().push(request);
            if self.stall.load(Ordering::SeqCst) {
                let counter = DropCounter(Arc::clone(&self.dropped));
                return async move {
                    let _counter = counter;
                    future::pending::<()>().await;
                    Ok(reply)
                }
                .boxed();
            }
            async move { Ok(reply) }.boxed()
        }

        fn listen(&self, handler: Arc<dyn RequestHandler>) -> Result<(), MeshError> {
            *self.handler.lock().unwrap() = Some(handler);
            Ok(())
        }
    }

    pub(crate) fn setup() -> (Arc<TransportTechnology>, Arc<FakeTransport>, Executor) {
        let executor = Executor::current().unwrap();
        let transport = Arc::new(FakeTransport::default());
        let technology = TransportTechnology::new(executor.clone(), transport.clone());
        (technology, transport, executor)
    }

    #[tokio::test]
    async fn should_cache_proxies_per_uri() {
        let (technology, _, _) = setup();
        let uri: Uri = "fake://there/1/s/levl/v".parse().unwrap();
        let first = technology.thing_for_native_uri(&uri).unwrap();
        let second = technology.lookup_thing_for_uri(&uri).await.unwrap();
        assert_eq!(first, second);
        assert!(technology.is_native(&first));
        assert!(!technology.is_hosted(&first));
        assert_eq!(
            technology.native_uri_for_thing(&first).unwrap().as_str(),
            "fake://there/1/"
        );
    }

    #[tokio::test]
    async fn should_forget_proxy_when_remote_child_is_deleted() {
        let (technology, transport, _) = setup();
        let uri: Uri = "fake://there/2/ch/scen/dim/".parse().unwrap();
        let child = technology.thing_for_native_uri(&uri).unwrap();
        let parent = child.parent().unwrap();
        transport.reply(uri.as_str(), Value::Bool(true));

        assert!(child.delete().await.unwrap());
        assert_ne!(technology.thing_for_native_uri(&uri).unwrap(), child);
        let parent_uri: Uri = "fake://there/2/".parse().unwrap();
        assert_eq!(technology.thing_for_native_uri(&parent_uri).unwrap(), parent);

        let kept: Uri = "fake://there/2/ch/scen/day/".parse().unwrap();
        let survivor = technology.thing_for_native_uri(&kept).unwrap();
        assert!(!survivor.delete().await.unwrap());
        assert_eq!(technology.thing_for_native_uri(&kept).unwrap(), survivor);
    }

    #[tokio::test]
    async fn should_link_remote_children_to_their_parent() {
        let (technology, _, _) = setup();
        let uri: Uri = "fake://there/2/ch/scen/dim/".parse().unwrap();
        let child = technology.thing_for_native_uri(&uri).unwrap();
        let parent = child.parent().unwrap();
        assert_eq!(
            technology.native_uri_for_thing(&parent).unwrap().as_str(),
            "fake://there/2/"
        );
        assert_eq!(parent.id_for_child(&child).as_deref(), Some("dim"));
    }

    #[tokio::test]
    async fn should_register_handler_once_when_hosting() {
        let (technology, transport, executor) = setup();
        let bulb = LocalThingBuilder::dimmable_light().build(&executor);
        technology.host(&bulb).unwrap();
        assert!(transport.handler.lock().unwrap().is_some());
        assert_eq!(
            technology.native_uri_for_thing(&bulb).unwrap().as_str(),
            "fake://here/1/"
        );
        let uri: Uri = "fake://here/1/".parse().unwrap();
        assert_eq!(technology.thing_for_native_uri(&uri).unwrap(), bulb);
    }

    #[tokio::test]
    async fn should_refuse_hosting_own_proxy() {
        let (technology, _, _) = setup();
        let uri: Uri = "fake://there/1/".parse().unwrap();
        let proxy = technology.thing_for_native_uri(&uri).unwrap();
        let err = technology.host(&proxy).unwrap_err();
        assert!(matches!(err, MeshError::UnacceptableThing(Rejection::NotHostable(_))));
    }

    #[tokio::test]
    async fn should_resolve_multicast_group_uri_to_group() {
        let (technology, _, _) = setup();
        let group = technology.fetch_or_create_group_with_id("hall").await.unwrap();
        let uri: Uri = "fake://all/g/hall/".parse().unwrap();
        assert_eq!(technology.thing_for_native_uri(&uri).unwrap(), group);
        assert_eq!(technology.native_uri_for_thing(&group).unwrap(), uri);
    }

    #[tokio::test]
    async fn should_proxy_property_reads_and_writes() {
        let (technology, transport, _) = setup();
        transport.reply("fake://there/1/s/onof/v", Value::Bool(true));
        let uri: Uri = "fake://there/1/".parse().unwrap();
        let proxy = technology.thing_for_native_uri(&uri).unwrap();

        assert_eq!(proxy.fetch_property(&onoff::STAT_VALUE).await.unwrap(), Some(true));
        assert_eq!(proxy.cached_property(&onoff::STAT_VALUE).unwrap(), Some(true));

        proxy.set_property(&level::STAT_VALUE, 0.5).await.unwrap();
        proxy.toggle_property(&onoff::STAT_VALUE).await.unwrap();
        assert_eq!(proxy.cached_property(&onoff::STAT_VALUE).unwrap(), None);
        assert_eq!(proxy.cached_property(&level::STAT_VALUE).unwrap(), Some(0.5));

        assert_eq!(
            transport.sent(),
            vec![
                (Method::Get, "fake://there/1/s/onof/v".to_string()),
                (Method::Put, "fake://there/1/s/levl/v".to_string()),
                (Method::Post, "fake://there/1/s/onof/v?tog".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn should_resolve_method_result_into_child_proxy() {
        let (technology, transport, _) = setup();
        transport.reply(
            "fake://there/1/f/scen/save",
            Value::from("fake://there/1/ch/scen/dim/"),
        );
        let uri: Uri = "fake://there/1/".parse().unwrap();
        let proxy = technology.thing_for_native_uri(&uri).unwrap();

        let child = proxy
            .invoke_method(&scene::save_method::<Thing>(), scene::PARAM_SCENE_ID.with("dim".into()))
            .await
            .unwrap();
        assert_eq!(child.parent(), Some(proxy.clone()));
        assert_eq!(proxy.id_for_child(&child).as_deref(), Some("dim"));
    }
}
