//! Group owned by a transport technology.
//!
//! Operations go to the group's multicast address through a proxy. While
//! the group is hosted here and has hosted members, mutations also go to
//! a local fan-out group holding those members, and reads are answered
//! from it.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use thingmesh_domain::error::{InternalError, Rejection};
use thingmesh_domain::modifier::{Modifier, Mutation};
use thingmesh_domain::section::Section;
use thingmesh_domain::value::{Value, ValueMap};
use thingmesh_domain::value_type::ValueType;

use crate::executor::Task;
use crate::ports::Technology;
use crate::remote::TransportTechnology;
use crate::thing::Thing;
use crate::thing::capability::PropertyAccessible;

pub(crate) struct Forwarder {
    group_id: String,
    technology: Weak<TransportTechnology>,
    /// Proxies of members on other nodes.
    native: Mutex<Vec<Thing>>,
    /// Proxy at the multicast address.
    proxy: Thing,
    local_group: Thing,
}

impl Forwarder {
    pub(crate) fn new(
        group_id: String,
        technology: Weak<TransportTechnology>,
        proxy: Thing,
        local_group: Thing,
    ) -> Self {
        Self {
            group_id,
            technology,
            native: Mutex::default(),
            proxy,
            local_group,
        }
    }

    pub(crate) fn local_group(&self) -> &Thing {
        &self.local_group
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Thing>> {
        self.native.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_hosted(&self) -> bool {
        self.technology
            .upgrade()
            .is_some_and(|technology| technology.hosts_group(&self.group_id))
    }

    fn use_local(&self) -> bool {
        self.is_hosted() && self.local_group.has_local_members()
    }

    /// Run `remote` and, when hosted members exist, `local` alongside it.
    fn dispatch<T, F>(&self, remote: Task<T>, local: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce(&Thing) -> Task<T>,
    {
        if self.use_local() {
            Task::combine(local(&self.local_group), remote)
        } else {
            remote
        }
    }

    /// Read from the hosted members when there are any, else remotely.
    fn read_from(&self) -> &Thing {
        if self.use_local() {
            &self.local_group
        } else {
            &self.proxy
        }
    }

    pub(crate) fn add_member(&self, member: &Thing) -> Task<()> {
        let Some(technology) = self.technology.upgrade() else {
            return Task::failed(InternalError::Invariant("group outlived its technology"));
        };
        if member.is_group() && member.technology_id() == Some(technology.id()) {
            return Task::failed(Rejection::NativeGroup);
        }
        if !technology.is_associated_with(member) {
            return Task::failed(Rejection::Unassociated(member.id().to_string()));
        }
        if technology.is_hosted(member) {
            return self.local_group.add_member(member);
        }
        if technology.is_native(member) && member.as_remote().is_some() {
            let mut native = self.lock();
            if !native.contains(member) {
                native.push(member.clone());
            }
            return Task::ready(());
        }
        Task::failed(Rejection::GroupNotHosted)
    }

    pub(crate) fn remove_member(&self, member: &Thing) -> Task<()> {
        self.lock().retain(|known| known != member);
        self.local_group.remove_member(member)
    }

    /// Native members merged with the hosted ones, without duplicates.
    pub(crate) fn fetch_members(&self) -> Task<Vec<Thing>> {
        let native = self.lock().clone();
        if !self.is_hosted() {
            return Task::ready(native);
        }
        self.local_group.fetch_members().map(move |hosted| {
            let mut members = native;
            for member in hosted {
                if !members.contains(&member) {
                    members.push(member);
                }
            }
            Ok(members)
        })
    }
}

impl PropertyAccessible for Forwarder {
    fn fetch_value(&self, _this: &Thing, key: &str, modifiers: &[Modifier]) -> Task<Option<Value>> {
        self.read_from().fetch_value(key, modifiers)
    }

    fn cached_value(&self, _this: &Thing, key: &str) -> Option<Value> {
        if self.is_hosted() {
            self.local_group.cached_value(key)
        } else {
            self.proxy.cached_value(key)
        }
    }

    fn set_value(&self, _this: &Thing, key: &str, value: Value, modifiers: &[Modifier]) -> Task<()> {
        let remote = self.proxy.set_value(key, value.clone(), modifiers);
        self.dispatch(remote, |local| local.set_value(key, value, modifiers))
    }

    fn mutate_value(&self, _this: &Thing, key: &str, mutation: Mutation, modifiers: &[Modifier]) -> Task<()> {
        let remote = self.proxy.mutate_value(key, mutation.clone(), modifiers);
        self.dispatch(remote, |local| local.mutate_value(key, mutation, modifiers))
    }

    fn apply_properties(&self, _this: &Thing, properties: ValueMap, modifiers: &[Modifier]) -> Task<()> {
        let remote = self.proxy.apply_properties_with(properties.clone(), modifiers);
        self.dispatch(remote, |local| local.apply_properties_with(properties, modifiers))
    }

    fn fetch_section(&self, _this: &Thing, section: Section, modifiers: &[Modifier]) -> Task<ValueMap> {
        self.read_from().fetch_section_with(section, modifiers)
    }

    fn copy_cached_section(&self, _this: &Thing, section: Section) -> ValueMap {
        let mut values = self.proxy.copy_cached_section(section);
        if self.is_hosted() && (section == Section::Metadata || self.local_group.has_local_members()) {
            values.extend(self.local_group.copy_cached_section(section));
        }
        values
    }

    fn fetch_supported_keys(&self, _this: &Thing) -> Task<BTreeSet<String>> {
        self.read_from().fetch_supported_keys()
    }

    fn invoke_method(&self, _this: &Thing, method: &str, args: ValueMap, returns: ValueType) -> Task<Value> {
        let remote = self.proxy.invoke_value(method, args.clone(), returns);
        self.dispatch(remote, |local| local.invoke_value(method, args, returns))
    }

    fn fetch_children_for_trait(&self, _this: &Thing, trait_id: &str) -> Task<Vec<Thing>> {
        self.read_from().fetch_children_for_trait(trait_id)
    }

    fn id_for_child(&self, _this: &Thing, _child: &Thing) -> Option<String> {
        None
    }

    fn delete(&self, _this: &Thing) -> Task<bool> {
        Task::ready(false)
    }

    /// Listeners live on the local fan-out group.
    fn listener_target(&self, _this: &Thing) -> Thing {
        self.local_group.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use thingmesh_domain::catalog::{base, level, onoff};
    use thingmesh_domain::error::MeshError;
    use thingmesh_domain::uri::Uri;

    use super::*;
    use crate::executor::Executor;
    use crate::local::{LocalTechnology, LocalThingBuilder};
    use crate::ports::Method;
    use crate::remote::tests::{FakeTransport, setup};

    fn switch(executor: &Executor) -> Thing {
        LocalThingBuilder::new()
            .with_trait(&onoff::TRAIT)
            .with_trait(&level::TRAIT)
            .build(executor)
    }

    async fn group(technology: &Arc<TransportTechnology>) -> Thing {
        technology.fetch_or_create_group_with_id("hall").await.unwrap()
    }

    fn multicast_writes(transport: &FakeTransport) -> Vec<(Method, String)> {
        transport
            .sent()
            .into_iter()
            .filter(|(_, uri)| uri.starts_with("fake://all/"))
            .collect()
    }

    #[tokio::test]
    async fn should_write_transport_and_hosted_members_when_hosted() {
        let (technology, transport, executor) = setup();
        let group = group(&technology).await;
        let member = switch(&executor);
        technology.host(&member).unwrap();
        technology.host(&group).unwrap();
        group.add_member(&member).await.unwrap();
        assert!(group.has_local_members());

        group.set_property(&level::STAT_VALUE, 0.5).await.unwrap();

        assert_eq!(member.fetch_property(&level::STAT_VALUE).await.unwrap(), Some(0.5));
        assert_eq!(
            multicast_writes(&transport),
            vec![(Method::Put, "fake://all/g/hall/s/levl/v".to_string())]
        );
    }

    #[tokio::test]
    async fn should_write_transport_only_when_no_member_is_hosted() {
        let (technology, transport, _) = setup();
        let group = group(&technology).await;
        technology.host(&group).unwrap();

        group.toggle_property(&onoff::STAT_VALUE).await.unwrap();

        assert!(!group.has_local_members());
        assert_eq!(
            multicast_writes(&transport),
            vec![(Method::Post, "fake://all/g/hall/s/onof/v?tog".to_string())]
        );
    }

    #[tokio::test]
    async fn should_write_transport_only_when_group_is_not_hosted() {
        let (technology, transport, executor) = setup();
        let group = group(&technology).await;
        let member = switch(&executor);
        technology.host(&member).unwrap();
        group.add_member(&member).await.unwrap();

        group.set_property(&level::STAT_VALUE, 0.5).await.unwrap();

        assert_eq!(member.fetch_property(&level::STAT_VALUE).await.unwrap(), Some(0.0));
        assert_eq!(multicast_writes(&transport).len(), 1);
    }

    #[tokio::test]
    async fn should_classify_candidate_members() {
        let (technology, _, executor) = setup();
        let group = group(&technology).await;
        let other_group = technology.create_new_group().await.unwrap();
        let err = group.add_member(&other_group).await.unwrap_err();
        assert!(matches!(err, MeshError::UnacceptableThing(Rejection::NativeGroup)));

        let stray = switch(&executor);
        let err = group.add_member(&stray).await.unwrap_err();
        assert!(matches!(err, MeshError::UnacceptableThing(Rejection::Unassociated(_))));

        let local = LocalTechnology::new(executor);
        let local_group = local.create_new_group().await.unwrap();
        let err = group.add_member(&local_group).await.unwrap_err();
        assert!(matches!(err, MeshError::UnacceptableThing(Rejection::Unassociated(_))));
    }

    #[tokio::test]
    async fn should_merge_native_and_hosted_members() {
        let (technology, _, executor) = setup();
        let group = group(&technology).await;
        technology.host(&group).unwrap();

        let hosted = switch(&executor);
        technology.host(&hosted).unwrap();
        let uri: Uri = "fake://there/1/".parse().unwrap();
        let remote = technology.thing_for_native_uri(&uri).unwrap();

        group.add_member(&hosted).await.unwrap();
        group.add_member(&remote).await.unwrap();
        group.add_member(&remote).await.unwrap();

        let members = group.fetch_members().await.unwrap();
        assert_eq!(members, vec![remote.clone(), hosted.clone()]);

        group.remove_member(&remote).await.unwrap();
        assert_eq!(group.fetch_members().await.unwrap(), vec![hosted]);
    }

    #[tokio::test]
    async fn should_answer_uid_from_group_id() {
        let (technology, transport, _) = setup();
        let group = group(&technology).await;
        let uid = group.fetch_property(&base::META_UID).await.unwrap();
        assert_eq!(uid.as_deref(), Some("hall"));
        assert_eq!(group.cached_property(&base::META_UID).unwrap().as_deref(), Some("hall"));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn should_read_from_hosted_members_when_available() {
        let (technology, transport, executor) = setup();
        let group = group(&technology).await;
        let member = switch(&executor);
        member.set_property(&level::STAT_VALUE, 0.25).await.unwrap();
        technology.host(&member).unwrap();
        technology.host(&group).unwrap();
        group.add_member(&member).await.unwrap();

        assert_eq!(group.fetch_property(&level::STAT_VALUE).await.unwrap(), Some(0.25));
        assert!(multicast_writes(&transport).is_empty());
    }

    #[tokio::test]
    async fn should_cancel_both_branches_when_cancelled() {
        let (technology, transport, executor) = setup();
        let group = group(&technology).await;
        let member = switch(&executor);
        technology.host(&member).unwrap();
        technology.host(&group).unwrap();
        group.add_member(&member).await.unwrap();
        transport.stall.store(true, Ordering::SeqCst);

        let task = group.set_property(&level::STAT_VALUE, 0.5);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(multicast_writes(&transport).len(), 1);
        assert_eq!(transport.dropped.load(Ordering::SeqCst), 0);

        task.cancel();
        assert!(matches!(task.await, Err(MeshError::Cancelled)));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(transport.dropped.load(Ordering::SeqCst), 1);
        assert_eq!(member.cached_property(&level::STAT_VALUE).unwrap(), Some(0.5));
    }
}
