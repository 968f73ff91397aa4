//! Groups: things standing for a set of member things.
//!
//! A group created by the local technology fans every operation out to
//! its members. A group created by a transport technology forwards to the
//! transport's multicast address and, when it is hosted with hosted
//! members, to a local fan-out group at the same time.

mod fan_out;
mod forwarder;

use std::collections::BTreeSet;
use std::sync::Weak;

use thingmesh_domain::catalog::base;
use thingmesh_domain::error::{MeshError, Rejection};
use thingmesh_domain::id::TechnologyId;
use thingmesh_domain::modifier::{Modifier, Mutation};
use thingmesh_domain::section::Section;
use thingmesh_domain::value::{Value, ValueMap};
use thingmesh_domain::value_type::ValueType;

use crate::executor::{Executor, Task};
use crate::ports::Technology;
use crate::thing::capability::{GroupMembership, Hostable, PropertyAccessible};
use crate::thing::{Thing, ThingKind};

pub(crate) use self::fan_out::FanOut;
pub(crate) use self::forwarder::Forwarder;

pub struct GroupThing {
    group_id: String,
    technology: TechnologyId,
    backend: Backend,
}

enum Backend {
    Local(FanOut),
    Transport(Forwarder),
}

impl GroupThing {
    /// A group that fans out to members hosted by `technology`.
    pub(crate) fn fan_out(
        executor: &Executor,
        technology: Weak<dyn Technology>,
        technology_id: TechnologyId,
        group_id: String,
    ) -> Thing {
        let group = Self {
            group_id,
            technology: technology_id,
            backend: Backend::Local(FanOut::new(technology)),
        };
        Thing::new(executor.clone(), None, ThingKind::Group(group))
    }

    pub(crate) fn forwarding(
        executor: &Executor,
        forwarder: Forwarder,
        technology_id: TechnologyId,
        group_id: String,
    ) -> Thing {
        let group = Self {
            group_id,
            technology: technology_id,
            backend: Backend::Transport(forwarder),
        };
        Thing::new(executor.clone(), None, ThingKind::Group(group))
    }

    pub(crate) fn technology_id(&self) -> TechnologyId {
        self.technology
    }

    /// The group that serves requests addressed to this group on this node.
    pub(crate) fn serving_group(&self, this: &Thing) -> Thing {
        match &self.backend {
            Backend::Local(_) => this.clone(),
            Backend::Transport(forwarder) => forwarder.local_group().clone(),
        }
    }

    fn access(&self) -> &dyn PropertyAccessible {
        match &self.backend {
            Backend::Local(fan_out) => fan_out,
            Backend::Transport(forwarder) => forwarder,
        }
    }

    fn uid(&self) -> Value {
        Value::String(self.group_id.clone())
    }

    fn with_uid(&self, section: Section, mut values: ValueMap) -> ValueMap {
        if section == Section::Metadata {
            values.insert(base::META_UID.name().to_string(), self.uid());
        }
        values
    }
}

impl PropertyAccessible for GroupThing {
    fn fetch_value(&self, this: &Thing, key: &str, modifiers: &[Modifier]) -> Task<Option<Value>> {
        if key == base::META_UID.name() {
            return Task::ready(Some(self.uid()));
        }
        self.access().fetch_value(this, key, modifiers)
    }

    fn cached_value(&self, this: &Thing, key: &str) -> Option<Value> {
        if key == base::META_UID.name() {
            return Some(self.uid());
        }
        self.access().cached_value(this, key)
    }

    fn set_value(&self, this: &Thing, key: &str, value: Value, modifiers: &[Modifier]) -> Task<()> {
        self.access().set_value(this, key, value, modifiers)
    }

    fn mutate_value(&self, this: &Thing, key: &str, mutation: Mutation, modifiers: &[Modifier]) -> Task<()> {
        self.access().mutate_value(this, key, mutation, modifiers)
    }

    fn apply_properties(&self, this: &Thing, properties: ValueMap, modifiers: &[Modifier]) -> Task<()> {
        self.access().apply_properties(this, properties, modifiers)
    }

    fn fetch_section(&self, this: &Thing, section: Section, modifiers: &[Modifier]) -> Task<ValueMap> {
        let uid = (section == Section::Metadata).then(|| self.uid());
        self.access()
            .fetch_section(this, section, modifiers)
            .map(move |mut values| {
                if let Some(uid) = uid {
                    values.insert(base::META_UID.name().to_string(), uid);
                }
                Ok(values)
            })
    }

    fn copy_cached_section(&self, this: &Thing, section: Section) -> ValueMap {
        self.with_uid(section, self.access().copy_cached_section(this, section))
    }

    fn fetch_supported_keys(&self, this: &Thing) -> Task<BTreeSet<String>> {
        self.access().fetch_supported_keys(this)
    }

    fn invoke_method(&self, this: &Thing, method: &str, args: ValueMap, returns: ValueType) -> Task<Value> {
        self.access().invoke_method(this, method, args, returns)
    }

    fn fetch_children_for_trait(&self, this: &Thing, trait_id: &str) -> Task<Vec<Thing>> {
        self.access().fetch_children_for_trait(this, trait_id)
    }

    fn id_for_child(&self, _this: &Thing, _child: &Thing) -> Option<String> {
        None
    }

    fn delete(&self, _this: &Thing) -> Task<bool> {
        Task::ready(false)
    }

    fn listener_target(&self, this: &Thing) -> Thing {
        self.access().listener_target(this)
    }
}

impl Hostable for GroupThing {
    fn on_hosted(&self, this: &Thing, technology: TechnologyId) -> Result<(), MeshError> {
        if technology != self.technology {
            return Err(Rejection::NotHostable(this.id().to_string()).into());
        }
        tracing::debug!(group = %self.group_id, "group hosted");
        Ok(())
    }

    fn on_unhosted(&self, _this: &Thing, _technology: TechnologyId) {
        tracing::debug!(group = %self.group_id, "group unhosted");
    }
}

impl GroupMembership for GroupThing {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    #[tracing::instrument(skip_all, fields(group = %self.group_id, member = %member.id()))]
    fn add_member(&self, this: &Thing, member: &Thing) -> Task<()> {
        match &self.backend {
            Backend::Local(fan_out) => fan_out.add_member(this, member),
            Backend::Transport(forwarder) => forwarder.add_member(member),
        }
    }

    #[tracing::instrument(skip_all, fields(group = %self.group_id, member = %member.id()))]
    fn remove_member(&self, _this: &Thing, member: &Thing) -> Task<()> {
        match &self.backend {
            Backend::Local(fan_out) => fan_out.remove_member(member),
            Backend::Transport(forwarder) => forwarder.remove_member(member),
        }
    }

    fn fetch_members(&self, _this: &Thing) -> Task<Vec<Thing>> {
        match &self.backend {
            Backend::Local(fan_out) => Task::ready(fan_out.members()),
            Backend::Transport(forwarder) => forwarder.fetch_members(),
        }
    }

    fn has_local_members(&self) -> bool {
        match &self.backend {
            Backend::Local(fan_out) => fan_out.has_members(),
            Backend::Transport(forwarder) => forwarder.local_group().has_local_members(),
        }
    }
}
