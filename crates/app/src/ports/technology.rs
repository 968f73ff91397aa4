//! Technology port — the hosting contract.
//!
//! A technology owns a set of *native* things (proxies and groups it
//! created) and can *host* things from elsewhere, making them reachable
//! through its own addressing scheme.

use thingmesh_domain::error::MeshError;
use thingmesh_domain::id::TechnologyId;
use thingmesh_domain::modifier::{Modifier, Mutation};
use thingmesh_domain::section::Section;
use thingmesh_domain::uri::Uri;

use crate::executor::{Executor, Task};
use crate::thing::Thing;

/// How many ancestors above a thing are inspected when deciding whether it
/// belongs to a technology.
pub const PARENT_SEARCH_DEPTH: usize = 5;

/// Whether `check` holds for `thing` or one of its nearest ancestors.
pub fn resolves_up_chain(thing: &Thing, check: impl Fn(&Thing) -> bool) -> bool {
    let mut candidate = thing.clone();
    for _ in 0..PARENT_SEARCH_DEPTH {
        if check(&candidate) {
            return true;
        }
        match candidate.parent() {
            Some(parent) => candidate = parent,
            None => return false,
        }
    }
    check(&candidate)
}

pub trait Technology: Send + Sync {
    fn id(&self) -> TechnologyId;

    /// Short name, for logs.
    fn name(&self) -> &'static str;

    fn executor(&self) -> &Executor;

    /// Get ready to serve hosted things. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::TechnologyCannotHost`] when hosting is not
    /// supported, or an adapter error.
    fn prepare_to_host(&self) -> Result<(), MeshError>;

    /// # Errors
    ///
    /// Returns [`MeshError::UnacceptableThing`] when the thing cannot be
    /// hosted here.
    fn host(&self, thing: &Thing) -> Result<(), MeshError>;

    fn unhost(&self, thing: &Thing);

    fn copy_hosted_things(&self) -> Vec<Thing>;

    fn is_hosted(&self, thing: &Thing) -> bool {
        let hosted = self.copy_hosted_things();
        resolves_up_chain(thing, |candidate| hosted.contains(candidate))
    }

    fn is_native(&self, thing: &Thing) -> bool {
        let id = self.id();
        resolves_up_chain(thing, |candidate| candidate.technology_id() == Some(id))
    }

    fn is_associated_with(&self, thing: &Thing) -> bool {
        self.is_native(thing) || self.is_hosted(thing)
    }

    /// # Errors
    ///
    /// Returns [`MeshError::UnassociatedResource`] when the thing is
    /// neither native nor hosted.
    fn native_uri_for_thing(&self, thing: &Thing) -> Result<Uri, MeshError>;

    /// # Errors
    ///
    /// Returns [`MeshError::UnassociatedResource`] when the thing is
    /// neither native nor hosted.
    fn native_uri_for_property(
        &self,
        thing: &Thing,
        key: &str,
        mutation: Option<&Mutation>,
        modifiers: &[Modifier],
    ) -> Result<Uri, MeshError> {
        let base = self.native_uri_for_thing(thing)?;
        Ok(base.join(&format!("{key}{}", crate::path::query(mutation, modifiers)))?)
    }

    /// # Errors
    ///
    /// Returns [`MeshError::UnassociatedResource`] when the thing is
    /// neither native nor hosted.
    fn native_uri_for_section(&self, thing: &Thing, section: Section, modifiers: &[Modifier]) -> Result<Uri, MeshError> {
        let base = self.native_uri_for_thing(thing)?;
        Ok(base.join(&format!(
            "{}{}",
            crate::path::section_suffix(section),
            crate::path::query(None, modifiers)
        ))?)
    }

    /// Resolve a native URI without any IO.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::UnknownResource`] when the URI does not name a
    /// thing, or [`MeshError::UnassociatedResource`] when it belongs to
    /// another technology.
    fn thing_for_native_uri(&self, uri: &Uri) -> Result<Thing, MeshError>;

    fn lookup_thing_for_uri(&self, uri: &Uri) -> Task<Thing> {
        Task::from_result(self.thing_for_native_uri(uri))
    }

    /// Express `uri` relative to `thing`, so it can be stored as a property
    /// value on that thing.
    ///
    /// # Errors
    ///
    /// - [`MeshError::UnknownResource`] for a relative reference that is
    ///   not an absolute path
    /// - [`MeshError::UnassociatedResource`] for a path when `thing` is not
    ///   hosted here
    fn relative_uri_for_thing(&self, thing: &Thing, uri: &Uri) -> Result<Uri, MeshError> {
        if !uri.is_absolute() {
            if !uri.path().starts_with('/') {
                return Err(MeshError::UnknownResource { uri: uri.to_string() });
            }
            if !self.is_hosted(thing) {
                return Err(MeshError::UnassociatedResource {
                    resource: thing.id().to_string(),
                });
            }
            return Ok(uri.clone());
        }
        let base = self.native_uri_for_thing(thing)?;
        if uri.scheme() == base.scheme() && uri.authority() == base.authority() {
            return Ok(uri.path_and_query().parse()?);
        }
        Ok(uri.clone())
    }

    /// Create a group with a fresh id. The group is not hosted.
    fn create_new_group(&self) -> Task<Thing> {
        Task::failed(MeshError::GroupsNotSupported)
    }

    fn fetch_or_create_group_with_id(&self, _group_id: &str) -> Task<Thing> {
        Task::failed(MeshError::GroupsNotSupported)
    }
}
