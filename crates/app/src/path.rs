//! Path grammar shared by the local and transport technologies.
//!
//! ```text
//! /{index}/                      hosted thing (1-based)
//! /g/{group-id}/                 group
//! {thing}ch/{trait}/{id}/        child of a thing
//! {thing}ch/{trait}/             child listing
//! {thing}{s|c|m}/                section
//! {thing}{s|c|m}/{trait}/{name}  property
//! {thing}f/{trait}/{name}        method
//! ```
//!
//! Mutations and modifiers travel in the query: `?inc&d=0.5`.

use thingmesh_domain::error::MeshError;
use thingmesh_domain::key::METHOD_PREFIX;
use thingmesh_domain::modifier::{Modifier, Mutation};
use thingmesh_domain::section::Section;
use thingmesh_domain::uri::Uri;

use crate::ports::technology::PARENT_SEARCH_DEPTH;
use crate::thing::Thing;

const GROUP_SEGMENT: &str = "g";
const CHILD_SEGMENT: &str = "ch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Root {
    Index(usize),
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Thing,
    Section(Section),
    Property(String),
    Method(String),
    Children(String),
}

/// A parsed resource path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResourcePath {
    pub root: Root,
    /// `(trait id, child id)` steps from the root to the addressed thing.
    pub children: Vec<(String, String)>,
    pub target: Target,
}

pub(crate) fn thing_path(index: usize) -> String {
    format!("/{index}/")
}

pub(crate) fn group_path(group_id: &str) -> String {
    format!("/{GROUP_SEGMENT}/{group_id}/")
}

pub(crate) fn child_suffix(trait_id: &str, child_id: &str) -> String {
    format!("{CHILD_SEGMENT}/{trait_id}/{child_id}/")
}

pub(crate) fn section_suffix(section: Section) -> String {
    format!("{}/", section.prefix())
}

pub(crate) fn children_suffix(trait_id: &str) -> String {
    format!("{CHILD_SEGMENT}/{trait_id}/")
}

/// Query string for an operation, including the leading `?` when not
/// empty.
pub(crate) fn query(mutation: Option<&Mutation>, modifiers: &[Modifier]) -> String {
    let params: Vec<String> = mutation
        .map(|mutation| mutation.query_token().to_string())
        .into_iter()
        .chain(modifiers.iter().map(|modifier| modifier.to_query()))
        .collect();
    if params.is_empty() {
        String::new()
    } else {
        format!("?{}", params.join("&"))
    }
}

/// Modifiers carried by a URI's query.
pub(crate) fn modifiers(uri: &Uri) -> Vec<Modifier> {
    uri.query_params().filter_map(Modifier::from_query).collect()
}

/// First mutation token in a URI's query.
pub(crate) fn mutation_token(uri: &Uri) -> Option<&str> {
    uri.query_params()
        .find(|param| matches!(*param, "inc" | "tog" | "ins" | "rem"))
}

/// URI of `thing` built from the nearest ancestor `base_for` can address,
/// followed by one child step per generation.
pub(crate) fn resolve_child_uri(thing: &Thing, base_for: impl Fn(&Thing) -> Option<Uri>) -> Option<Uri> {
    let mut suffix = String::new();
    let mut current = thing.clone();
    for _ in 0..=PARENT_SEARCH_DEPTH {
        if let Some(base) = base_for(&current) {
            return base.join(&suffix).ok();
        }
        let parent = current.parent()?;
        let (trait_id, child_id) = parent.as_local()?.child_path(&current)?;
        suffix.insert_str(0, &child_suffix(trait_id, &child_id));
        current = parent;
    }
    None
}

/// Follow `(trait id, child id)` steps down from `root`.
pub(crate) fn walk_children(root: Thing, steps: &[(String, String)]) -> Option<Thing> {
    steps.iter().try_fold(root, |thing, (trait_id, child_id)| {
        thing
            .cached_children(trait_id)
            .into_iter()
            .find(|child| thing.id_for_child(child).as_deref() == Some(child_id.as_str()))
    })
}

fn unknown(path: &str) -> MeshError {
    MeshError::UnknownResource {
        uri: path.to_string(),
    }
}

impl ResourcePath {
    /// Parse the path component of a URI.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::UnknownResource`] when the path does not follow
    /// the grammar.
    pub(crate) fn parse(path: &str) -> Result<Self, MeshError> {
        let rest = path.strip_prefix('/').ok_or_else(|| unknown(path))?;
        let segments: Vec<&str> = rest.split('/').collect();
        let (root, mut rest) = match segments.as_slice() {
            [GROUP_SEGMENT, group_id, rest @ ..] if !group_id.is_empty() => {
                (Root::Group((*group_id).to_string()), rest)
            }
            [index, rest @ ..] => {
                let index: usize = index.parse().map_err(|_| unknown(path))?;
                if index == 0 {
                    return Err(unknown(path));
                }
                (Root::Index(index), rest)
            }
            [] => return Err(unknown(path)),
        };

        let mut children = Vec::new();
        while let [CHILD_SEGMENT, trait_id, child_id, tail @ ..] = rest {
            if trait_id.is_empty() || child_id.is_empty() {
                break;
            }
            children.push(((*trait_id).to_string(), (*child_id).to_string()));
            rest = tail;
        }

        let target = match rest {
            [] | [""] => Target::Thing,
            [CHILD_SEGMENT, trait_id, ""] if !trait_id.is_empty() => Target::Children((*trait_id).to_string()),
            [prefix, ""] => Target::Section(Section::from_prefix(prefix).ok_or_else(|| unknown(path))?),
            [prefix, trait_id, name] if !trait_id.is_empty() && !name.is_empty() => {
                let key = format!("{prefix}/{trait_id}/{name}");
                if *prefix == METHOD_PREFIX {
                    Target::Method(key)
                } else if Section::from_prefix(prefix).is_some() {
                    Target::Property(key)
                } else {
                    return Err(unknown(path));
                }
            }
            _ => return Err(unknown(path)),
        };
        Ok(Self { root, children, target })
    }

    /// Path of the addressed thing, ending with `/`.
    pub(crate) fn thing_prefix(&self) -> String {
        let mut prefix = match &self.root {
            Root::Index(index) => thing_path(*index),
            Root::Group(group_id) => group_path(group_id),
        };
        for (trait_id, child_id) in &self.children {
            prefix.push_str(&child_suffix(trait_id, child_id));
        }
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_property_of_hosted_thing() {
        let path = ResourcePath::parse("/2/s/levl/v").unwrap();
        assert_eq!(path.root, Root::Index(2));
        assert!(path.children.is_empty());
        assert_eq!(path.target, Target::Property("s/levl/v".to_string()));
    }

    #[test]
    fn should_parse_group_section() {
        let path = ResourcePath::parse("/g/abc123/s/").unwrap();
        assert_eq!(path.root, Root::Group("abc123".to_string()));
        assert_eq!(path.target, Target::Section(Section::State));
    }

    #[test]
    fn should_walk_nested_children() {
        let path = ResourcePath::parse("/1/ch/scen/dim/s/levl/v").unwrap();
        assert_eq!(path.children, vec![("scen".to_string(), "dim".to_string())]);
        assert_eq!(path.thing_prefix(), "/1/ch/scen/dim/");
    }

    #[test]
    fn should_parse_child_listing_and_methods() {
        let listing = ResourcePath::parse("/1/ch/scen/").unwrap();
        assert_eq!(listing.target, Target::Children("scen".to_string()));
        let method = ResourcePath::parse("/1/f/scen/save").unwrap();
        assert_eq!(method.target, Target::Method("f/scen/save".to_string()));
        assert_eq!(ResourcePath::parse("/1/").unwrap().target, Target::Thing);
    }

    #[test]
    fn should_reject_malformed_paths() {
        for path in ["", "1/", "/0/", "/x/", "/1/q/", "/1/z/levl/v", "/g//"] {
            assert!(ResourcePath::parse(path).is_err(), "{path}");
        }
    }

    #[test]
    fn should_encode_mutation_before_modifiers() {
        let query = query(Some(&Mutation::Toggle), &[Modifier::Duration(0.5)]);
        assert_eq!(query, "?tog&d=0.5");
        assert_eq!(super::query(None, &[]), "");
    }
}
