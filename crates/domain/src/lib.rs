//! # thingmesh-domain
//!
//! Pure domain model for the thingmesh device runtime.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Values** (the dynamically typed payload of every property)
//! - Define **Value types** and the closed **coercion table** between them
//! - Define **Property keys** (`<section>/<trait>/<name>`), method keys and
//!   parameter keys, typed over the Rust type they coerce to
//! - Define **Sections** (state, config, metadata), **modifiers** and
//!   **mutations** (increment, toggle, insert, remove)
//! - Define **URIs** used to address things across technologies
//! - Describe the minimal **trait catalog** (base, on/off, level,
//!   transition, scene)
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod catalog;
pub mod coerce;
pub mod key;
pub mod modifier;
pub mod section;
pub mod uri;
pub mod value;
pub mod value_type;
