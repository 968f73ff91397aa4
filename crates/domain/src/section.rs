//! Sections group properties by purpose.
//!
//! The section of a property is encoded as the first segment of its name:
//! `s/onof/v` is a state property, `c/onof/don` a config property and
//! `m/base/name` a metadata property.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::ValueMap;

/// One of the three property sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    /// Live, frequently changing values.
    State,
    /// Adjustable parameters.
    Config,
    /// Identity and descriptive information.
    Metadata,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::State, Section::Config, Section::Metadata];

    /// Single-letter name prefix.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::State => "s",
            Self::Config => "c",
            Self::Metadata => "m",
        }
    }

    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "s" => Some(Self::State),
            "c" => Some(Self::Config),
            "m" => Some(Self::Metadata),
            _ => None,
        }
    }

    /// Section a property name belongs to, if its prefix is a section.
    #[must_use]
    pub fn of_key(name: &str) -> Option<Self> {
        name.split('/').next().and_then(Self::from_prefix)
    }

    /// Whether `name` is a property of this section.
    #[must_use]
    pub fn contains(self, name: &str) -> bool {
        Self::of_key(name) == Some(self)
    }

    /// Copy the entries of `map` that belong to this section.
    #[must_use]
    pub fn filter(self, map: &ValueMap) -> ValueMap {
        map.iter()
            .filter(|(name, _)| self.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::State => "state",
            Self::Config => "config",
            Self::Metadata => "metadata",
        };
        f.write_str(name)
    }
}
