//! URI references used to address things, properties and sections.
//!
//! Only the generic component split is implemented
//! (`scheme:[//authority]path[?query][#fragment]`); scheme-specific rules
//! belong to the technology that owns the scheme.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InvalidValueError;

/// An absolute URI or a relative reference.
///
/// The original text is kept verbatim so that string round-trips are exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uri(String);

impl Uri {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme, when this is an absolute URI.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        scheme_end(&self.0).map(|end| &self.0[..end])
    }

    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.scheme().is_some()
    }

    /// The authority (`host[:port]`) following `//`, if any.
    #[must_use]
    pub fn authority(&self) -> Option<&str> {
        let rest = self.after_scheme();
        let rest = rest.strip_prefix("//")?;
        let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// The path component, possibly empty.
    #[must_use]
    pub fn path(&self) -> &str {
        let rest = self.after_authority();
        let end = rest.find(['?', '#']).unwrap_or(rest.len());
        &rest[..end]
    }

    /// The query component without the leading `?`.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        let rest = self.after_authority();
        let start = rest.find('?')? + 1;
        let rest = &rest[start..];
        let end = rest.find('#').unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Query parameters split on `&`, empty entries dropped.
    pub fn query_params(&self) -> impl Iterator<Item = &str> {
        self.query()
            .unwrap_or_default()
            .split('&')
            .filter(|param| !param.is_empty())
    }

    /// Path followed by query, as it would appear after the authority.
    #[must_use]
    pub fn path_and_query(&self) -> &str {
        let rest = self.after_authority();
        let end = rest.find('#').unwrap_or(rest.len());
        &rest[..end]
    }

    /// Append `suffix` to this URI's text.
    ///
    /// Used to derive property and section URIs from a thing's base URI,
    /// which always ends with `/`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError::MalformedUri`] if the result is not a
    /// valid URI.
    pub fn join(&self, suffix: &str) -> Result<Self, InvalidValueError> {
        format!("{}{suffix}", self.0).parse()
    }

    /// Build `scheme://authority` with `path_and_query` appended.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError::MalformedUri`] if the result is not a
    /// valid URI.
    pub fn from_parts(
        scheme: &str,
        authority: &str,
        path_and_query: &str,
    ) -> Result<Self, InvalidValueError> {
        format!("{scheme}://{authority}{path_and_query}").parse()
    }

    fn after_scheme(&self) -> &str {
        match scheme_end(&self.0) {
            Some(end) => &self.0[end + 1..],
            None => &self.0,
        }
    }

    fn after_authority(&self) -> &str {
        let rest = self.after_scheme();
        match rest.strip_prefix("//") {
            Some(rest) => {
                let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
                &rest[end..]
            }
            None => rest,
        }
    }
}

/// Index of the `:` terminating a valid scheme, if the text has one.
fn scheme_end(text: &str) -> Option<usize> {
    let end = text.find([':', '/', '?', '#'])?;
    if !text[end..].starts_with(':') || end == 0 {
        return None;
    }
    let scheme = &text[..end];
    let mut chars = scheme.chars();
    let first_is_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_valid = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    (first_is_alpha && rest_valid).then_some(end)
}

impl FromStr for Uri {
    type Err = InvalidValueError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let valid = !text.is_empty()
            && !text
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>' | '"'));
        if valid {
            Ok(Self(text.to_string()))
        } else {
            Err(InvalidValueError::MalformedUri(text.to_string()))
        }
    }
}

impl TryFrom<String> for Uri {
    type Error = InvalidValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Uri> for String {
    fn from(uri: Uri) -> Self {
        uri.0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_split_absolute_uri_into_components() {
        let uri: Uri = "loop://node-a/1/s/levl/v?inc&d=0.5".parse().unwrap();
        assert_eq!(uri.scheme(), Some("loop"));
        assert_eq!(uri.authority(), Some("node-a"));
        assert_eq!(uri.path(), "/1/s/levl/v");
        assert_eq!(uri.query(), Some("inc&d=0.5"));
        assert_eq!(uri.query_params().collect::<Vec<_>>(), vec!["inc", "d=0.5"]);
    }

    #[test]
    fn should_treat_path_only_reference_as_relative() {
        let uri: Uri = "/1/2/3?inc".parse().unwrap();
        assert!(!uri.is_absolute());
        assert_eq!(uri.authority(), None);
        assert_eq!(uri.path(), "/1/2/3");
        assert_eq!(uri.path_and_query(), "/1/2/3?inc");
    }

    #[test]
    fn should_keep_text_verbatim() {
        let text = "loop://all-nodes/g/abc/";
        let uri: Uri = text.parse().unwrap();
        assert_eq!(uri.to_string(), text);
    }

    #[test]
    fn should_reject_whitespace() {
        assert!("loop://a b/".parse::<Uri>().is_err());
        assert!("".parse::<Uri>().is_err());
    }

    #[test]
    fn should_join_suffix_onto_base() {
        let base: Uri = "loop://node-a/1/".parse().unwrap();
        let joined = base.join("s/onof/v").unwrap();
        assert_eq!(joined.as_str(), "loop://node-a/1/s/onof/v");
    }

    #[test]
    fn should_not_mistake_colon_in_path_for_scheme() {
        let uri: Uri = "/a:b".parse().unwrap();
        assert_eq!(uri.scheme(), None);
    }
}
