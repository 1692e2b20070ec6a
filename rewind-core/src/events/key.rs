//! Namespaced keys for tool names and memory entries
//!
//! Tools coming from several sources (MCP servers, built-ins) share one
//! registry, so their names are prefixed with the source: `server.tool`.
//! Memory keys follow the same convention.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const SEPARATOR: char = '.';

/// A name optionally qualified by a namespace.
///
/// Serialized as the qualified string (`"namespace.name"` or `"name"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedKey {
    namespace: Option<String>,
    name: String,
}

/// Tool names use the same convention as memory keys
pub type ToolName = NamespacedKey;

impl NamespacedKey {
    /// An unqualified key
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// A key qualified by `namespace`. An empty namespace yields an unqualified key.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: (!namespace.is_empty()).then_some(namespace),
            name: name.into(),
        }
    }

    /// Parse a qualified string. Only the first separator splits, so names
    /// may themselves contain dots.
    pub fn parse(qualified: &str) -> Self {
        match qualified.split_once(SEPARATOR) {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Self::namespaced(namespace, name)
            }
            _ => Self::new(qualified),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NamespacedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}{}{}", ns, SEPARATOR, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for NamespacedKey {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for NamespacedKey {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl Serialize for NamespacedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NamespacedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}
