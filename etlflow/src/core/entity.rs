//! Entity types and pipeline dependency metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The logical record type a pipeline produces or reads.
///
/// Two pipelines are related when one's target equals one of the other's
/// sources; the comparison is by name only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    /// Creates an entity type from an explicit name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Derives the entity type from a Rust type's unqualified name.
    #[must_use]
    pub fn of<T: ?Sized>() -> Self {
        Self(short_type_name(std::any::type_name::<T>()))
    }

    /// Returns the entity type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for EntityType {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

/// Strips module paths from every segment of a type name.
///
/// `alloc::vec::Vec<app::model::Customer>` becomes `Vec<Customer>`.
pub(crate) fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();

    for ch in full.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == ':' {
            segment.push(ch);
        } else {
            out.push_str(segment.rsplit("::").next().unwrap_or(&segment));
            segment.clear();
            out.push(ch);
        }
    }
    out.push_str(segment.rsplit("::").next().unwrap_or(&segment));
    out
}

/// Which entity type a pipeline writes and which ones it reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyMetadata {
    /// The entity type this pipeline produces, if it has one.
    pub target: Option<EntityType>,
    /// Entity types this pipeline reads from, in declaration order.
    #[serde(default)]
    pub sources: Vec<EntityType>,
}

impl DependencyMetadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target entity type.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<EntityType>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Adds a source entity type. Duplicates are ignored.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<EntityType>) -> Self {
        let source = source.into();
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
        self
    }

    /// Returns the sources that are real dependencies.
    ///
    /// Reading and writing the same entity type is not a dependency, so the
    /// target is removed from the source list.
    #[must_use]
    pub fn dependencies(&self) -> Vec<&EntityType> {
        self.sources
            .iter()
            .filter(|s| self.target.as_ref() != Some(*s))
            .collect()
    }
}
