//! Selecting which containers and pipelines a run covers.

use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// What a container predicate sees.
#[derive(Debug, Clone, Copy)]
pub struct ContainerInfo<'a> {
    /// Container name.
    pub name: &'a str,
    /// Effective cluster, after defaulting.
    pub cluster: &'a str,
}

/// What a method predicate sees.
#[derive(Debug, Clone, Copy)]
pub struct MethodInfo<'a> {
    /// Owning container.
    pub container: &'a str,
    /// Method name.
    pub name: &'a str,
    /// Method tags.
    pub tags: &'a [String],
}

type ContainerPredicate = Arc<dyn Fn(&ContainerInfo<'_>) -> bool + Send + Sync>;
type MethodPredicate = Arc<dyn Fn(&MethodInfo<'_>) -> bool + Send + Sync>;

/// Container and method predicates for a run.
///
/// Every configured condition must hold. Within the cluster, container, and
/// tag lists any single entry matching is enough. The default filter accepts
/// everything.
#[derive(Clone, Default)]
pub struct RunFilter {
    clusters: Vec<String>,
    containers: Vec<String>,
    tags: Vec<String>,
    name_pattern: Option<Regex>,
    container_predicate: Option<ContainerPredicate>,
    method_predicate: Option<MethodPredicate>,
}

impl RunFilter {
    /// A filter accepting every container and method.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts the run to a cluster. May be repeated.
    #[must_use]
    pub fn cluster(mut self, cluster: impl Into<String>) -> Self {
        self.clusters.push(cluster.into());
        self
    }

    /// Restricts the run to a container. May be repeated.
    #[must_use]
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.containers.push(container.into());
        self
    }

    /// Restricts the run to methods carrying a tag. May be repeated.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Restricts the run to methods whose name matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error for an invalid pattern.
    pub fn name_matching(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.name_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Adds a custom container condition.
    #[must_use]
    pub fn where_container<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ContainerInfo<'_>) -> bool + Send + Sync + 'static,
    {
        self.container_predicate = Some(Arc::new(predicate));
        self
    }

    /// Adds a custom method condition.
    #[must_use]
    pub fn where_method<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&MethodInfo<'_>) -> bool + Send + Sync + 'static,
    {
        self.method_predicate = Some(Arc::new(predicate));
        self
    }

    /// Returns true if the container takes part in the run.
    #[must_use]
    pub fn matches_container(&self, info: &ContainerInfo<'_>) -> bool {
        (self.clusters.is_empty() || self.clusters.iter().any(|c| c == info.cluster))
            && (self.containers.is_empty() || self.containers.iter().any(|c| c == info.name))
            && self.container_predicate.as_ref().map_or(true, |p| p(info))
    }

    /// Returns true if the method takes part in the run.
    #[must_use]
    pub fn matches_method(&self, info: &MethodInfo<'_>) -> bool {
        (self.tags.is_empty() || self.tags.iter().any(|t| info.tags.contains(t)))
            && self
                .name_pattern
                .as_ref()
                .map_or(true, |re| re.is_match(info.name))
            && self.method_predicate.as_ref().map_or(true, |p| p(info))
    }
}

impl fmt::Debug for RunFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunFilter")
            .field("clusters", &self.clusters)
            .field("containers", &self.containers)
            .field("tags", &self.tags)
            .field("name_pattern", &self.name_pattern.as_ref().map(Regex::as_str))
            .field("container_predicate", &self.container_predicate.is_some())
            .field("method_predicate", &self.method_predicate.is_some())
            .finish()
    }
}
