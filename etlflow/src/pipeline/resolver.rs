//! Ordering pipelines into waves by their entity-type dependencies.

use super::descriptor::Pipeline;
use crate::core::{DependencyMetadata, EntityType};
use crate::errors::CircularDependencyError;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Anything that can be placed in the dependency graph.
pub trait DependencyNode {
    /// Name used in logs and errors.
    fn label(&self) -> String;

    /// The entity type the node produces and the ones it reads.
    fn dependency_metadata(&self) -> &DependencyMetadata;
}

impl DependencyNode for Pipeline {
    fn label(&self) -> String {
        self.qualified_name()
    }

    fn dependency_metadata(&self) -> &DependencyMetadata {
        Pipeline::dependency_metadata(self)
    }
}

/// One node of the graph built for a single `resolve` call.
struct GraphNode<N> {
    node: N,
    target: EntityType,
    dependencies: Vec<EntityType>,
}

/// Groups pipelines into waves that can run one after another.
///
/// A pipeline lands in a later wave than every pipeline producing one of its
/// sources. Pipelines sharing a target always share a wave.
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Resolves `nodes` into waves using Kahn's algorithm over entity types.
    ///
    /// Nodes without a target are left out. A source that no node produces is
    /// still a vertex of the graph, so its readers run one round after the
    /// nodes with no sources at all. Rounds that place no node are skipped,
    /// keeping wave numbers dense. Within a wave nodes keep their input order.
    ///
    /// # Errors
    ///
    /// Returns [`CircularDependencyError`] naming every node that could not
    /// be placed if the dependencies form a cycle. No waves are returned in
    /// that case.
    pub fn resolve<N: DependencyNode>(nodes: Vec<N>) -> Result<Vec<Vec<N>>, CircularDependencyError> {
        let mut graph_nodes = Vec::with_capacity(nodes.len());
        for node in nodes {
            let metadata = node.dependency_metadata();
            let Some(target) = metadata.target.clone() else {
                warn!(pipeline = %node.label(), "Pipeline has no target entity type, not scheduled");
                continue;
            };
            let dependencies = metadata.dependencies().into_iter().cloned().collect();
            graph_nodes.push(GraphNode {
                node,
                target,
                dependencies,
            });
        }

        // Entity types in first-seen order: every target, then every
        // dependency. A dependency nobody produces is a vertex with no nodes.
        let mut types: Vec<EntityType> = Vec::new();
        let mut index: HashMap<EntityType, usize> = HashMap::new();
        let mut register = |entity: &EntityType| -> usize {
            *index.entry(entity.clone()).or_insert_with(|| {
                types.push(entity.clone());
                types.len() - 1
            })
        };
        let targets: Vec<usize> = graph_nodes.iter().map(|n| register(&n.target)).collect();
        let dependencies: Vec<Vec<usize>> = graph_nodes
            .iter()
            .map(|n| n.dependencies.iter().map(&mut register).collect())
            .collect();

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); types.len()];
        let mut indegree: Vec<usize> = vec![0; types.len()];
        let mut producers: Vec<Vec<usize>> = vec![Vec::new(); types.len()];
        let mut edges: HashSet<(usize, usize)> = HashSet::new();

        for (position, (&target, sources)) in targets.iter().zip(&dependencies).enumerate() {
            producers[target].push(position);
            for &source in sources {
                if edges.insert((source, target)) {
                    dependents[source].push(target);
                    indegree[target] += 1;
                }
            }
        }

        let mut slots: Vec<Option<GraphNode<N>>> = graph_nodes.into_iter().map(Some).collect();
        let mut queue: Vec<usize> = (0..types.len()).filter(|&t| indegree[t] == 0).collect();
        let mut waves = Vec::new();

        while !queue.is_empty() {
            let mut members: Vec<usize> = Vec::new();
            for entity in std::mem::take(&mut queue) {
                if producers[entity].is_empty() {
                    debug!(entity_type = %types[entity], "Entity type is not produced in this set");
                }
                members.extend_from_slice(&producers[entity]);
                for &next in &dependents[entity] {
                    indegree[next] -= 1;
                    if indegree[next] == 0 {
                        queue.push(next);
                    }
                }
            }
            // A round that only released unproduced types yields no wave.
            if members.is_empty() {
                continue;
            }
            members.sort_unstable();

            let wave: Vec<N> = members
                .into_iter()
                .filter_map(|position| slots[position].take())
                .map(|graph_node| graph_node.node)
                .collect();
            debug!(wave = waves.len() + 1, pipelines = wave.len(), "Resolved wave");
            waves.push(wave);
        }

        let unresolved: Vec<String> = slots
            .iter()
            .flatten()
            .map(|graph_node| graph_node.node.label())
            .collect();
        if !unresolved.is_empty() {
            let cycle_types = types
                .iter()
                .zip(&indegree)
                .filter(|&(_, &degree)| degree > 0)
                .map(|(entity, _)| entity.to_string())
                .collect();
            return Err(CircularDependencyError::new(unresolved, cycle_types));
        }

        Ok(waves)
    }
}
