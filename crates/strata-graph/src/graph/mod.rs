//! Dependency graph of resource nodes
//!
//! A [`DependencyGraph`] is built single-threaded while a stack is declared.
//! [`DependencyGraph::finalize`] consumes it, derives every edge, rejects
//! cycles and returns a read-only [`FinalizedGraph`] that the executor walks.
//!
//! Edges come from three places:
//! - explicit `depends_on` declarations
//! - data references found by scanning every field value for other nodes'
//!   outputs
//! - provider bindings: a node bound to a cluster-scoped provider depends on
//!   the provider node, which in turn depends on whatever its kubeconfig reads

pub mod topology;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::{GraphCycleError, GraphError};
use crate::node::{
    NodeHandle, NodeId, ProviderBinding, ResourceKind, ResourceNode, KUBECONFIG_FIELD,
};
use crate::value::Value;
use topology::Adjacency;

/// Why an edge exists
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    /// Declared with `depends_on`
    Explicit,
    /// A field value references the dependency's outputs
    Data,
    /// The node is bound to the dependency as its provider
    Provider,
}

impl EdgeKind {
    /// Lowercase label for plans and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Data => "data",
            Self::Provider => "provider",
        }
    }
}

/// A dependency edge: `dependent` may not start before `dependency` is applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    /// The node that must be applied first
    pub dependency: NodeId,
    /// The node that waits
    pub dependent: NodeId,
    /// Every reason this edge exists
    pub kinds: BTreeSet<EdgeKind>,
}

/// Graph under construction
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<NodeId, ResourceNode>,
    exports: BTreeMap<String, Value>,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node
    pub fn add(&mut self, node: ResourceNode) -> Result<NodeHandle, GraphError> {
        let id = node.id().clone();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.nodes.insert(id.clone(), node);
        Ok(NodeHandle::new(id))
    }

    /// Publish a named top-level output of the run
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.exports.insert(name.into(), value.into());
    }

    /// Whether a node with this ID has been added
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of declared nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node has been declared
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Derive all edges, validate bindings and reject cycles.
    ///
    /// Consumes the graph: nothing can be added afterwards.
    pub fn finalize(self) -> Result<FinalizedGraph, GraphError> {
        let mut edges: BTreeMap<NodeId, BTreeMap<NodeId, BTreeSet<EdgeKind>>> = BTreeMap::new();

        for (id, node) in &self.nodes {
            validate_binding(node, &self.nodes)?;

            let node_edges = edges.entry(id.clone()).or_default();
            let discovered = node
                .explicit_dependencies()
                .iter()
                .map(|dep| (dep.clone(), EdgeKind::Explicit))
                .chain(
                    node.data_dependencies()
                        .into_iter()
                        .map(|dep| (dep, EdgeKind::Data)),
                )
                .chain(
                    node.binding()
                        .provider_node()
                        .map(|p| (p.clone(), EdgeKind::Provider)),
                );

            for (dep, kind) in discovered {
                if !self.nodes.contains_key(&dep) {
                    return Err(GraphError::UnknownDependency {
                        node: id.clone(),
                        dependency: dep,
                    });
                }
                debug!(node = %id, dependency = %dep, kind = ?kind, "discovered edge");
                node_edges.entry(dep).or_default().insert(kind);
            }
        }

        for (name, value) in &self.exports {
            if let Some(missing) = value
                .references()
                .into_iter()
                .find(|n| !self.nodes.contains_key(n))
            {
                return Err(GraphError::UnknownExportSource {
                    export: name.clone(),
                    node: missing,
                });
            }
        }

        let dependencies: Adjacency = edges
            .iter()
            .map(|(id, deps)| (id.clone(), deps.keys().cloned().collect()))
            .collect();

        let Some(order) = topology::topological_order(&dependencies) else {
            let cycle = topology::find_cycle(&dependencies)
                .unwrap_or(GraphCycleError { cycle: Vec::new() });
            return Err(cycle.into());
        };
        let levels = topology::levels(&dependencies, &order);
        let dependents = topology::invert(&dependencies);

        debug!(
            nodes = self.nodes.len(),
            edges = dependencies.values().map(BTreeSet::len).sum::<usize>(),
            levels = levels.len(),
            "graph finalized"
        );

        Ok(FinalizedGraph {
            inner: Arc::new(GraphInner {
                nodes: self.nodes,
                edges,
                dependencies,
                dependents,
                order,
                levels,
                exports: self.exports,
            }),
        })
    }
}

fn validate_binding(
    node: &ResourceNode,
    nodes: &BTreeMap<NodeId, ResourceNode>,
) -> Result<(), GraphError> {
    let invalid = |message: String| GraphError::InvalidBinding {
        node: node.id().clone(),
        message,
    };
    let chart_kind = matches!(
        node.id().kind,
        ResourceKind::HelmChart | ResourceKind::Manifest
    );

    if node.id().kind == ResourceKind::PodExec
        && !matches!(node.binding(), ProviderBinding::Cluster(_))
    {
        return Err(invalid(
            "PodExec nodes must be bound to a cluster backend".to_string(),
        ));
    }

    match node.binding() {
        ProviderBinding::Cloud | ProviderBinding::Connector if chart_kind => Err(invalid(format!(
            "{} nodes must be bound to a chart backend",
            node.id().kind
        ))),
        ProviderBinding::Cloud => Ok(()),
        ProviderBinding::Connector => {
            if node.fields().contains_key(KUBECONFIG_FIELD) {
                Ok(())
            } else {
                Err(invalid(format!(
                    "connector-bound nodes need a '{KUBECONFIG_FIELD}' field"
                )))
            }
        }
        ProviderBinding::Cluster(provider) | ProviderBinding::Chart(provider) => {
            let is_chart = matches!(node.binding(), ProviderBinding::Chart(_));
            if is_chart != chart_kind {
                return Err(invalid(format!(
                    "{} nodes cannot use the {} backend",
                    node.id().kind,
                    node.binding().backend()
                )));
            }
            match nodes.get(provider) {
                None => Err(GraphError::UnknownDependency {
                    node: node.id().clone(),
                    dependency: provider.clone(),
                }),
                Some(p) if *p.binding() != ProviderBinding::Connector => Err(invalid(format!(
                    "{provider} is not a cluster provider"
                ))),
                Some(_) => Ok(()),
            }
        }
    }
}

#[derive(Debug)]
struct GraphInner {
    nodes: BTreeMap<NodeId, ResourceNode>,
    edges: BTreeMap<NodeId, BTreeMap<NodeId, BTreeSet<EdgeKind>>>,
    dependencies: Adjacency,
    dependents: Adjacency,
    order: Vec<NodeId>,
    levels: Vec<Vec<NodeId>>,
    exports: BTreeMap<String, Value>,
}

/// A validated, acyclic, read-only graph. Cheap to clone.
#[derive(Clone, Debug)]
pub struct FinalizedGraph {
    inner: Arc<GraphInner>,
}

impl FinalizedGraph {
    /// Look up a node
    pub fn node(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.inner.nodes.get(id)
    }

    /// All nodes, ordered by ID
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.inner.nodes.values()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.inner.nodes.is_empty()
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.inner.dependencies.get(id).into_iter().flatten()
    }

    /// Direct dependents of a node
    pub fn dependents(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.inner.dependents.get(id).into_iter().flatten()
    }

    /// Every node reachable from `id` through dependent edges, excluding `id`
    pub fn transitive_dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&NodeId> = self.dependents(id).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Reasons for the edge `dependency → dependent`, if it exists
    pub fn edge_kinds(
        &self,
        dependent: &NodeId,
        dependency: &NodeId,
    ) -> Option<&BTreeSet<EdgeKind>> {
        self.inner.edges.get(dependent)?.get(dependency)
    }

    /// Every edge in the graph
    pub fn edges(&self) -> Vec<Edge> {
        self.inner
            .edges
            .iter()
            .flat_map(|(dependent, deps)| {
                deps.iter().map(move |(dependency, kinds)| Edge {
                    dependency: dependency.clone(),
                    dependent: dependent.clone(),
                    kinds: kinds.clone(),
                })
            })
            .collect()
    }

    /// A deterministic topological order
    pub fn order(&self) -> &[NodeId] {
        &self.inner.order
    }

    /// Nodes grouped by depth; all nodes in one level can apply concurrently
    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.inner.levels
    }

    /// Declared exports
    pub fn exports(&self) -> &BTreeMap<String, Value> {
        &self.inner.exports
    }

    /// Forget transform results cached by a previous run
    pub(crate) fn clear_memos(&self) {
        let fields = self.nodes().flat_map(|node| node.fields().values());
        for value in fields.chain(self.exports().values()) {
            value.clear_memo();
        }
    }
}
