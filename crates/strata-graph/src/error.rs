//! Graph declaration errors and per-node apply errors

use std::fmt;

use thiserror::Error;

use crate::node::NodeId;
use crate::provider::ProviderError;
use crate::value::ValueId;

/// A dependency cycle, as the sequence of nodes around it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct GraphCycleError {
    /// Nodes on the cycle; the first node is repeated at the end
    pub cycle: Vec<NodeId>,
}

impl fmt::Display for GraphCycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<String> = self.cycle.iter().map(ToString::to_string).collect();
        write!(f, "dependency cycle: {}", path.join(" -> "))
    }
}

/// Errors raised while declaring or finalizing a graph.
///
/// All of these are detected before any node is applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two nodes share a `(kind, name)` identity
    #[error("node {0} is declared more than once")]
    DuplicateNode(NodeId),

    /// A node depends on, or references outputs of, an undeclared node
    #[error("node {node} depends on undeclared node {dependency}")]
    UnknownDependency {
        /// The declaring node
        node: NodeId,
        /// The missing dependency
        dependency: NodeId,
    },

    /// A provider binding points at something that is not a provider node
    #[error("node {node} has an invalid provider binding: {message}")]
    InvalidBinding {
        /// The misbound node
        node: NodeId,
        /// What is wrong with the binding
        message: String,
    },

    /// An export references an undeclared node
    #[error("export '{export}' references undeclared node {node}")]
    UnknownExportSource {
        /// Export name
        export: String,
        /// The missing node
        node: NodeId,
    },

    /// The graph is not a DAG
    #[error(transparent)]
    Cycle(#[from] GraphCycleError),
}

impl GraphError {
    /// Node the error is attributed to
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            Self::DuplicateNode(node) => Some(node),
            Self::UnknownDependency { node, .. } | Self::InvalidBinding { node, .. } => Some(node),
            Self::UnknownExportSource { node, .. } => Some(node),
            Self::Cycle(cycle) => cycle.cycle.first(),
        }
    }
}

impl From<GraphError> for strata_common::Error {
    fn from(err: GraphError) -> Self {
        let node = err
            .node()
            .map(ToString::to_string)
            .unwrap_or_else(|| "graph".to_string());
        strata_common::Error::declaration(node, err.to_string())
    }
}

/// Failure to turn a [`Value`](crate::Value) into concrete data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A referenced node has not published the requested output
    #[error("output '{field}' of {node} is not available")]
    MissingOutput {
        /// Node that should have produced the output
        node: NodeId,
        /// Requested output field
        field: String,
    },

    /// A derived value's transform failed
    #[error("transform of value {value} failed: {message}")]
    Transform {
        /// The derived value
        value: ValueId,
        /// Error reported by the transform
        message: String,
    },
}

/// Why a node ended up `Failed`
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// The bound backend rejected the create/update
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// An input value could not be resolved
    #[error("failed to resolve field '{field}': {source}")]
    Resolution {
        /// Field whose value failed
        field: String,
        /// Underlying resolution error
        source: ResolveError,
    },

    /// Resolved inputs do not have the shape the backend needs
    #[error("invalid input '{field}': {message}")]
    InvalidInput {
        /// Offending field
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// The cluster-scoped provider this node is bound to was never built
    #[error("provider {provider} is not available")]
    ProviderUnavailable {
        /// The provider node
        provider: NodeId,
    },

    /// The apply task panicked
    #[error("apply task panicked: {0}")]
    Panicked(String),
}

impl NodeError {
    /// Create an invalid-input error
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the apply could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.retryable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ResourceKind;

    #[test]
    fn cycle_error_names_the_path() {
        let a = NodeId::new(ResourceKind::Secret, "a");
        let b = NodeId::new(ResourceKind::HelmChart, "b");
        let err = GraphError::from(GraphCycleError {
            cycle: vec![a.clone(), b, a.clone()],
        });
        assert_eq!(
            err.to_string(),
            "dependency cycle: Secret/a -> HelmChart/b -> Secret/a"
        );
        assert_eq!(err.node(), Some(&a));
    }

    #[test]
    fn graph_errors_become_declaration_errors() {
        let err: strata_common::Error =
            GraphError::DuplicateNode(NodeId::new(ResourceKind::Namespace, "etcd")).into();
        assert!(err.is_declaration_time());
        assert!(err.to_string().starts_with("declaration error [Namespace/etcd]"));
    }

    #[test]
    fn only_retryable_provider_errors_are_retryable() {
        assert!(NodeError::from(ProviderError::transient("quota")).is_retryable());
        assert!(!NodeError::from(ProviderError::permanent("bad request")).is_retryable());
        assert!(!NodeError::invalid_input("chart", "missing").is_retryable());
    }
}
