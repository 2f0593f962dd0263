//! Declarative resource dependency graph and convergence executor
//!
//! Stacks are declared as [`ResourceNode`]s whose fields are [`Value`]s.
//! A value is either known up front or derived from another node's outputs;
//! the [`DependencyGraph`] discovers those references as edges, adds explicit
//! and provider-implied edges, and rejects cycles before anything runs. The
//! [`ConvergenceExecutor`] then applies nodes in dependency order through the
//! bound backends and reports every outcome in a [`RunResult`].

#![warn(missing_docs)]

pub mod error;
pub mod executor;
pub mod graph;
pub mod node;
pub mod provider;
pub mod result;
pub mod value;

pub use error::{GraphCycleError, GraphError, NodeError, ResolveError};
pub use executor::{ConvergenceExecutor, ExecutorConfig};
pub use graph::{DependencyGraph, Edge, EdgeKind, FinalizedGraph};
pub use node::{
    Fields, NodeHandle, NodeId, ProviderBinding, ResourceKind, ResourceNode, KUBECONFIG_FIELD,
};
pub use provider::{
    Backends, ChartProvider, ChartRequest, ChartSource, ClusterBackends, ClusterConnector,
    ExecRequest, ProviderError, ReleaseHandle, ResourceProvider,
};
pub use result::{NodeFailure, NodeReport, NodeState, RunResult, RunSummary};
pub use value::{OutputLookup, Value, ValueId};
