//! Backend interfaces the convergence executor calls through
//!
//! Three backends realize nodes:
//!
//! - [`ResourceProvider`]: create-or-adopt of a typed resource from its
//!   desired fields. Used for the cloud control plane and for the Kubernetes
//!   API of a cluster.
//! - [`ChartProvider`]: installs a chart release or applies a manifest file.
//! - [`ClusterConnector`]: turns a rendered kubeconfig into the
//!   cluster-scoped backends that nodes bound to that cluster use.
//!
//! `PodExec` nodes go through the cluster's [`ResourceProvider`] like any
//! other in-cluster object; [`ExecRequest`] is the checked form of their
//! fields.
//!
//! All calls must be idempotent: the executor invokes them identically on a
//! re-run and relies on the backend to adopt what already exists.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value as Json;
use thiserror::Error;

use crate::error::NodeError;
use crate::node::{Fields, NodeId, ResourceKind};

/// Chart name field of a `HelmChart` node
pub const CHART_FIELD: &str = "chart";
/// Chart version field
pub const VERSION_FIELD: &str = "version";
/// Chart repository URL field
pub const REPO_FIELD: &str = "repo";
/// Target namespace field
pub const NAMESPACE_FIELD: &str = "namespace";
/// Chart values field (nested map)
pub const VALUES_FIELD: &str = "values";
/// Manifest path field of a `Manifest` node
pub const FILE_FIELD: &str = "file";
/// Label selector of a `PodExec` node
pub const POD_SELECTOR_FIELD: &str = "podSelector";
/// Container a `PodExec` command runs in
pub const CONTAINER_FIELD: &str = "container";
/// Command line of a `PodExec` node (list of strings)
pub const CMD_FIELD: &str = "cmd";

/// Error reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Backend error message
    pub message: String,
    /// Whether the same call may succeed if repeated
    pub retryable: bool,
}

impl ProviderError {
    /// A failure worth retrying (throttling, unavailable API)
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will recur on retry (invalid request, denied)
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// The backend gave up waiting for the resource to become ready
    pub fn timeout(operation: impl std::fmt::Display) -> Self {
        Self::transient(format!("timed out waiting for {operation}"))
    }
}

/// Create-or-adopt backend for typed resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Bring `node` to the desired fields and return its outputs.
    ///
    /// If the resource already exists it is adopted, not recreated.
    async fn create(&self, node: &NodeId, desired: &Fields) -> Result<Fields, ProviderError>;
}

/// Chart and manifest engine of one cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartProvider: Send + Sync {
    /// Install or upgrade a release, or apply a manifest file
    async fn apply(&self, request: &ChartRequest) -> Result<ReleaseHandle, ProviderError>;
}

/// Builds cluster-scoped backends from a kubeconfig
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Authenticate against the cluster described by `kubeconfig`
    async fn connect(
        &self,
        provider: &NodeId,
        kubeconfig: &str,
    ) -> Result<ClusterBackends, ProviderError>;
}

/// Backends of one cluster, produced by a [`ClusterConnector`]
#[derive(Clone)]
pub struct ClusterBackends {
    /// Kubernetes API (namespaces, secrets, storage classes)
    pub resources: Arc<dyn ResourceProvider>,
    /// Chart/manifest engine
    pub charts: Arc<dyn ChartProvider>,
}

/// Backends available to a convergence run
#[derive(Clone)]
pub struct Backends {
    /// Cloud control plane
    pub cloud: Arc<dyn ResourceProvider>,
    /// Builds cluster-scoped backends for `ClusterProvider` nodes
    pub connector: Arc<dyn ClusterConnector>,
}

impl Backends {
    /// Bundle a cloud backend and a connector
    pub fn new(cloud: Arc<dyn ResourceProvider>, connector: Arc<dyn ClusterConnector>) -> Self {
        Self { cloud, connector }
    }
}

/// What a chart-bound node installs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartSource {
    /// A chart from a repository
    Chart {
        /// Chart name
        chart: String,
        /// Pinned version, if any
        version: Option<String>,
        /// Repository URL, if not a local chart
        repo: Option<String>,
    },
    /// A manifest file applied as-is
    File {
        /// Path of the manifest
        path: String,
    },
}

/// A resolved chart or manifest application
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRequest {
    /// Node being applied; its name is the release name
    pub node: NodeId,
    /// Chart or manifest file
    pub source: ChartSource,
    /// Target namespace; manifests may carry their own
    pub namespace: Option<String>,
    /// Chart values, fully resolved
    pub values: Json,
}

impl ChartRequest {
    /// Build a request from a node's resolved fields
    pub fn from_fields(node: &NodeId, fields: &Fields) -> Result<Self, NodeError> {
        let source = match node.kind {
            ResourceKind::Manifest => ChartSource::File {
                path: required_str(fields, FILE_FIELD)?,
            },
            ResourceKind::HelmChart => ChartSource::Chart {
                chart: required_str(fields, CHART_FIELD)?,
                version: optional_str(fields, VERSION_FIELD)?,
                repo: optional_str(fields, REPO_FIELD)?,
            },
            other => {
                return Err(NodeError::invalid_input(
                    "kind",
                    format!("{other} nodes cannot be applied by a chart provider"),
                ))
            }
        };

        let values = match fields.get(VALUES_FIELD) {
            None | Some(Json::Null) => Json::Object(Default::default()),
            Some(v @ Json::Object(_)) => v.clone(),
            Some(other) => {
                return Err(NodeError::invalid_input(
                    VALUES_FIELD,
                    format!("expected a map, got {other}"),
                ))
            }
        };

        Ok(Self {
            node: node.clone(),
            source,
            namespace: optional_str(fields, NAMESPACE_FIELD)?,
            values,
        })
    }

    /// Release name
    pub fn release_name(&self) -> &str {
        &self.node.name
    }
}

/// A command to run inside one pod of a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Node being applied
    pub node: NodeId,
    /// Namespace to search for the pod
    pub namespace: String,
    /// Label selector, e.g. `role=master`; the first match is used
    pub pod_selector: String,
    /// Container inside the pod
    pub container: String,
    /// Command and arguments
    pub cmd: Vec<String>,
}

impl ExecRequest {
    /// Check a `PodExec` node's resolved fields
    pub fn from_fields(node: &NodeId, fields: &Fields) -> Result<Self, NodeError> {
        let cmd = match fields.get(CMD_FIELD) {
            Some(Json::Array(items)) if !items.is_empty() => items
                .iter()
                .map(|item| match item {
                    Json::String(arg) => Ok(arg.clone()),
                    other => Err(NodeError::invalid_input(
                        CMD_FIELD,
                        format!("expected string arguments, got {other}"),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(NodeError::invalid_input(
                    CMD_FIELD,
                    "expected a non-empty list of arguments",
                ))
            }
        };

        Ok(Self {
            node: node.clone(),
            namespace: required_str(fields, NAMESPACE_FIELD)?,
            pod_selector: required_str(fields, POD_SELECTOR_FIELD)?,
            container: required_str(fields, CONTAINER_FIELD)?,
            cmd,
        })
    }
}

fn required_str(fields: &Fields, field: &str) -> Result<String, NodeError> {
    optional_str(fields, field)?.ok_or_else(|| NodeError::invalid_input(field, "required"))
}

fn optional_str(fields: &Fields, field: &str) -> Result<Option<String>, NodeError> {
    match fields.get(field) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(NodeError::invalid_input(
            field,
            format!("expected a string, got {other}"),
        )),
    }
}

/// Result of a chart application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseHandle {
    /// Release name
    pub name: String,
    /// Namespace the release lives in
    pub namespace: Option<String>,
    /// Release revision; unchanged when the release was adopted
    pub revision: u32,
}

impl ReleaseHandle {
    /// Outputs published for downstream nodes
    pub fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("name".to_string(), Json::String(self.name));
        if let Some(ns) = self.namespace {
            fields.insert(NAMESPACE_FIELD.to_string(), Json::String(ns));
        }
        fields.insert("revision".to_string(), Json::from(self.revision));
        fields
    }
}
