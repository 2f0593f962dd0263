//! Resource nodes: identity, provider binding and declared inputs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Resolved field values, keyed by field name.
///
/// Used both for a node's desired inputs (after resolution) and for the
/// outputs a provider reports back.
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Field holding the kubeconfig of a [`ProviderBinding::Connector`] node
pub const KUBECONFIG_FIELD: &str = "kubeconfig";

/// Kind of infrastructure object a node declares
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// VPC network
    Network,
    /// Managed Kubernetes cluster
    Cluster,
    /// Autoscaled node pool attached to a cluster
    NodePool,
    /// Cluster-scoped provider built from a kubeconfig
    ClusterProvider,
    /// Kubernetes StorageClass
    StorageClass,
    /// Kubernetes Namespace
    Namespace,
    /// Kubernetes Secret
    Secret,
    /// Cloud IAM service account
    ServiceAccount,
    /// Key generated for a service account
    ServiceAccountKey,
    /// Project-level IAM role binding
    IamBinding,
    /// Object storage bucket
    Bucket,
    /// Raw manifest file applied to a cluster
    Manifest,
    /// Helm chart release
    HelmChart,
    /// One-off command run inside a pod picked by label selector
    PodExec,
}

impl ResourceKind {
    /// All kinds, in declaration order
    pub const ALL: [ResourceKind; 14] = [
        ResourceKind::Network,
        ResourceKind::Cluster,
        ResourceKind::NodePool,
        ResourceKind::ClusterProvider,
        ResourceKind::StorageClass,
        ResourceKind::Namespace,
        ResourceKind::Secret,
        ResourceKind::ServiceAccount,
        ResourceKind::ServiceAccountKey,
        ResourceKind::IamBinding,
        ResourceKind::Bucket,
        ResourceKind::Manifest,
        ResourceKind::HelmChart,
        ResourceKind::PodExec,
    ];

    /// Name used in node IDs and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "Network",
            Self::Cluster => "Cluster",
            Self::NodePool => "NodePool",
            Self::ClusterProvider => "ClusterProvider",
            Self::StorageClass => "StorageClass",
            Self::Namespace => "Namespace",
            Self::Secret => "Secret",
            Self::ServiceAccount => "ServiceAccount",
            Self::ServiceAccountKey => "ServiceAccountKey",
            Self::IamBinding => "IamBinding",
            Self::Bucket => "Bucket",
            Self::Manifest => "Manifest",
            Self::HelmChart => "HelmChart",
            Self::PodExec => "PodExec",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown resource kind '{s}'"))
    }
}

/// Identity of a node: `(kind, name)`, unique within a run
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Resource kind
    pub kind: ResourceKind,
    /// Logical name, unique per kind
    pub name: String,
}

impl NodeId {
    /// Create a node ID
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for NodeId {
    type Err = String;

    /// Parse `Kind/name`, e.g. `HelmChart/etcd`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('/')
            .ok_or_else(|| format!("expected Kind/name, got '{s}'"))?;
        if name.is_empty() {
            return Err(format!("empty node name in '{s}'"));
        }
        Ok(Self::new(kind.parse()?, name))
    }
}

/// Backend responsible for realizing a node.
///
/// There is no ambient default: every node names its backend, and
/// cluster-scoped bindings name the provider node they go through.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProviderBinding {
    /// Cloud control plane, using ambient cloud credentials
    Cloud,
    /// Builds a cluster-scoped provider from the node's `kubeconfig` field
    Connector,
    /// Kubernetes API of the cluster behind the given provider node
    Cluster(NodeId),
    /// Chart/manifest engine of the cluster behind the given provider node
    Chart(NodeId),
}

impl ProviderBinding {
    /// Provider node this binding goes through, if any
    pub fn provider_node(&self) -> Option<&NodeId> {
        match self {
            Self::Cloud | Self::Connector => None,
            Self::Cluster(id) | Self::Chart(id) => Some(id),
        }
    }

    /// Short backend label for logs
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Connector => "connector",
            Self::Cluster(_) => "cluster",
            Self::Chart(_) => "chart",
        }
    }
}

/// A named, typed declaration of one infrastructure object
#[derive(Debug)]
pub struct ResourceNode {
    id: NodeId,
    binding: ProviderBinding,
    fields: BTreeMap<String, Value>,
    depends_on: BTreeSet<NodeId>,
}

impl ResourceNode {
    /// Declare a node with no fields
    pub fn new(kind: ResourceKind, name: impl Into<String>, binding: ProviderBinding) -> Self {
        Self {
            id: NodeId::new(kind, name),
            binding,
            fields: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Set an input field
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Require another node to be applied first, independent of data flow
    pub fn depends_on(mut self, node: impl Into<NodeId>) -> Self {
        self.depends_on.insert(node.into());
        self
    }

    /// Node identity
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Provider binding
    pub fn binding(&self) -> &ProviderBinding {
        &self.binding
    }

    /// Declared input fields
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Explicitly declared dependencies
    pub fn explicit_dependencies(&self) -> &BTreeSet<NodeId> {
        &self.depends_on
    }

    /// Nodes whose outputs are referenced anywhere in this node's fields
    pub fn data_dependencies(&self) -> BTreeSet<NodeId> {
        self.fields
            .values()
            .flat_map(|value| value.references())
            .collect()
    }
}

/// Handle returned when a node is added to a graph
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeHandle {
    id: NodeId,
}

impl NodeHandle {
    pub(crate) fn new(id: NodeId) -> Self {
        Self { id }
    }

    /// Identity of the node
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// A pending value for one of the node's outputs.
    ///
    /// Using it in another node's fields creates an implicit edge.
    pub fn output(&self, field: impl Into<String>) -> Value {
        Value::output(self.id.clone(), field)
    }
}

impl From<&NodeHandle> for NodeId {
    fn from(handle: &NodeHandle) -> Self {
        handle.id.clone()
    }
}

impl From<NodeHandle> for NodeId {
    fn from(handle: NodeHandle) -> Self {
        handle.id
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_display_and_parse() {
        let id = NodeId::new(ResourceKind::HelmChart, "etcd");
        assert_eq!(id.to_string(), "HelmChart/etcd");
        assert_eq!("HelmChart/etcd".parse::<NodeId>().unwrap(), id);
        assert_eq!("helmchart/etcd".parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn malformed_node_ids_are_rejected() {
        assert!("etcd".parse::<NodeId>().is_err());
        assert!("Widget/etcd".parse::<NodeId>().is_err());
        assert!("Namespace/".parse::<NodeId>().is_err());
    }

    #[test]
    fn binding_exposes_provider_node() {
        let provider = NodeId::new(ResourceKind::ClusterProvider, "cluster");
        assert_eq!(
            ProviderBinding::Chart(provider.clone()).provider_node(),
            Some(&provider)
        );
        assert_eq!(ProviderBinding::Cloud.provider_node(), None);
        assert_eq!(ProviderBinding::Connector.backend(), "connector");
    }

    #[test]
    fn data_dependencies_come_from_field_references() {
        let ns = NodeHandle::new(NodeId::new(ResourceKind::Namespace, "minio"));
        let key = NodeHandle::new(NodeId::new(ResourceKind::ServiceAccountKey, "minio-gcs"));
        let node = ResourceNode::new(
            ResourceKind::HelmChart,
            "minio",
            ProviderBinding::Cloud,
        )
        .field("namespace", ns.output("name"))
        .field(
            "values",
            Value::object([("gcsKeyJson", key.output("privateKey").decode_base64())]),
        )
        .field("chart", "minio");

        let deps = node.data_dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(ns.id()));
        assert!(deps.contains(key.id()));
        assert!(node.explicit_dependencies().is_empty());
    }
}
