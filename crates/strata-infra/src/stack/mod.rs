//! Stack declarations
//!
//! [`declare_stack`] builds the full resource graph: the platform tier
//! (network, cluster, node pool, cluster provider, storage class) followed by
//! every enabled in-cluster tier. Each tier owns one explicitly named
//! namespace node; secrets and releases reference that node's outputs rather
//! than a shared "current namespace".
//!
//! Secrets are read from the [`ConfigSource`] while declaring, so a missing
//! key aborts before any node is applied.

mod cert_manager;
mod etcd;
mod minio;
mod monitoring;
mod platform;
mod timescale;

pub use platform::NODEPOOL_EXPORT;

use strata_common::{ConfigSource, Error, Result};
use strata_graph::provider::{
    CHART_FIELD, FILE_FIELD, NAMESPACE_FIELD, REPO_FIELD, VALUES_FIELD, VERSION_FIELD,
};
use strata_graph::{
    DependencyGraph, FinalizedGraph, NodeHandle, NodeId, ProviderBinding, ResourceKind,
    ResourceNode, Value,
};
use tracing::{debug, info};

use crate::settings::{StackSettings, PROJECT_CONFIG_KEY, REGION_CONFIG_KEY};

/// Name field of namespaces, secrets and other named objects
pub const NAME_FIELD: &str = "name";
/// Secret payload field
pub const STRING_DATA_FIELD: &str = "stringData";

/// Declare every node of the stack and finalize the graph
pub fn declare_stack(
    settings: &StackSettings,
    config: &dyn ConfigSource,
) -> Result<FinalizedGraph> {
    settings.validate()?;
    let mut stack = StackBuilder::new(settings, config)?;

    let platform = platform::declare(&mut stack)?;
    let tiers = settings.tiers;

    let issuers = if tiers.cert_manager {
        Some(cert_manager::declare(&mut stack)?)
    } else {
        None
    };
    let missing =
        |tier: &str| Error::validation_for_field(format!("tiers.{tier}"), "requires cert_manager");

    if tiers.etcd {
        let issuers = issuers.as_ref().ok_or_else(|| missing("etcd"))?;
        etcd::declare(&mut stack, issuers)?;
    }
    let object_storage = if tiers.minio {
        let issuers = issuers.as_ref().ok_or_else(|| missing("minio"))?;
        Some(minio::declare(&mut stack, issuers)?)
    } else {
        None
    };
    let database = if tiers.timescale {
        let issuers = issuers.as_ref().ok_or_else(|| missing("timescale"))?;
        let object_storage = object_storage.as_ref().ok_or_else(|| {
            Error::validation_for_field("tiers.timescale", "requires minio")
        })?;
        Some(timescale::declare(&mut stack, issuers, object_storage)?)
    } else {
        None
    };
    if tiers.monitoring {
        let database = database.as_ref().ok_or_else(|| {
            Error::validation_for_field("tiers.monitoring", "requires timescale")
        })?;
        monitoring::declare(&mut stack, database)?;
    }

    debug!(provider = %platform.provider.id(), "platform declared");
    let declared = stack.graph.len();
    let graph = stack.graph.finalize()?;
    info!(nodes = declared, levels = graph.levels().len(), "stack declared");
    Ok(graph)
}

/// Shared state while declaring tiers
pub(crate) struct StackBuilder<'a> {
    graph: DependencyGraph,
    config: &'a dyn ConfigSource,
    settings: &'a StackSettings,
    project: String,
    region: String,
    provider: Option<NodeId>,
}

impl<'a> StackBuilder<'a> {
    fn new(settings: &'a StackSettings, config: &'a dyn ConfigSource) -> Result<Self> {
        let project = match &settings.project {
            Some(project) => project.clone(),
            None => config.require(PROJECT_CONFIG_KEY)?,
        };
        let region = match &settings.region {
            Some(region) => region.clone(),
            None => config.require(REGION_CONFIG_KEY)?,
        };
        Ok(Self {
            graph: DependencyGraph::new(),
            config,
            settings,
            project,
            region,
            provider: None,
        })
    }

    pub(crate) fn settings(&self) -> &StackSettings {
        self.settings
    }

    pub(crate) fn project(&self) -> &str {
        &self.project
    }

    pub(crate) fn region(&self) -> &str {
        &self.region
    }

    /// A secret or config value that must be present
    pub(crate) fn require(&self, key: &str) -> Result<String> {
        self.config.require(key)
    }

    pub(crate) fn add(&mut self, node: ResourceNode) -> Result<NodeHandle> {
        Ok(self.graph.add(node)?)
    }

    pub(crate) fn export(&mut self, name: &str, value: Value) {
        self.graph.export(name, value);
    }

    pub(crate) fn set_provider(&mut self, provider: &NodeHandle) {
        self.provider = Some(provider.id().clone());
    }

    fn provider(&self) -> Result<NodeId> {
        self.provider.clone().ok_or_else(|| {
            Error::declaration(
                "ClusterProvider",
                "in-cluster node declared before the cluster provider",
            )
        })
    }

    /// Binding for objects created through the cluster's API
    pub(crate) fn in_cluster(&self) -> Result<ProviderBinding> {
        Ok(ProviderBinding::Cluster(self.provider()?))
    }

    /// Binding for charts and manifests applied to the cluster
    pub(crate) fn via_charts(&self) -> Result<ProviderBinding> {
        Ok(ProviderBinding::Chart(self.provider()?))
    }

    /// Declare a tier's namespace
    pub(crate) fn namespace(&mut self, name: &str) -> Result<NodeHandle> {
        let node = ResourceNode::new(ResourceKind::Namespace, name, self.in_cluster()?)
            .field(NAME_FIELD, name);
        self.add(node)
    }

    /// Declare a secret in `namespace` with the given string data
    pub(crate) fn secret<I>(
        &mut self,
        name: &str,
        namespace: &NodeHandle,
        data: I,
    ) -> Result<NodeHandle>
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        let node = ResourceNode::new(ResourceKind::Secret, name, self.in_cluster()?)
            .field(NAME_FIELD, name)
            .field(NAMESPACE_FIELD, namespace.output(NAME_FIELD))
            .field(STRING_DATA_FIELD, Value::object(data));
        self.add(node)
    }

    /// Declare a storage bucket in the stack's region
    pub(crate) fn bucket(&mut self, name: &str) -> Result<NodeHandle> {
        let node = ResourceNode::new(ResourceKind::Bucket, name, ProviderBinding::Cloud)
            .field(NAME_FIELD, name)
            .field("project", self.project.as_str())
            .field("location", self.region.as_str());
        self.add(node)
    }

    /// A chart release installed into `namespace`; the caller adds values and
    /// extra dependencies before adding it
    pub(crate) fn chart(
        &self,
        name: &str,
        chart: &str,
        repo: &str,
        namespace: &NodeHandle,
    ) -> Result<ResourceNode> {
        Ok(ResourceNode::new(ResourceKind::HelmChart, name, self.via_charts()?)
            .field(CHART_FIELD, chart)
            .field(REPO_FIELD, repo)
            .field(NAMESPACE_FIELD, namespace.output(NAME_FIELD)))
    }

    /// A manifest file applied after `namespace` exists. `file` is relative
    /// to the manifests directory.
    pub(crate) fn manifest(
        &self,
        name: &str,
        file: &str,
        namespace: &NodeHandle,
    ) -> Result<ResourceNode> {
        let path = self.settings.manifests_dir.join(file);
        Ok(ResourceNode::new(ResourceKind::Manifest, name, self.via_charts()?)
            .field(FILE_FIELD, path.to_string_lossy().into_owned())
            .depends_on(namespace))
    }
}

/// Extension for chart nodes
pub(crate) trait ChartNodeExt {
    fn version(self, version: &str) -> Self;
    fn values(self, values: impl Into<Value>) -> Self;
}

impl ChartNodeExt for ResourceNode {
    fn version(self, version: &str) -> Self {
        self.field(VERSION_FIELD, version)
    }

    fn values(self, values: impl Into<Value>) -> Self {
        self.field(VALUES_FIELD, values)
    }
}

/// Secret entry known at declaration time
pub(crate) fn literal(value: impl Into<String>) -> Value {
    Value::ready(value.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::StaticConfig;
    use strata_graph::EdgeKind;

    pub(crate) fn full_config() -> StaticConfig {
        StaticConfig::new()
            .set("gcp:project", "demo-project")
            .set("gcp:region", "europe-west1")
            .set("cloudflare-api-key", "cf-token")
            .set("ca-crt", "CA-CRT")
            .set("ca-key", "CA-KEY")
            .set("minio-access-key", "minio-access")
            .set("minio-secret-key", "minio-secret")
            .set("patroni_superuser_password", "super")
            .set("patroni_replication_password", "repl")
            .set("patroni_admin_password", "admin")
            .set("promscale_postgres_password", "promscale-pass")
            .set("grafana-admin-pass", "grafana")
    }

    fn id(kind: ResourceKind, name: &str) -> NodeId {
        NodeId::new(kind, name)
    }

    #[test]
    fn test_full_stack_declares_every_tier() {
        let graph = declare_stack(&StackSettings::default(), &full_config()).unwrap();

        for (kind, name) in [
            (ResourceKind::Network, "dev"),
            (ResourceKind::Cluster, "dev"),
            (ResourceKind::NodePool, "micro"),
            (ResourceKind::ClusterProvider, "dev"),
            (ResourceKind::StorageClass, "ssd"),
            (ResourceKind::HelmChart, "cert-manager"),
            (ResourceKind::HelmChart, "etcd"),
            (ResourceKind::HelmChart, "minio"),
            (ResourceKind::HelmChart, "timescale"),
            (ResourceKind::PodExec, "promscale-grant"),
            (ResourceKind::HelmChart, "promscale"),
            (ResourceKind::HelmChart, "prometheus"),
            (ResourceKind::HelmChart, "grafana"),
            (ResourceKind::HelmChart, "loki"),
        ] {
            assert!(graph.node(&id(kind, name)).is_some(), "missing {kind}/{name}");
        }
        assert!(graph.exports().contains_key("nodepool"));
        assert_eq!(graph.order().first(), Some(&id(ResourceKind::Network, "dev")));
    }

    #[test]
    fn test_in_cluster_nodes_depend_on_the_provider() {
        let graph = declare_stack(&StackSettings::default(), &full_config()).unwrap();
        let provider = id(ResourceKind::ClusterProvider, "dev");

        let kinds = graph
            .edge_kinds(&id(ResourceKind::Namespace, "etcd"), &provider)
            .unwrap();
        assert!(kinds.contains(&EdgeKind::Provider));

        let provider_kinds = graph
            .edge_kinds(&provider, &id(ResourceKind::Cluster, "dev"))
            .unwrap();
        assert!(provider_kinds.contains(&EdgeKind::Data));
        assert!(graph
            .dependencies(&provider)
            .any(|d| *d == id(ResourceKind::NodePool, "micro")));
    }

    #[test]
    fn test_missing_secret_is_a_declaration_error() {
        let config = StaticConfig::new()
            .set("gcp:project", "demo-project")
            .set("gcp:region", "europe-west1");
        let err = declare_stack(&StackSettings::default(), &config).unwrap_err();
        assert!(matches!(err, Error::MissingConfig { ref key } if key == "cloudflare-api-key"));
        assert!(err.is_declaration_time());
    }

    #[test]
    fn test_missing_project_is_reported() {
        let err = declare_stack(&StackSettings::default(), &StaticConfig::new()).unwrap_err();
        assert!(matches!(err, Error::MissingConfig { ref key } if key == "gcp:project"));
    }

    #[test]
    fn test_platform_only_stack_needs_no_secrets() {
        let settings = StackSettings::from_yaml_str(
            "project: p\nregion: r\ntiers:\n  cert_manager: false\n  etcd: false\n  minio: false\n  timescale: false\n  monitoring: false\n",
        )
        .unwrap();
        let graph = declare_stack(&settings, &StaticConfig::new()).unwrap();
        assert_eq!(graph.len(), 5);
    }
}
