//! Platform tier: network, GKE cluster, node pool, cluster provider and the
//! SSD storage class

use serde_json::json;
use strata_common::Result;
use strata_graph::{NodeHandle, ProviderBinding, ResourceKind, ResourceNode, KUBECONFIG_FIELD};

use super::{StackBuilder, NAME_FIELD};
use crate::kubeconfig::kubeconfig_value;

/// Export holding the node pool name
pub const NODEPOOL_EXPORT: &str = "nodepool";

/// Handles to platform nodes later tiers reference
pub(crate) struct Platform {
    pub(crate) provider: NodeHandle,
}

pub(crate) fn declare(stack: &mut StackBuilder<'_>) -> Result<Platform> {
    let cluster = stack.settings().cluster.clone();
    let project = stack.project().to_string();
    let region = stack.region().to_string();

    let network = stack.add(
        ResourceNode::new(ResourceKind::Network, &cluster.name, ProviderBinding::Cloud)
            .field(NAME_FIELD, cluster.name.as_str())
            .field("project", project.as_str())
            .field("autoCreateSubnetworks", true),
    )?;

    // The default pool is removed; nodes come from the managed pool below.
    let gke = stack.add(
        ResourceNode::new(ResourceKind::Cluster, &cluster.name, ProviderBinding::Cloud)
            .field(NAME_FIELD, cluster.name.as_str())
            .field("project", project.as_str())
            .field("location", region.as_str())
            .field("network", network.output("selfLink"))
            .field("networkingMode", "VPC_NATIVE")
            .field(
                "ipAllocationPolicy",
                json!({ "clusterIpv4CidrBlock": "", "servicesIpv4CidrBlock": "" }),
            )
            .field("initialNodeCount", 1u32)
            .field("enableShieldedNodes", true)
            .field("loggingService", "none")
            .field("monitoringService", "none")
            .field("releaseChannel", json!({ "channel": "STABLE" }))
            .field("networkPolicy", json!({ "enabled": true }))
            .field("removeDefaultNodePool", true)
            .field(
                "addonsConfig",
                json!({ "httpLoadBalancing": { "disabled": true } }),
            ),
    )?;

    let node_pool = stack.add(
        ResourceNode::new(ResourceKind::NodePool, &cluster.node_pool, ProviderBinding::Cloud)
            .field(NAME_FIELD, cluster.node_pool.as_str())
            .field("cluster", gke.output(NAME_FIELD))
            .field("location", region.as_str())
            .field("initialNodeCount", cluster.initial_nodes)
            .field(
                "autoscaling",
                json!({
                    "minNodeCount": cluster.min_nodes,
                    "maxNodeCount": cluster.max_nodes,
                }),
            )
            .field(
                "nodeConfig",
                json!({
                    "preemptible": cluster.preemptible,
                    "machineType": cluster.machine_type,
                }),
            ),
    )?;
    stack.export(NODEPOOL_EXPORT, node_pool.output(NAME_FIELD));

    // Workloads need schedulable nodes, so the provider waits for the pool.
    let provider = stack.add(
        ResourceNode::new(
            ResourceKind::ClusterProvider,
            &cluster.name,
            ProviderBinding::Connector,
        )
        .field(KUBECONFIG_FIELD, kubeconfig_value(&gke))
        .depends_on(&node_pool),
    )?;
    stack.set_provider(&provider);

    stack.add(
        ResourceNode::new(ResourceKind::StorageClass, "ssd", stack.in_cluster()?)
            .field(NAME_FIELD, "ssd")
            .field("allowVolumeExpansion", true)
            .field("parameters", json!({ "type": "pd-ssd" }))
            .field("provisioner", "kubernetes.io/gce-pd"),
    )?;

    Ok(Platform { provider })
}
