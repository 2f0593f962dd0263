//! minio as a TLS-terminated GCS gateway
//!
//! The gateway authenticates to GCS with a service-account key. The key is
//! returned base64-encoded by the cloud; the chart wants the JSON document,
//! so the chart values carry a decoded value derived from the key output.

use serde_json::json;
use strata_common::Result;
use strata_graph::{NodeHandle, ProviderBinding, ResourceKind, ResourceNode, Value};

use super::cert_manager::Issuers;
use super::{literal, ChartNodeExt, StackBuilder};

/// Handles the timescale tier needs for backups
pub(crate) struct ObjectStorage {
    pub(crate) chart: NodeHandle,
}

/// Service account, project IAM binding and key for a GCS consumer
pub(crate) struct GcsAccess {
    pub(crate) binding: NodeHandle,
    pub(crate) key: NodeHandle,
}

/// Declare a service account with `role` on the project and a key for it
pub(crate) fn gcs_access(
    stack: &mut StackBuilder<'_>,
    account_id: &str,
    binding_name: &str,
    key_name: &str,
    role: &str,
) -> Result<GcsAccess> {
    let account = stack.add(
        ResourceNode::new(ResourceKind::ServiceAccount, account_id, ProviderBinding::Cloud)
            .field("accountId", account_id)
            .field("project", stack.project()),
    )?;

    let member = account
        .output("email")
        .map_str(|email| Ok(format!("serviceAccount:{email}")));
    let binding = stack.add(
        ResourceNode::new(ResourceKind::IamBinding, binding_name, ProviderBinding::Cloud)
            .field("project", stack.project())
            .field("role", role)
            .field("members", Value::list([member])),
    )?;

    let key = stack.add(
        ResourceNode::new(ResourceKind::ServiceAccountKey, key_name, ProviderBinding::Cloud)
            .field("serviceAccountId", account.output("id")),
    )?;

    Ok(GcsAccess { binding, key })
}

pub(crate) fn declare(stack: &mut StackBuilder<'_>, issuers: &Issuers) -> Result<ObjectStorage> {
    let ns = stack.namespace("minio")?;

    // minio-tls, signed by the custom CA
    let certs = stack
        .manifest("minio-certs", "minio/certs.yml", &ns)?
        .depends_on(&issuers.custom_ca);
    let certs = stack.add(certs)?;

    let access = gcs_access(
        stack,
        "miniostorage",
        "minio-storage-admin-binding",
        "minio-gcs",
        "roles/storage.admin",
    )?;

    let gateway = Value::object([
        ("replicas", Value::from(1u32)),
        ("enabled", Value::from(true)),
        ("projectId", Value::from(stack.project())),
        ("gcsKeyJson", access.key.output("privateKey").decode_base64()),
    ]);
    let values = Value::object([
        (
            "tls",
            Value::from(json!({
                "enabled": true,
                "certSecret": "minio-tls",
                "publicCrt": "tls.crt",
                "privateKey": "tls.key",
            })),
        ),
        ("service", Value::from(json!({ "port": "443" }))),
        ("persistence", Value::from(json!({ "enabled": false }))),
        ("gcsgateway", gateway),
        ("accessKey", literal(stack.require("minio-access-key")?)),
        ("secretKey", literal(stack.require("minio-secret-key")?)),
        (
            "resources",
            Value::from(json!({ "requests": { "memory": "512" } })),
        ),
    ]);

    // The gateway cannot reach GCS until the account holds the role.
    let chart = stack
        .chart("minio", "minio", "https://helm.min.io/", &ns)?
        .version("8.0.0")
        .values(values)
        .depends_on(&certs)
        .depends_on(&access.binding);
    let chart = stack.add(chart)?;

    Ok(ObjectStorage { chart })
}

#[cfg(test)]
mod tests {
    use crate::settings::StackSettings;
    use crate::stack::declare_stack;
    use crate::stack::tests::full_config;
    use strata_graph::{EdgeKind, NodeId, ResourceKind};

    #[test]
    fn test_chart_consumes_decoded_key() {
        let graph = declare_stack(&StackSettings::default(), &full_config()).unwrap();
        let chart = NodeId::new(ResourceKind::HelmChart, "minio");
        let key = NodeId::new(ResourceKind::ServiceAccountKey, "minio-gcs");

        let kinds = graph.edge_kinds(&chart, &key).unwrap();
        assert!(kinds.contains(&EdgeKind::Data));
        assert!(!graph.node(&chart).unwrap().fields()["values"].is_ready());

        let binding = NodeId::new(ResourceKind::IamBinding, "minio-storage-admin-binding");
        let account = NodeId::new(ResourceKind::ServiceAccount, "miniostorage");
        assert!(graph.edge_kinds(&binding, &account).is_some());
        assert!(graph.edge_kinds(&key, &account).is_some());
        assert!(graph
            .edge_kinds(&chart, &binding)
            .unwrap()
            .contains(&EdgeKind::Explicit));
    }
}
