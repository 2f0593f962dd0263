//! cert-manager with a Let's Encrypt (Cloudflare DNS01) issuer and a
//! cluster-wide custom CA issuer

use serde_json::json;
use strata_common::Result;
use strata_graph::NodeHandle;

use super::{literal, ChartNodeExt, StackBuilder};

/// Issuer manifests other tiers' certificates depend on
pub(crate) struct Issuers {
    pub(crate) custom_ca: NodeHandle,
}

pub(crate) fn declare(stack: &mut StackBuilder<'_>) -> Result<Issuers> {
    let ns = stack.namespace("cert-manager")?;

    let cloudflare = stack.secret(
        "cloudflare-api-key",
        &ns,
        [("cloudflare", literal(stack.require("cloudflare-api-key")?))],
    )?;

    let chart = stack.chart("cert-manager", "cert-manager", "https://charts.jetstack.io", &ns)?
        .version("v1.0.3")
        .values(json!({ "installCRDs": true }));
    let chart = stack.add(chart)?;

    // Issuers are CRs; they can only be applied once the chart installed the CRDs.
    let acme = stack
        .manifest("letsencrypt-issuer", "issueracme.yaml", &ns)?
        .depends_on(&chart)
        .depends_on(&cloudflare);
    stack.add(acme)?;

    let ca_secret = stack.secret(
        "ca",
        &ns,
        [
            ("tls.crt", literal(stack.require("ca-crt")?)),
            ("tls.key", literal(stack.require("ca-key")?)),
        ],
    )?;

    let custom_ca = stack
        .manifest("custom-ca-issuer", "issuercustomca.yaml", &ns)?
        .depends_on(&chart)
        .depends_on(&ca_secret);
    let custom_ca = stack.add(custom_ca)?;

    Ok(Issuers { custom_ca })
}

#[cfg(test)]
mod tests {
    use crate::settings::StackSettings;
    use crate::stack::declare_stack;
    use crate::stack::tests::full_config;
    use strata_graph::{EdgeKind, NodeId, ResourceKind};

    #[test]
    fn test_issuers_wait_for_chart_and_secrets() {
        let graph = declare_stack(&StackSettings::default(), &full_config()).unwrap();
        let issuer = NodeId::new(ResourceKind::Manifest, "custom-ca-issuer");

        let deps: Vec<_> = graph.dependencies(&issuer).cloned().collect();
        assert!(deps.contains(&NodeId::new(ResourceKind::HelmChart, "cert-manager")));
        assert!(deps.contains(&NodeId::new(ResourceKind::Secret, "ca")));
        assert!(deps.contains(&NodeId::new(ResourceKind::Namespace, "cert-manager")));

        let kinds = graph
            .edge_kinds(&issuer, &NodeId::new(ResourceKind::Secret, "ca"))
            .unwrap();
        assert!(kinds.contains(&EdgeKind::Explicit));
    }

    #[test]
    fn test_secret_data_comes_from_config() {
        let graph = declare_stack(&StackSettings::default(), &full_config()).unwrap();
        let secret = graph
            .node(&NodeId::new(ResourceKind::Secret, "ca"))
            .unwrap();
        let data = secret.fields()["stringData"].ready_value().unwrap();
        assert_eq!(data["tls.crt"], "CA-CRT");
        assert_eq!(data["tls.key"], "CA-KEY");
    }
}
