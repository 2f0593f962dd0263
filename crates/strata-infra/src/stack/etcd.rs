//! etcd (bitnami chart) with TLS client and peer authentication

use serde_json::{json, Value as Json};
use strata_common::Result;

use super::cert_manager::Issuers;
use super::{ChartNodeExt, StackBuilder};

fn tls_auth(existing_secret: &str) -> Json {
    json!({
        "secureTransport": true,
        "enableAuthentication": true,
        "existingSecret": existing_secret,
        "certFilename": "tls.crt",
        "certKeyFilename": "tls.key",
        "caFilename": "ca.crt",
    })
}

pub(crate) fn declare(stack: &mut StackBuilder<'_>, issuers: &Issuers) -> Result<()> {
    let ns = stack.namespace("etcd")?;

    // Certificates for etcd-client-certs and etcd-peer-certs, signed by the custom CA.
    let certs = stack
        .manifest("etcd-certs", "etcd/certs.yml", &ns)?
        .depends_on(&issuers.custom_ca);
    let certs = stack.add(certs)?;

    let chart = stack
        .chart("etcd", "etcd", "https://charts.bitnami.com/bitnami", &ns)?
        .version("4.12.2")
        .values(json!({
            "statefulset": { "replicaCount": 1 },
            "readinessProbe": { "enabled": false },
            "livenessProbe": { "enabled": false },
            "metrics": { "enabled": true },
            "auth": {
                "rbac": { "enabled": false },
                "client": tls_auth("etcd-client-certs"),
                "peer": tls_auth("etcd-peer-certs"),
            },
        }))
        .depends_on(&certs);
    stack.add(chart)?;
    Ok(())
}
