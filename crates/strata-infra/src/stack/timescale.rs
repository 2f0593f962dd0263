//! TimescaleDB (single-node chart, patroni) with pgBackRest backups through
//! the minio gateway, plus the promscale connector
//!
//! Promscale gets its own database and role. Both are created by running
//! `psql` in the patroni master pod once the chart is installed.

use serde_json::json;
use strata_common::Result;
use strata_graph::provider::{CMD_FIELD, CONTAINER_FIELD, NAMESPACE_FIELD, POD_SELECTOR_FIELD};
use strata_graph::{NodeHandle, ResourceKind, ResourceNode, Value};

use super::cert_manager::Issuers;
use super::minio::ObjectStorage;
use super::{literal, ChartNodeExt, StackBuilder, NAME_FIELD};

const TIMESCALE_REPO: &str = "https://charts.timescale.com";
const MASTER_SELECTOR: &str = "role=master";
const DB_CONTAINER: &str = "timescaledb";
const PROMSCALE_DB: &str = "analytics";
const PROMSCALE_USER: &str = "promscale";

/// Handles the monitoring tier needs
pub(crate) struct Database {
    pub(crate) chart: NodeHandle,
    pub(crate) promscale: NodeHandle,
}

pub(crate) fn declare(
    stack: &mut StackBuilder<'_>,
    issuers: &Issuers,
    object_storage: &ObjectStorage,
) -> Result<Database> {
    let ns = stack.namespace("timescale")?;
    let bucket = stack.bucket("timescalebackups")?;

    let credentials = stack.secret(
        "timescale-credentials",
        &ns,
        [
            (
                "PATRONI_SUPERUSER_PASSWORD",
                literal(stack.require("patroni_superuser_password")?),
            ),
            (
                "PATRONI_REPLICATION_PASSWORD",
                literal(stack.require("patroni_replication_password")?),
            ),
            (
                "PATRONI_admin_PASSWORD",
                literal(stack.require("patroni_admin_password")?),
            ),
        ],
    )?;

    let region = stack.region().to_string();
    let pgbackrest = stack.secret(
        "timescale-pgbackrest",
        &ns,
        [
            ("PGBACKREST_REPO1_S3_BUCKET", bucket.output(NAME_FIELD)),
            ("PGBACKREST_REPO1_S3_REGION", literal(region)),
            (
                "PGBACKREST_REPO1_S3_KEY",
                literal(stack.require("minio-access-key")?),
            ),
            (
                "PGBACKREST_REPO1_S3_KEY_SECRET",
                literal(stack.require("minio-secret-key")?),
            ),
        ],
    )?;

    let tls = stack
        .manifest("timescale-tls", "timescale/certs.yml", &ns)?
        .depends_on(&issuers.custom_ca);
    let tls = stack.add(tls)?;

    let backup = Value::object([
        ("enabled", Value::from(true)),
        (
            "pgBackRest",
            Value::object([
                (
                    "repo1-path",
                    bucket
                        .output(NAME_FIELD)
                        .map_str(|name| Ok(format!("/{name}"))),
                ),
                ("repo1-s3-endpoint", Value::from("minio.minio")),
                ("repo1-s3-host", Value::from("minio.minio")),
                ("repo1-s3-verify-tls", Value::from("n")),
            ]),
        ),
        (
            "envFrom",
            Value::list([Value::object([(
                "secretRef",
                Value::object([("name", pgbackrest.output(NAME_FIELD))]),
            )])]),
        ),
    ]);
    let values = Value::object([
        ("replicaCount", Value::from(2u32)),
        ("loadBalancer", Value::from(json!({ "enabled": false }))),
        ("prometheus", Value::from(json!({ "enabled": true }))),
        ("rbac", Value::from(json!({ "create": true }))),
        (
            "secretNames",
            Value::object([
                ("certificate", Value::from("timescale-tls")),
                ("credentials", credentials.output(NAME_FIELD)),
            ]),
        ),
        ("backup", backup),
        (
            "persistentVolumes",
            Value::from(json!({
                "data": { "enabled": true, "size": "50Gi", "storageClass": "ssd" },
                "wal": { "enabled": true, "size": "10Gi", "storageClass": "ssd" },
            })),
        ),
    ]);

    // The TLS secret is only referenced by name, so the ordering is explicit.
    let chart = stack
        .chart("timescale", "timescaledb-single", TIMESCALE_REPO, &ns)?
        .values(values)
        .depends_on(&tls)
        .depends_on(&object_storage.chart);
    let chart = stack.add(chart)?;

    let promscale_password = stack.require("promscale_postgres_password")?;
    // The pod only exists once the chart is installed; nothing in the
    // commands references it, so every step names the chart explicitly.
    let create_db = psql(
        stack,
        "promscale-db",
        &ns,
        format!("CREATE DATABASE {PROMSCALE_DB};"),
    )?
    .depends_on(&chart);
    let create_db = stack.add(create_db)?;
    let create_user = psql(
        stack,
        "promscale-user",
        &ns,
        format!("CREATE USER {PROMSCALE_USER} WITH PASSWORD '{promscale_password}' SUPERUSER;"),
    )?
    .depends_on(&chart);
    let create_user = stack.add(create_user)?;
    let grant = psql(
        stack,
        "promscale-grant",
        &ns,
        format!("GRANT ALL PRIVILEGES ON DATABASE {PROMSCALE_DB} TO {PROMSCALE_USER};"),
    )?
    .depends_on(&chart)
    .depends_on(&create_db)
    .depends_on(&create_user);
    let grant = stack.add(grant)?;

    let promscale_secret = stack.secret(
        "promscale-timescaledb-passwords",
        &ns,
        [(PROMSCALE_USER, literal(promscale_password))],
    )?;

    let promscale = stack
        .chart("promscale", "promscale", TIMESCALE_REPO, &ns)?
        .values(Value::object([
            (
                "connection",
                Value::object([
                    (
                        "host",
                        Value::from(json!({ "nameTemplate": "timescale.timescale" })),
                    ),
                    (
                        "password",
                        Value::object([("secretTemplate", promscale_secret.output(NAME_FIELD))]),
                    ),
                    ("user", Value::from(PROMSCALE_USER)),
                    ("dbName", Value::from(PROMSCALE_DB)),
                ]),
            ),
            (
                "service",
                Value::from(json!({ "loadBalancer": { "enabled": false } })),
            ),
        ]))
        .depends_on(&grant);
    let promscale = stack.add(promscale)?;

    Ok(Database { chart, promscale })
}

/// A `psql -c <sql>` run in the patroni master pod of `namespace`
fn psql(
    stack: &StackBuilder<'_>,
    name: &str,
    namespace: &NodeHandle,
    sql: String,
) -> Result<ResourceNode> {
    Ok(
        ResourceNode::new(ResourceKind::PodExec, name, stack.in_cluster()?)
            .field(NAMESPACE_FIELD, namespace.output(NAME_FIELD))
            .field(POD_SELECTOR_FIELD, MASTER_SELECTOR)
            .field(CONTAINER_FIELD, DB_CONTAINER)
            .field(CMD_FIELD, Value::from(json!(["psql", "-c", sql]))),
    )
}
