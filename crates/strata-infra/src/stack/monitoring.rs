//! Metrics and logs: prometheus writing to promscale, grafana backed by
//! timescale, loki storing chunks in GCS

use serde_json::json;
use strata_common::Result;
use strata_graph::Value;

use super::minio::gcs_access;
use super::timescale::Database;
use super::{literal, ChartNodeExt, StackBuilder, NAME_FIELD};

const PROMSCALE_REMOTE: &str = r#"
remote_write:
  - url: "http://promscale-connector.timescale:9201/write"
remote_read:
  - url: "http://promscale-connector.timescale:9201/read""#;

pub(crate) fn declare(stack: &mut StackBuilder<'_>, database: &Database) -> Result<()> {
    let ns = stack.namespace("monitoring")?;

    let prometheus = stack
        .chart("prometheus", "prometheus", "stable", &ns)?
        .values(json!({
            "alertmanager": { "enabled": false },
            "pushgateway": { "enabled": false },
            "extraScrapeConfigs": PROMSCALE_REMOTE,
        }))
        .depends_on(&database.promscale);
    stack.add(prometheus)?;

    let grafana_credentials = stack.secret(
        "grafana-credentials",
        &ns,
        [
            ("GF_DATABASE_TYPE", literal("postgres")),
            ("GF_DATABASE_HOST", literal("timescale.timescale")),
            ("GF_DATABASE_USER", literal("postgres")),
            ("GF_DATABASE_NAME", literal("postgres")),
            ("GF_DATABASE_SSL_MODE", literal("require")),
            (
                "GF_DATABASE_PASSWORD",
                literal(stack.require("patroni_superuser_password")?),
            ),
        ],
    )?;

    let grafana = stack
        .chart(
            "grafana",
            "grafana",
            "https://grafana.github.io/helm-charts",
            &ns,
        )?
        .values(Value::object([
            ("envFromSecret", grafana_credentials.output(NAME_FIELD)),
            ("adminUser", Value::from("admin")),
            (
                "adminPassword",
                literal(stack.require("grafana-admin-pass")?),
            ),
        ]))
        .depends_on(&database.chart);
    stack.add(grafana)?;

    let access = gcs_access(
        stack,
        "lokilogs",
        "loki-storage-admin-binding",
        "loki-gcs",
        "roles/storage.objectAdmin",
    )?;
    let loki_credentials = stack.secret(
        "loki-credentials",
        &ns,
        [("gcsKeyJson", access.key.output("privateKey").decode_base64())],
    )?;
    let bucket = stack.bucket("lokilogs")?;

    let values = Value::object([
        (
            "storage_config",
            Value::object([
                ("boltdb_shipper", Value::from(json!({ "shared_store": "gcs" }))),
                (
                    "gcs",
                    Value::object([("bucket_name", bucket.output(NAME_FIELD))]),
                ),
            ]),
        ),
        (
            "schema_config",
            Value::from(json!({
                "configs": [{
                    "configs": {
                        "store": "boltdb-shipper",
                        "object_store": "gcs",
                        "schema": "v11",
                        "index": { "prefix": "index_", "period": "24h" },
                    },
                }],
            })),
        ),
        (
            "env",
            Value::list([Value::object([
                ("name", Value::from("GOOGLE_APPLICATION_CREDENTIALS")),
                (
                    "valueFrom",
                    Value::object([(
                        "secretKeyRef",
                        Value::object([
                            ("name", loki_credentials.output(NAME_FIELD)),
                            ("key", Value::from("gcsKeyJson")),
                        ]),
                    )]),
                ),
            ])]),
        ),
    ]);

    let loki = stack
        .chart("loki", "loki", "https://grafana.github.io/loki/charts", &ns)?
        .version("2.0.2")
        .values(values)
        .depends_on(&access.binding);
    stack.add(loki)?;
    Ok(())
}
