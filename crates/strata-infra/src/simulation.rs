//! Simulated GCP and cluster backends
//!
//! Wraps the in-memory backends with outputs shaped like the real APIs:
//! cluster endpoints and CA bundles, service-account emails, base64 key
//! documents, bucket URLs, the pod a command ran in. Outputs are derived
//! from node identity and fields only, so repeated runs produce identical
//! results.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value as Json};
use strata_graph::provider::memory::{InMemoryBackend, InMemoryConnector};
use strata_graph::{Backends, ExecRequest, Fields, NodeId, ProviderError, ResourceKind};

use crate::kubeconfig::{Kubeconfig, CLUSTER_CA_OUTPUT, CLUSTER_ENDPOINT_OUTPUT};

/// Cloud, connector and cluster backends for one simulated environment
pub struct SimulatedCloud {
    cloud: Arc<InMemoryBackend>,
    connector: Arc<InMemoryConnector>,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCloud {
    /// An empty environment
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// An empty environment whose calls each take `latency`
    pub fn with_latency(latency: Duration) -> Self {
        let cloud = InMemoryBackend::new("gcp")
            .with_synth(Arc::new(gcp_outputs))
            .with_latency(latency);
        let cluster = InMemoryBackend::new("cluster")
            .with_synth(Arc::new(cluster_outputs))
            .with_latency(latency);
        let connector = InMemoryConnector::new(Arc::new(cluster))
            .with_check(Arc::new(|kubeconfig: &str| {
                Kubeconfig::parse(kubeconfig)
                    .and_then(|parsed| parsed.validate())
                    .map_err(|e| e.to_string())
            }));

        Self {
            cloud: Arc::new(cloud),
            connector: Arc::new(connector),
        }
    }

    /// Backends for the convergence executor
    pub fn backends(&self) -> Backends {
        Backends::new(self.cloud.clone(), self.connector.clone())
    }

    /// The cloud control plane
    pub fn cloud(&self) -> &Arc<InMemoryBackend> {
        &self.cloud
    }

    /// The cluster API and chart engine
    pub fn cluster(&self) -> &Arc<InMemoryBackend> {
        self.connector.cluster()
    }

    /// The connector turning kubeconfigs into cluster backends
    pub fn connector(&self) -> &Arc<InMemoryConnector> {
        &self.connector
    }

    /// Make every call for `node` fail, whichever backend realizes it
    pub fn fail(&self, node: NodeId, error: ProviderError) {
        self.cloud.fail(node.clone(), error.clone());
        self.cluster().fail(node, error);
    }

    /// Remove an injected failure
    pub fn clear_failure(&self, node: &NodeId) {
        self.cloud.clear_failure(node);
        self.cluster().clear_failure(node);
    }

    /// Resources and releases created more than once
    pub fn duplicate_creations(&self) -> Vec<NodeId> {
        let mut seen: Vec<NodeId> = self.cloud.calls();
        seen.extend(self.cluster().calls());
        seen.sort();
        seen.dedup();
        seen.into_iter()
            .filter(|node| {
                self.cloud.creation_count(node) + self.cluster().creation_count(node) > 1
            })
            .collect()
    }
}

// =============================================================================
// Pure Functions (unit-testable)
// =============================================================================

fn stable_hash(input: &str) -> u32 {
    input
        .bytes()
        .fold(0x811c_9dc5_u32, |hash, byte| {
            (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
        })
}

fn str_field<'a>(fields: &'a Fields, name: &str) -> Option<&'a str> {
    fields.get(name).and_then(Json::as_str)
}

/// Outputs GCP would generate for a newly created resource
pub fn gcp_outputs(node: &NodeId, desired: &Fields) -> Fields {
    let project = str_field(desired, "project").unwrap_or("simulated");
    let name = str_field(desired, "name").unwrap_or(&node.name);
    let mut outputs = Fields::new();

    match node.kind {
        ResourceKind::Network => {
            outputs.insert(
                "selfLink".to_string(),
                Json::from(format!(
                    "https://www.googleapis.com/compute/v1/projects/{project}/global/networks/{name}"
                )),
            );
        }
        ResourceKind::Cluster => {
            let hash = stable_hash(&node.name).to_be_bytes();
            outputs.insert(
                CLUSTER_ENDPOINT_OUTPUT.to_string(),
                Json::from(format!("34.{}.{}.{}", hash[1], hash[2], hash[3].max(1))),
            );
            let pem = format!(
                "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
                STANDARD.encode(format!("simulated CA for {name}"))
            );
            outputs.insert(CLUSTER_CA_OUTPUT.to_string(), Json::from(STANDARD.encode(pem)));
        }
        ResourceKind::ServiceAccount => {
            let account = str_field(desired, "accountId").unwrap_or(&node.name);
            let email = format!("{account}@{project}.iam.gserviceaccount.com");
            outputs.insert(
                "id".to_string(),
                Json::from(format!("projects/{project}/serviceAccounts/{email}")),
            );
            outputs.insert("email".to_string(), Json::from(email));
        }
        ResourceKind::ServiceAccountKey => {
            let account = str_field(desired, "serviceAccountId").unwrap_or_default();
            let email = account.rsplit('/').next().unwrap_or_default();
            let key = json!({
                "type": "service_account",
                "private_key_id": format!("{:08x}", stable_hash(&node.name)),
                "client_email": email,
            });
            outputs.insert(
                "privateKey".to_string(),
                Json::from(STANDARD.encode(key.to_string())),
            );
        }
        ResourceKind::Bucket => {
            outputs.insert("url".to_string(), Json::from(format!("gs://{name}")));
            outputs.insert(
                "selfLink".to_string(),
                Json::from(format!("https://www.googleapis.com/storage/v1/b/{name}")),
            );
        }
        _ => {}
    }
    outputs
}

/// Outputs the cluster API would report; only pod commands add any
pub fn cluster_outputs(node: &NodeId, desired: &Fields) -> Fields {
    let mut outputs = Fields::new();
    if node.kind != ResourceKind::PodExec {
        return outputs;
    }
    if let Ok(exec) = ExecRequest::from_fields(node, desired) {
        let selector = exec.pod_selector.replace(['=', ','], "-");
        outputs.insert(
            "pod".to_string(),
            Json::from(format!("{}-{selector}-0", exec.namespace)),
        );
        outputs.insert(
            "runId".to_string(),
            Json::from(format!("exec-{:08x}", stable_hash(&exec.cmd.join("\0")))),
        );
    }
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_graph::ResourceProvider;

    fn fields(entries: &[(&str, &str)]) -> Fields {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Json::from(*v)))
            .collect()
    }

    #[test]
    fn test_service_account_outputs() {
        let outputs = gcp_outputs(
            &NodeId::new(ResourceKind::ServiceAccount, "miniostorage"),
            &fields(&[("accountId", "miniostorage"), ("project", "demo")]),
        );
        assert_eq!(outputs["email"], "miniostorage@demo.iam.gserviceaccount.com");
        assert_eq!(
            outputs["id"],
            "projects/demo/serviceAccounts/miniostorage@demo.iam.gserviceaccount.com"
        );
    }

    #[test]
    fn test_key_is_base64_json() {
        let outputs = gcp_outputs(
            &NodeId::new(ResourceKind::ServiceAccountKey, "minio-gcs"),
            &fields(&[(
                "serviceAccountId",
                "projects/demo/serviceAccounts/a@demo.iam.gserviceaccount.com",
            )]),
        );
        let encoded = outputs["privateKey"].as_str().unwrap();
        let decoded: Json = serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded["client_email"], "a@demo.iam.gserviceaccount.com");
        assert_eq!(decoded["type"], "service_account");
    }

    #[test]
    fn test_cluster_outputs_are_deterministic() {
        let id = NodeId::new(ResourceKind::Cluster, "dev");
        let first = gcp_outputs(&id, &fields(&[("name", "dev")]));
        let second = gcp_outputs(&id, &fields(&[("name", "dev")]));
        assert_eq!(first, second);

        let endpoint = first[CLUSTER_ENDPOINT_OUTPUT].as_str().unwrap();
        assert!(endpoint.starts_with("34."));
        assert!(!endpoint.contains("://"));
        let ca = first[CLUSTER_CA_OUTPUT].as_str().unwrap();
        assert!(STANDARD.decode(ca).is_ok());
    }

    #[test]
    fn test_pod_exec_outputs_name_the_pod_and_run() {
        let id = NodeId::new(ResourceKind::PodExec, "promscale-db");
        let mut desired = fields(&[
            ("namespace", "timescale"),
            ("podSelector", "role=master"),
            ("container", "timescaledb"),
        ]);
        desired.insert("cmd".to_string(), json!(["psql", "-c", "CREATE DATABASE analytics;"]));

        let outputs = cluster_outputs(&id, &desired);
        assert_eq!(outputs["pod"], "timescale-role-master-0");
        assert!(outputs["runId"].as_str().unwrap().starts_with("exec-"));
        assert_eq!(outputs, cluster_outputs(&id, &desired));

        desired.insert("cmd".to_string(), json!(["psql", "-c", "SELECT 1;"]));
        assert_ne!(outputs["runId"], cluster_outputs(&id, &desired)["runId"]);

        let ns = NodeId::new(ResourceKind::Namespace, "timescale");
        assert!(cluster_outputs(&ns, &fields(&[("name", "timescale")])).is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_injected_on_both_backends() {
        let sim = SimulatedCloud::new();
        let bucket = NodeId::new(ResourceKind::Bucket, "lokilogs");
        sim.fail(bucket.clone(), ProviderError::permanent("quota exceeded"));

        let err = sim.cloud().create(&bucket, &Fields::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");

        sim.clear_failure(&bucket);
        assert!(sim.cloud().create(&bucket, &Fields::new()).await.is_ok());
        assert!(sim.duplicate_creations().is_empty());
    }
}
