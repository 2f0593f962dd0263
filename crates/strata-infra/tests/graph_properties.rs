//! Graph-level guarantees exercised through the in-memory backends

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value as Json};
use strata_graph::provider::memory::{InMemoryBackend, InMemoryConnector};
use strata_graph::{
    Backends, ConvergenceExecutor, DependencyGraph, ExecutorConfig, Fields, GraphError, NodeId,
    NodeState, ProviderBinding, ResourceKind, ResourceNode, Value, KUBECONFIG_FIELD,
};

struct Harness {
    cloud: Arc<InMemoryBackend>,
    connector: Arc<InMemoryConnector>,
}

impl Harness {
    fn new() -> Self {
        let cloud = InMemoryBackend::new("cloud").with_synth(Arc::new(
            |node: &NodeId, _: &Fields| {
                let mut outputs = Fields::new();
                if node.kind == ResourceKind::ServiceAccountKey {
                    outputs.insert("privateKey".to_string(), Json::from("c2VjcmV0"));
                }
                outputs
            },
        ));
        let cluster = Arc::new(InMemoryBackend::new("cluster"));
        Self {
            cloud: Arc::new(cloud),
            connector: Arc::new(InMemoryConnector::new(cluster)),
        }
    }

    fn backends(&self) -> Backends {
        Backends::new(self.cloud.clone(), self.connector.clone())
    }

    fn cluster(&self) -> &Arc<InMemoryBackend> {
        self.connector.cluster()
    }
}

fn provider(graph: &mut DependencyGraph) -> NodeId {
    graph
        .add(
            ResourceNode::new(
                ResourceKind::ClusterProvider,
                "test",
                ProviderBinding::Connector,
            )
            .field(KUBECONFIG_FIELD, "apiVersion: v1\nkind: Config\n"),
        )
        .unwrap()
        .id()
        .clone()
}

#[tokio::test]
async fn test_decoded_key_is_computed_once_and_consumed_unchanged() {
    let harness = Harness::new();
    let mut graph = DependencyGraph::new();
    let provider = provider(&mut graph);

    let key = graph
        .add(ResourceNode::new(
            ResourceKind::ServiceAccountKey,
            "gcs",
            ProviderBinding::Cloud,
        ))
        .unwrap();

    let decodes = Arc::new(AtomicUsize::new(0));
    let counter = decodes.clone();
    let decoded = key.output("privateKey").decode_base64().map(move |v| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(v.clone())
    });

    for name in ["gcs-a", "gcs-b"] {
        graph
            .add(
                ResourceNode::new(
                    ResourceKind::Secret,
                    name,
                    ProviderBinding::Cluster(provider.clone()),
                )
                .field("stringData", Value::object([("gcsKeyJson", decoded.clone())])),
            )
            .unwrap();
    }
    graph
        .add(
            ResourceNode::new(
                ResourceKind::HelmChart,
                "gateway",
                ProviderBinding::Chart(provider.clone()),
            )
            .field("chart", "minio")
            .field(
                "values",
                Value::object([("gcsgateway", Value::object([("gcsKeyJson", decoded)]))]),
            ),
        )
        .unwrap();

    let graph = graph.finalize().unwrap();
    let executor = ConvergenceExecutor::new(harness.backends(), ExecutorConfig::default());
    let result = executor.converge(&graph).await;

    assert!(result.is_success(), "{result}");
    assert_eq!(decodes.load(Ordering::SeqCst), 1);

    let release = harness
        .cluster()
        .release(&NodeId::new(ResourceKind::HelmChart, "gateway"))
        .unwrap();
    assert_eq!(release.values, json!({ "gcsgateway": { "gcsKeyJson": "secret" } }));
    assert_eq!(harness.cluster().stats().created, 3);
    assert_eq!(
        harness
            .cluster()
            .outputs(&NodeId::new(ResourceKind::Secret, "gcs-a"))
            .unwrap()["stringData"],
        json!({ "gcsKeyJson": "secret" })
    );
}

#[test]
fn test_cycle_is_rejected_before_any_apply() {
    let harness = Harness::new();
    let mut graph = DependencyGraph::new();

    let a = NodeId::new(ResourceKind::Bucket, "a");
    let b = NodeId::new(ResourceKind::Bucket, "b");
    let c = NodeId::new(ResourceKind::Bucket, "c");
    graph
        .add(ResourceNode::new(ResourceKind::Bucket, "a", ProviderBinding::Cloud).depends_on(&c))
        .unwrap();
    graph
        .add(ResourceNode::new(ResourceKind::Bucket, "b", ProviderBinding::Cloud).depends_on(&a))
        .unwrap();
    graph
        .add(ResourceNode::new(ResourceKind::Bucket, "c", ProviderBinding::Cloud).depends_on(&b))
        .unwrap();
    graph
        .add(ResourceNode::new(ResourceKind::Network, "independent", ProviderBinding::Cloud))
        .unwrap();

    let err = graph.finalize().unwrap_err();
    let GraphError::Cycle(cycle) = &err else {
        panic!("expected a cycle, got {err}");
    };
    assert!(cycle.cycle.iter().any(|n| *n == a || *n == b || *n == c));
    assert!(err.to_string().contains("dependency cycle"));

    let err: strata_common::Error = err.into();
    assert!(err.is_declaration_time());
    assert!(harness.cloud.calls().is_empty());
}

#[tokio::test]
async fn test_independent_branches_apply_concurrently() {
    let cloud = Arc::new(
        InMemoryBackend::new("cloud").with_latency(std::time::Duration::from_millis(20)),
    );
    let connector = Arc::new(InMemoryConnector::new(Arc::new(InMemoryBackend::new(
        "cluster",
    ))));
    let mut graph = DependencyGraph::new();
    for name in ["a", "b", "c", "d"] {
        graph
            .add(ResourceNode::new(ResourceKind::Bucket, name, ProviderBinding::Cloud))
            .unwrap();
    }
    let graph = graph.finalize().unwrap();

    let executor = ConvergenceExecutor::new(
        Backends::new(cloud.clone(), connector),
        ExecutorConfig {
            concurrency: 2,
            ..ExecutorConfig::default()
        },
    );
    let result = executor.converge(&graph).await;

    assert_eq!(result.applied().len(), 4);
    assert_eq!(cloud.peak_in_flight(), 2);
    assert!(result
        .nodes
        .values()
        .all(|report| report.state == NodeState::Applied && report.attempts == 1));
}
