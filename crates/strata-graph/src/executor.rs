//! Convergence executor
//!
//! Walks a [`FinalizedGraph`] in dependency order. A node is queued once every
//! dependency is `Applied`; queued nodes start as soon as a slot is free, so
//! independent branches apply concurrently. Each apply resolves the node's
//! fields against the outputs published so far, calls the bound backend and
//! publishes the returned outputs for dependents.
//!
//! A failure marks the node `Failed` and every transitive dependent that has
//! not started `Skipped`. Nothing is torn down and unrelated branches keep
//! going. All failures are collected into the [`RunResult`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde_json::Value as Json;
use strata_common::retry::{retry_with_backoff_if, RetryConfig};
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::graph::FinalizedGraph;
use crate::node::{
    Fields, NodeId, ProviderBinding, ResourceKind, ResourceNode, KUBECONFIG_FIELD,
};
use crate::provider::{Backends, ChartRequest, ClusterBackends, ExecRequest};
use crate::result::{NodeFailure, NodeReport, NodeState, RunResult};
use crate::value::OutputLookup;

/// Default number of nodes applied at once
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Executor tuning
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Maximum nodes applying at once (0 = unbounded)
    pub concurrency: usize,
    /// Retry policy around every provider call
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryConfig::once(),
        }
    }
}

/// Drives backends toward the state a graph declares
pub struct ConvergenceExecutor {
    backends: Backends,
    config: ExecutorConfig,
}

// =============================================================================
// Run state shared with apply tasks
// =============================================================================

/// Outputs of applied nodes, readable by value resolution
#[derive(Default)]
struct PublishedOutputs(DashMap<NodeId, Fields>);

impl OutputLookup for PublishedOutputs {
    fn lookup(&self, node: &NodeId, field: &str) -> Option<Json> {
        self.0.get(node).and_then(|fields| fields.get(field).cloned())
    }
}

struct RunState {
    graph: FinalizedGraph,
    backends: Backends,
    retry: RetryConfig,
    reports: DashMap<NodeId, NodeReport>,
    outputs: PublishedOutputs,
    clusters: DashMap<NodeId, ClusterBackends>,
    clock: AtomicU64,
}

impl RunState {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    fn transition(&self, node: &NodeId, update: impl FnOnce(&mut NodeReport)) {
        if let Some(mut report) = self.reports.get_mut(node) {
            update(&mut report);
        }
    }

    fn state(&self, node: &NodeId) -> Option<NodeState> {
        self.reports.get(node).map(|r| r.state)
    }
}

impl ConvergenceExecutor {
    /// Create an executor over the given backends
    pub fn new(backends: Backends, config: ExecutorConfig) -> Self {
        Self { backends, config }
    }

    /// Apply every node of `graph` and report the outcome.
    ///
    /// Node failures never abort the run; they are returned in the result.
    /// A graph may be converged again; derived values are recomputed from the
    /// new run's outputs, so runs over one graph must not overlap.
    pub async fn converge(&self, graph: &FinalizedGraph) -> RunResult {
        graph.clear_memos();
        let run = Arc::new(RunState {
            graph: graph.clone(),
            backends: self.backends.clone(),
            retry: self.config.retry.clone(),
            reports: graph
                .nodes()
                .map(|n| (n.id().clone(), NodeReport::declared()))
                .collect(),
            outputs: PublishedOutputs::default(),
            clusters: DashMap::new(),
            clock: AtomicU64::new(0),
        });

        let limit = match self.config.concurrency {
            0 => usize::MAX,
            n => n,
        };

        let mut waiting_on: BTreeMap<NodeId, usize> = graph
            .nodes()
            .map(|n| (n.id().clone(), graph.dependencies(n.id()).count()))
            .collect();
        let mut ready: BTreeSet<NodeId> = BTreeSet::new();
        for (id, _) in waiting_on.iter().filter(|(_, count)| **count == 0) {
            queue(&run, &mut ready, id);
        }

        let mut failures = Vec::new();
        let mut in_flight = FuturesUnordered::new();

        info!(
            nodes = graph.len(),
            concurrency = self.config.concurrency,
            "starting convergence"
        );

        loop {
            while in_flight.len() < limit {
                let Some(id) = ready.pop_first() else { break };
                let task_run = run.clone();
                let task_id = id.clone();
                let handle =
                    tokio::spawn(async move { apply_node(&task_run, &task_id).await });
                in_flight.push(handle.map(move |joined| (id, joined)));
            }

            let Some((id, joined)) = in_flight.next().await else {
                break;
            };
            let outcome = joined.unwrap_or_else(|e| Err(NodeError::Panicked(e.to_string())));
            let finished = run.tick();

            match outcome {
                Ok(outputs) => {
                    run.outputs.0.insert(id.clone(), outputs);
                    run.transition(&id, |r| {
                        r.state = NodeState::Applied;
                        r.finished_at = Some(finished);
                    });
                    info!(node = %id, "node applied");

                    for dependent in graph.dependents(&id) {
                        if let Some(count) = waiting_on.get_mut(dependent) {
                            *count = count.saturating_sub(1);
                            if *count == 0 && run.state(dependent) == Some(NodeState::Declared) {
                                queue(&run, &mut ready, dependent);
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(node = %id, error = %error, "node failed");
                    run.transition(&id, |r| {
                        r.state = NodeState::Failed;
                        r.finished_at = Some(finished);
                    });
                    skip_dependents(&run, graph, &id);
                    failures.push(NodeFailure { node: id, error });
                }
            }
        }

        failures.sort_by(|a, b| a.node.cmp(&b.node));
        let result = collect_result(&run, graph, failures);
        info!(summary = %result.summary(), "convergence finished");
        result
    }
}

fn queue(run: &RunState, ready: &mut BTreeSet<NodeId>, id: &NodeId) {
    run.transition(id, |r| r.state = NodeState::Queued);
    ready.insert(id.clone());
}

/// Mark every not-yet-started transitive dependent of `failed` as skipped
fn skip_dependents(run: &RunState, graph: &FinalizedGraph, failed: &NodeId) {
    for dependent in graph.transitive_dependents(failed) {
        let skipped = run
            .reports
            .get_mut(&dependent)
            .map(|mut report| {
                if report.state == NodeState::Declared {
                    report.state = NodeState::Skipped;
                    report.blocked_by = Some(failed.clone());
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if skipped {
            warn!(node = %dependent, blocked_by = %failed, "skipping node");
        }
    }
}

fn collect_result(
    run: &RunState,
    graph: &FinalizedGraph,
    failures: Vec<NodeFailure>,
) -> RunResult {
    let nodes: BTreeMap<NodeId, NodeReport> = run
        .reports
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    let node_outputs: BTreeMap<NodeId, Fields> = run
        .outputs
        .0
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();

    let mut outputs = BTreeMap::new();
    let mut missing_outputs = BTreeSet::new();
    for (name, value) in graph.exports() {
        let sources_applied = value
            .references()
            .iter()
            .all(|n| nodes.get(n).map(|r| r.state) == Some(NodeState::Applied));
        let resolved = if sources_applied {
            value.resolve(&node_outputs).map_err(|e| e.to_string())
        } else {
            Err("a source node did not apply".to_string())
        };
        match resolved {
            Ok(v) => {
                outputs.insert(name.clone(), v);
            }
            Err(reason) => {
                debug!(export = %name, reason = %reason, "export unavailable");
                missing_outputs.insert(name.clone());
            }
        }
    }

    RunResult {
        outputs,
        missing_outputs,
        nodes,
        node_outputs,
        failures,
    }
}

// =============================================================================
// Applying one node
// =============================================================================

async fn apply_node(run: &RunState, id: &NodeId) -> Result<Fields, NodeError> {
    let node = run
        .graph
        .node(id)
        .ok_or_else(|| NodeError::invalid_input("node", format!("{id} is not in the graph")))?;

    let started = run.tick();
    run.transition(id, |r| {
        r.state = NodeState::Applying;
        r.started_at = Some(started);
    });
    info!(node = %id, backend = node.binding().backend(), "applying node");

    let desired = resolve_fields(node, &run.outputs)?;
    let op_name = format!("apply {id}");
    let record_attempt = || run.transition(id, |r| r.attempts += 1);
    let retryable = |e: &NodeError| e.is_retryable();

    match node.binding() {
        ProviderBinding::Cloud => {
            let cloud = &run.backends.cloud;
            retry_with_backoff_if(
                &run.retry,
                &op_name,
                || {
                    record_attempt();
                    let desired = &desired;
                    async move { cloud.create(id, desired).await.map_err(NodeError::from) }
                },
                retryable,
            )
            .await
        }
        ProviderBinding::Connector => {
            let kubeconfig = match desired.get(KUBECONFIG_FIELD) {
                Some(Json::String(k)) => k.as_str(),
                _ => {
                    return Err(NodeError::invalid_input(
                        KUBECONFIG_FIELD,
                        "expected a rendered kubeconfig string",
                    ))
                }
            };
            let connector = &run.backends.connector;
            let cluster = retry_with_backoff_if(
                &run.retry,
                &op_name,
                || {
                    record_attempt();
                    async move {
                        connector
                            .connect(id, kubeconfig)
                            .await
                            .map_err(NodeError::from)
                    }
                },
                retryable,
            )
            .await?;
            run.clusters.insert(id.clone(), cluster);

            let mut outputs = Fields::new();
            outputs.insert("name".to_string(), Json::String(id.name.clone()));
            Ok(outputs)
        }
        ProviderBinding::Cluster(provider) => {
            if id.kind == ResourceKind::PodExec {
                ExecRequest::from_fields(id, &desired)?;
            }
            let cluster = cluster_backends(run, provider)?;
            let resources = &cluster.resources;
            retry_with_backoff_if(
                &run.retry,
                &op_name,
                || {
                    record_attempt();
                    let desired = &desired;
                    async move { resources.create(id, desired).await.map_err(NodeError::from) }
                },
                retryable,
            )
            .await
        }
        ProviderBinding::Chart(provider) => {
            let cluster = cluster_backends(run, provider)?;
            let request = ChartRequest::from_fields(id, &desired)?;
            let charts = &cluster.charts;
            let request = &request;
            let handle = retry_with_backoff_if(
                &run.retry,
                &op_name,
                || {
                    record_attempt();
                    async move { charts.apply(request).await.map_err(NodeError::from) }
                },
                retryable,
            )
            .await?;
            Ok(handle.into_fields())
        }
    }
}

/// Clone the provider's backends out so no map guard is held across an await
fn cluster_backends(run: &RunState, provider: &NodeId) -> Result<ClusterBackends, NodeError> {
    run.clusters
        .get(provider)
        .map(|c| c.clone())
        .ok_or_else(|| NodeError::ProviderUnavailable {
            provider: provider.clone(),
        })
}

fn resolve_fields(node: &ResourceNode, outputs: &dyn OutputLookup) -> Result<Fields, NodeError> {
    node.fields()
        .iter()
        .map(|(name, value)| {
            let resolved = value.resolve(outputs).map_err(|source| NodeError::Resolution {
                field: name.clone(),
                source,
            })?;
            debug!(node = %node.id(), field = %name, "resolved field");
            Ok((name.clone(), resolved))
        })
        .collect()
}
