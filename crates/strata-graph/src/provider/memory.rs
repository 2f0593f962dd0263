//! In-memory backends with create-or-adopt semantics
//!
//! Used by the `simulate` command and by integration tests. Every call is
//! recorded so callers can assert on creations, adoptions and call order.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value as Json;
use tracing::debug;

use super::{
    ChartProvider, ChartRequest, ClusterBackends, ClusterConnector, ProviderError,
    ReleaseHandle, ResourceProvider,
};
use crate::node::{Fields, NodeId};

/// Computes backend-generated outputs (IDs, endpoints, keys) for a new resource
pub type OutputSynth = Arc<dyn Fn(&NodeId, &Fields) -> Fields + Send + Sync>;

/// Checks a kubeconfig before a connection is handed out
pub type KubeconfigCheck = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// Counters for one backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    /// Resources or releases created
    pub created: usize,
    /// Existing resources whose desired state changed
    pub updated: usize,
    /// Existing resources adopted unchanged
    pub adopted: usize,
    /// Calls that returned an error
    pub failed: usize,
}

#[derive(Debug, Clone)]
struct Realized {
    desired: Fields,
    outputs: Fields,
}

#[derive(Debug, Clone)]
struct Release {
    request: ChartRequest,
    revision: u32,
}

/// In-memory cloud or cluster backend
pub struct InMemoryBackend {
    label: String,
    resources: DashMap<NodeId, Realized>,
    releases: DashMap<NodeId, Release>,
    failures: DashMap<NodeId, ProviderError>,
    creations: DashMap<NodeId, u32>,
    calls: Mutex<Vec<NodeId>>,
    stats: Mutex<CallStats>,
    synth: Option<OutputSynth>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl InMemoryBackend {
    /// Create an empty backend; `label` prefixes generated IDs
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            resources: DashMap::new(),
            releases: DashMap::new(),
            failures: DashMap::new(),
            creations: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            stats: Mutex::new(CallStats::default()),
            synth: None,
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Generate extra outputs for newly created resources
    pub fn with_synth(mut self, synth: OutputSynth) -> Self {
        self.synth = Some(synth);
        self
    }

    /// Sleep this long inside every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every call for `node` fail with `error` until cleared
    pub fn fail(&self, node: NodeId, error: ProviderError) {
        self.failures.insert(node, error);
    }

    /// Remove an injected failure
    pub fn clear_failure(&self, node: &NodeId) {
        self.failures.remove(node);
    }

    /// Whether `node` has been realized here
    pub fn contains(&self, node: &NodeId) -> bool {
        self.resources.contains_key(node) || self.releases.contains_key(node)
    }

    /// Stored outputs of a realized resource
    pub fn outputs(&self, node: &NodeId) -> Option<Fields> {
        self.resources.get(node).map(|r| r.outputs.clone())
    }

    /// Last applied request of a release
    pub fn release(&self, node: &NodeId) -> Option<ChartRequest> {
        self.releases.get(node).map(|r| r.request.clone())
    }

    /// Number of times `node` was created (0 or 1 for a well-behaved run)
    pub fn creation_count(&self, node: &NodeId) -> u32 {
        self.creations.get(node).map(|c| *c).unwrap_or(0)
    }

    /// Nodes in the order their calls arrived
    pub fn calls(&self) -> Vec<NodeId> {
        self.calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Aggregate counters
    pub fn stats(&self) -> CallStats {
        self.stats
            .lock()
            .map(|s| *s)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    /// Highest number of calls observed running at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn update_stats(&self, f: impl FnOnce(&mut CallStats)) {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut stats);
    }

    async fn enter(&self, node: &NodeId) -> Result<InFlight<'_>, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(node.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(err) = self.failures.get(node).map(|e| e.clone()) {
            self.update_stats(|s| s.failed += 1);
            return Err(err);
        }
        Ok(guard)
    }

    fn record_creation(&self, node: &NodeId) {
        *self.creations.entry(node.clone()).or_insert(0) += 1;
        self.update_stats(|s| s.created += 1);
    }

    fn generated_id(&self, node: &NodeId) -> String {
        format!("{}/{}", self.label, node)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceProvider for InMemoryBackend {
    async fn create(&self, node: &NodeId, desired: &Fields) -> Result<Fields, ProviderError> {
        let _guard = self.enter(node).await?;

        if let Some(mut existing) = self.resources.get_mut(node) {
            if existing.desired == *desired {
                debug!(backend = %self.label, node = %node, "adopted existing resource");
                self.update_stats(|s| s.adopted += 1);
            } else {
                debug!(backend = %self.label, node = %node, "updated existing resource");
                for (k, v) in desired {
                    existing.outputs.insert(k.clone(), v.clone());
                }
                existing.desired = desired.clone();
                self.update_stats(|s| s.updated += 1);
            }
            return Ok(existing.outputs.clone());
        }

        let mut outputs = desired.clone();
        outputs.insert("id".to_string(), Json::String(self.generated_id(node)));
        if let Some(synth) = &self.synth {
            outputs.extend(synth(node, desired));
        }

        self.resources.insert(
            node.clone(),
            Realized {
                desired: desired.clone(),
                outputs: outputs.clone(),
            },
        );
        self.record_creation(node);
        debug!(backend = %self.label, node = %node, "created resource");
        Ok(outputs)
    }
}

#[async_trait]
impl ChartProvider for InMemoryBackend {
    async fn apply(&self, request: &ChartRequest) -> Result<ReleaseHandle, ProviderError> {
        let _guard = self.enter(&request.node).await?;

        let revision = match self.releases.get_mut(&request.node) {
            Some(release) if release.request == *request => {
                self.update_stats(|s| s.adopted += 1);
                release.revision
            }
            Some(mut release) => {
                release.revision += 1;
                release.request = request.clone();
                self.update_stats(|s| s.updated += 1);
                release.revision
            }
            None => {
                self.releases.insert(
                    request.node.clone(),
                    Release {
                        request: request.clone(),
                        revision: 1,
                    },
                );
                self.record_creation(&request.node);
                1
            }
        };

        debug!(
            backend = %self.label,
            release = %request.release_name(),
            revision,
            "applied release"
        );
        Ok(ReleaseHandle {
            name: request.release_name().to_string(),
            namespace: request.namespace.clone(),
            revision,
        })
    }
}

/// Connector handing out one shared in-memory cluster backend
pub struct InMemoryConnector {
    cluster: Arc<InMemoryBackend>,
    kubeconfigs: DashMap<NodeId, String>,
    connections: AtomicU32,
    check: Option<KubeconfigCheck>,
}

impl InMemoryConnector {
    /// Connect every provider node to `cluster`
    pub fn new(cluster: Arc<InMemoryBackend>) -> Self {
        Self {
            cluster,
            kubeconfigs: DashMap::new(),
            connections: AtomicU32::new(0),
            check: None,
        }
    }

    /// Reject kubeconfigs that fail `check`
    pub fn with_check(mut self, check: KubeconfigCheck) -> Self {
        self.check = Some(check);
        self
    }

    /// The cluster backend handed out on connect
    pub fn cluster(&self) -> &Arc<InMemoryBackend> {
        &self.cluster
    }

    /// Kubeconfig most recently used by `provider`
    pub fn kubeconfig(&self, provider: &NodeId) -> Option<String> {
        self.kubeconfigs.get(provider).map(|k| k.clone())
    }

    /// Number of successful connections
    pub fn connections(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConnector for InMemoryConnector {
    async fn connect(
        &self,
        provider: &NodeId,
        kubeconfig: &str,
    ) -> Result<ClusterBackends, ProviderError> {
        if let Some(check) = &self.check {
            check(kubeconfig).map_err(|e| {
                ProviderError::permanent(format!("invalid kubeconfig for {provider}: {e}"))
            })?;
        }
        self.kubeconfigs
            .insert(provider.clone(), kubeconfig.to_string());
        self.connections.fetch_add(1, Ordering::SeqCst);

        Ok(ClusterBackends {
            resources: self.cluster.clone(),
            charts: self.cluster.clone(),
        })
    }
}
