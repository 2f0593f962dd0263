//! Stack settings loaded from YAML
//!
//! Settings describe the shape of the stack (cluster size, enabled tiers,
//! executor tuning). Secrets never live here; they come from a
//! [`ConfigSource`](strata_common::ConfigSource).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use strata_common::retry::RetryConfig;
use strata_common::{Error, Result};
use strata_graph::ExecutorConfig;

use crate::kubeconfig::is_dns_label;

/// Config key consulted when `project` is not set
pub const PROJECT_CONFIG_KEY: &str = "gcp:project";
/// Config key consulted when `region` is not set
pub const REGION_CONFIG_KEY: &str = "gcp:region";

/// Top-level stack settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackSettings {
    /// GCP project; falls back to `gcp:project` in the config source
    pub project: Option<String>,
    /// GCP region; falls back to `gcp:region` in the config source
    pub region: Option<String>,
    /// Cluster and node pool shape
    pub cluster: ClusterSettings,
    /// Which in-cluster tiers to declare
    pub tiers: TierSettings,
    /// Directory manifest files are resolved against
    pub manifests_dir: PathBuf,
    /// Executor tuning
    pub executor: ExecutorSettings,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            project: None,
            region: None,
            cluster: ClusterSettings::default(),
            tiers: TierSettings::default(),
            manifests_dir: PathBuf::from("manifests"),
            executor: ExecutorSettings::default(),
        }
    }
}

/// Cluster and node pool settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterSettings {
    /// Cluster (and network) name
    pub name: String,
    /// Node pool name
    pub node_pool: String,
    /// Node machine type
    pub machine_type: String,
    /// Nodes created with the pool
    pub initial_nodes: u32,
    /// Autoscaling lower bound
    pub min_nodes: u32,
    /// Autoscaling upper bound
    pub max_nodes: u32,
    /// Use preemptible VMs
    pub preemptible: bool,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            name: "dev".to_string(),
            node_pool: "micro".to_string(),
            machine_type: "e2-standard-2".to_string(),
            initial_nodes: 1,
            min_nodes: 1,
            max_nodes: 3,
            preemptible: true,
        }
    }
}

/// Enabled in-cluster tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TierSettings {
    /// cert-manager and the ACME/CA issuers
    pub cert_manager: bool,
    /// etcd with TLS client/peer auth
    pub etcd: bool,
    /// minio as a GCS gateway
    pub minio: bool,
    /// timescaledb with pgBackRest backups and promscale
    pub timescale: bool,
    /// prometheus, grafana and loki
    pub monitoring: bool,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            cert_manager: true,
            etcd: true,
            minio: true,
            timescale: true,
            monitoring: true,
        }
    }
}

/// Executor tuning
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSettings {
    /// Nodes applied at once (0 = unbounded)
    pub concurrency: usize,
    /// Provider call attempts per node
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Upper bound on the retry delay
    pub max_backoff_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            concurrency: strata_graph::executor::DEFAULT_CONCURRENCY,
            max_attempts: 1,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl ExecutorSettings {
    /// Executor configuration for these settings
    pub fn to_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            concurrency: self.concurrency,
            retry: RetryConfig {
                max_attempts: self.max_attempts,
                initial_delay: Duration::from_millis(self.initial_backoff_ms),
                max_delay: Duration::from_millis(self.max_backoff_ms),
                ..RetryConfig::default()
            },
        }
    }
}

impl StackSettings {
    /// Parse and validate settings from a YAML document
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(input)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate settings from a YAML file.
    ///
    /// A relative `manifests_dir` is resolved against the file's directory.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut settings = Self::from_yaml_str(&contents)?;
        if settings.manifests_dir.is_relative() {
            if let Some(parent) = path.parent() {
                settings.manifests_dir = parent.join(&settings.manifests_dir);
            }
        }
        Ok(settings)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        let cluster = &self.cluster;
        if !is_dns_label(&cluster.name) {
            return Err(Error::validation_for_field(
                "cluster.name",
                format!(
                    "'{}' must be a lowercase DNS label",
                    cluster.name.escape_debug()
                ),
            ));
        }
        if cluster.node_pool.trim().is_empty() {
            return Err(Error::validation_for_field(
                "cluster.node_pool",
                "node pool name must not be empty",
            ));
        }
        if cluster.min_nodes > cluster.max_nodes {
            return Err(Error::validation_for_field(
                "cluster.min_nodes",
                format!(
                    "min_nodes ({}) exceeds max_nodes ({})",
                    cluster.min_nodes, cluster.max_nodes
                ),
            ));
        }
        if cluster.initial_nodes < cluster.min_nodes || cluster.initial_nodes > cluster.max_nodes
        {
            return Err(Error::validation_for_field(
                "cluster.initial_nodes",
                format!(
                    "initial_nodes ({}) outside {}..={}",
                    cluster.initial_nodes, cluster.min_nodes, cluster.max_nodes
                ),
            ));
        }

        let tiers = &self.tiers;
        let requirements = [
            ("etcd", tiers.etcd, "cert_manager", tiers.cert_manager),
            ("minio", tiers.minio, "cert_manager", tiers.cert_manager),
            ("timescale", tiers.timescale, "cert_manager", tiers.cert_manager),
            ("timescale", tiers.timescale, "minio", tiers.minio),
            ("monitoring", tiers.monitoring, "timescale", tiers.timescale),
        ];
        for (tier, enabled, needs, available) in requirements {
            if enabled && !available {
                return Err(Error::validation_for_field(
                    format!("tiers.{tier}"),
                    format!("{tier} requires {needs} to be enabled"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_dev_stack() {
        let settings = StackSettings::from_yaml_str("{}").unwrap();
        assert_eq!(settings.cluster.name, "dev");
        assert_eq!(settings.cluster.node_pool, "micro");
        assert_eq!(settings.cluster.max_nodes, 3);
        assert!(settings.tiers.monitoring);
        assert_eq!(settings.executor.to_config().retry.max_attempts, 1);
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let settings = StackSettings::from_yaml_str(
            "project: demo-project\ncluster:\n  max_nodes: 5\nexecutor:\n  concurrency: 2\n",
        )
        .unwrap();
        assert_eq!(settings.project.as_deref(), Some("demo-project"));
        assert_eq!(settings.cluster.max_nodes, 5);
        assert_eq!(settings.cluster.machine_type, "e2-standard-2");
        assert_eq!(settings.executor.to_config().concurrency, 2);
    }

    #[test]
    fn test_rejects_inverted_autoscaling_bounds() {
        let err = StackSettings::from_yaml_str(
            "cluster:\n  initial_nodes: 1\n  min_nodes: 4\n  max_nodes: 2\n",
        )
        .unwrap_err();
        match err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("cluster.min_nodes"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_cluster_name_outside_dns_label() {
        for yaml in ["cluster:\n  name: \"dev #prod\"\n", "cluster:\n  name: Dev\n"] {
            match StackSettings::from_yaml_str(yaml).unwrap_err() {
                Error::Validation { field, .. } => {
                    assert_eq!(field.as_deref(), Some("cluster.name"))
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_rejects_missing_tier_prerequisite() {
        let err = StackSettings::from_yaml_str("tiers:\n  minio: false\n").unwrap_err();
        assert!(err.to_string().contains("timescale requires minio"));

        let ok = StackSettings::from_yaml_str(
            "tiers:\n  etcd: false\n  minio: false\n  timescale: false\n  monitoring: false\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(StackSettings::from_yaml_str("clutser: {}\n").is_err());
    }

    #[test]
    fn test_manifests_dir_is_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.yaml");
        std::fs::write(&path, "manifests_dir: k8s\n").unwrap();

        let settings = StackSettings::from_yaml_file(&path).unwrap();
        assert_eq!(settings.manifests_dir, dir.path().join("k8s"));
    }
}
