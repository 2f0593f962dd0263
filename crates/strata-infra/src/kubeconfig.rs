//! Kubeconfig synthesis for GKE clusters
//!
//! GKE clusters are reached through the `gcloud` credential helper, so the
//! rendered kubeconfig carries no token: the user entry declares the helper
//! command and the client runs it when it needs a token.

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{context, Environment, UndefinedBehavior};
use serde::Deserialize;
use serde_json::Value as Json;
use strata_common::{Error, Result};
use strata_graph::{NodeHandle, Value};

/// Prefix of the context name derived from the cluster name
pub const CONTEXT_PREFIX: &str = "demo_";

/// Cluster output holding the cluster name
pub const CLUSTER_NAME_OUTPUT: &str = "name";
/// Cluster output holding the API endpoint host
pub const CLUSTER_ENDPOINT_OUTPUT: &str = "endpoint";
/// Cluster output holding the base64 CA certificate
pub const CLUSTER_CA_OUTPUT: &str = "clusterCaCertificate";

const KUBECONFIG_TEMPLATE: &str = include_str!("../templates/kubeconfig.yaml");

// =============================================================================
// Pure Functions (unit-testable)
// =============================================================================

/// Context, cluster and user name used for a cluster
pub fn context_name(cluster_name: &str) -> String {
    format!("{CONTEXT_PREFIX}{cluster_name}")
}

/// Lowercase RFC 1123 label, the form GKE accepts for cluster names
pub(crate) fn is_dns_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes[0].is_ascii_lowercase()
        && bytes[bytes.len() - 1] != b'-'
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

/// Hostname or IPv4 address with an optional port, or a bracketed IPv6
/// address with an optional port
fn is_host_port(endpoint: &str) -> bool {
    let (host_ok, port) = match endpoint.strip_prefix('[') {
        Some(rest) => {
            let Some((v6, tail)) = rest.split_once(']') else {
                return false;
            };
            let port = match tail {
                "" => None,
                _ => match tail.strip_prefix(':') {
                    Some(port) => Some(port),
                    None => return false,
                },
            };
            let v6_ok = !v6.is_empty() && v6.chars().all(|c| c.is_ascii_hexdigit() || c == ':');
            (v6_ok, port)
        }
        None => {
            let (host, port) = match endpoint.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (endpoint, None),
            };
            (is_hostname(host), port)
        }
    };
    host_ok && port.map_or(true, |p| matches!(p.parse::<u16>(), Ok(n) if n > 0))
}

fn is_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Render the kubeconfig for a cluster.
///
/// # Arguments
///
/// * `cluster_name` - GKE cluster name (lowercase DNS label)
/// * `endpoint` - API server `host[:port]`, without scheme
/// * `ca_data` - CA certificate as returned by GKE (base64 PEM); embedded as-is
pub fn render_kubeconfig(cluster_name: &str, endpoint: &str, ca_data: &str) -> Result<String> {
    if !is_dns_label(cluster_name) {
        return Err(Error::validation_for_field(
            "name",
            format!("'{}' is not a valid cluster name", cluster_name.escape_debug()),
        ));
    }
    if !is_host_port(endpoint) {
        return Err(Error::validation_for_field(
            "endpoint",
            format!("expected host[:port], got '{}'", endpoint.escape_debug()),
        ));
    }
    STANDARD.decode(ca_data).map_err(|e| {
        Error::validation_for_field("clusterCaCertificate", format!("not valid base64: {e}"))
    })?;

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.add_template("kubeconfig", KUBECONFIG_TEMPLATE)
        .map_err(|e| Error::internal_with_context("kubeconfig", e.to_string()))?;

    env.get_template("kubeconfig")
        .and_then(|tmpl| {
            tmpl.render(context! {
                ca => ca_data,
                endpoint => endpoint,
                context => context_name(cluster_name),
            })
        })
        .map_err(|e| Error::internal_with_context("kubeconfig", e.to_string()))
}

/// The kubeconfig of `cluster` as a value derived from its outputs.
///
/// Rendering happens only once the cluster node is applied.
pub fn kubeconfig_value(cluster: &NodeHandle) -> Value {
    Value::combine(
        vec![
            cluster.output(CLUSTER_NAME_OUTPUT),
            cluster.output(CLUSTER_ENDPOINT_OUTPUT),
            cluster.output(CLUSTER_CA_OUTPUT),
        ],
        |inputs| {
            let field = |i: usize, name: &str| {
                inputs[i]
                    .as_str()
                    .ok_or_else(|| format!("cluster output '{name}' is not a string"))
            };
            render_kubeconfig(
                field(0, CLUSTER_NAME_OUTPUT)?,
                field(1, CLUSTER_ENDPOINT_OUTPUT)?,
                field(2, CLUSTER_CA_OUTPUT)?,
            )
            .map(Json::String)
            .map_err(|e| e.to_string())
        },
    )
}

// =============================================================================
// Parsing and validation
// =============================================================================

/// Typed view of a kubeconfig, enough to validate its shape
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// `apiVersion`
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// `kind`
    pub kind: String,
    /// Cluster entries
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    /// Context entries
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    /// Selected context
    pub current_context: String,
    /// User entries
    #[serde(default)]
    pub users: Vec<NamedUser>,
}

/// A named cluster entry
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NamedCluster {
    /// Entry name
    pub name: String,
    /// Connection details
    pub cluster: ClusterEntry,
}

/// Cluster connection details
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    /// API server URL
    pub server: String,
    /// Base64 CA bundle
    pub certificate_authority_data: Option<String>,
}

/// A named context entry
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NamedContext {
    /// Entry name
    pub name: String,
    /// Cluster/user pairing
    pub context: ContextEntry,
}

/// Cluster/user pairing of a context
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ContextEntry {
    /// Cluster entry name
    pub cluster: String,
    /// User entry name
    pub user: String,
}

/// A named user entry
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NamedUser {
    /// Entry name
    pub name: String,
    /// Credentials
    pub user: UserEntry,
}

/// How a user authenticates
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    /// Static bearer token
    pub token: Option<String>,
    /// External credential helper
    pub auth_provider: Option<AuthProvider>,
}

/// External credential helper declaration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AuthProvider {
    /// Helper name, e.g. `gcp`
    pub name: String,
    /// Helper configuration (`cmd-path`, `cmd-args`, ...)
    #[serde(default)]
    pub config: std::collections::BTreeMap<String, String>,
}

impl Kubeconfig {
    /// Parse a kubeconfig document
    pub fn parse(input: &str) -> Result<Self> {
        serde_yaml::from_str(input)
            .map_err(|e| Error::serialization_for_kind("kubeconfig", e.to_string()))
    }

    /// Check the single-cluster, helper-authenticated shape:
    /// one cluster, one context pointing at it, `current-context` set to that
    /// context, and a user that authenticates through a helper command.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::validation_for_field("kubeconfig", msg));

        let [cluster] = self.clusters.as_slice() else {
            return invalid(format!("expected 1 cluster, found {}", self.clusters.len()));
        };
        let [context] = self.contexts.as_slice() else {
            return invalid(format!("expected 1 context, found {}", self.contexts.len()));
        };
        let [user] = self.users.as_slice() else {
            return invalid(format!("expected 1 user, found {}", self.users.len()));
        };

        if !cluster.cluster.server.starts_with("https://") {
            return invalid(format!("server '{}' is not https", cluster.cluster.server));
        }
        if context.context.cluster != cluster.name || context.context.user != user.name {
            return invalid(format!(
                "context '{}' does not reference the declared cluster and user",
                context.name
            ));
        }
        if self.current_context != context.name {
            return invalid(format!(
                "current-context '{}' does not match context '{}'",
                self.current_context, context.name
            ));
        }
        if user.user.token.is_some() {
            return invalid("user embeds a static token".to_string());
        }
        match &user.user.auth_provider {
            Some(provider) if provider.config.contains_key("cmd-path") => Ok(()),
            _ => invalid("user has no credential helper command".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strata_graph::{Fields, NodeId, OutputLookup, ResolveError, ResourceKind};

    const EXPECTED_DEV: &str = "apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: Q0E=
    server: https://10.0.0.1
  name: demo_dev
contexts:
- context:
    cluster: demo_dev
    user: demo_dev
  name: demo_dev
current-context: demo_dev
kind: Config
preferences: {}
users:
- name: demo_dev
  user:
    auth-provider:
      config:
        cmd-args: config config-helper --format=json
        cmd-path: gcloud
        expiry-key: '{.credential.token_expiry}'
        token-key: '{.credential.access_token}'
      name: gcp
";

    #[test]
    fn test_renders_exact_document() {
        let rendered = render_kubeconfig("dev", "10.0.0.1", "Q0E=").unwrap();
        assert_eq!(rendered, EXPECTED_DEV);
        assert!(rendered.contains("server: https://10.0.0.1"));
        assert!(rendered.contains("certificate-authority-data: Q0E="));
        assert!(rendered.contains("current-context: demo_dev"));
    }

    #[test]
    fn test_rendered_document_is_valid() {
        let rendered = render_kubeconfig("dev", "10.0.0.1", "Q0E=").unwrap();
        let parsed = Kubeconfig::parse(&rendered).unwrap();
        parsed.validate().unwrap();

        assert_eq!(parsed.current_context, "demo_dev");
        assert_eq!(parsed.clusters[0].name, "demo_dev");
        assert_eq!(
            parsed.clusters[0].cluster.certificate_authority_data.as_deref(),
            Some("Q0E=")
        );
        let provider = parsed.users[0].user.auth_provider.as_ref().unwrap();
        assert_eq!(provider.name, "gcp");
        assert_eq!(provider.config["cmd-path"], "gcloud");
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(render_kubeconfig("", "10.0.0.1", "Q0E=").is_err());
        assert!(render_kubeconfig("dev", "https://10.0.0.1", "Q0E=").is_err());
        assert!(render_kubeconfig("dev", "10.0.0.1", "not base64!").is_err());
    }

    #[test]
    fn test_rejects_endpoint_that_would_inject_keys() {
        let err = render_kubeconfig(
            "dev",
            "10.0.0.1\n    insecure-skip-tls-verify: true",
            "Q0E=",
        )
        .unwrap_err();
        assert!(err.to_string().contains("host[:port]"));

        for endpoint in ["10.0.0.1 #x", "10.0.0.1:", "10.0.0.1:https", "a..b", "[::1", "-a.b"] {
            assert!(render_kubeconfig("dev", endpoint, "Q0E=").is_err(), "{endpoint}");
        }
    }

    #[test]
    fn test_rejects_cluster_names_that_are_not_dns_labels() {
        let too_long = "a".repeat(64);
        for name in ["dev #prod", "Dev", "dev\nx", "-dev", "dev-", "1dev", too_long.as_str()] {
            assert!(render_kubeconfig(name, "10.0.0.1", "Q0E=").is_err(), "{name:?}");
        }
    }

    #[test]
    fn test_accepts_ports_and_ipv6() {
        for endpoint in ["10.0.0.1:443", "api.example.com", "[2001:db8::1]", "[2001:db8::1]:6443"] {
            let rendered = render_kubeconfig("dev-2", endpoint, "Q0E=").unwrap();
            let parsed = Kubeconfig::parse(&rendered).unwrap();
            parsed.validate().unwrap();
            assert_eq!(
                parsed.clusters[0].cluster.server,
                format!("https://{endpoint}")
            );
            assert_eq!(parsed.current_context, "demo_dev-2");
        }
    }

    #[test]
    fn test_validation_rejects_static_tokens() {
        let doc = EXPECTED_DEV.replace(
            "    auth-provider:\n",
            "    token: abc\n    auth-provider:\n",
        );
        let err = Kubeconfig::parse(&doc).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("static token"));
    }

    #[test]
    fn test_validation_rejects_mismatched_current_context() {
        let doc = EXPECTED_DEV.replace("current-context: demo_dev", "current-context: other");
        assert!(Kubeconfig::parse(&doc).unwrap().validate().is_err());
    }

    struct ClusterOutputs(BTreeMap<NodeId, Fields>);

    impl OutputLookup for ClusterOutputs {
        fn lookup(&self, node: &NodeId, field: &str) -> Option<Json> {
            self.0.get(node).and_then(|f| f.get(field)).cloned()
        }
    }

    #[test]
    fn test_kubeconfig_value_waits_for_cluster_outputs() {
        let mut graph = strata_graph::DependencyGraph::new();
        let cluster = graph
            .add(strata_graph::ResourceNode::new(
                ResourceKind::Cluster,
                "dev",
                strata_graph::ProviderBinding::Cloud,
            ))
            .unwrap();
        let value = kubeconfig_value(&cluster);
        assert_eq!(value.references().len(), 1);

        let empty = ClusterOutputs(BTreeMap::new());
        assert!(matches!(
            value.resolve(&empty),
            Err(ResolveError::MissingOutput { .. })
        ));

        let mut fields = Fields::new();
        fields.insert("name".to_string(), Json::from("dev"));
        fields.insert("endpoint".to_string(), Json::from("10.0.0.1"));
        fields.insert("clusterCaCertificate".to_string(), Json::from("Q0E="));
        let outputs = ClusterOutputs(BTreeMap::from([(cluster.id().clone(), fields)]));

        assert_eq!(value.resolve(&outputs).unwrap(), Json::from(EXPECTED_DEV));
    }
}
