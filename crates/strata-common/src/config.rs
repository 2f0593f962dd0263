//! Declared configuration sources
//!
//! Stack declarations read secrets and settings through [`ConfigSource`]. A
//! lookup is synchronous and happens while the graph is being declared, so a
//! missing required key aborts the run before any node is applied.
//!
//! Sources compose through [`LayeredConfig`]; the CLI stacks environment
//! variables over a YAML secrets file:
//!
//! ```ignore
//! let config = LayeredConfig::new()
//!     .with(EnvConfig::strata())
//!     .with(StaticConfig::from_yaml_file("secrets.yaml")?);
//! let api_key = config.require("cloudflare-api-key")?;
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result, ENV_PREFIX};

/// A mapping from string keys to configuration or secret values
pub trait ConfigSource: Send + Sync {
    /// Look up a key, returning `None` when this source has no value for it
    fn get(&self, key: &str) -> Option<String>;

    /// Look up a key that must be present
    fn require(&self, key: &str) -> Result<String> {
        self.get(key).ok_or_else(|| Error::missing_config(key))
    }
}

/// In-memory key/value source, typically loaded from a YAML secrets file
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct StaticConfig {
    values: BTreeMap<String, String>,
}

impl StaticConfig {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a value
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Parse a flat YAML mapping of string keys to string values
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(input)?)
    }

    /// Load a flat YAML mapping from disk
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&data)?;
        debug!(path = %path.display(), keys = config.values.len(), "loaded static configuration");
        Ok(config)
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the source holds no keys
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ConfigSource for StaticConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Environment-variable source
///
/// Key `gcp:region` with prefix `STRATA` is read from `STRATA_GCP_REGION`.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    prefix: String,
}

impl EnvConfig {
    /// Create a source reading variables with the given prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Source using the default `STRATA_` prefix
    pub fn strata() -> Self {
        Self::new(ENV_PREFIX)
    }

    /// Environment variable name consulted for `key`
    pub fn var_name(&self, key: &str) -> String {
        let suffix: String = key
            .chars()
            .map(|c| match c {
                '-' | ':' | '.' | '/' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        if self.prefix.is_empty() {
            suffix
        } else {
            format!("{}_{}", self.prefix, suffix)
        }
    }
}

impl ConfigSource for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key)).ok()
    }
}

/// Ordered stack of sources; the first source holding a key wins
#[derive(Default)]
pub struct LayeredConfig {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl LayeredConfig {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lower-priority layer
    pub fn with(mut self, source: impl ConfigSource + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }
}

impl ConfigSource for LayeredConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }
}
