//! Error types shared across strata crates
//!
//! These are run-level errors: anything that aborts a deployment before the
//! convergence executor starts (bad settings, missing secrets, a malformed
//! graph) or that prevents the CLI from doing its job. Per-node apply failures
//! are not errors at this level; they are collected in the run result.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for strata operations
#[derive(Debug, Error)]
pub enum Error {
    /// Settings failed validation
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "cluster.max_nodes")
        field: Option<String>,
    },

    /// A required configuration key has no value in any source
    #[error("missing required configuration key '{key}'")]
    MissingConfig {
        /// The configuration key that was required
        key: String,
    },

    /// The resource graph could not be declared or finalized
    #[error("declaration error [{node}]: {message}")]
    Declaration {
        /// Node (kind/name) the error is attributed to
        node: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being processed (if known)
        kind: Option<String>,
    },

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "cli", "telemetry")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a settings field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a missing configuration key error
    pub fn missing_config(key: impl Into<String>) -> Self {
        Self::MissingConfig { key: key.into() }
    }

    /// Create a declaration error attributed to a node
    pub fn declaration(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Declaration {
            node: node.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error was raised before any side effect could happen.
    ///
    /// Declaration-time errors abort the run with zero nodes applied.
    pub fn is_declaration_time(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. } | Error::MissingConfig { .. } | Error::Declaration { .. }
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization_for_kind("yaml", e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization_for_kind("json", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_names_the_key() {
        let err = Error::missing_config("cloudflare-api-key");
        assert!(err.to_string().contains("'cloudflare-api-key'"));
        assert!(err.is_declaration_time());
    }

    #[test]
    fn validation_carries_field_path() {
        let err = Error::validation_for_field("cluster.max_nodes", "must be >= min_nodes");
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("cluster.max_nodes"));
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(err.to_string().contains("must be >= min_nodes"));
    }

    #[test]
    fn declaration_error_names_node() {
        let err = Error::declaration("Namespace/etcd", "duplicate node");
        assert_eq!(
            err.to_string(),
            "declaration error [Namespace/etcd]: duplicate node"
        );
    }

    #[test]
    fn yaml_errors_convert_to_serialization() {
        let parse: std::result::Result<serde_yaml::Value, _> = serde_yaml::from_str("a: [1, 2");
        let err: Error = parse.unwrap_err().into();
        match err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("yaml")),
            other => panic!("Expected Serialization, got {other:?}"),
        }
    }

    #[test]
    fn internal_errors_are_not_declaration_time() {
        assert!(!Error::internal("boom").is_declaration_time());
        assert!(!Error::serialization("bad").is_declaration_time());
    }
}
