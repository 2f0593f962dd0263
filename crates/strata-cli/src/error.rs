//! Error types for the CLI

use std::path::PathBuf;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Strata(#[from] strata_common::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Telemetry(#[from] strata_common::telemetry::TelemetryError),

    #[error("stack file not found: {path}")]
    StackNotFound { path: PathBuf },

    #[error("no node {node} in the stack")]
    UnknownNode { node: String },

    #[error("stack did not converge: {summary}")]
    NotConverged { summary: String },

    #[error("resources created more than once: {}", .nodes.join(", "))]
    DuplicateCreations { nodes: Vec<String> },
}
