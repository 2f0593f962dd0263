//! Common building blocks for strata: errors, configuration sources, retries
//! and tracing setup.
//!
//! Everything here is shared by the graph engine, the stack declarations and
//! the CLI. Nothing in this crate talks to a cloud or cluster API.

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod retry;
pub mod telemetry;

pub use config::{ConfigSource, EnvConfig, LayeredConfig, StaticConfig};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Prefix for environment variables consulted by [`EnvConfig::strata`]
pub const ENV_PREFIX: &str = "STRATA";

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,strata=debug";
