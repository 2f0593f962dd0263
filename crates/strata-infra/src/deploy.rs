//! Entry points: declare the stack, then converge it

use strata_common::{ConfigSource, Result};
use strata_graph::{Backends, ConvergenceExecutor, FinalizedGraph, RunResult};
use tracing::{info, warn};

use crate::settings::StackSettings;
use crate::stack::declare_stack;

/// Declare and validate the stack without touching any backend
pub fn plan(settings: &StackSettings, config: &dyn ConfigSource) -> Result<FinalizedGraph> {
    declare_stack(settings, config)
}

/// Declare the stack and converge it through `backends`.
///
/// Declaration errors are returned before any backend call. Node failures
/// are not errors here; they are reported in the [`RunResult`].
pub async fn deploy(
    settings: &StackSettings,
    config: &dyn ConfigSource,
    backends: Backends,
) -> Result<RunResult> {
    let graph = plan(settings, config)?;
    let executor = ConvergenceExecutor::new(backends, settings.executor.to_config());

    info!(nodes = graph.len(), "converging stack");
    let result = executor.converge(&graph).await;

    let summary = result.summary();
    if result.is_success() {
        info!(%summary, "stack converged");
    } else {
        warn!(%summary, failures = result.failures.len(), "stack partially converged");
    }
    Ok(result)
}
