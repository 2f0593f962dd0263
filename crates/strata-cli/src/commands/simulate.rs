//! Simulate command
//!
//! Converges the stack against in-memory GCP and cluster backends. Each run
//! reuses the same simulated environment, so a second run exercises adoption
//! of everything the first one created.

use std::time::Duration;

use clap::Args;
use serde_json::json;
use strata_graph::{NodeId, ProviderError, RunResult};
use strata_infra::SimulatedCloud;
use tracing::{info, warn};

use super::StackArgs;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Make a node fail permanently, e.g. `Bucket/timescalebackups` (repeatable)
    #[arg(long, value_name = "KIND/NAME")]
    pub fail: Vec<NodeId>,

    /// Number of consecutive runs against the same environment
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub runs: u32,

    /// Latency of every simulated backend call, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub latency_ms: u64,

    /// Print each run's result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: SimulateArgs) -> Result<()> {
    let settings = args.stack.settings()?;
    let config = args.stack.config()?;

    let graph = strata_infra::plan(&settings, &config)?;
    if let Some(unknown) = args.fail.iter().find(|node| graph.node(node).is_none()) {
        return Err(Error::UnknownNode {
            node: unknown.to_string(),
        });
    }

    let sim = SimulatedCloud::with_latency(Duration::from_millis(args.latency_ms));
    for node in &args.fail {
        warn!(node = %node, "injecting permanent failure");
        sim.fail(node.clone(), ProviderError::permanent("injected failure"));
    }

    let mut last = None;
    for run in 1..=args.runs {
        info!(run, total = args.runs, "starting simulated run");
        let result = strata_infra::deploy(&settings, &config, sim.backends()).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&result_json(run, &result))?);
        } else {
            println!("{}", render_run(run, &result));
        }
        last = Some(result);
    }

    let duplicates = sim.duplicate_creations();
    if !duplicates.is_empty() {
        return Err(Error::DuplicateCreations {
            nodes: duplicates.iter().map(ToString::to_string).collect(),
        });
    }

    match last {
        Some(result) if !result.is_success() => Err(Error::NotConverged {
            summary: result.summary().to_string(),
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Pure Functions (unit-testable)
// =============================================================================

pub fn render_run(run: u32, result: &RunResult) -> String {
    let mut out = format!("run {run}: {result}");
    for (name, value) in &result.outputs {
        out.push_str(&format!("\n  export {name} = {value}"));
    }
    for name in &result.missing_outputs {
        out.push_str(&format!("\n  export {name} unavailable"));
    }
    out
}

pub fn result_json(run: u32, result: &RunResult) -> serde_json::Value {
    let nodes: serde_json::Map<String, serde_json::Value> = result
        .nodes
        .iter()
        .map(|(id, report)| {
            (
                id.to_string(),
                json!({
                    "state": report.state.to_string(),
                    "attempts": report.attempts,
                    "blockedBy": report.blocked_by.as_ref().map(ToString::to_string),
                }),
            )
        })
        .collect();

    json!({
        "run": run,
        "summary": result.summary(),
        "nodes": nodes,
        "failures": result.failures.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "outputs": result.outputs,
        "missingOutputs": result.missing_outputs,
    })
}
