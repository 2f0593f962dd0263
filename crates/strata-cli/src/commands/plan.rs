//! Plan command

use std::fmt::Write;

use clap::Args;
use serde_json::{json, Value as Json};
use strata_graph::FinalizedGraph;

use super::StackArgs;
use crate::Result;

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: PlanArgs) -> Result<()> {
    let settings = args.stack.settings()?;
    let config = args.stack.config()?;
    let graph = strata_infra::plan(&settings, &config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&graph))?);
    } else {
        print!("{}", render_plan(&graph));
    }
    Ok(())
}

// =============================================================================
// Pure Functions (unit-testable)
// =============================================================================

/// Levels with each node's backend and the reasons for its incoming edges
pub fn render_plan(graph: &FinalizedGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} nodes in {} levels",
        graph.len(),
        graph.levels().len()
    );

    for (depth, level) in graph.levels().iter().enumerate() {
        let _ = writeln!(out, "\nlevel {depth}");
        for id in level {
            let backend = graph
                .node(id)
                .map(|node| node.binding().backend())
                .unwrap_or("?");
            let _ = writeln!(out, "  {id} [{backend}]");
            for dependency in graph.dependencies(id) {
                let kinds = graph
                    .edge_kinds(id, dependency)
                    .map(|kinds| {
                        kinds
                            .iter()
                            .map(|k| k.as_str())
                            .collect::<Vec<_>>()
                            .join(",")
                    })
                    .unwrap_or_default();
                let _ = writeln!(out, "    <- {dependency} ({kinds})");
            }
        }
    }

    if !graph.exports().is_empty() {
        let names: Vec<&str> = graph.exports().keys().map(String::as_str).collect();
        let _ = writeln!(out, "\nexports: {}", names.join(", "));
    }
    out
}

pub fn plan_json(graph: &FinalizedGraph) -> Json {
    let levels: Vec<Vec<String>> = graph
        .levels()
        .iter()
        .map(|level| level.iter().map(ToString::to_string).collect())
        .collect();
    let edges: Vec<Json> = graph
        .edges()
        .into_iter()
        .map(|edge| {
            json!({
                "from": edge.dependency.to_string(),
                "to": edge.dependent.to_string(),
                "kinds": edge.kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({
        "order": graph.order().iter().map(ToString::to_string).collect::<Vec<_>>(),
        "levels": levels,
        "edges": edges,
        "exports": graph.exports().keys().collect::<Vec<_>>(),
    })
}
