//! strata CLI
//!
//! Plans and simulates the platform stack.

use clap::Parser;

use strata_cli::{Cli, Result};
use strata_common::telemetry::{init_tracing, TracingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(TracingConfig {
        format: cli.log_format.into(),
        default_filter: None,
    })?;

    cli.run().await
}
