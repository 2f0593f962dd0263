//! strata CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand, ValueEnum};
use strata_common::telemetry::LogFormat;

/// strata - declare, plan and converge a GKE platform stack
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Pretty, env = "STRATA_LOG_FORMAT")]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the dependency graph and apply order without touching any backend
    Plan(commands::plan::PlanArgs),
    /// Converge the stack against simulated backends
    Simulate(commands::simulate::SimulateArgs),
    /// Render the kubeconfig for a cluster
    Kubeconfig(commands::kubeconfig::KubeconfigArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Plan(args) => commands::plan::run(args).await,
            Commands::Simulate(args) => commands::simulate::run(args).await,
            Commands::Kubeconfig(args) => commands::kubeconfig::run(args).await,
        }
    }
}
