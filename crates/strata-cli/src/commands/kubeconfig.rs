//! Kubeconfig command

use std::path::PathBuf;

use clap::Args;
use strata_infra::{context_name, render_kubeconfig};
use tracing::info;

use crate::Result;

#[derive(Args, Debug)]
pub struct KubeconfigArgs {
    /// Cluster name
    #[arg(long)]
    pub cluster: String,

    /// API server address without scheme, e.g. `34.78.1.12`
    #[arg(long)]
    pub endpoint: String,

    /// Base64-encoded cluster CA certificate
    #[arg(long)]
    pub ca: String,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn run(args: KubeconfigArgs) -> Result<()> {
    let kubeconfig = render_kubeconfig(&args.cluster, &args.endpoint, &args.ca)?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, &kubeconfig).await?;
            info!(
                path = %path.display(),
                context = %context_name(&args.cluster),
                "wrote kubeconfig"
            );
        }
        None => print!("{kubeconfig}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_infra::Kubeconfig;

    #[tokio::test]
    async fn test_writes_validated_kubeconfig_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubeconfig");

        run(KubeconfigArgs {
            cluster: "dev".to_string(),
            endpoint: "34.78.1.12".to_string(),
            ca: "Q0EtREFUQQ==".to_string(),
            output: Some(path.clone()),
        })
        .await
        .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let parsed = Kubeconfig::parse(&written).unwrap();
        parsed.validate().unwrap();
        assert!(written.contains("server: https://34.78.1.12"));
        assert!(written.contains("current-context: demo_dev"));
    }

    #[tokio::test]
    async fn test_rejects_endpoint_with_scheme() {
        let err = run(KubeconfigArgs {
            cluster: "dev".to_string(),
            endpoint: "https://34.78.1.12".to_string(),
            ca: "Q0EtREFUQQ==".to_string(),
            output: None,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, crate::Error::Strata(_)));
    }
}
