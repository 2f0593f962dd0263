//! CLI commands

use std::path::{Path, PathBuf};

use clap::Args;
use strata_common::{EnvConfig, LayeredConfig, StaticConfig};
use strata_infra::StackSettings;
use tracing::debug;

use crate::{Error, Result};

pub mod kubeconfig;
pub mod plan;
pub mod simulate;

/// Stack and secrets inputs shared by `plan` and `simulate`
#[derive(Args, Debug, Clone)]
pub struct StackArgs {
    /// Stack settings file (YAML)
    #[arg(long, env = "STRATA_STACK")]
    pub stack: PathBuf,

    /// Secrets file (flat YAML map); `STRATA_*` environment variables take precedence
    #[arg(long, env = "STRATA_SECRETS")]
    pub secrets: Option<PathBuf>,
}

impl StackArgs {
    /// Load and validate the stack settings
    pub fn settings(&self) -> Result<StackSettings> {
        load_settings(&self.stack)
    }

    /// Configuration layers: environment first, then the secrets file
    pub fn config(&self) -> Result<LayeredConfig> {
        load_config(self.secrets.as_deref())
    }
}

pub fn load_settings(path: &Path) -> Result<StackSettings> {
    if !path.exists() {
        return Err(Error::StackNotFound {
            path: path.to_path_buf(),
        });
    }
    let settings = StackSettings::from_yaml_file(path)?;
    debug!(path = %path.display(), cluster = %settings.cluster.name, "loaded stack settings");
    Ok(settings)
}

pub fn load_config(secrets: Option<&Path>) -> Result<LayeredConfig> {
    let mut config = LayeredConfig::new().with(EnvConfig::strata());
    if let Some(path) = secrets {
        config = config.with(StaticConfig::from_yaml_file(path)?);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use strata_common::ConfigSource;

    #[test]
    fn test_missing_stack_file_is_reported_by_path() {
        let err = load_settings(Path::new("/nonexistent/stack.yaml")).unwrap_err();
        assert!(matches!(err, Error::StackNotFound { .. }));
        assert!(err.to_string().contains("/nonexistent/stack.yaml"));
    }

    #[test]
    fn test_invalid_stack_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cluster:\n  min_nodes: 4\n  max_nodes: 2").unwrap();
        let err = load_settings(file.path()).unwrap_err();
        assert!(matches!(err, Error::Strata(_)));
    }

    #[test]
    fn test_secrets_file_is_layered_under_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "strata-cli-test-only-key: from-file").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(
            config.get("strata-cli-test-only-key").as_deref(),
            Some("from-file")
        );
        assert_eq!(config.get("strata-cli-test-absent"), None);
    }
}
