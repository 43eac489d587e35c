use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

use fullnet_cloud::{CommandRunner, ShellRunner};
use fullnet_core::FullNetConfig;
use fullnet_deploy::DeployOptions;

pub mod fullnodes;
pub mod testnet;

/// Loaded config plus the process-wide switches every command needs.
pub struct Context {
    pub config: FullNetConfig,
    pub runner: Arc<dyn CommandRunner>,
    pub options: DeployOptions,
}

impl Context {
    pub fn load(path: &Path, helm_dry_run: bool, verbose: bool) -> anyhow::Result<Self> {
        let config = FullNetConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
        info!(env = %config.env, path = %path.display(), "config loaded");
        Ok(Self {
            config,
            runner: Arc::new(ShellRunner::new()),
            options: DeployOptions {
                helm_dry_run,
                verbose,
            },
        })
    }
}
