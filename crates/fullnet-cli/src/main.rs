//! fullnet — reconcile blockchain full-node endpoints on Kubernetes.
//!
//! # Usage
//!
//! ```text
//! fullnet --config baklava.toml fullnodes install
//! fullnet --config baklava.toml fullnodes upgrade --reset
//! fullnet --config baklava.toml testnet poll-bootnode
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

mod commands;

#[derive(Parser)]
#[command(
    name = "fullnet",
    about = "Full-node endpoint reconciliation for Kubernetes-hosted blockchain nodes",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to fullnet.toml.
    #[arg(short, long, global = true, default_value = "fullnet.toml")]
    config: PathBuf,

    /// Show `helm diff` output instead of changing releases.
    #[arg(long, global = true, env = "FULLNET_HELM_DRY_RUN")]
    helm_dry_run: bool,

    /// Log static IP deletions instead of executing them.
    #[arg(short, long, global = true, env = "FULLNET_VERBOSE")]
    verbose: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the full-node release of an environment
    Fullnodes {
        #[command(subcommand)]
        action: FullnodesAction,
    },
    /// Testnet-wide operations
    Testnet {
        #[command(subcommand)]
        action: TestnetAction,
    },
}

#[derive(Subcommand)]
enum FullnodesAction {
    /// Allocate endpoints and install the chart; prints enode URLs when node keys are configured
    Install,
    /// Reconcile endpoints to the configured replica count and upgrade the chart
    Upgrade {
        /// Scale to zero and delete chain data before upgrading.
        #[arg(long)]
        reset: bool,
    },
    /// Uninstall the chart and release every endpoint
    Remove,
    /// Print the enode URL of every replica
    Enodes,
}

#[derive(Subcommand)]
enum TestnetAction {
    /// Scale all geth workloads to zero, wipe their volumes, upgrade, scale back up
    ResetUpgrade,
    /// Wait for the bootnode load balancer, then restart geth pods
    PollBootnode,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fullnet=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "fullnet failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = commands::Context::load(&cli.config, cli.helm_dry_run, cli.verbose)?;

    match cli.command {
        Commands::Fullnodes { action } => match action {
            FullnodesAction::Install => commands::fullnodes::install(&ctx).await,
            FullnodesAction::Upgrade { reset } => commands::fullnodes::upgrade(&ctx, reset).await,
            FullnodesAction::Remove => commands::fullnodes::remove(&ctx).await,
            FullnodesAction::Enodes => commands::fullnodes::enodes(&ctx).await,
        },
        Commands::Testnet { action } => match action {
            TestnetAction::ResetUpgrade => commands::testnet::reset_upgrade(&ctx).await,
            TestnetAction::PollBootnode => commands::testnet::poll_bootnode(&ctx).await,
        },
    }
}
