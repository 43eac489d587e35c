//! fullnet-deploy — full-node release lifecycle.
//!
//! Ties the allocators to the Helm chart: computes chart parameters,
//! installs, upgrades and removes the full-node release, and derives the
//! enode URLs of deterministic node keys.
//!
//! # Components
//!
//! - **`deployer`** — `FullNodeDeployer` and the `FullNodeBackend` trait
//! - **`backend`** — GCP, Azure, AWS and NodePort backends
//! - **`enode`** — mnemonic-based node keys and enode URLs
//! - **`driver`** — testnet reset-and-upgrade and bootnode load balancer poll

pub mod backend;
pub mod deployer;
pub mod driver;
pub mod enode;

pub use backend::{AwsBackend, AzureBackend, GcpBackend, NodePortBackend, backend_for};
pub use deployer::{DeployContext, DeployOptions, DeployerPhase, FullNodeBackend, FullNodeDeployer};
pub use driver::{DriverTimings, TestnetDriver};
pub use enode::{NodeKey, enode_url};
