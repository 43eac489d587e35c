//! fullnet-cloud — the external boundary of a reconciliation pass.
//!
//! Everything that talks to a cloud CLI, `kubectl`, or `helm` lives here.
//! Output parsing stays in this crate; the allocator and deployer layers
//! only see typed values and `ReconcileError`s.
//!
//! # Components
//!
//! - **`runner`** — `CommandRunner` trait and the tokio process implementation
//! - **`scripted`** — in-memory `ScriptedRunner` for tests
//! - **`kubectl`** — scale, PVC/Service/pod deletion, Service and node lookups
//! - **`helm`** — chart install/upgrade/uninstall and `--set` helpers
//! - **`provider`** — `CloudIpProvider` with GCP, Azure and AWS adapters
//! - **`poll`** — bounded fixed-interval polling

pub mod helm;
pub mod kubectl;
pub mod poll;
pub mod provider;
pub mod runner;
pub mod scripted;

pub use helm::{ChartRelease, Helm};
pub use kubectl::{Kubectl, WorkloadKind};
pub use poll::{PollConfig, poll_until};
pub use provider::{AwsIpProvider, AzureIpProvider, CloudIpProvider, GcpIpProvider};
pub use runner::{CommandRunner, ShellRunner};
pub use scripted::ScriptedRunner;
