//! fullnet-core — shared types for full-node endpoint reconciliation.
//!
//! Holds the data model every other fullnet crate speaks:
//!
//! - **`types`** — deployment config, per-replica naming, static IP
//!   records, node port assignments, AWS allocation-ID matrices
//! - **`error`** — the `ReconcileError` taxonomy (idempotency-absorbed,
//!   retryable, fatal)
//! - **`config`** — `fullnet.toml` parsing and validation

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AwsClusterConfig, AzureClusterConfig, ChartConfig, ClusterConfig, FullNetConfig,
    GcpClusterConfig, TestnetConfig,
};
pub use error::{ReconcileError, ReconcileResult};
pub use types::*;
