//! Cloud static IP providers.
//!
//! Each provider creates, looks up and deletes named external IP
//! resources through its cloud CLI. IP state is never cached: the cloud
//! is authoritative and every call re-queries it, so a restarted pass sees
//! true state. Only cluster topology (Azure's node resource group, AWS
//! public subnets) is looked up once per provider. "Already exists" on
//! create and "not found" on delete are success.

mod aws;
mod azure;
mod gcp;

use async_trait::async_trait;

use fullnet_core::{ReconcileResult, StaticIpRecord};

pub use aws::AwsIpProvider;
pub use azure::AzureIpProvider;
pub use gcp::GcpIpProvider;

/// A cloud's named static IP resources.
#[async_trait]
pub trait CloudIpProvider: Send + Sync {
    /// Short provider name for logs ("gcp", "azure", "aws").
    fn kind(&self) -> &'static str;

    /// Create `name` unless it exists; either way return its current record.
    async fn register_if_not_registered(&self, name: &str) -> ReconcileResult<StaticIpRecord>;

    /// Current address of `name`, or `None` if it does not exist.
    async fn address(&self, name: &str) -> ReconcileResult<Option<String>>;

    /// Delete `name`. A missing resource is success.
    async fn deallocate(&self, name: &str) -> ReconcileResult<()>;

    /// Names of the resources that start with `<prefix>-`, sorted.
    async fn names(&self, prefix: &str) -> ReconcileResult<Vec<String>>;

    /// Number of resources whose name starts with `<prefix>-`.
    async fn count(&self, prefix: &str) -> ReconcileResult<usize> {
        Ok(self.names(prefix).await?.len())
    }

    /// Whether `wait_for_detach` must run before `deallocate`.
    fn requires_detach_wait(&self) -> bool {
        false
    }

    /// Block until `name` is no longer attached to a load balancer.
    async fn wait_for_detach(&self, _name: &str) -> ReconcileResult<()> {
        Ok(())
    }
}

/// Lines of CLI text output, trimmed, without blanks.
pub(crate) fn non_empty_lines(out: &str) -> impl Iterator<Item = &str> {
    out.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// First non-empty line of CLI text output, if any.
pub(crate) fn first_value(out: &str) -> Option<String> {
    non_empty_lines(out).next().map(str::to_string)
}

/// Names that belong to `prefix` (`<prefix>-...`), sorted and deduplicated.
pub(crate) fn prefixed<'a>(names: impl Iterator<Item = &'a str>, prefix: &str) -> Vec<String> {
    let wanted = format!("{prefix}-");
    let mut names: Vec<String> = names
        .filter(|n| n.starts_with(&wanted))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}
