//! `FullNodeBackend` implementations, one per cluster kind.

mod aws;
mod azure;
mod gcp;
mod node_port;

use std::sync::Arc;

use fullnet_cloud::{AwsIpProvider, AzureIpProvider, CommandRunner, GcpIpProvider};
use fullnet_core::{ClusterConfig, ReconcileError, ReconcileResult, StaticIpRecord};

pub use aws::AwsBackend;
pub use azure::AzureBackend;
pub use gcp::GcpBackend;
pub use node_port::NodePortBackend;

use crate::deployer::FullNodeBackend;

/// Pick the backend for a cluster config.
pub fn backend_for(
    cluster: &ClusterConfig,
    runner: Arc<dyn CommandRunner>,
    verbose: bool,
) -> Box<dyn FullNodeBackend> {
    match cluster {
        ClusterConfig::Gcp(gcp) => Box::new(GcpBackend::new(
            Arc::new(
                GcpIpProvider::new(runner, gcp.region())
                    .with_project(&gcp.project)
                    .with_verbose(verbose),
            ),
            gcp.create_neg,
        )),
        ClusterConfig::Azure(azure) => Box::new(AzureBackend::new(Arc::new(AzureIpProvider::new(
            runner,
            azure.resource_group.clone(),
            azure.cluster_name.clone(),
        )))),
        ClusterConfig::Aws(aws) => Box::new(AwsBackend::new(Arc::new(AwsIpProvider::new(
            runner,
            aws.cluster_name.clone(),
            aws.resource_group_tag.clone(),
        )))),
        ClusterConfig::NodePort => Box::new(NodePortBackend),
    }
}

/// Addresses of freshly reconciled records, in ordinal order.
fn addresses(records: &[StaticIpRecord]) -> ReconcileResult<Vec<String>> {
    records
        .iter()
        .map(|r| {
            r.address
                .clone()
                .ok_or_else(|| ReconcileError::parse(format!("static IP {} has no address", r.name)))
        })
        .collect()
}
