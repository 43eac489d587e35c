use std::sync::Arc;

use async_trait::async_trait;

use fullnet_alloc::StaticIpAllocator;
use fullnet_cloud::helm::{set, set_list};
use fullnet_cloud::{CloudIpProvider, GcpIpProvider};
use fullnet_core::{ReconcileError, ReconcileResult};

use super::addresses;
use crate::deployer::{DeployContext, FullNodeBackend};

/// One regional static IP per replica.
pub struct GcpBackend {
    provider: Arc<GcpIpProvider>,
    create_neg: bool,
}

impl GcpBackend {
    pub fn new(provider: Arc<GcpIpProvider>, create_neg: bool) -> Self {
        Self {
            provider,
            create_neg,
        }
    }

    fn allocator(&self, ctx: &DeployContext) -> StaticIpAllocator {
        StaticIpAllocator::new(self.provider.clone(), ctx.kubectl.clone(), ctx.names.clone())
    }
}

#[async_trait]
impl FullNodeBackend for GcpBackend {
    fn name(&self) -> &'static str {
        "gcp"
    }

    async fn additional_helm_parameters(&self, ctx: &DeployContext) -> ReconcileResult<Vec<String>> {
        let records = self
            .allocator(ctx)
            .reconcile(ctx.deployment.replicas, ctx.previous_replicas)
            .await?;
        Ok(vec![
            set_list("geth.public_ip_per_node", &addresses(&records)?),
            set("geth.create_network_endpoint_group", self.create_neg),
        ])
    }

    async fn deallocate_all_ips(&self, ctx: &DeployContext) -> ReconcileResult<()> {
        self.allocator(ctx).deallocate_all().await.map(|_| ())
    }

    async fn full_node_ip(&self, ctx: &DeployContext, index: u32) -> ReconcileResult<String> {
        let name = ctx.names.replica(index).name;
        self.provider
            .address(&name)
            .await?
            .ok_or_else(|| ReconcileError::parse(format!("static IP {name} is not registered")))
    }
}
