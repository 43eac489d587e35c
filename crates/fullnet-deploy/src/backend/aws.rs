use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::info;

use fullnet_alloc::StaticIpAllocator;
use fullnet_cloud::helm::{set, set_list};
use fullnet_cloud::{AwsIpProvider, CloudIpProvider};
use fullnet_core::{AllocationIdsPerNode, ReconcileError, ReconcileResult};

use crate::deployer::{DeployContext, FullNodeBackend};

/// One Elastic IP per replica per public subnet.
///
/// The chart binds every allocation ID of a replica; the first subnet's
/// address is the replica's advertised IP.
pub struct AwsBackend {
    provider: Arc<AwsIpProvider>,
}

impl AwsBackend {
    pub fn new(provider: Arc<AwsIpProvider>) -> Self {
        Self { provider }
    }

    fn allocator(&self, ctx: &DeployContext) -> StaticIpAllocator {
        StaticIpAllocator::new(self.provider.clone(), ctx.kubectl.clone(), ctx.names.clone())
    }

    async fn subnets(&self) -> ReconcileResult<&[String]> {
        let subnets = self.provider.public_subnets().await?;
        if subnets.is_empty() {
            return Err(ReconcileError::config(
                "no subnets tagged kubernetes.io/role/elb for the cluster",
            ));
        }
        Ok(subnets)
    }
}

#[async_trait]
impl FullNodeBackend for AwsBackend {
    fn name(&self) -> &'static str {
        "aws"
    }

    async fn additional_helm_parameters(&self, ctx: &DeployContext) -> ReconcileResult<Vec<String>> {
        let subnets = self.subnets().await?;
        let matrix = self
            .allocator(ctx)
            .reconcile_per_subnet(ctx.deployment.replicas, ctx.previous_replicas, subnets)
            .await?;
        let ids = AllocationIdsPerNode::from(matrix.as_slice());

        let provider = self.provider.as_ref();
        let public_ips = try_join_all(ids.0.iter().map(|per_subnet| async move {
            let first = per_subnet
                .first()
                .ok_or_else(|| ReconcileError::parse("replica has no allocation IDs"))?;
            provider.public_ip(first).await
        }))
        .await?;
        info!(
            allocation_ids = %ids.helm_value(),
            public_ips = ?public_ips,
            "elastic IPs allocated"
        );

        Ok(vec![
            set("geth.azure_provider", false),
            format!("--set geth.eip_allocation_ids_per_node={{{}}}", ids.helm_value()),
            set_list("geth.public_ip_per_node", &public_ips),
            set("storage.storageClass", "gp2"),
        ])
    }

    async fn deallocate_all_ips(&self, ctx: &DeployContext) -> ReconcileResult<()> {
        self.allocator(ctx).deallocate_all().await.map(|_| ())
    }

    async fn full_node_ip(&self, ctx: &DeployContext, index: u32) -> ReconcileResult<String> {
        let subnets = self.subnets().await?;
        let name = ctx.names.replica(index).scoped(&subnets[0]);
        self.provider
            .address(&name)
            .await?
            .ok_or_else(|| ReconcileError::parse(format!("elastic IP {name} is not registered")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fullnet_cloud::{Kubectl, ScriptedRunner};
    use fullnet_core::{DeploymentConfig, FullNodeNames};

    fn ctx(runner: Arc<ScriptedRunner>, replicas: u32, previous: Option<u32>) -> DeployContext {
        DeployContext {
            names: FullNodeNames::new("dev"),
            deployment: DeploymentConfig {
                replicas,
                disk_size_gb: 10,
                rolling_update_partition: 0,
                rpc_apis: "eth".into(),
                gc_mode: "full".into(),
                use_gstore_data: false,
                ws_port: 8546,
                node_key_generation_info: None,
            },
            kubectl: Kubectl::new(runner),
            previous_replicas: previous,
        }
    }

    fn scripted() -> Arc<ScriptedRunner> {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("describe-subnets", r#"["a", "b"]"#);
        for i in 0..3 {
            for s in ["a", "b"] {
                runner.on(
                    &format!("Values=dev-fullnodes-{i}-{s} "),
                    &format!("id{i}{s}\t3.0.{i}.{}\n", if s == "a" { 1 } else { 2 }),
                );
            }
        }
        runner.on("--allocation-ids id0a", "3.0.0.1").on("--allocation-ids id1a", "3.0.1.1");
        runner
    }

    #[tokio::test]
    async fn two_replicas_two_subnets() {
        let runner = scripted();
        let backend = AwsBackend::new(Arc::new(AwsIpProvider::new(runner.clone(), "eks", "dev-rg")));

        let params = backend
            .additional_helm_parameters(&ctx(runner.clone(), 2, None))
            .await
            .unwrap();

        assert_eq!(
            params,
            vec![
                "--set geth.azure_provider=false",
                "--set geth.eip_allocation_ids_per_node={id0a\\,id0b,id1a\\,id1b}",
                "--set geth.public_ip_per_node={3.0.0.1,3.0.1.1}",
                "--set storage.storageClass=gp2",
            ]
        );
        assert!(runner.calls_matching("allocate-address").is_empty());
    }

    #[tokio::test]
    async fn scale_down_releases_every_subnet_allocation() {
        let runner = scripted();
        let backend = AwsBackend::new(Arc::new(AwsIpProvider::new(runner.clone(), "eks", "dev-rg")));

        backend
            .additional_helm_parameters(&ctx(runner.clone(), 2, Some(3)))
            .await
            .unwrap();

        let svc = runner.position("delete service dev-fullnodes-2").unwrap();
        let release_b = runner.position("release-address --allocation-id id2b").unwrap();
        assert!(svc < release_b);
        assert!(runner.position("release-address --allocation-id id2a").is_some());
        assert_eq!(runner.calls_matching("release-address").len(), 2);
    }

    #[tokio::test]
    async fn full_node_ip_uses_first_subnet() {
        let runner = scripted();
        let backend = AwsBackend::new(Arc::new(AwsIpProvider::new(runner.clone(), "eks", "dev-rg")));
        let ctx = ctx(runner.clone(), 2, None);
        assert_eq!(backend.full_node_ip(&ctx, 0).await.unwrap(), "3.0.0.1");
        assert_eq!(backend.full_node_ip(&ctx, 1).await.unwrap(), "3.0.1.1");
        assert_eq!(runner.calls_matching("describe-subnets").len(), 1);
    }

    #[tokio::test]
    async fn remove_releases_allocations_on_retired_subnets() {
        let runner = scripted();
        runner
            .on("Value[]", "dev-fullnodes-0-a\tdev-fullnodes-0-old\tdev-validators-0-a\n")
            .on("Values=dev-fullnodes-0-old ", "id0old\t3.0.9.9\n");
        let backend = AwsBackend::new(Arc::new(AwsIpProvider::new(runner.clone(), "eks", "dev-rg")));

        backend.deallocate_all_ips(&ctx(runner.clone(), 1, None)).await.unwrap();

        let mut released = runner.calls_matching("release-address");
        released.sort();
        assert_eq!(
            released,
            vec![
                "aws ec2 release-address --allocation-id id0a",
                "aws ec2 release-address --allocation-id id0old",
            ]
        );
        assert!(runner.calls_matching("describe-subnets").is_empty());
    }

    #[tokio::test]
    async fn untagged_cluster_is_a_config_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("describe-subnets", "[]");
        let backend = AwsBackend::new(Arc::new(AwsIpProvider::new(runner.clone(), "eks", "dev-rg")));
        let err = backend
            .additional_helm_parameters(&ctx(runner, 1, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));
    }
}
