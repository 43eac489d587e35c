use async_trait::async_trait;
use tracing::info;

use fullnet_alloc::NodePortAllocator;
use fullnet_core::ReconcileResult;

use crate::deployer::{DeployContext, FullNodeBackend};

/// Full nodes reachable on a NodePort of whichever node hosts them.
///
/// NodePorts are not cloud resources, so nothing is released; the port
/// set is logged instead so firewall rules can follow it.
pub struct NodePortBackend;

impl NodePortBackend {
    fn allocator(ctx: &DeployContext) -> NodePortAllocator {
        NodePortAllocator::new(ctx.kubectl.clone(), ctx.names.clone())
    }
}

#[async_trait]
impl FullNodeBackend for NodePortBackend {
    fn name(&self) -> &'static str {
        "node-port"
    }

    async fn additional_helm_parameters(&self, ctx: &DeployContext) -> ReconcileResult<Vec<String>> {
        let assignments = Self::allocator(ctx).assign(ctx.deployment.replicas).await?;
        let mut ports: Vec<i32> = assignments.iter().filter_map(|a| a.port).collect();
        ports.sort_unstable();
        info!(?ports, "full node ports; open them in the cluster firewall");
        Ok(NodePortAllocator::helm_parameters(&assignments))
    }

    async fn deallocate_all_ips(&self, ctx: &DeployContext) -> ReconcileResult<()> {
        let ports = Self::allocator(ctx).used_ports().await?;
        info!(
            ?ports,
            "node ports still in use; close firewall rules for any others"
        );
        Ok(())
    }

    async fn full_node_ip(&self, ctx: &DeployContext, index: u32) -> ReconcileResult<String> {
        let pod = ctx.names.replica(index).name;
        ctx.kubectl
            .node_external_ip_for_pod(ctx.names.namespace(), &pod)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fullnet_cloud::{Kubectl, ScriptedRunner};
    use fullnet_core::{DeploymentConfig, FullNodeNames};

    fn ctx(runner: Arc<ScriptedRunner>, replicas: u32) -> DeployContext {
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
            previous_replicas: None,
        }
    }

    #[tokio::test]
    async fn fresh_services_get_lowest_free_ports() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on(
                "get services --all-namespaces",
                r#"{"apiVersion": "v1", "kind": "List", "items": [
                    {"apiVersion": "v1", "kind": "Service", "metadata": {"name": "ingress"},
                     "spec": {"ports": [{"port": 80, "nodePort": 30000}, {"port": 443, "nodePort": 30001}]}}]}"#,
            )
            .on_err("get service dev-fullnodes-", "Error from server (NotFound): services not found");

        let params = NodePortBackend
            .additional_helm_parameters(&ctx(runner, 2))
            .await
            .unwrap();

        assert_eq!(
            params,
            vec![
                "--set geth.service_node_port_per_full_node[0]=30002",
                "--set geth.service_node_port_per_full_node[1]=30003",
                "--set geth.service_type=NodePort",
            ]
        );
    }

    #[tokio::test]
    async fn full_node_ip_is_hosting_node_external_ip() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("pod dev-fullnodes-1 ", "gke-pool-2")
            .on(
                "get node gke-pool-2",
                r#"{"apiVersion": "v1", "kind": "Node", "metadata": {"name": "gke-pool-2"},
                    "status": {"addresses": [{"type": "ExternalIP", "address": "35.9.9.9"}]}}"#,
            );
        let ip = NodePortBackend.full_node_ip(&ctx(runner, 2), 1).await.unwrap();
        assert_eq!(ip, "35.9.9.9");
    }

    #[tokio::test]
    async fn removal_releases_nothing() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("get services --all-namespaces", r#"{"apiVersion": "v1", "kind": "List", "items": []}"#);
        NodePortBackend.deallocate_all_ips(&ctx(runner.clone(), 2)).await.unwrap();
        assert_eq!(runner.calls().len(), 1);
    }
}
