//! Testnet-wide reconciliation flows.
//!
//! `reset_and_upgrade` wipes every geth workload of a testnet release and
//! brings it back on the upgraded chart. `poll_for_bootnode_load_balancer`
//! waits for the bootnode's static IP to be picked up by its load
//! balancer, then restarts the pods that tried to reach it too early.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use fullnet_cloud::{
    ChartRelease, CommandRunner, GcpIpProvider, Helm, Kubectl, PollConfig, WorkloadKind,
    poll_until,
};
use fullnet_core::{ClusterConfig, FullNetConfig, ReconcileError, ReconcileResult, TestnetConfig};

const PVC_COMPONENTS: &[&str] = &["validators", "tx_nodes", "proxy", "tx_nodes_private"];
const RESTART_COMPONENTS: &[&str] = &["validators", "tx_nodes", "proxy"];

/// Waits used between destructive steps.
#[derive(Debug, Clone)]
pub struct DriverTimings {
    /// After PVC deletion and after the chart upgrade.
    pub settle: Duration,
    /// After the bootnode load balancer comes up, before restarting pods.
    pub load_balancer_grace: Duration,
    pub load_balancer_poll: PollConfig,
}

impl Default for DriverTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(10),
            load_balancer_grace: Duration::from_secs(60),
            load_balancer_poll: PollConfig::load_balancer(),
        }
    }
}

pub struct TestnetDriver {
    env: String,
    testnet: TestnetConfig,
    kubectl: Kubectl,
    helm: Helm,
    gcp: Option<GcpIpProvider>,
    timings: DriverTimings,
}

impl TestnetDriver {
    pub fn new(
        env: impl Into<String>,
        testnet: TestnetConfig,
        kubectl: Kubectl,
        helm: Helm,
        gcp: Option<GcpIpProvider>,
    ) -> Self {
        Self {
            env: env.into(),
            testnet,
            kubectl,
            helm,
            gcp,
            timings: DriverTimings::default(),
        }
    }

    pub fn from_config(
        config: &FullNetConfig,
        runner: Arc<dyn CommandRunner>,
        helm_dry_run: bool,
    ) -> ReconcileResult<Self> {
        let testnet = config
            .testnet
            .clone()
            .ok_or_else(|| ReconcileError::config("[testnet] section is required"))?;
        let gcp = match &config.cluster {
            ClusterConfig::Gcp(gcp) => {
                Some(GcpIpProvider::new(runner.clone(), gcp.region()).with_project(&gcp.project))
            }
            _ => None,
        };
        Ok(Self::new(
            &config.env,
            testnet,
            Kubectl::new(runner.clone()),
            Helm::new(runner).with_dry_run(helm_dry_run),
            gcp,
        ))
    }

    pub fn with_timings(mut self, timings: DriverTimings) -> Self {
        self.timings = timings;
        self
    }

    fn chart(&self) -> ChartRelease {
        ChartRelease {
            namespace: self.env.clone(),
            release: self.env.clone(),
            chart_dir: self.testnet.chart_dir.clone(),
            parameters: self.testnet.helm_parameters.clone(),
        }
    }

    fn name(&self, suffix: &str) -> String {
        format!("{}-{suffix}", self.env)
    }

    /// Scale everything to zero, wipe chain data, upgrade, scale back up.
    ///
    /// In dry-run mode only the chart diff is shown.
    pub async fn reset_and_upgrade(&self) -> ReconcileResult<()> {
        if self.helm.dry_run() {
            return self.helm.upgrade(&self.chart()).await;
        }

        let ns = self.env.as_str();
        let tx_nodes = self.name("tx-nodes");
        let validators = self.name("validators");
        let private_tx_nodes = self.name("tx-nodes-private");
        let bootnode = self.name("bootnode");
        info!(env = %ns, "resetting testnet");

        self.kubectl.scale(ns, WorkloadKind::StatefulSet, &tx_nodes, 0, false).await?;
        self.kubectl.scale(ns, WorkloadKind::StatefulSet, &validators, 0, false).await?;
        // Older releases have no private tx nodes.
        self.kubectl.scale(ns, WorkloadKind::StatefulSet, &private_tx_nodes, 0, true).await?;
        for proxy in self
            .kubectl
            .names_by_selector(ns, WorkloadKind::StatefulSet, "component=proxy")
            .await?
        {
            self.kubectl.scale(ns, WorkloadKind::StatefulSet, &proxy, 0, false).await?;
        }
        self.kubectl.scale(ns, WorkloadKind::Deployment, &bootnode, 0, false).await?;

        for component in PVC_COMPONENTS {
            self.kubectl.delete_pvcs(ns, "component", component).await?;
        }
        tokio::time::sleep(self.timings.settle).await;

        self.helm.upgrade(&self.chart()).await?;
        tokio::time::sleep(self.timings.settle).await;

        let t = &self.testnet;
        self.kubectl.scale(ns, WorkloadKind::StatefulSet, &tx_nodes, t.tx_nodes, false).await?;
        self.kubectl.scale(ns, WorkloadKind::StatefulSet, &validators, t.validators, false).await?;
        self.kubectl
            .scale(ns, WorkloadKind::StatefulSet, &private_tx_nodes, t.private_tx_nodes, false)
            .await?;
        for (i, count) in t.proxies_per_validator.iter().enumerate() {
            let proxy = self.name(&format!("validators-{i}-proxy"));
            self.kubectl.scale(ns, WorkloadKind::StatefulSet, &proxy, *count, true).await?;
        }
        self.kubectl.scale(ns, WorkloadKind::Deployment, &bootnode, 1, false).await?;
        info!(env = %ns, "testnet reset complete");
        Ok(())
    }

    /// Wait for the bootnode's load balancer, then restart geth pods.
    pub async fn poll_for_bootnode_load_balancer(&self) -> ReconcileResult<()> {
        if !self.testnet.static_ips_for_geth_nodes {
            info!("geth nodes use no static IPs, skipping bootnode load balancer poll");
            return Ok(());
        }
        let gcp = self.gcp.as_ref().ok_or_else(|| {
            ReconcileError::config("bootnode load balancer polling needs a gcp cluster")
        })?;

        let bootnode = self.name("bootnode");
        info!(%bootnode, "polling for bootnode load balancer");
        let poll = &self.timings.load_balancer_poll;
        let name = bootnode.as_str();
        let provisioned = poll_until(poll, "bootnode load balancer", move || async move {
            Ok(gcp.users_count(name).await? > 0)
        })
        .await?;
        if !provisioned {
            warn!(%bootnode, "peers will likely be unable to connect to the bootnode");
            return Err(ReconcileError::LoadBalancerTimeout {
                name: bootnode,
                waited: poll.budget(),
            });
        }

        info!(
            grace = ?self.timings.load_balancer_grace,
            "load balancer provisioned, waiting before pod reset"
        );
        tokio::time::sleep(self.timings.load_balancer_grace).await;

        for component in RESTART_COMPONENTS {
            self.kubectl
                .delete_pods(&self.env, &format!("component={component}"))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fullnet_cloud::ScriptedRunner;

    fn testnet(static_ips: bool) -> TestnetConfig {
        TestnetConfig {
            chart_dir: "charts/testnet".to_string(),
            validators: 2,
            tx_nodes: 1,
            private_tx_nodes: 1,
            proxies_per_validator: vec![1, 0],
            static_ips_for_geth_nodes: static_ips,
            helm_parameters: vec!["--set geth.verbosity=3".to_string()],
        }
    }

    fn driver(runner: Arc<ScriptedRunner>, static_ips: bool, dry_run: bool) -> TestnetDriver {
        TestnetDriver::new(
            "dev",
            testnet(static_ips),
            Kubectl::new(runner.clone()),
            Helm::new(runner.clone()).with_dry_run(dry_run),
            Some(GcpIpProvider::new(runner, "us-west1")),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn reset_scales_down_wipes_upgrades_and_scales_up() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("custom-columns", "dev-validators-0-proxy\n")
            .on_err(
                "scale statefulset dev-tx-nodes-private --replicas=0",
                "Error from server (NotFound): statefulsets.apps not found",
            );

        driver(runner.clone(), true, false).reset_and_upgrade().await.unwrap();

        let calls = runner.calls();
        let pos = |p: &str| calls.iter().position(|c| c.contains(p)).unwrap();
        assert!(pos("dev-tx-nodes --replicas=0") < pos("delete pvc --selector=component=validators"));
        assert!(pos("dev-validators-0-proxy --replicas=0") < pos("delete pvc"));
        assert!(pos("deployment dev-bootnode --replicas=0") < pos("delete pvc"));
        assert!(pos("component=tx_nodes_private") < pos("helm upgrade dev charts/testnet"));
        assert!(pos("helm upgrade") < pos("dev-tx-nodes --replicas=1"));
        assert!(pos("dev-validators --replicas=2") < pos("deployment dev-bootnode --replicas=1"));
        assert!(calls.iter().any(|c| c.contains("dev-validators-1-proxy --replicas=0 ")));
        assert!(calls.iter().any(|c| c.contains("dev-tx-nodes-private --replicas=1")));
        assert!(calls.iter().any(|c| c.contains("--set geth.verbosity=3")));
    }

    #[tokio::test]
    async fn dry_run_reset_only_diffs() {
        let runner = Arc::new(ScriptedRunner::new());
        driver(runner.clone(), true, true).reset_and_upgrade().await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("helm diff upgrade --install -C 5 dev charts/testnet"));
    }

    #[tokio::test(start_paused = true)]
    async fn bootnode_poll_restarts_pods_once_provisioned() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_times("users.len()", "0", 2).on("users.len()", "1");

        driver(runner.clone(), true, false)
            .poll_for_bootnode_load_balancer()
            .await
            .unwrap();

        assert_eq!(runner.calls_matching("users.len()").len(), 3);
        assert_eq!(
            runner.calls_matching("delete pod"),
            vec![
                "kubectl delete pod --namespace dev --selector=component=validators",
                "kubectl delete pod --namespace dev --selector=component=tx_nodes",
                "kubectl delete pod --namespace dev --selector=component=proxy",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bootnode_poll_times_out() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("users.len()", "0");
        let err = driver(runner.clone(), true, false)
            .with_timings(DriverTimings {
                load_balancer_poll: PollConfig::new(4, Duration::from_secs(10)),
                ..DriverTimings::default()
            })
            .poll_for_bootnode_load_balancer()
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::LoadBalancerTimeout { .. }));
        assert!(runner.calls_matching("delete pod").is_empty());
    }

    #[tokio::test]
    async fn bootnode_poll_skipped_without_static_ips() {
        let runner = Arc::new(ScriptedRunner::new());
        driver(runner.clone(), false, false)
            .poll_for_bootnode_load_balancer()
            .await
            .unwrap();
        assert!(runner.calls().is_empty());
    }
}
