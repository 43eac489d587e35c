//! Full-node release lifecycle.
//!
//! `FullNodeDeployer` owns the parts every backend shares: the base chart
//! parameters, install/upgrade/remove sequencing and enode derivation.
//! Endpoint allocation is delegated to a `FullNodeBackend` picked from the
//! cluster config.
//!
//! Lifecycle of one deployer:
//!
//! ```text
//! Uninstalled ──install──▶ Installed ──upgrade──▶ Upgraded ──remove──▶ Removed
//!                             │                      ▲
//!                             └──upgrade(reset)──▶ ScaledToZero
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{info, warn};

use fullnet_cloud::helm::{set, set_list, set_string};
use fullnet_cloud::{ChartRelease, CommandRunner, Helm, Kubectl, WorkloadKind};
use fullnet_core::{
    ChartConfig, DeploymentConfig, FullNetConfig, FullNodeNames, ReconcileError, ReconcileResult,
};

use crate::backend::backend_for;
use crate::enode::NodeKey;

/// Label selecting the full-node PersistentVolumeClaims.
const PVC_LABEL: &str = "component";

/// Everything a backend needs for one reconciliation pass.
#[derive(Clone)]
pub struct DeployContext {
    pub names: FullNodeNames,
    pub deployment: DeploymentConfig,
    pub kubectl: Kubectl,
    /// Replica count of the live StatefulSet before this pass, if any.
    pub previous_replicas: Option<u32>,
}

/// Backend-specific endpoint handling.
#[async_trait]
pub trait FullNodeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Allocate endpoints for `ctx.deployment.replicas` and return the chart flags for them.
    async fn additional_helm_parameters(&self, ctx: &DeployContext) -> ReconcileResult<Vec<String>>;

    /// Release every endpoint of the release.
    async fn deallocate_all_ips(&self, ctx: &DeployContext) -> ReconcileResult<()>;

    /// Externally reachable IP of replica `index`.
    async fn full_node_ip(&self, ctx: &DeployContext, index: u32) -> ReconcileResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployerPhase {
    Uninstalled,
    Installed,
    ScaledToZero,
    Upgraded,
    Removed,
}

/// Process-wide switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    /// Diff chart changes instead of applying them.
    pub helm_dry_run: bool,
    /// Log static IP deletions instead of executing them (GCP).
    pub verbose: bool,
}

pub struct FullNodeDeployer {
    backend: Box<dyn FullNodeBackend>,
    names: FullNodeNames,
    deployment: DeploymentConfig,
    chart: ChartConfig,
    kubectl: Kubectl,
    helm: Helm,
    phase: DeployerPhase,
}

impl FullNodeDeployer {
    pub fn new(
        backend: Box<dyn FullNodeBackend>,
        names: FullNodeNames,
        deployment: DeploymentConfig,
        chart: ChartConfig,
        kubectl: Kubectl,
        helm: Helm,
    ) -> Self {
        Self {
            backend,
            names,
            deployment,
            chart,
            kubectl,
            helm,
            phase: DeployerPhase::Uninstalled,
        }
    }

    /// Build a deployer for the configured cluster.
    pub fn from_config(
        config: &FullNetConfig,
        runner: Arc<dyn CommandRunner>,
        options: DeployOptions,
    ) -> Self {
        let backend = backend_for(&config.cluster, runner.clone(), options.verbose);
        Self::new(
            backend,
            config.names(),
            config.deployment.clone(),
            config.chart.clone(),
            Kubectl::new(runner.clone()),
            Helm::new(runner).with_dry_run(options.helm_dry_run),
        )
    }

    pub fn phase(&self) -> DeployerPhase {
        self.phase
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Install the release. Returns enode URLs when node keys are configured.
    pub async fn install_chart(&mut self) -> ReconcileResult<Option<Vec<String>>> {
        let namespace = self.names.namespace().to_string();
        info!(%namespace, backend = self.backend.name(), "installing full nodes");
        self.kubectl.ensure_namespace(&namespace).await?;

        let ctx = self.context().await?;
        let chart = self.chart_release(&ctx).await?;
        self.helm.install(&chart).await?;
        self.phase = DeployerPhase::Installed;

        if self.deployment.node_key_generation_info.is_none() {
            return Ok(None);
        }
        self.enodes_in(&ctx).await.map(Some)
    }

    /// Upgrade the release, optionally wiping chain data first.
    ///
    /// The StatefulSet is always scaled to the desired count afterwards:
    /// helm skips an unchanged replica count even when the live one differs.
    pub async fn upgrade_chart(&mut self, reset: bool) -> ReconcileResult<()> {
        let namespace = self.names.namespace().to_string();
        let statefulset = self.names.statefulset();
        let replicas = self.deployment.replicas;
        info!(%namespace, backend = self.backend.name(), reset, replicas, "upgrading full nodes");

        let ctx = self.context().await?;
        let chart = self.chart_release(&ctx).await?;

        if self.helm.dry_run() {
            return self.helm.upgrade(&chart).await;
        }

        if reset {
            self.kubectl
                .scale(&namespace, WorkloadKind::StatefulSet, &statefulset, 0, false)
                .await?;
            self.kubectl
                .delete_pvcs(&namespace, PVC_LABEL, self.names.pvc_component())
                .await?;
            self.phase = DeployerPhase::ScaledToZero;
        }

        self.helm.upgrade(&chart).await?;
        self.kubectl
            .scale(&namespace, WorkloadKind::StatefulSet, &statefulset, replicas, false)
            .await?;
        self.phase = DeployerPhase::Upgraded;
        Ok(())
    }

    /// Remove the release, its volumes and every endpoint.
    pub async fn remove_chart(&mut self) -> ReconcileResult<()> {
        let namespace = self.names.namespace().to_string();
        info!(%namespace, backend = self.backend.name(), "removing full nodes");

        self.helm.uninstall(&namespace, &self.names.release()).await;
        self.kubectl
            .delete_pvcs(&namespace, PVC_LABEL, self.names.pvc_component())
            .await?;
        let ctx = self.context().await?;
        self.backend.deallocate_all_ips(&ctx).await?;
        self.phase = DeployerPhase::Removed;
        Ok(())
    }

    /// Enode URLs of the configured replicas.
    pub async fn enodes(&self) -> ReconcileResult<Vec<String>> {
        let ctx = self.context().await?;
        self.enodes_in(&ctx).await
    }

    /// Base chart parameters followed by the backend's.
    pub async fn helm_parameters(&self, ctx: &DeployContext) -> ReconcileResult<Vec<String>> {
        let mut params = self.base_helm_parameters()?;
        params.extend(self.backend.additional_helm_parameters(ctx).await?);
        Ok(params)
    }

    fn base_helm_parameters(&self) -> ReconcileResult<Vec<String>> {
        let d = &self.deployment;
        let c = &self.chart;
        let mut params = vec![
            set("namespace", self.names.namespace()),
            set("replicaCount", d.replicas),
            set("geth.updateStrategy.rollingUpdate.partition", d.rolling_update_partition),
            set("storage.size", format!("{}Gi", d.disk_size_gb)),
            set("geth.expose_rpc_externally", false),
            set("geth.gcmode", &d.gc_mode),
            set("geth.image.repository", &c.image_repository),
            set("geth.image.tag", &c.image_tag),
            set_string("geth.rpc_apis", d.rpc_apis.split(',').collect::<Vec<_>>().join("\\,")),
            set("metrics", c.metrics),
            set("genesis.networkId", c.network_id),
            set("genesis.network", &c.network_name),
            set("geth.use_gstorage_data", d.use_gstore_data),
            set("geth.ws_port", d.ws_port),
        ];
        if let Some(bucket) = &c.gstorage_data_bucket {
            params.push(set("geth.gstorage_data_bucket", bucket));
        }
        if let Some(info) = &d.node_key_generation_info {
            let keys: Vec<String> = NodeKey::derive_all(info, d.replicas)?
                .iter()
                .map(NodeKey::private_key_hex)
                .collect();
            params.push(set_list("geth.node_keys", &keys));
        }
        Ok(params)
    }

    async fn chart_release(&self, ctx: &DeployContext) -> ReconcileResult<ChartRelease> {
        Ok(ChartRelease {
            namespace: self.names.namespace().to_string(),
            release: self.names.release(),
            chart_dir: self.chart.dir.clone(),
            parameters: self.helm_parameters(ctx).await?,
        })
    }

    async fn context(&self) -> ReconcileResult<DeployContext> {
        let previous_replicas = self
            .kubectl
            .statefulset_replicas(self.names.namespace(), &self.names.statefulset())
            .await?;
        if let Some(previous) = previous_replicas {
            if previous > self.deployment.replicas {
                if self.helm.dry_run() {
                    info!(
                        previous,
                        desired = self.deployment.replicas,
                        "dry run, surplus endpoints are kept"
                    );
                } else {
                    warn!(
                        previous,
                        desired = self.deployment.replicas,
                        "scaling down, surplus endpoints will be released"
                    );
                }
            }
        }
        // Backends retire endpoints above `previous_replicas`; a dry run must not.
        let previous_replicas = previous_replicas.filter(|_| !self.helm.dry_run());
        Ok(DeployContext {
            names: self.names.clone(),
            deployment: self.deployment.clone(),
            kubectl: self.kubectl.clone(),
            previous_replicas,
        })
    }

    async fn enodes_in(&self, ctx: &DeployContext) -> ReconcileResult<Vec<String>> {
        let info = self
            .deployment
            .node_key_generation_info
            .as_ref()
            .ok_or_else(|| ReconcileError::config("node_key_generation is not configured"))?;
        let keys = NodeKey::derive_all(info, self.deployment.replicas)?;

        let backend = self.backend.as_ref();
        try_join_all(keys.iter().zip(0..).map(|(key, i)| async move {
            let ip = backend.full_node_ip(ctx, i).await?;
            Ok::<_, ReconcileError>(key.enode(&ip))
        }))
        .await
    }
}
