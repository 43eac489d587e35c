//! Resource-group-scoped Azure public IPs.
//!
//! IPs live in the AKS cluster's node resource group, which is looked up
//! once per provider and reused.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use fullnet_core::{ReconcileError, ReconcileResult, StaticIpRecord};

use super::{CloudIpProvider, first_value, non_empty_lines, prefixed};
use crate::poll::{PollConfig, poll_until};
use crate::runner::CommandRunner;

pub struct AzureIpProvider {
    runner: Arc<dyn CommandRunner>,
    resource_group: String,
    cluster_name: String,
    node_resource_group: OnceCell<String>,
    detach: PollConfig,
}

impl AzureIpProvider {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        resource_group: impl Into<String>,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            resource_group: resource_group.into(),
            cluster_name: cluster_name.into(),
            node_resource_group: OnceCell::new(),
            detach: PollConfig::detach(),
        }
    }

    pub fn with_detach_poll(mut self, detach: PollConfig) -> Self {
        self.detach = detach;
        self
    }

    /// The AKS-managed resource group holding the cluster's network resources.
    pub async fn node_resource_group(&self) -> ReconcileResult<&str> {
        self.node_resource_group
            .get_or_try_init(move || async move {
                let out = self
                    .runner
                    .run(
                        "az",
                        &[
                            "aks",
                            "show",
                            "--resource-group",
                            &self.resource_group,
                            "--name",
                            &self.cluster_name,
                            "--query",
                            "nodeResourceGroup",
                            "-o",
                            "tsv",
                        ],
                    )
                    .await?;
                first_value(&out).ok_or_else(|| {
                    ReconcileError::parse(format!(
                        "cluster {} reported no node resource group",
                        self.cluster_name
                    ))
                })
            })
            .await
            .map(String::as_str)
    }

    async fn show(&self, group: &str, name: &str, query: &str) -> ReconcileResult<Option<String>> {
        self.runner
            .run(
                "az",
                &[
                    "network",
                    "public-ip",
                    "show",
                    "--resource-group",
                    group,
                    "--name",
                    name,
                    "--query",
                    query,
                    "-o",
                    "tsv",
                ],
            )
            .await
            .map(|out| first_value(&out))
    }

    fn record(&self, group: &str, name: &str, address: Option<String>) -> StaticIpRecord {
        StaticIpRecord {
            name: name.to_string(),
            address,
            allocation_id: None,
            scope: group.to_string(),
        }
    }
}

#[async_trait]
impl CloudIpProvider for AzureIpProvider {
    fn kind(&self) -> &'static str {
        "azure"
    }

    async fn register_if_not_registered(&self, name: &str) -> ReconcileResult<StaticIpRecord> {
        let group = self.node_resource_group().await?;
        match self.show(group, name, "ipAddress").await {
            Ok(address) => {
                debug!(%name, ?address, "public IP already registered");
                return Ok(self.record(group, name, address));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!(%name, resource_group = %group, "registering public IP");
        let created = self
            .runner
            .run(
                "az",
                &[
                    "network",
                    "public-ip",
                    "create",
                    "--resource-group",
                    group,
                    "--name",
                    name,
                    "--allocation-method",
                    "Static",
                    "--sku",
                    "Standard",
                    "--query",
                    "publicIp.ipAddress",
                    "-o",
                    "tsv",
                ],
            )
            .await;
        let address = match created {
            Ok(out) => first_value(&out),
            Err(e) if e.is_already_exists() => self.show(group, name, "ipAddress").await?,
            Err(e) => return Err(e),
        };
        Ok(self.record(group, name, address))
    }

    async fn address(&self, name: &str) -> ReconcileResult<Option<String>> {
        let group = self.node_resource_group().await?;
        match self.show(group, name, "ipAddress").await {
            Ok(address) => Ok(address),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn deallocate(&self, name: &str) -> ReconcileResult<()> {
        let group = self.node_resource_group().await?;
        info!(%name, resource_group = %group, "deleting public IP");
        match self
            .runner
            .run(
                "az",
                &[
                    "network",
                    "public-ip",
                    "delete",
                    "--resource-group",
                    group,
                    "--name",
                    name,
                ],
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn names(&self, prefix: &str) -> ReconcileResult<Vec<String>> {
        let group = self.node_resource_group().await?;
        let out = self
            .runner
            .run(
                "az",
                &[
                    "network",
                    "public-ip",
                    "list",
                    "--resource-group",
                    group,
                    "--query",
                    "[].name",
                    "-o",
                    "tsv",
                ],
            )
            .await?;
        Ok(prefixed(non_empty_lines(&out), prefix))
    }

    fn requires_detach_wait(&self) -> bool {
        true
    }

    async fn wait_for_detach(&self, name: &str) -> ReconcileResult<()> {
        let group = self.node_resource_group().await?;
        let detached = poll_until(&self.detach, "public IP detach", move || async move {
            match self.show(group, name, "ipConfiguration.id").await {
                Ok(config_id) => {
                    debug!(%name, attached_to = ?config_id, "checking public IP attachment");
                    Ok(config_id.is_none())
                }
                Err(e) if e.is_not_found() => Ok(true),
                Err(e) => Err(e),
            }
        })
        .await?;

        if detached {
            Ok(())
        } else {
            Err(ReconcileError::DetachTimeout {
                name: name.to_string(),
                attempts: self.detach.max_attempts,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedRunner;

    const NOT_FOUND: &str =
        "(ResourceNotFound) The Resource 'Microsoft.Network/publicIPAddresses/x' was not found";

    fn provider() -> (Arc<ScriptedRunner>, AzureIpProvider) {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("aks show", "MC_rg_cluster_westeurope\n");
        (runner.clone(), AzureIpProvider::new(runner, "rg", "cluster"))
    }

    #[tokio::test]
    async fn node_resource_group_is_resolved_once() {
        let (runner, azure) = provider();
        runner.on("public-ip show", "20.1.2.3");
        azure.register_if_not_registered("dev-fullnodes-0").await.unwrap();
        azure.register_if_not_registered("dev-fullnodes-1").await.unwrap();
        assert_eq!(runner.calls_matching("aks show").len(), 1);
    }

    #[tokio::test]
    async fn creates_static_standard_ip_when_missing() {
        let (runner, azure) = provider();
        runner
            .on_err("public-ip show", NOT_FOUND)
            .on("public-ip create", "20.1.2.4\n");
        let rec = azure.register_if_not_registered("dev-fullnodes-2").await.unwrap();
        assert_eq!(rec.address.as_deref(), Some("20.1.2.4"));
        assert_eq!(rec.scope, "MC_rg_cluster_westeurope");
        let create = &runner.calls_matching("public-ip create")[0];
        assert!(create.contains("--allocation-method Static --sku Standard"));
        assert!(create.contains("--resource-group MC_rg_cluster_westeurope"));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_ip_configuration_is_cleared() {
        let (runner, azure) = provider();
        runner
            .on_times(
                "ipConfiguration.id",
                "/subscriptions/s/resourceGroups/mc/providers/Microsoft.Network/loadBalancers/kubernetes\n",
                2,
            )
            .on("ipConfiguration.id", "");
        azure.wait_for_detach("dev-fullnodes-3").await.unwrap();
        assert_eq!(runner.calls_matching("ipConfiguration.id").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn detach_wait_times_out_after_ten_checks() {
        let (runner, azure) = provider();
        runner.on("ipConfiguration.id", "/subscriptions/s/lb");
        let err = azure.wait_for_detach("dev-fullnodes-3").await.unwrap_err();
        assert!(matches!(err, ReconcileError::DetachTimeout { attempts: 10, .. }));
        assert_eq!(runner.calls_matching("ipConfiguration.id").len(), 10);
    }

    #[tokio::test]
    async fn delete_tolerates_not_found() {
        let (runner, azure) = provider();
        runner.on_err("public-ip delete", NOT_FOUND);
        azure.deallocate("dev-fullnodes-3").await.unwrap();
        assert!(azure.requires_detach_wait());
    }
}
