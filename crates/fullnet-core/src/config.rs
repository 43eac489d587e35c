//! fullnet.toml configuration parser.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, ReconcileResult};
use crate::types::{DeploymentConfig, FullNodeNames};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullNetConfig {
    /// Environment name; doubles as the Kubernetes namespace.
    pub env: String,
    pub deployment: DeploymentConfig,
    pub chart: ChartConfig,
    pub cluster: ClusterConfig,
    pub testnet: Option<TestnetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    pub dir: String,
    pub image_repository: String,
    pub image_tag: String,
    pub network_id: u64,
    pub network_name: String,
    #[serde(default)]
    pub metrics: bool,
    pub gstorage_data_bucket: Option<String>,
}

/// Backend selection. The `provider` key picks the variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "provider", rename_all = "kebab-case")]
pub enum ClusterConfig {
    Gcp(GcpClusterConfig),
    Azure(AzureClusterConfig),
    Aws(AwsClusterConfig),
    NodePort,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GcpClusterConfig {
    /// Passed as `--project` to every gcloud call.
    pub project: String,
    pub zone: String,
    #[serde(default)]
    pub create_neg: bool,
}

impl GcpClusterConfig {
    /// Region of the cluster zone: `us-west1-a` -> `us-west1`.
    pub fn region(&self) -> String {
        match self.zone.rsplit_once('-') {
            Some((region, suffix)) if suffix.len() == 1 => region.to_string(),
            _ => self.zone.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AzureClusterConfig {
    pub resource_group: String,
    pub cluster_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AwsClusterConfig {
    pub cluster_name: String,
    /// Value of the `resourceGroupTag` tag put on every Elastic IP.
    pub resource_group_tag: String,
}

/// Topology of the full testnet chart, used by the reset/upgrade driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestnetConfig {
    pub chart_dir: String,
    pub validators: u32,
    pub tx_nodes: u32,
    #[serde(default)]
    pub private_tx_nodes: u32,
    /// Proxy count per validator ordinal; empty means no proxies.
    #[serde(default)]
    pub proxies_per_validator: Vec<u32>,
    #[serde(default)]
    pub static_ips_for_geth_nodes: bool,
    /// Extra `--set` parameters passed through to the testnet chart.
    #[serde(default)]
    pub helm_parameters: Vec<String>,
}

impl FullNetConfig {
    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> ReconcileResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ReconcileResult<Self> {
        let config: FullNetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn names(&self) -> FullNodeNames {
        FullNodeNames::new(&self.env)
    }

    /// Reject configs that would fail half-way through a pass.
    pub fn validate(&self) -> ReconcileResult<()> {
        if self.env.is_empty()
            || !self
                .env
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ReconcileError::config(format!(
                "env {:?} must be a non-empty DNS label (lowercase letters, digits, '-')",
                self.env
            )));
        }

        let d = &self.deployment;
        if d.rolling_update_partition > d.replicas {
            return Err(ReconcileError::config(format!(
                "rolling_update_partition {} exceeds replicas {}",
                d.rolling_update_partition, d.replicas
            )));
        }
        if let Some(keys) = &d.node_key_generation_info {
            if keys.mnemonic.trim().is_empty() {
                return Err(ReconcileError::config("node_key_generation.mnemonic is empty"));
            }
            if d.replicas == 0 {
                return Err(ReconcileError::config(
                    "node_key_generation is set but replicas is 0",
                ));
            }
        }

        require("chart.dir", &self.chart.dir)?;
        require("chart.image_repository", &self.chart.image_repository)?;
        require("chart.image_tag", &self.chart.image_tag)?;

        match &self.cluster {
            ClusterConfig::Gcp(gcp) => {
                require("cluster.project", &gcp.project)?;
                require("cluster.zone", &gcp.zone)?;
            }
            ClusterConfig::Azure(azure) => {
                require("cluster.resource_group", &azure.resource_group)?;
                require("cluster.cluster_name", &azure.cluster_name)?;
            }
            ClusterConfig::Aws(aws) => {
                require("cluster.cluster_name", &aws.cluster_name)?;
                require("cluster.resource_group_tag", &aws.resource_group_tag)?;
            }
            ClusterConfig::NodePort => {}
        }

        if let Some(testnet) = &self.testnet {
            require("testnet.chart_dir", &testnet.chart_dir)?;
            if !testnet.proxies_per_validator.is_empty()
                && testnet.proxies_per_validator.len() != testnet.validators as usize
            {
                return Err(ReconcileError::config(format!(
                    "testnet.proxies_per_validator has {} entries for {} validators",
                    testnet.proxies_per_validator.len(),
                    testnet.validators
                )));
            }
        }

        Ok(())
    }
}

fn require(key: &str, value: &str) -> ReconcileResult<()> {
    if value.trim().is_empty() {
        return Err(ReconcileError::config(format!("{key} is required")));
    }
    Ok(())
}
