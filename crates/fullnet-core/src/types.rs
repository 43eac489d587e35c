//! Domain types for full-node endpoint reconciliation.
//!
//! Per-replica identity is a dense ordinal `[0, replicas)`. The same
//! ordinal joins the StatefulSet pod, its Kubernetes Service, the cloud
//! IP resource name and (on AWS) the per-subnet allocation IDs.

use serde::{Deserialize, Serialize};

/// Lowest port in the Kubernetes NodePort pool.
pub const MIN_NODE_PORT: i32 = 30000;

/// Highest port in the Kubernetes NodePort pool.
pub const MAX_NODE_PORT: i32 = 32767;

/// devp2p port advertised in enode URLs.
pub const ENODE_PORT: u16 = 30303;

// ── Deployment ─────────────────────────────────────────────────────

/// Mnemonic-based node key derivation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeKeyGenerationInfo {
    pub mnemonic: String,
    /// First derivation level; the replica ordinal is the second.
    pub derivation_index: u32,
}

/// Desired state of a full-node StatefulSet for one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentConfig {
    pub replicas: u32,
    pub disk_size_gb: u32,
    #[serde(default)]
    pub rolling_update_partition: u32,
    /// Comma-separated RPC API whitelist, e.g. "eth,net,web3".
    pub rpc_apis: String,
    /// Geth garbage-collection mode ("full" or "archive").
    pub gc_mode: String,
    #[serde(default)]
    pub use_gstore_data: bool,
    pub ws_port: u16,
    #[serde(default, rename = "node_key_generation")]
    pub node_key_generation_info: Option<NodeKeyGenerationInfo>,
}

// ── Naming ─────────────────────────────────────────────────────────

/// A logical per-replica identity: `<prefix>-<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedResource {
    pub name: String,
    pub index: u32,
}

impl NamedResource {
    pub fn new(prefix: &str, index: u32) -> Self {
        Self {
            name: format!("{prefix}-{index}"),
            index,
        }
    }

    /// Name of a sub-resource scoped to this replica, e.g. one per subnet.
    pub fn scoped(&self, suffix: &str) -> String {
        format!("{}-{}", self.name, suffix)
    }
}

/// Names derived from an environment for the full-node release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullNodeNames {
    env: String,
}

impl FullNodeNames {
    pub fn new(env: &str) -> Self {
        Self {
            env: env.to_string(),
        }
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn namespace(&self) -> &str {
        &self.env
    }

    /// Helm release name; also the StatefulSet name.
    pub fn release(&self) -> String {
        format!("{}-fullnodes", self.env)
    }

    pub fn statefulset(&self) -> String {
        self.release()
    }

    /// Prefix shared by per-replica Services, pods and static IP names.
    pub fn prefix(&self) -> String {
        self.release()
    }

    pub fn replica(&self, index: u32) -> NamedResource {
        NamedResource::new(&self.prefix(), index)
    }

    /// Per-replica Service name.
    pub fn service(&self, index: u32) -> String {
        self.replica(index).name
    }

    /// Label value of the full-node PersistentVolumeClaims.
    pub fn pvc_component(&self) -> &'static str {
        "celo-fullnode"
    }
}

// ── Endpoints ──────────────────────────────────────────────────────

/// A cloud static IP resource as reported by its provider.
///
/// The provider is authoritative; nothing here is cached between passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIpRecord {
    pub name: String,
    pub address: Option<String>,
    /// AWS Elastic IP allocation ID; `None` on GCP and Azure.
    pub allocation_id: Option<String>,
    /// Region, resource group, or resource-group tag the IP lives in.
    pub scope: String,
}

/// NodePort assigned to a per-replica Service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePortAssignment {
    pub service_name: String,
    pub port: Option<i32>,
}

/// AWS Elastic IP allocation IDs, indexed `[replica][subnet]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationIdsPerNode(pub Vec<Vec<String>>);

impl AllocationIdsPerNode {
    /// Flatten into the Helm list form: `\,` within a replica, `,` across.
    pub fn helm_value(&self) -> String {
        self.0
            .iter()
            .map(|ids| ids.join("\\,"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn replicas(&self) -> usize {
        self.0.len()
    }
}

impl From<&[Vec<StaticIpRecord>]> for AllocationIdsPerNode {
    fn from(records: &[Vec<StaticIpRecord>]) -> Self {
        Self(
            records
                .iter()
                .map(|per_subnet| {
                    per_subnet
                        .iter()
                        .filter_map(|r| r.allocation_id.clone())
                        .collect()
                })
                .collect(),
        )
    }
}
