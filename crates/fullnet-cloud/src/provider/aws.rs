//! Subnet-scoped AWS Elastic IPs.
//!
//! Elastic IPs carry no name, so each allocation is tagged with
//! `IPNodeName=<name>` and `resourceGroupTag=<tag>` and found again by
//! those tags.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use fullnet_core::{ReconcileError, ReconcileResult, StaticIpRecord};

use super::{CloudIpProvider, first_value, non_empty_lines, prefixed};
use crate::runner::CommandRunner;

const NAME_TAG: &str = "IPNodeName";
const GROUP_TAG: &str = "resourceGroupTag";

pub struct AwsIpProvider {
    runner: Arc<dyn CommandRunner>,
    cluster_name: String,
    resource_group_tag: String,
    public_subnets: OnceCell<Vec<String>>,
}

impl AwsIpProvider {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cluster_name: impl Into<String>,
        resource_group_tag: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            cluster_name: cluster_name.into(),
            resource_group_tag: resource_group_tag.into(),
            public_subnets: OnceCell::new(),
        }
    }

    /// Public subnets of the cluster, as tagged for ELB placement.
    ///
    /// Looked up once per provider.
    pub async fn public_subnets(&self) -> ReconcileResult<&[String]> {
        self.public_subnets
            .get_or_try_init(move || async move {
                let cluster_filter = format!(
                    "Name=tag-key,Values=kubernetes.io/cluster/{}",
                    self.cluster_name
                );
                let out = self
                    .runner
                    .run(
                        "aws",
                        &[
                            "ec2",
                            "describe-subnets",
                            "--filters",
                            &cluster_filter,
                            "Name=tag-key,Values=kubernetes.io/role/elb",
                            "--query",
                            "Subnets[*].SubnetId",
                            "--output",
                            "json",
                        ],
                    )
                    .await?;
                serde_json::from_str(out.trim()).map_err(|e| {
                    ReconcileError::parse(format!("subnets of {}: {e}", self.cluster_name))
                })
            })
            .await
            .map(Vec::as_slice)
    }

    /// Public IP behind an allocation ID.
    pub async fn public_ip(&self, allocation_id: &str) -> ReconcileResult<String> {
        let out = self
            .runner
            .run(
                "aws",
                &[
                    "ec2",
                    "describe-addresses",
                    "--allocation-ids",
                    allocation_id,
                    "--query",
                    "Addresses[*].[PublicIp]",
                    "--output",
                    "text",
                ],
            )
            .await?;
        first_value(&out)
            .ok_or_else(|| ReconcileError::parse(format!("allocation {allocation_id} has no public IP")))
    }

    /// `(allocation_id, public_ip)` of the Elastic IP tagged `name`, if any.
    async fn lookup(&self, name: &str) -> ReconcileResult<Option<(String, Option<String>)>> {
        let name_filter = format!("Name=tag:{NAME_TAG},Values={name}");
        let group_filter = format!("Name=tag:{GROUP_TAG},Values={}", self.resource_group_tag);
        let out = self
            .runner
            .run(
                "aws",
                &[
                    "ec2",
                    "describe-addresses",
                    "--filters",
                    &name_filter,
                    &group_filter,
                    "--query",
                    "Addresses[*].[AllocationId,PublicIp]",
                    "--output",
                    "text",
                ],
            )
            .await?;
        Ok(non_empty_lines(&out).next().map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next().unwrap_or_default().to_string();
            let ip = fields.next().map(str::to_string);
            (id, ip)
        }))
    }

    fn record(&self, name: &str, allocation_id: String, address: Option<String>) -> StaticIpRecord {
        StaticIpRecord {
            name: name.to_string(),
            address,
            allocation_id: Some(allocation_id),
            scope: self.resource_group_tag.clone(),
        }
    }
}

#[async_trait]
impl CloudIpProvider for AwsIpProvider {
    fn kind(&self) -> &'static str {
        "aws"
    }

    async fn register_if_not_registered(&self, name: &str) -> ReconcileResult<StaticIpRecord> {
        if let Some((id, address)) = self.lookup(name).await? {
            debug!(%name, allocation_id = %id, "elastic IP already registered");
            return Ok(self.record(name, id, address));
        }

        info!(%name, tag = %self.resource_group_tag, "allocating elastic IP");
        let tags = format!(
            "ResourceType=elastic-ip,Tags=[{{Key={GROUP_TAG},Value={}}},{{Key={NAME_TAG},Value={name}}}]",
            self.resource_group_tag
        );
        let out = self
            .runner
            .run(
                "aws",
                &[
                    "ec2",
                    "allocate-address",
                    "--domain",
                    "vpc",
                    "--tag-specifications",
                    &tags,
                    "--query",
                    "[AllocationId,PublicIp]",
                    "--output",
                    "text",
                ],
            )
            .await?;
        let mut fields = out.split_whitespace();
        let id = fields
            .next()
            .ok_or_else(|| ReconcileError::parse(format!("allocate-address for {name} returned no ID")))?
            .to_string();
        let address = fields.next().map(str::to_string);
        Ok(self.record(name, id, address))
    }

    async fn address(&self, name: &str) -> ReconcileResult<Option<String>> {
        Ok(self.lookup(name).await?.and_then(|(_, address)| address))
    }

    async fn deallocate(&self, name: &str) -> ReconcileResult<()> {
        let Some((id, _)) = self.lookup(name).await? else {
            debug!(%name, "elastic IP already released");
            return Ok(());
        };
        info!(%name, allocation_id = %id, "releasing elastic IP");
        match self
            .runner
            .run("aws", &["ec2", "release-address", "--allocation-id", &id])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn names(&self, prefix: &str) -> ReconcileResult<Vec<String>> {
        let group_filter = format!("Name=tag:{GROUP_TAG},Values={}", self.resource_group_tag);
        let name_key_filter = format!("Name=tag-key,Values={NAME_TAG}");
        let query = format!("Addresses[*].Tags[?Key=='{NAME_TAG}'].Value[]");
        let out = self
            .runner
            .run(
                "aws",
                &[
                    "ec2",
                    "describe-addresses",
                    "--filters",
                    &group_filter,
                    &name_key_filter,
                    "--query",
                    &query,
                    "--output",
                    "text",
                ],
            )
            .await?;
        Ok(prefixed(out.split_whitespace(), prefix))
    }
}
