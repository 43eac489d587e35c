//! Region-scoped GCP compute addresses.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use fullnet_core::{ReconcileError, ReconcileResult, StaticIpRecord};

use super::{CloudIpProvider, first_value, non_empty_lines, prefixed};
use crate::runner::CommandRunner;

pub struct GcpIpProvider {
    runner: Arc<dyn CommandRunner>,
    region: String,
    project: Option<String>,
    verbose: bool,
}

impl GcpIpProvider {
    pub fn new(runner: Arc<dyn CommandRunner>, region: impl Into<String>) -> Self {
        Self {
            runner,
            region: region.into(),
            project: None,
            verbose: false,
        }
    }

    /// Pin every gcloud call to `project` instead of the active configuration's.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// In verbose mode deletions are logged instead of executed.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Number of forwarding rules using `name`; non-zero once a load balancer picked it up.
    pub async fn users_count(&self, name: &str) -> ReconcileResult<u32> {
        let out = self
            .gcloud(&[
                "compute",
                "addresses",
                "describe",
                name,
                "--region",
                &self.region,
                "--format=value(users.len())",
            ])
            .await?;
        match first_value(&out) {
            None => Ok(0),
            Some(v) => v
                .parse()
                .map_err(|e| ReconcileError::parse(format!("users of address {name}: {v:?}: {e}"))),
        }
    }

    async fn gcloud(&self, args: &[&str]) -> ReconcileResult<String> {
        let mut args = args.to_vec();
        if let Some(project) = &self.project {
            args.extend(["--project", project.as_str()]);
        }
        self.runner.run("gcloud", &args).await
    }

    fn record(&self, name: &str, address: Option<String>) -> StaticIpRecord {
        StaticIpRecord {
            name: name.to_string(),
            address,
            allocation_id: None,
            scope: self.region.clone(),
        }
    }
}

#[async_trait]
impl CloudIpProvider for GcpIpProvider {
    fn kind(&self) -> &'static str {
        "gcp"
    }

    async fn register_if_not_registered(&self, name: &str) -> ReconcileResult<StaticIpRecord> {
        if let Some(address) = self.address(name).await? {
            debug!(%name, %address, "static IP already registered");
            return Ok(self.record(name, Some(address)));
        }

        info!(%name, region = %self.region, "registering static IP");
        match self
            .gcloud(&["compute", "addresses", "create", name, "--region", &self.region])
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => debug!(%name, "static IP created concurrently"),
            Err(e) => return Err(e),
        }
        let address = self.address(name).await?;
        Ok(self.record(name, address))
    }

    async fn address(&self, name: &str) -> ReconcileResult<Option<String>> {
        match self
            .gcloud(&[
                "compute",
                "addresses",
                "describe",
                name,
                "--region",
                &self.region,
                "--format=value(address)",
            ])
            .await
        {
            Ok(out) => Ok(first_value(&out)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn deallocate(&self, name: &str) -> ReconcileResult<()> {
        if self.verbose {
            info!(%name, "static IP would be deleted");
            return Ok(());
        }
        info!(%name, region = %self.region, "deleting static IP");
        match self
            .gcloud(&["compute", "addresses", "delete", name, "--region", &self.region, "-q"])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn names(&self, prefix: &str) -> ReconcileResult<Vec<String>> {
        let filter = format!("--filter=name~'^{prefix}-' AND region:( {} )", self.region);
        let out = self
            .gcloud(&["compute", "addresses", "list", &filter, "--format=value(name)"])
            .await?;
        Ok(prefixed(non_empty_lines(&out), prefix))
    }
}
