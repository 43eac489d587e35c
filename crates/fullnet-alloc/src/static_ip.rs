//! Per-replica static IP reconciliation.
//!
//! Replica `i` owns the IP named `<prefix>-<i>` (on AWS, one IP per public
//! subnet: `<prefix>-<i>-<subnet>`). A pass retires the suffix
//! `[desired, previous)` first, highest ordinal first, then registers
//! `[0, desired)` concurrently. Registration is idempotent, so a pass can
//! be re-run after any failure.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use fullnet_cloud::{CloudIpProvider, Kubectl};
use fullnet_core::{FullNodeNames, ReconcileResult, StaticIpRecord};

pub struct StaticIpAllocator {
    provider: Arc<dyn CloudIpProvider>,
    kubectl: Kubectl,
    names: FullNodeNames,
}

impl StaticIpAllocator {
    pub fn new(provider: Arc<dyn CloudIpProvider>, kubectl: Kubectl, names: FullNodeNames) -> Self {
        Self {
            provider,
            kubectl,
            names,
        }
    }

    /// Reconcile one IP per replica. Returns records indexed by ordinal.
    ///
    /// `previous` is the replica count currently live, if known; without it
    /// nothing is retired.
    pub async fn reconcile(
        &self,
        desired: u32,
        previous: Option<u32>,
    ) -> ReconcileResult<Vec<StaticIpRecord>> {
        info!(
            provider = self.provider.kind(),
            desired,
            ?previous,
            "reconciling static IPs"
        );
        if let Some(previous) = previous {
            self.retire(desired, previous, &[]).await?;
        }

        try_join_all((0..desired).map(|i| async move {
            let name = self.names.replica(i).name;
            self.provider.register_if_not_registered(&name).await
        }))
        .await
    }

    /// Reconcile one IP per replica per subnet. Returns `[replica][subnet]`.
    pub async fn reconcile_per_subnet(
        &self,
        desired: u32,
        previous: Option<u32>,
        subnets: &[String],
    ) -> ReconcileResult<Vec<Vec<StaticIpRecord>>> {
        info!(
            provider = self.provider.kind(),
            desired,
            ?previous,
            subnets = subnets.len(),
            "reconciling per-subnet static IPs"
        );
        if let Some(previous) = previous {
            self.retire(desired, previous, subnets).await?;
        }

        try_join_all((0..desired).map(|i| async move {
            let replica = self.names.replica(i);
            try_join_all(subnets.iter().map(|subnet| {
                let name = replica.scoped(subnet);
                async move { self.provider.register_if_not_registered(&name).await }
            }))
            .await
        }))
        .await
    }

    /// Release every IP the provider lists under the prefix.
    ///
    /// Names come from the cloud, not from the current subnet set, so IPs
    /// tagged with subnets that have since changed are released too.
    /// Returns the number of IPs released.
    pub async fn deallocate_all(&self) -> ReconcileResult<usize> {
        let prefix = self.names.prefix();
        let existing = self.provider.names(&prefix).await?;
        info!(
            provider = self.provider.kind(),
            %prefix,
            count = existing.len(),
            "deallocating all static IPs"
        );

        try_join_all(existing.iter().map(|name| self.release(name))).await?;
        Ok(existing.len())
    }

    /// Retire replicas `[desired, previous)`, highest ordinal first.
    async fn retire(&self, desired: u32, previous: u32, subnets: &[String]) -> ReconcileResult<()> {
        if previous <= desired {
            return Ok(());
        }
        for i in (desired..previous).rev() {
            let service = self.names.service(i);
            info!(index = i, %service, "scaling down replica endpoint");
            self.kubectl
                .delete_service(self.names.namespace(), &service, true)
                .await?;
            for name in self.ip_names(i, subnets) {
                self.release(&name).await?;
            }
        }
        Ok(())
    }

    async fn release(&self, name: &str) -> ReconcileResult<()> {
        if self.provider.requires_detach_wait() {
            debug!(%name, "waiting for static IP to detach");
            self.provider.wait_for_detach(name).await?;
        }
        self.provider.deallocate(name).await
    }

    fn ip_names(&self, index: u32, subnets: &[String]) -> Vec<String> {
        let replica = self.names.replica(index);
        if subnets.is_empty() {
            vec![replica.name]
        } else {
            subnets.iter().map(|s| replica.scoped(s)).collect()
        }
    }
}
