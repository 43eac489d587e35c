//! `kubectl` adapter.
//!
//! Thin typed wrapper over the Kubernetes operations a reconciliation
//! pass needs. JSON output is decoded into `k8s-openapi` types here so
//! callers never scrape text.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, Service};
use serde::Deserialize;
use tracing::{debug, info, warn};

use fullnet_core::{ReconcileError, ReconcileResult};

use crate::runner::CommandRunner;

/// Scalable workload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    StatefulSet,
    Deployment,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatefulSet => "statefulset",
            Self::Deployment => "deployment",
        }
    }
}

/// `kubectl get ... -o json` list envelope (`kind: List`).
#[derive(Deserialize)]
struct ItemList<T> {
    items: Vec<T>,
}

/// Kubernetes operations over an external `kubectl`.
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
}

impl Kubectl {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// Create the namespace unless it exists.
    pub async fn ensure_namespace(&self, namespace: &str) -> ReconcileResult<()> {
        match self.runner.run("kubectl", &["get", "namespace", namespace]).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                info!(%namespace, "creating namespace");
                self.runner
                    .run("kubectl", &["create", "namespace", namespace])
                    .await
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Scale a workload. With `allow_fail`, a failure is logged and ignored.
    pub async fn scale(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
        replicas: u32,
        allow_fail: bool,
    ) -> ReconcileResult<()> {
        let replicas_arg = format!("--replicas={replicas}");
        let args = [
            "scale",
            kind.as_str(),
            name,
            replicas_arg.as_str(),
            "--namespace",
            namespace,
        ];
        info!(%namespace, kind = kind.as_str(), %name, replicas, "scaling");
        if allow_fail {
            self.runner.run_best_effort("kubectl", &args).await;
            return Ok(());
        }
        self.runner.run("kubectl", &args).await.map(|_| ())
    }

    /// Current `spec.replicas` of a StatefulSet, or `None` if it does not exist.
    pub async fn statefulset_replicas(
        &self,
        namespace: &str,
        name: &str,
    ) -> ReconcileResult<Option<u32>> {
        let out = match self
            .runner
            .run(
                "kubectl",
                &[
                    "get",
                    "statefulset",
                    name,
                    "--namespace",
                    namespace,
                    "-o",
                    "jsonpath={.spec.replicas}",
                ],
            )
            .await
        {
            Ok(out) => out,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let trimmed = out.trim();
        if trimmed.is_empty() {
            return Ok(Some(0));
        }
        trimmed.parse::<u32>().map(Some).map_err(|e| {
            ReconcileError::parse(format!("replicas of statefulset {name}: {trimmed:?}: {e}"))
        })
    }

    /// Names of workloads of `kind` matching a label selector.
    pub async fn names_by_selector(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        selector: &str,
    ) -> ReconcileResult<Vec<String>> {
        let selector_arg = format!("--selector={selector}");
        let out = self
            .runner
            .run(
                "kubectl",
                &[
                    "get",
                    kind.as_str(),
                    selector_arg.as_str(),
                    "--no-headers",
                    "-o",
                    "custom-columns=:metadata.name",
                    "--namespace",
                    namespace,
                ],
            )
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Delete PersistentVolumeClaims labelled `label=value`. Missing is fine.
    pub async fn delete_pvcs(&self, namespace: &str, label: &str, value: &str) -> ReconcileResult<()> {
        info!(%namespace, %label, %value, "deleting persistent volume claims");
        let selector_arg = format!("--selector={label}={value}");
        match self
            .runner
            .run(
                "kubectl",
                &["delete", "pvc", selector_arg.as_str(), "--namespace", namespace],
            )
            .await
        {
            Ok(out) => {
                debug!(output = %out.trim(), "pvc deletion");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Delete a Service. Missing is fine; with `allow_fail` any error is.
    pub async fn delete_service(
        &self,
        namespace: &str,
        name: &str,
        allow_fail: bool,
    ) -> ReconcileResult<()> {
        info!(%namespace, service = %name, "deleting service");
        match self
            .runner
            .run("kubectl", &["delete", "service", name, "--namespace", namespace])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) if allow_fail => {
                warn!(error = %e, service = %name, "service deletion failed, continuing");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch a Service, or `None` if it does not exist yet.
    pub async fn get_service(&self, namespace: &str, name: &str) -> ReconcileResult<Option<Service>> {
        let out = match self
            .runner
            .run(
                "kubectl",
                &["get", "service", name, "--namespace", namespace, "-o", "json"],
            )
            .await
        {
            Ok(out) => out,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_str(&out)
            .map(Some)
            .map_err(|e| ReconcileError::parse(format!("service {name}: {e}")))
    }

    /// Every NodePort in use by any Service in the cluster, sorted ascending.
    pub async fn used_node_ports(&self) -> ReconcileResult<Vec<i32>> {
        let out = self
            .runner
            .run("kubectl", &["get", "services", "--all-namespaces", "-o", "json"])
            .await?;
        let list: ItemList<Service> = serde_json::from_str(&out)
            .map_err(|e| ReconcileError::parse(format!("service list: {e}")))?;

        let mut ports: Vec<i32> = list
            .items
            .iter()
            .filter_map(|svc| svc.spec.as_ref())
            .filter_map(|spec| spec.ports.as_ref())
            .flatten()
            .filter_map(|p| p.node_port)
            .collect();
        ports.sort_unstable();
        ports.dedup();
        Ok(ports)
    }

    /// Delete every pod matching a label selector.
    pub async fn delete_pods(&self, namespace: &str, selector: &str) -> ReconcileResult<()> {
        info!(%namespace, %selector, "deleting pods");
        let selector_arg = format!("--selector={selector}");
        self.runner
            .run(
                "kubectl",
                &["delete", "pod", "--namespace", namespace, selector_arg.as_str()],
            )
            .await
            .map(|_| ())
    }

    /// External IP of the node a pod is scheduled on.
    pub async fn node_external_ip_for_pod(&self, namespace: &str, pod: &str) -> ReconcileResult<String> {
        let node_name = self
            .runner
            .run(
                "kubectl",
                &[
                    "get",
                    "pod",
                    pod,
                    "--namespace",
                    namespace,
                    "-o",
                    "jsonpath={.spec.nodeName}",
                ],
            )
            .await?;
        let node_name = node_name.trim();
        if node_name.is_empty() {
            return Err(ReconcileError::parse(format!("pod {pod} is not scheduled on a node")));
        }

        let out = self
            .runner
            .run("kubectl", &["get", "node", node_name, "-o", "json"])
            .await?;
        let node: Node = serde_json::from_str(&out)
            .map_err(|e| ReconcileError::parse(format!("node {node_name}: {e}")))?;

        node.status
            .and_then(|s| s.addresses)
            .unwrap_or_default()
            .into_iter()
            .find(|a| a.type_ == "ExternalIP")
            .map(|a| a.address)
            .ok_or_else(|| ReconcileError::parse(format!("node {node_name} has no ExternalIP")))
    }
}
