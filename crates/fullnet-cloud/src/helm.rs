//! `helm` adapter.
//!
//! Chart parameters travel as `--set key=value` strings. Each one is split
//! at its first space into a flag and a value, so escaped commas (`\,`)
//! reach helm literally without a shell in between.

use std::sync::Arc;

use tracing::{info, warn};

use fullnet_core::ReconcileResult;

use crate::runner::CommandRunner;

/// Timeout passed to `helm upgrade`; long-running geth rollouts are normal.
const UPGRADE_TIMEOUT: &str = "120h";

/// Context lines shown by `helm diff` in dry-run mode.
const DIFF_CONTEXT: &str = "5";

/// One Helm release of a local chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRelease {
    pub namespace: String,
    pub release: String,
    pub chart_dir: String,
    pub parameters: Vec<String>,
}

/// `--set key=value`
pub fn set(key: &str, value: impl std::fmt::Display) -> String {
    format!("--set {key}={value}")
}

/// `--set-string key=value`, for values helm must not coerce.
pub fn set_string(key: &str, value: impl std::fmt::Display) -> String {
    format!("--set-string {key}={value}")
}

/// `--set key={a,b,c}`
pub fn set_list<S: AsRef<str>>(key: &str, values: &[S]) -> String {
    let joined = values
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(",");
    format!("--set {key}={{{joined}}}")
}

/// `--set key[i]=value`
pub fn set_indexed(key: &str, index: usize, value: impl std::fmt::Display) -> String {
    format!("--set {key}[{index}]={value}")
}

fn push_parameters<'a>(args: &mut Vec<&'a str>, parameters: &'a [String]) {
    for param in parameters {
        match param.split_once(' ') {
            Some((flag, value)) => {
                args.push(flag);
                args.push(value);
            }
            None => args.push(param),
        }
    }
}

/// Helm operations over an external `helm`.
#[derive(Clone)]
pub struct Helm {
    runner: Arc<dyn CommandRunner>,
    dry_run: bool,
}

impl Helm {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            dry_run: false,
        }
    }

    /// Show `helm diff` output instead of applying upgrades.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// `helm upgrade --install`, or the same diff as `upgrade` when dry-running.
    pub async fn install(&self, chart: &ChartRelease) -> ReconcileResult<()> {
        if self.dry_run {
            return self.upgrade(chart).await;
        }
        info!(release = %chart.release, namespace = %chart.namespace, "installing chart");
        let mut args = vec![
            "upgrade",
            "--install",
            chart.release.as_str(),
            chart.chart_dir.as_str(),
            "--namespace",
            chart.namespace.as_str(),
        ];
        push_parameters(&mut args, &chart.parameters);
        self.runner.run("helm", &args).await.map(|_| ())
    }

    /// `helm upgrade` of an existing release, or `helm diff upgrade` when dry-running.
    pub async fn upgrade(&self, chart: &ChartRelease) -> ReconcileResult<()> {
        let mut args = if self.dry_run {
            info!(release = %chart.release, "diffing chart upgrade (dry run)");
            vec!["diff", "upgrade", "--install", "-C", DIFF_CONTEXT]
        } else {
            info!(release = %chart.release, namespace = %chart.namespace, "upgrading chart");
            vec!["upgrade"]
        };
        args.extend([chart.release.as_str(), chart.chart_dir.as_str()]);
        args.extend(["--namespace", chart.namespace.as_str()]);
        if !self.dry_run {
            args.extend(["--timeout", UPGRADE_TIMEOUT]);
        }
        push_parameters(&mut args, &chart.parameters);

        let out = self.runner.run("helm", &args).await?;
        if self.dry_run {
            info!(release = %chart.release, diff = %out, "helm diff");
        }
        Ok(())
    }

    /// `helm uninstall`. Failures are logged, never returned.
    pub async fn uninstall(&self, namespace: &str, release: &str) {
        info!(%release, %namespace, "uninstalling chart");
        if let Err(e) = self
            .runner
            .run("helm", &["uninstall", "--namespace", namespace, release])
            .await
        {
            warn!(error = %e, %release, "helm uninstall failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedRunner;

    fn chart() -> ChartRelease {
        ChartRelease {
            namespace: "dev".into(),
            release: "dev-fullnodes".into(),
            chart_dir: "charts/celo-fullnode".into(),
            parameters: vec![
                set("replicaCount", 2),
                set_string("geth.rpc_apis", "eth\\,net"),
            ],
        }
    }

    #[test]
    fn set_helpers() {
        assert_eq!(set("storage.size", "100Gi"), "--set storage.size=100Gi");
        assert_eq!(
            set_list("geth.public_ip_per_node", &["1.1.1.1", "2.2.2.2"]),
            "--set geth.public_ip_per_node={1.1.1.1,2.2.2.2}"
        );
        assert_eq!(set_list::<&str>("geth.node_keys", &[]), "--set geth.node_keys={}");
        assert_eq!(
            set_indexed("geth.service_node_port_per_full_node", 1, 30002),
            "--set geth.service_node_port_per_full_node[1]=30002"
        );
    }

    #[tokio::test]
    async fn install_passes_parameters_as_flag_value_pairs() {
        let runner = Arc::new(ScriptedRunner::new());
        Helm::new(runner.clone()).install(&chart()).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "helm upgrade --install dev-fullnodes charts/celo-fullnode --namespace dev \
                 --set replicaCount=2 --set-string geth.rpc_apis=eth\\,net"
            ]
        );
    }

    #[tokio::test]
    async fn upgrade_uses_long_timeout() {
        let runner = Arc::new(ScriptedRunner::new());
        Helm::new(runner.clone()).upgrade(&chart()).await.unwrap();
        let call = &runner.calls()[0];
        assert!(call.starts_with("helm upgrade dev-fullnodes"));
        assert!(call.contains("--timeout 120h"));
    }

    #[tokio::test]
    async fn dry_run_upgrade_diffs() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("helm diff", "dev, dev-fullnodes, StatefulSet (apps) has changed");
        Helm::new(runner.clone())
            .with_dry_run(true)
            .upgrade(&chart())
            .await
            .unwrap();
        let call = &runner.calls()[0];
        assert!(call.starts_with("helm diff upgrade --install -C 5 dev-fullnodes"));
        assert!(!call.contains("--timeout"));
    }

    #[tokio::test]
    async fn uninstall_swallows_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_err("helm uninstall", "Error: uninstall: Release not loaded: dev-fullnodes: release: not found");
        Helm::new(runner.clone()).uninstall("dev", "dev-fullnodes").await;
        assert_eq!(runner.calls(), vec!["helm uninstall --namespace dev dev-fullnodes"]);
    }
}
