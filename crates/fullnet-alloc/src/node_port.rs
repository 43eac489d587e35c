//! NodePort assignment.
//!
//! `assign_ports` is the pure core: given the cluster's used ports and
//! each target's current port, it keeps live ports and fills the rest
//! with the lowest free ports in `[30000, 32767]`. `NodePortAllocator`
//! feeds it from live Service objects.

use futures::future::try_join_all;
use k8s_openapi::api::core::v1::Service;
use tracing::{debug, info};

use fullnet_cloud::Kubectl;
use fullnet_cloud::helm::{set, set_indexed};
use fullnet_core::{
    FullNodeNames, MAX_NODE_PORT, MIN_NODE_PORT, NodePortAssignment, ReconcileError,
    ReconcileResult,
};

/// Assign one port per target.
///
/// `used` need not be sorted. Targets with `Some(port)` keep it and that
/// port counts as used; the others get increasing free ports. The scan cursor into `used` and the
/// candidate port only move forward, so the whole call is linear in
/// `used` plus the insertions.
pub fn assign_ports(used: &[i32], current: &[Option<i32>]) -> ReconcileResult<Vec<i32>> {
    let mut used = used.to_vec();
    used.extend(current.iter().flatten().copied());
    used.sort_unstable();
    used.dedup();

    let mut candidate = MIN_NODE_PORT;
    let mut cursor = 0;
    let mut ports = Vec::with_capacity(current.len());

    for existing in current {
        if let Some(port) = existing {
            ports.push(*port);
            continue;
        }

        loop {
            while cursor < used.len() && used[cursor] < candidate {
                cursor += 1;
            }
            if cursor < used.len() && used[cursor] == candidate {
                candidate += 1;
            } else {
                break;
            }
        }
        if candidate > MAX_NODE_PORT {
            return Err(ReconcileError::NodePortsExhausted {
                min: MIN_NODE_PORT,
                max: MAX_NODE_PORT,
            });
        }

        used.insert(cursor, candidate);
        cursor += 1;
        ports.push(candidate);
        candidate += 1;
    }

    Ok(ports)
}

/// The single NodePort shared by all of a Service's port specs.
///
/// Specs without a node port are ignored. Differing values are a
/// `NodePortMismatch`.
pub fn service_node_port(name: &str, service: &Service) -> ReconcileResult<Option<i32>> {
    let mut ports: Vec<i32> = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|p| p.node_port)
        .collect();
    ports.sort_unstable();
    ports.dedup();

    match ports.as_slice() {
        [] => Ok(None),
        [port] => Ok(Some(*port)),
        _ => Err(ReconcileError::NodePortMismatch {
            service: name.to_string(),
            ports,
        }),
    }
}

/// Assigns NodePorts to the per-replica full-node Services.
pub struct NodePortAllocator {
    kubectl: Kubectl,
    names: FullNodeNames,
}

impl NodePortAllocator {
    pub fn new(kubectl: Kubectl, names: FullNodeNames) -> Self {
        Self { kubectl, names }
    }

    /// Current NodePort of each of the first `count` Services (`None` if absent).
    pub async fn live_ports(&self, count: u32) -> ReconcileResult<Vec<Option<i32>>> {
        try_join_all((0..count).map(|i| async move {
            let name = self.names.service(i);
            match self.kubectl.get_service(self.names.namespace(), &name).await? {
                Some(service) => service_node_port(&name, &service),
                None => Ok(None),
            }
        }))
        .await
    }

    /// Assign a port to each of `count` Services against fresh cluster state.
    pub async fn assign(&self, count: u32) -> ReconcileResult<Vec<NodePortAssignment>> {
        let used = self.kubectl.used_node_ports().await?;
        let current = self.live_ports(count).await?;
        debug!(used = used.len(), ?current, "assigning node ports");

        let ports = assign_ports(&used, &current)?;
        let assignments: Vec<NodePortAssignment> = ports
            .into_iter()
            .zip(0..)
            .map(|(port, i)| NodePortAssignment {
                service_name: self.names.service(i),
                port: Some(port),
            })
            .collect();
        info!(
            ports = ?assignments.iter().filter_map(|a| a.port).collect::<Vec<_>>(),
            "node ports assigned"
        );
        Ok(assignments)
    }

    /// Every NodePort still in use in the cluster, for firewall rules.
    pub async fn used_ports(&self) -> ReconcileResult<Vec<i32>> {
        self.kubectl.used_node_ports().await
    }

    /// Helm flags for the assigned ports.
    pub fn helm_parameters(assignments: &[NodePortAssignment]) -> Vec<String> {
        let mut params: Vec<String> = assignments
            .iter()
            .enumerate()
            .filter_map(|(i, a)| {
                a.port
                    .map(|port| set_indexed("geth.service_node_port_per_full_node", i, port))
            })
            .collect();
        params.push(set("geth.service_type", "NodePort"));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use fullnet_cloud::ScriptedRunner;

    #[test]
    fn lowest_gap_is_preferred() {
        assert_eq!(assign_ports(&[30000, 30001, 30003], &[None]).unwrap(), vec![30002]);
    }

    #[test]
    fn unsorted_input_is_handled() {
        assert_eq!(
            assign_ports(&[30003, 30000, 30001], &[None, None, None]).unwrap(),
            vec![30002, 30004, 30005]
        );
    }

    #[test]
    fn exhausted_pool_is_an_error() {
        let used: Vec<i32> = (MIN_NODE_PORT..=MAX_NODE_PORT).collect();
        let err = assign_ports(&used, &[None]).unwrap_err();
        assert!(matches!(err, ReconcileError::NodePortsExhausted { .. }));
        assert!(err.to_string().contains("no available node ports"));
    }

    #[test]
    fn last_port_in_pool_is_usable() {
        let used: Vec<i32> = (MIN_NODE_PORT..MAX_NODE_PORT).collect();
        assert_eq!(assign_ports(&used, &[None]).unwrap(), vec![MAX_NODE_PORT]);
        assert!(assign_ports(&used, &[None, None]).is_err());
    }

    #[test]
    fn assigned_ports_are_unique_and_disjoint_from_used() {
        let used = vec![30000, 30002, 30004, 30005, 30009, 31000];
        let ports = assign_ports(&used, &[None; 8]).unwrap();
        let distinct: HashSet<i32> = ports.iter().copied().collect();
        assert_eq!(distinct.len(), 8);
        assert!(ports.iter().all(|p| !used.contains(p)));
        assert!(ports.iter().all(|p| (MIN_NODE_PORT..=MAX_NODE_PORT).contains(p)));
        assert_eq!(ports, vec![30001, 30003, 30006, 30007, 30008, 30010, 30011, 30012]);
    }

    #[test]
    fn existing_port_is_kept_as_targets_grow() {
        let used = vec![30000, 30005];
        let first = assign_ports(&used, &[Some(30005)]).unwrap();
        let second = assign_ports(&used, &[Some(30005), None, None]).unwrap();
        assert_eq!(first, vec![30005]);
        assert_eq!(second, vec![30005, 30001, 30002]);
    }

    #[test]
    fn kept_ports_are_never_reassigned() {
        assert_eq!(assign_ports(&[], &[Some(30000), None]).unwrap(), vec![30000, 30001]);
        assert_eq!(
            assign_ports(&[30001], &[None, Some(30002), None]).unwrap(),
            vec![30000, 30002, 30003]
        );
        let ports = assign_ports(&[30000], &[Some(30001), None, Some(30003), None]).unwrap();
        assert_eq!(ports, vec![30001, 30002, 30003, 30004]);
    }

    fn service(ports: &[Option<i32>]) -> Service {
        let ports: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| match p {
                Some(p) => serde_json::json!({"port": 30303, "nodePort": p}),
                None => serde_json::json!({"port": 8545}),
            })
            .collect();
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "svc"},
            "spec": {"type": "NodePort", "ports": ports}
        }))
        .unwrap()
    }

    #[test]
    fn service_port_must_agree_across_specs() {
        assert_eq!(
            service_node_port("svc", &service(&[Some(30005), None, Some(30005)])).unwrap(),
            Some(30005)
        );
        assert_eq!(service_node_port("svc", &service(&[None])).unwrap(), None);
        let err = service_node_port("svc", &service(&[Some(30005), Some(30006)])).unwrap_err();
        assert!(matches!(err, ReconcileError::NodePortMismatch { ref ports, .. } if ports == &vec![30005, 30006]));
    }

    #[test]
    fn helm_parameters_render_per_index() {
        let assignments = vec![
            NodePortAssignment { service_name: "dev-fullnodes-0".into(), port: Some(30005) },
            NodePortAssignment { service_name: "dev-fullnodes-1".into(), port: Some(30001) },
        ];
        assert_eq!(
            NodePortAllocator::helm_parameters(&assignments),
            vec![
                "--set geth.service_node_port_per_full_node[0]=30005",
                "--set geth.service_node_port_per_full_node[1]=30001",
                "--set geth.service_type=NodePort",
            ]
        );
    }

    #[tokio::test]
    async fn assign_reads_live_services() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on(
                "get services --all-namespaces",
                r#"{"apiVersion": "v1", "kind": "List", "items": [
                    {"apiVersion": "v1", "kind": "Service", "metadata": {"name": "dev-fullnodes-0"},
                     "spec": {"ports": [{"port": 30303, "nodePort": 30005}]}},
                    {"apiVersion": "v1", "kind": "Service", "metadata": {"name": "other"},
                     "spec": {"ports": [{"port": 80, "nodePort": 30000}]}}]}"#,
            )
            .on(
                "get service dev-fullnodes-0 ",
                r#"{"apiVersion": "v1", "kind": "Service", "metadata": {"name": "dev-fullnodes-0"},
                    "spec": {"ports": [{"port": 30303, "nodePort": 30005},
                                       {"port": 30303, "protocol": "UDP", "nodePort": 30005}]}}"#,
            )
            .on_err("get service dev-fullnodes-1 ", "Error from server (NotFound): services \"dev-fullnodes-1\" not found");

        let allocator = NodePortAllocator::new(Kubectl::new(runner), FullNodeNames::new("dev"));
        let assignments = allocator.assign(2).await.unwrap();
        assert_eq!(assignments[0].port, Some(30005));
        assert_eq!(assignments[1].port, Some(30001));
        assert_eq!(assignments[1].service_name, "dev-fullnodes-1");
    }
}
