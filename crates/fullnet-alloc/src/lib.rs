//! fullnet-alloc — maps a desired replica count to reachable endpoints.
//!
//! Allocators decide which endpoints to create, keep and retire. They
//! talk to the outside world only through `fullnet-cloud`.
//!
//! # Components
//!
//! - **`static_ip`** — per-replica static IPs, including the AWS
//!   per-subnet matrix, with ordered scale-down
//! - **`node_port`** — first-fit NodePort assignment over the cluster's
//!   used ports

pub mod node_port;
pub mod static_ip;

pub use node_port::{NodePortAllocator, assign_ports, service_node_port};
pub use static_ip::StaticIpAllocator;
