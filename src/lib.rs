//! # lattice
//! A clustered RPC transport toolkit: broker bootstrap, per-listener TLS
//! provisioning, weighted failover and remote reference factories.
//!
//! This is a convenience package which includes all of the sub-projects within
//! lattice, realistically you probably only want some of these projects:
//!
//! ### Features
//! - `lattice_broker` - Transport bootstrap, TLS socket provisioning, object keys
//!   and per-type remote reference factories.
//! - `lattice_cluster` - Cluster membership bridging and the weighted round robin
//!   failover policy.

#[cfg(feature = "lattice-broker")]
pub use lattice_broker as broker;
#[cfg(feature = "lattice-cluster")]
pub use lattice_cluster as cluster;
