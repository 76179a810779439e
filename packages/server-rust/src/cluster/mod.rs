//! Cluster placement and cross-host coordination.
//!
//! - `affinity`: which services may run on which host
//! - `reconcile`: cross-host "is this work item running anywhere" checks

pub mod affinity;
pub mod reconcile;

pub use affinity::{is_allowed, resolve, AffinityVerdict};
pub use reconcile::{ClusterReconciler, HostProbe, LocalProbe, ReconcileReport};
