//! pvc-remediator: Kubernetes operator that frees storage pinned to failed nodes
//!
//! When the NodeHealthCheck/SelfNodeRemediation stack is installed and a node
//! goes NotReady, PersistentVolumeClaims bound to volumes that can only be
//! mounted on that node are deleted so their workloads can be rescheduled.
//! Which namespaces are swept is declared by `RemediationPolicy` resources.

pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
