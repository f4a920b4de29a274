//! Controller module for RemediationPolicy reconciliation
//! This module contains the controller loop, the reconcile pass, and the
//! cluster-facing pieces it is built from.

pub mod conditions;
pub mod dependencies;
mod finalizers;
pub mod local_volume;
mod mapping;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod node_health;
pub mod pvc_remediation;
mod reconciler;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use dependencies::check_dependencies_available;
pub use finalizers::REMEDIATION_POLICY_FINALIZER;
pub use mapping::policies_for_namespace;
pub use node_health::classify_nodes;
pub use pvc_remediation::remediate_namespace;
pub use reconciler::{
    reconcile_policy, retry_delay, run_controller, ControllerState, ReconcilerConfig,
    CONTROLLER_NAME,
};
pub use store::{ClusterStore, KubeStore};
