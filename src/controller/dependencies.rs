//! Dependency gate for the external fault-detection stack
//!
//! Remediation only runs when at least one NodeHealthCheck and one
//! SelfNodeRemediationTemplate exist in the cluster. Neither kind is owned by
//! this operator, so they are looked up untyped.

use kube::discovery::ApiResource;
use tracing::debug;

use crate::error::Result;

use super::store::ClusterStore;

/// Reason recorded when the dependency stack is missing
pub const NHC_NOT_FOUND_REASON: &str = "NHC/SNRNotFound";

/// Message recorded when the dependency stack is missing or cannot be checked
pub const NHC_REQUIRED_MESSAGE: &str = "Node Health Check (NHC) and Self Node Remediation (SNR) are required; controller cannot proceed without them";

/// An externally-defined resource kind, identified by group/version/plural
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl ExternalKind {
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.to_string(),
            version: self.version.to_string(),
            api_version: self.api_version(),
            kind: self.kind.to_string(),
            plural: self.plural.to_string(),
        }
    }
}

pub const NODE_HEALTH_CHECK: ExternalKind = ExternalKind {
    group: "remediation.medik8s.io",
    version: "v1alpha1",
    kind: "NodeHealthCheck",
    plural: "nodehealthchecks",
};

pub const SELF_NODE_REMEDIATION_TEMPLATE: ExternalKind = ExternalKind {
    group: "self-node-remediation.medik8s.io",
    version: "v1alpha1",
    kind: "SelfNodeRemediationTemplate",
    plural: "selfnoderemediationtemplates",
};

/// Result of listing a kind the operator has no schema for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindPresence {
    /// The kind is served; at least this many instances exist (0 means none)
    Instances(usize),
    /// The kind is not registered in the cluster
    Unavailable,
}

impl KindPresence {
    pub fn has_instances(&self) -> bool {
        matches!(self, KindPresence::Instances(n) if *n > 0)
    }
}

/// Returns true only if both required kinds have at least one instance.
///
/// Unregistered kinds and empty lists are reported as `Ok(false)`; any other
/// failure is returned so the pass can be retried.
pub async fn check_dependencies_available(store: &dyn ClusterStore) -> Result<bool> {
    for kind in [&NODE_HEALTH_CHECK, &SELF_NODE_REMEDIATION_TEMPLATE] {
        let presence = store.sample_kind(kind).await?;
        debug!("Dependency {}: {:?}", kind.kind, presence);
        if !presence.has_instances() {
            return Ok(false);
        }
    }
    Ok(true)
}
