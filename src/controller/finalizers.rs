//! Finalizer handling for RemediationPolicy
//!
//! The finalizer only delays removal of a policy until the operator has seen the
//! deletion. Deleting a policy never triggers PVC cleanup: removing the policy
//! says nothing about whether the cluster is safe.

use kube::ResourceExt;

use crate::crd::RemediationPolicy;

/// Finalizer name used to protect RemediationPolicy resources
pub const REMEDIATION_POLICY_FINALIZER: &str = "remediationpolicy.remediation.openstack.org/finalizer";

/// A deletion timestamp means the user asked for deletion and finalizers are
/// holding the object.
pub fn is_being_deleted(policy: &RemediationPolicy) -> bool {
    policy.metadata.deletion_timestamp.is_some()
}

pub fn has_finalizer(policy: &RemediationPolicy) -> bool {
    policy
        .finalizers()
        .iter()
        .any(|f| f == REMEDIATION_POLICY_FINALIZER)
}

/// Add our finalizer. Returns true if the list changed.
pub fn add_finalizer(policy: &mut RemediationPolicy) -> bool {
    if has_finalizer(policy) {
        return false;
    }
    policy
        .finalizers_mut()
        .push(REMEDIATION_POLICY_FINALIZER.to_string());
    true
}

/// Remove our finalizer. Returns true if the list changed.
pub fn remove_finalizer(policy: &mut RemediationPolicy) -> bool {
    if !has_finalizer(policy) {
        return false;
    }
    policy
        .finalizers_mut()
        .retain(|f| f != REMEDIATION_POLICY_FINALIZER);
    true
}
