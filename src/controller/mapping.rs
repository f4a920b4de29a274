//! Map watched cluster objects to the policies that must re-evaluate
//!
//! Nodes are cluster-wide, so a node change fans out to every policy. Pod and
//! PVC changes only reach policies whose namespace scope covers the object.
//! The policy list comes from the controller's reflector cache, so the index
//! is rebuilt on every call.

use std::sync::Arc;

use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;

use crate::crd::RemediationPolicy;

pub fn policies_for_namespace(
    policies: &[Arc<RemediationPolicy>],
    namespace: Option<&str>,
) -> Vec<ObjectRef<RemediationPolicy>> {
    policies
        .iter()
        .filter(|policy| match namespace {
            None => true,
            Some(ns) => {
                let own = policy.namespace().unwrap_or_default();
                policy.spec.covers_namespace(&own, ns)
            }
        })
        .map(|policy| ObjectRef::from_obj(policy.as_ref()))
        .collect()
}
