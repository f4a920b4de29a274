//! RemediationPolicy Custom Resource Definition
//!
//! A RemediationPolicy enables PVC remediation for a set of namespaces. When the
//! external fault-detection stack (NodeHealthCheck + SelfNodeRemediation) marks a
//! node unhealthy, claims pinned to that node are deleted so their workloads can be
//! rescheduled elsewhere.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "remediation.openstack.org",
    version = "v1beta1",
    kind = "RemediationPolicy",
    namespaced,
    status = "RemediationPolicyStatus",
    shortname = "rp",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Message","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].message"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RemediationPolicySpec {
    /// Namespaces whose claims are considered. Empty means the policy's own namespace.
    #[serde(default)]
    pub watched_namespaces: Vec<String>,

    /// Delete claims pinned to unhealthy nodes
    #[serde(rename = "enablePVCRemediation", default = "default_true")]
    pub enable_pvc_remediation: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RemediationPolicySpec {
    fn default() -> Self {
        Self {
            watched_namespaces: Vec::new(),
            enable_pvc_remediation: true,
        }
    }
}

impl RemediationPolicySpec {
    /// Namespaces to scan for a policy living in `own_namespace`.
    ///
    /// Duplicates are dropped, first occurrence wins.
    pub fn effective_namespaces(&self, own_namespace: &str) -> Vec<String> {
        if self.watched_namespaces.is_empty() {
            return vec![own_namespace.to_string()];
        }
        let mut namespaces: Vec<String> = Vec::with_capacity(self.watched_namespaces.len());
        for ns in &self.watched_namespaces {
            if !namespaces.contains(ns) {
                namespaces.push(ns.clone());
            }
        }
        namespaces
    }

    /// Whether objects in `namespace` fall under this policy's scope
    pub fn covers_namespace(&self, own_namespace: &str, namespace: &str) -> bool {
        if self.watched_namespaces.is_empty() {
            own_namespace == namespace
        } else {
            self.watched_namespaces.iter().any(|ns| ns == namespace)
        }
    }
}

/// Observed state of a RemediationPolicy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemediationPolicyStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl RemediationPolicy {
    /// A policy without recorded conditions has never been through a pass
    pub fn is_first_seen(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.conditions.is_empty())
            .unwrap_or(true)
    }
}
