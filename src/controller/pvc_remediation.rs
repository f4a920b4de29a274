//! PVC remediation: find claims pinned to unhealthy nodes and delete them
//!
//! Only the claim object is deleted. The bound volume is left to its reclaim
//! policy. No check is made for pods still mounting the claim: evicting
//! workloads from the failed node is the fault-detection stack's job.

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use crate::error::Result;

use super::node_health::UnhealthyNodeSet;
use super::store::ClusterStore;

/// Per-pass view of a PersistentVolumeClaim
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimSnapshot {
    pub namespace: String,
    pub name: String,
    /// Name of the bound volume; `None` while unbound
    pub volume_name: Option<String>,
    /// Deletion already requested; the claim may linger while
    /// `kubernetes.io/pvc-protection` holds it
    pub terminating: bool,
}

impl ClaimSnapshot {
    pub fn new(namespace: &str, name: &str, volume_name: Option<&str>) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            volume_name: volume_name.map(String::from),
            terminating: false,
        }
    }
}

impl From<&PersistentVolumeClaim> for ClaimSnapshot {
    fn from(pvc: &PersistentVolumeClaim) -> Self {
        Self {
            namespace: pvc.namespace().unwrap_or_default(),
            name: pvc.name_any(),
            volume_name: pvc
                .spec
                .as_ref()
                .and_then(|s| s.volume_name.clone())
                .filter(|v| !v.is_empty()),
            terminating: pvc.metadata.deletion_timestamp.is_some(),
        }
    }
}

/// What happened to one claim during a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Deleted { node: String },
    AlreadyGone { node: String },
    /// Dry-run: would have been deleted
    WouldDelete { node: String },
    Failed { node: String, error: String },
}

impl ClaimOutcome {
    pub fn node(&self) -> &str {
        match self {
            ClaimOutcome::Deleted { node }
            | ClaimOutcome::AlreadyGone { node }
            | ClaimOutcome::WouldDelete { node }
            | ClaimOutcome::Failed { node, .. } => node,
        }
    }
}

/// Summary of a namespace sweep
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceReport {
    pub namespace: String,
    pub scanned: usize,
    pub actions: Vec<(ClaimSnapshot, ClaimOutcome)>,
}

/// Delete a single claim. A claim that is already gone counts as deleted.
pub async fn delete_pinned_claim(
    store: &dyn ClusterStore,
    claim: &ClaimSnapshot,
) -> Result<bool> {
    match store.delete_claim(&claim.namespace, &claim.name).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => {
            debug!(
                "PVC {}/{} already deleted",
                claim.namespace, claim.name
            );
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Node the claim is pinned to, when that node is in the unhealthy set.
///
/// Volume lookups that fail are logged and treated as "not pinned".
pub async fn unhealthy_pin_for_claim(
    store: &dyn ClusterStore,
    claim: &ClaimSnapshot,
    unhealthy: &UnhealthyNodeSet,
) -> Option<String> {
    let volume_name = claim.volume_name.as_deref()?;

    let volume = match store.get_volume(volume_name).await {
        Ok(Some(v)) => v,
        Ok(None) => return None,
        Err(e) => {
            error!("Failed to get PV {}: {:?}", volume_name, e);
            return None;
        }
    };

    let node = volume.resolve_pinned_node()?;
    unhealthy.contains(&node).then_some(node)
}

/// Sweep one namespace. Listing failures are returned; per-claim failures are
/// recorded in the report and do not stop the sweep.
pub async fn remediate_namespace(
    store: &dyn ClusterStore,
    namespace: &str,
    unhealthy: &UnhealthyNodeSet,
    dry_run: bool,
) -> Result<NamespaceReport> {
    let claims = store.list_claims(namespace).await?;
    let mut report = NamespaceReport {
        namespace: namespace.to_string(),
        scanned: claims.len(),
        actions: Vec::new(),
    };

    for claim in claims {
        let Some(node) = unhealthy_pin_for_claim(store, &claim, unhealthy).await else {
            continue;
        };

        if claim.terminating {
            debug!(
                "PVC {}/{} on unhealthy node {} is already terminating",
                claim.namespace, claim.name, node
            );
            report
                .actions
                .push((claim, ClaimOutcome::AlreadyGone { node }));
            continue;
        }

        if dry_run {
            info!(
                "Dry run: would delete PVC {}/{} bound to unhealthy node {}",
                claim.namespace, claim.name, node
            );
            report
                .actions
                .push((claim, ClaimOutcome::WouldDelete { node }));
            continue;
        }

        info!(
            "Deleting PVC {}/{} bound to unhealthy node {}",
            claim.namespace, claim.name, node
        );
        let outcome = match delete_pinned_claim(store, &claim).await {
            Ok(true) => ClaimOutcome::Deleted { node },
            Ok(false) => ClaimOutcome::AlreadyGone { node },
            Err(e) => {
                warn!(
                    "Failed to delete PVC {}/{}: {:?}",
                    claim.namespace, claim.name, e
                );
                ClaimOutcome::Failed {
                    node,
                    error: e.to_string(),
                }
            }
        };
        report.actions.push((claim, outcome));
    }

    Ok(report)
}
