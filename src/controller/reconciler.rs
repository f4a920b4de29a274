//! Main reconciler for RemediationPolicy resources
//!
//! Every pass is level-triggered and recomputes from scratch:
//!
//! 1. Load the policy; a missing policy ends the pass.
//! 2. First-seen policies and policies that just got the finalizer are persisted
//!    and requeued without evaluating anything else.
//! 3. Deleting policies lose the finalizer. No PVCs are touched.
//! 4. Dependency gate (NodeHealthCheck + SelfNodeRemediationTemplate).
//! 5. Disabled policies stop here with `Ready=True`.
//! 6. Classify nodes; nothing unhealthy means nothing to do.
//! 7. Delete claims pinned to unhealthy nodes, namespace by namespace.
//!
//! Conditions are captured before the pass and repaired on every exit.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim, Pod};
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{self, Action, Controller},
        metadata_watcher, predicates, watcher, WatchStreamExt,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{RemediationPolicy, RemediationPolicyStatus, Severity};
use crate::error::{Error, Result};

use super::conditions::{
    unknown_condition, Conditions, CONDITION_TYPE_INPUT_READY, CONDITION_TYPE_READY,
    REASON_ERROR, REASON_INITIALIZING, READY_INIT_MESSAGE,
};
use super::dependencies::{check_dependencies_available, NHC_NOT_FOUND_REASON, NHC_REQUIRED_MESSAGE};
use super::finalizers::{add_finalizer, is_being_deleted, remove_finalizer};
use super::mapping::policies_for_namespace;
use super::node_health::classify_nodes;
use super::pvc_remediation::{remediate_namespace, ClaimOutcome, NamespaceReport};
use super::store::ClusterStore;

pub const CONTROLLER_NAME: &str = "remediationpolicy";

pub const INPUT_READY_INIT_MESSAGE: &str = "Checking NHC/SNR availability";
pub const INPUT_READY_MESSAGE: &str = "NHC and SNR are available";
pub const DEPENDENCY_CHECK_FAILED_MESSAGE: &str = "NHC/SNR check failed";
pub const DISABLED_MESSAGE: &str = "PVC remediation is disabled";
pub const NOTHING_TO_DO_MESSAGE: &str = "No unhealthy nodes; monitoring";
pub const REMEDIATED_MESSAGE: &str = "Monitoring; remediated PVCs on unhealthy nodes if any";

/// Delay before the pass that follows finalizer/initial-status bookkeeping
const BOOKKEEPING_REQUEUE: Duration = Duration::from_secs(5);
const NOT_LEADER_REQUEUE: Duration = Duration::from_secs(5);

/// Tunables for reconcile passes
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Log claims that would be deleted instead of deleting them
    pub dry_run: bool,
    /// Requeue delay after a completed pass
    pub resync_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            resync_interval: Duration::from_secs(300),
        }
    }
}

/// Shared state for the controller
pub struct ControllerState {
    pub store: Arc<dyn ClusterStore>,
    pub config: ReconcilerConfig,
    /// Skip passes unless `is_leader` is set
    pub leader_election: bool,
    pub is_leader: Arc<AtomicBool>,
    /// Set once the controller stream is running
    pub ready: Arc<AtomicBool>,
}

/// Main entry point to start the controller
pub async fn run_controller(
    client: Client,
    state: Arc<ControllerState>,
    concurrency: u16,
) -> Result<()> {
    let policies: Api<RemediationPolicy> = Api::all(client.clone());

    info!("Starting RemediationPolicy controller (concurrency: {})", concurrency);

    // Verify CRD exists
    match policies.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("RemediationPolicy CRD is available"),
        Err(e) => {
            error!(
                "RemediationPolicy CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "RemediationPolicy CRD not installed".to_string(),
            ));
        }
    }

    let controller = Controller::new(policies, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(concurrency));
    let cache = controller.store();

    let node_cache = cache.clone();
    let pod_cache = cache.clone();
    let claim_cache = cache;

    // Pods and claims are only triggers, metadata is enough
    let pods = metadata_watcher(Api::<Pod>::all(client.clone()), watcher::Config::default())
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    let claims = metadata_watcher(
        Api::<PersistentVolumeClaim>::all(client.clone()),
        watcher::Config::default(),
    )
    .default_backoff()
    .applied_objects()
    .predicate_filter(predicates::generation);

    state.ready.store(true, Ordering::Relaxed);

    controller
        .watches(
            Api::<Node>::all(client.clone()),
            watcher::Config::default(),
            move |_node| policies_for_namespace(&node_cache.state(), None),
        )
        .watches_stream(pods, move |pod| {
            policies_for_namespace(&pod_cache.state(), pod.namespace().as_deref())
        })
        .watches_stream(claims, move |pvc| {
            policies_for_namespace(&claim_cache.state(), pvc.namespace().as_deref())
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.clone())
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;

    state.ready.store(false, Ordering::Relaxed);
    Ok(())
}

/// Controller entry point
///
/// Called whenever a RemediationPolicy changes, a watched Node/Pod/PVC maps to
/// it, or a requeue timer fires.
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<RemediationPolicy>, ctx: Arc<ControllerState>) -> Result<Action> {
    if ctx.leader_election && !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping pass for {}", obj.name_any());
        return Ok(Action::requeue(NOT_LEADER_REQUEUE));
    }

    let namespace = obj
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;

    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let result = reconcile_policy(ctx.store.as_ref(), &ctx.config, &namespace, &obj.name_any()).await;

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(
        CONTROLLER_NAME,
        started.elapsed().as_secs_f64(),
    );

    result
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(policy: Arc<RemediationPolicy>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", policy.name_any(), error);

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(CONTROLLER_NAME, error.metric_label());

    Action::requeue(retry_delay(error))
}

/// Use shorter retry for retriable errors
pub fn retry_delay(error: &Error) -> Duration {
    if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    }
}

/// Working state of one pass
struct Pass {
    /// The object as read (source of resourceVersion for writes)
    loaded: RemediationPolicy,
    /// Working copy; only metadata changes are persisted from it
    policy: RemediationPolicy,
    saved: Conditions,
    conditions: Conditions,
}

impl Pass {
    fn begin(loaded: RemediationPolicy) -> Self {
        let saved = Conditions::new(
            loaded
                .status
                .as_ref()
                .map(|s| s.conditions.clone())
                .unwrap_or_default(),
        );

        let mut conditions = saved.clone();
        conditions.init(vec![
            unknown_condition(CONDITION_TYPE_READY, REASON_INITIALIZING, READY_INIT_MESSAGE),
            unknown_condition(
                CONDITION_TYPE_INPUT_READY,
                REASON_INITIALIZING,
                INPUT_READY_INIT_MESSAGE,
            ),
        ]);

        Self {
            policy: loaded.clone(),
            loaded,
            saved,
            conditions,
        }
    }

    /// Mirror an undecided `Ready` from the other conditions, then put back
    /// transition times of conditions whose status did not move.
    fn repair_conditions(&mut self) {
        if self.conditions.is_unknown(CONDITION_TYPE_READY) {
            if let Some(mirrored) = self.conditions.mirror(CONDITION_TYPE_READY) {
                self.conditions.set(mirrored);
            }
        }
        self.conditions.restore_last_transition_times(&self.saved);
    }

    /// Write back finalizer and status changes. Unchanged parts are not written.
    async fn persist(&mut self, store: &dyn ClusterStore) -> Result<()> {
        if self.policy.finalizers() != self.loaded.finalizers() {
            self.loaded = store
                .patch_policy_finalizers(&self.loaded, self.policy.finalizers().to_vec())
                .await?;
        }

        // A deleting policy may already be gone once its finalizer is dropped
        if is_being_deleted(&self.policy) {
            return Ok(());
        }

        let status = RemediationPolicyStatus {
            conditions: self.conditions.as_slice().to_vec(),
        };
        if self.loaded.status.as_ref() != Some(&status) {
            store.patch_policy_status(&self.loaded, &status).await?;
        }
        Ok(())
    }
}

/// Run one reconcile pass for the policy `namespace/name`.
///
/// A panic inside the pass is logged and resumed after conditions are repaired;
/// status is not persisted in that case.
pub async fn reconcile_policy(
    store: &dyn ClusterStore,
    config: &ReconcilerConfig,
    namespace: &str,
    name: &str,
) -> Result<Action> {
    let Some(loaded) = store.get_policy(namespace, name).await? else {
        debug!("RemediationPolicy {}/{} is gone", namespace, name);
        return Ok(Action::await_change());
    };

    let mut pass = Pass::begin(loaded);
    let outcome = AssertUnwindSafe(run_pass(store, config, &mut pass))
        .catch_unwind()
        .await;

    pass.repair_conditions();

    match outcome {
        Ok(result) => {
            pass.persist(store).await?;
            result
        }
        Err(panic) => {
            error!(
                "Panic during reconcile of RemediationPolicy {}/{}; status left unpersisted",
                namespace, name
            );
            std::panic::resume_unwind(panic)
        }
    }
}

async fn run_pass(
    store: &dyn ClusterStore,
    config: &ReconcilerConfig,
    pass: &mut Pass,
) -> Result<Action> {
    let deleting = is_being_deleted(&pass.policy);
    let first_seen = pass.loaded.is_first_seen();
    let added_finalizer = !deleting && add_finalizer(&mut pass.policy);

    if added_finalizer || (first_seen && !deleting) {
        info!(
            "Initialized RemediationPolicy {}/{}, evaluation deferred to next pass",
            pass.policy.namespace().unwrap_or_default(),
            pass.policy.name_any()
        );
        return Ok(Action::requeue(BOOKKEEPING_REQUEUE));
    }

    if deleting {
        return reconcile_delete(pass);
    }

    reconcile_normal(store, config, pass).await
}

fn reconcile_delete(pass: &mut Pass) -> Result<Action> {
    info!(
        "Reconciling RemediationPolicy delete: {}/{}",
        pass.policy.namespace().unwrap_or_default(),
        pass.policy.name_any()
    );
    remove_finalizer(&mut pass.policy);
    Ok(Action::await_change())
}

#[instrument(skip(store, config, pass), fields(name = %pass.policy.name_any()))]
async fn reconcile_normal(
    store: &dyn ClusterStore,
    config: &ReconcilerConfig,
    pass: &mut Pass,
) -> Result<Action> {
    let own_namespace = pass
        .policy
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;

    // 1. Dependency gate
    match check_dependencies_available(store).await {
        Err(e) => {
            pass.conditions.mark_false(
                CONDITION_TYPE_INPUT_READY,
                REASON_ERROR,
                Severity::Error,
                DEPENDENCY_CHECK_FAILED_MESSAGE,
            );
            pass.conditions.mark_false(
                CONDITION_TYPE_READY,
                REASON_ERROR,
                Severity::Error,
                NHC_REQUIRED_MESSAGE,
            );
            return Err(e);
        }
        Ok(false) => {
            info!("NHC/SNR not found; PVC remediation is blocked");
            pass.conditions.mark_false(
                CONDITION_TYPE_INPUT_READY,
                NHC_NOT_FOUND_REASON,
                Severity::Error,
                NHC_REQUIRED_MESSAGE,
            );
            pass.conditions.mark_false(
                CONDITION_TYPE_READY,
                NHC_NOT_FOUND_REASON,
                Severity::Error,
                NHC_REQUIRED_MESSAGE,
            );
            return Ok(Action::requeue(config.resync_interval));
        }
        Ok(true) => {
            pass.conditions
                .mark_true(CONDITION_TYPE_INPUT_READY, INPUT_READY_MESSAGE);
        }
    }

    if !pass.policy.spec.enable_pvc_remediation {
        pass.conditions.mark_true(CONDITION_TYPE_READY, DISABLED_MESSAGE);
        return Ok(Action::requeue(config.resync_interval));
    }

    // 2. Classify nodes once; the set stays fixed for the rest of the pass
    let nodes = store.list_nodes().await?;
    let unhealthy = classify_nodes(&nodes);

    #[cfg(feature = "metrics")]
    super::metrics::set_unhealthy_nodes(unhealthy.len());

    if unhealthy.is_empty() {
        pass.conditions
            .mark_true(CONDITION_TYPE_READY, NOTHING_TO_DO_MESSAGE);
        return Ok(Action::requeue(config.resync_interval));
    }

    info!(
        "Unhealthy nodes: {}",
        unhealthy.iter().collect::<Vec<_>>().join(", ")
    );

    // 3. Sweep namespaces
    for namespace in pass.policy.spec.effective_namespaces(&own_namespace) {
        match remediate_namespace(store, &namespace, &unhealthy, config.dry_run).await {
            Ok(report) => record_report(store, &pass.policy, &report).await,
            Err(e) => {
                error!("Failed to list PVCs in namespace {}: {:?}", namespace, e);
                continue;
            }
        }
    }

    pass.conditions
        .mark_true(CONDITION_TYPE_READY, REMEDIATED_MESSAGE);
    Ok(Action::requeue(config.resync_interval))
}

async fn record_report(store: &dyn ClusterStore, policy: &RemediationPolicy, report: &NamespaceReport) {
    debug!(
        "Namespace {}: scanned {} PVCs, {} acted on",
        report.namespace,
        report.scanned,
        report.actions.len()
    );

    for (claim, outcome) in &report.actions {
        let result = match outcome {
            ClaimOutcome::Deleted { .. } => "deleted",
            ClaimOutcome::AlreadyGone { .. } => "already_gone",
            ClaimOutcome::WouldDelete { .. } => "dry_run",
            ClaimOutcome::Failed { .. } => "failed",
        };

        #[cfg(feature = "metrics")]
        super::metrics::inc_pvc_deletion(&claim.namespace, result);

        if let ClaimOutcome::Deleted { node } = outcome {
            let message = format!(
                "Deleted PVC {}/{} pinned to unhealthy node {}",
                claim.namespace, claim.name, node
            );
            if let Err(e) = store
                .publish_event(policy, "Normal", "PVCDeleted", &message)
                .await
            {
                warn!("Failed to publish event for PVC {}/{}: {:?}", claim.namespace, claim.name, e);
            }
        } else {
            debug!("PVC {}/{}: {}", claim.namespace, claim.name, result);
        }
    }
}
