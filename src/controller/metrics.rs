//! Prometheus metrics for the PVC remediator
//!
//! # Exported metrics
//! - `pvc_remediator_reconcile_duration_seconds` (histogram): pass duration labeled by controller.
//! - `pvc_remediator_reconcile_errors_total` (counter): failed passes labeled by controller and kind.
//! - `pvc_remediator_pvc_deletions_total` (counter): claim deletions labeled by namespace and result.
//! - `pvc_remediator_unhealthy_nodes` (gauge): nodes classified unhealthy in the latest pass.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "remediationpolicy"
    pub controller: String,
}

/// Labels for reconcile error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, e.g. "kube", "conflict"
    pub kind: String,
}

/// Labels for claim deletion metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeletionLabels {
    pub namespace: String,
    /// "deleted", "already_gone", "dry_run" or "failed"
    pub result: String,
}

pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static PVC_DELETIONS_TOTAL: Lazy<Family<DeletionLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static UNHEALTHY_NODES: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "pvc_remediator_reconcile_duration_seconds",
        "Duration of reconcile passes in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "pvc_remediator_reconcile_errors",
        "Total number of failed reconcile passes",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "pvc_remediator_pvc_deletions",
        "PVC deletions attempted for claims pinned to unhealthy nodes",
        PVC_DELETIONS_TOTAL.clone(),
    );
    registry.register(
        "pvc_remediator_unhealthy_nodes",
        "Nodes classified unhealthy in the latest pass",
        UNHEALTHY_NODES.clone(),
    );

    registry
});

pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    RECONCILE_DURATION_SECONDS
        .get_or_create(&ReconcileLabels {
            controller: controller.to_string(),
        })
        .observe(seconds);
}

pub fn inc_reconcile_error(controller: &str, kind: &str) {
    RECONCILE_ERRORS_TOTAL
        .get_or_create(&ErrorLabels {
            controller: controller.to_string(),
            kind: kind.to_string(),
        })
        .inc();
}

pub fn inc_pvc_deletion(namespace: &str, result: &str) {
    PVC_DELETIONS_TOTAL
        .get_or_create(&DeletionLabels {
            namespace: namespace.to_string(),
            result: result.to_string(),
        })
        .inc();
}

pub fn set_unhealthy_nodes(count: usize) {
    UNHEALTHY_NODES.set(count as i64);
}

/// Render the registry in the OpenMetrics text format
pub fn encode_metrics() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}
