//! # Controller Metrics
//!
//! Metrics for control-loop operations, labelled by controller name.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts};
use std::sync::LazyLock;

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tenancy_reconciliations_total",
            "Total number of reconcile passes",
        ),
        &["controller"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tenancy_reconciliation_errors_total",
            "Total number of failed reconcile passes",
        ),
        &["controller", "class"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "tenancy_reconciliation_duration_seconds",
            "Duration of reconcile passes in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["controller"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tenancy_requeues_total",
            "Total number of reconcile requeues",
        ),
        &["controller", "reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static CONTROLLER_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tenancy_controller_restarts_total",
            "Total number of supervised control-loop restarts",
        ),
        &["controller"],
    )
    .expect("Failed to create CONTROLLER_RESTARTS_TOTAL metric - this should never happen")
});

static QUEUE_DEPTH: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "tenancy_queue_depth",
            "Keys waiting in the work queue",
        ),
        &["controller"],
    )
    .expect("Failed to create QUEUE_DEPTH metric - this should never happen")
});

/// Register controller metrics with the registry
pub(crate) fn register_controller_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONTROLLER_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    Ok(())
}

pub fn increment_reconciliations(controller: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[controller]).inc();
}

pub fn increment_reconciliation_errors(controller: &str, class: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[controller, class])
        .inc();
}

pub fn observe_reconciliation_duration(controller: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[controller])
        .observe(duration);
}

pub fn increment_requeues_total(controller: &str, reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[controller, reason]).inc();
}

pub fn increment_controller_restarts(controller: &str) {
    CONTROLLER_RESTARTS_TOTAL
        .with_label_values(&[controller])
        .inc();
}

pub fn set_queue_depth(controller: &str, depth: usize) {
    QUEUE_DEPTH
        .with_label_values(&[controller])
        .set(i64::try_from(depth).unwrap_or(i64::MAX));
}
