//! Prometheus metrics for the shard drain operator
//!
//! # Exported metrics
//! - `shard_drain_planned_reparent_total` (counter): handover attempts labeled by
//!   cluster/keyspace/shard/result.
//! - `shard_drain_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `shard_drain_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use super::recorder::{DrainMetrics, ReparentOutcome, ShardMetricLabels};

/// Labels for planned reparent metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReparentLabels {
    pub cluster: String,
    pub keyspace: String,
    pub shard: String,
    /// "success" or "failure"
    pub result: String,
}

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "replicatedshard"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, see [`crate::Error::metric_label`]
    pub kind: String,
}

/// Counter tracking planned reparent attempts
pub static PLANNED_REPARENT_TOTAL: Lazy<Family<ReparentLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~65s across 17 buckets; a drain pass is capped at 60s.
        Histogram::new(exponential_buckets(0.001, 2.0, 17))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "shard_drain_planned_reparent",
        "Planned reparents attempted to drain a primary tablet",
        PLANNED_REPARENT_TOTAL.clone(),
    );
    registry.register(
        "shard_drain_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "shard_drain_reconcile_errors",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

/// [`DrainMetrics`] backed by the global Prometheus registry
#[derive(Clone, Copy, Debug, Default)]
pub struct PrometheusMetrics;

impl DrainMetrics for PrometheusMetrics {
    fn record_planned_reparent(&self, labels: &ShardMetricLabels, outcome: ReparentOutcome) {
        let labels = ReparentLabels {
            cluster: labels.cluster.clone(),
            keyspace: labels.keyspace.clone(),
            shard: labels.shard.clone(),
            result: outcome.as_str().to_string(),
        };
        PLANNED_REPARENT_TOTAL.get_or_create(&labels).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_planned_reparent_counter_by_result() {
        let shard = ShardMetricLabels {
            cluster: "metrics-test".to_string(),
            keyspace: "commerce".to_string(),
            shard: "x-80".to_string(),
        };
        PrometheusMetrics.record_planned_reparent(&shard, ReparentOutcome::Success);
        PrometheusMetrics.record_planned_reparent(&shard, ReparentOutcome::Failure);
        PrometheusMetrics.record_planned_reparent(&shard, ReparentOutcome::Failure);

        let failures = ReparentLabels {
            cluster: "metrics-test".to_string(),
            keyspace: "commerce".to_string(),
            shard: "x-80".to_string(),
            result: "failure".to_string(),
        };
        assert_eq!(PLANNED_REPARENT_TOTAL.get_or_create(&failures).get(), 2);
    }

    #[test]
    fn test_registry_encodes() {
        observe_reconcile_duration_seconds("replicatedshard", 0.25);
        inc_reconcile_error("replicatedshard", "kube");

        let mut buffer = String::new();
        encode(&mut buffer, &REGISTRY).unwrap();
        assert!(buffer.contains("shard_drain_reconcile_duration_seconds"));
        assert!(buffer.contains("shard_drain_reconcile_errors_total"));
    }
}
