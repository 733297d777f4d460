//! Metric recording seam used by the drain reconciler

/// Labels identifying the shard a metric sample belongs to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardMetricLabels {
    pub cluster: String,
    pub keyspace: String,
    /// Key range safe name
    pub shard: String,
}

/// Outcome of a primary handover attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReparentOutcome {
    Success,
    Failure,
}

impl ReparentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReparentOutcome::Success => "success",
            ReparentOutcome::Failure => "failure",
        }
    }
}

/// Sink for drain metrics
pub trait DrainMetrics: Send + Sync {
    /// Count one planned reparent attempt
    fn record_planned_reparent(&self, labels: &ShardMetricLabels, outcome: ReparentOutcome);
}

/// Discards every sample
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl DrainMetrics for NoopMetrics {
    fn record_planned_reparent(&self, _labels: &ShardMetricLabels, _outcome: ReparentOutcome) {}
}
