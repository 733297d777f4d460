//! Controller module for ReplicatedShard drain reconciliation
//!
//! This module contains the main controller loop, the drain pass, and the
//! seams through which it reaches pods, events and metrics.

mod candidate;
mod drain;
pub mod events;
mod health;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pods;
mod reconciler;
pub mod recorder;
mod results;
#[cfg(test)]
mod testing;
pub mod upgrade;

pub use candidate::{candidate_primary, eligible_candidates};
pub use drain::{DrainReconciler, DrainTimeouts};
pub use events::{EventRecorder, EventType, KubeEventRecorder};
pub use health::{check_shard_health, UnhealthyShard};
pub use pods::{KubePodStore, PodStore};
pub use reconciler::{run_controller, ControllerState};
pub use recorder::{DrainMetrics, NoopMetrics, ReparentOutcome, ShardMetricLabels};
pub use results::ResultBuilder;
