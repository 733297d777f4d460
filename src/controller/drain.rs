//! Drain reconciliation for one ReplicatedShard
//!
//! Tablet pods are prepared for deletion in response to drain requests set as
//! annotations on the pods. Each pass:
//!
//! 1. Checks shard health and takes no action while the shard is unhealthy.
//! 2. Loads the drain state, clearing markers left behind by aborted drains.
//! 3. Moves drain markers along, never marking the current primary finished.
//! 4. Reparents away from a draining primary once it is, or would be, finished.
//!
//! Only one tablet is ever marked finished, and it stays finished until it is
//! deleted or its drain is aborted. Removing `finished` could let a later pass
//! finish a second tablet while the drainer still acts on the first, so a
//! finished tablet stays finished even if the shard turns unhealthy or the
//! primary moves onto it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::{Resource, ResourceExt};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::crd::ReplicatedShard;
use crate::drain::{drain_state, set_drain_state, state_transitions, DrainMarkers, DrainState};
use crate::error::{Error, Result};
use crate::topo::{
    PlannedReparentRequest, ShardRecord, Tablet, TabletAlias, TabletManager, TabletType,
    TopologyStore,
};

use super::candidate::candidate_primary;
use super::events::{EventRecorder, EventType};
use super::health::check_shard_health;
use super::pods::{tablet_alias_from_pod, PodStore};
use super::recorder::{DrainMetrics, ReparentOutcome, ShardMetricLabels};
use super::results::ResultBuilder;
use super::upgrade::disable_fast_shutdown;

/// Time limits of a drain pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrainTimeouts {
    /// Whole pass, including every sub-timeout below
    pub pass: Duration,
    /// Reading pods and topology before deciding anything
    pub read: Duration,
    /// A planned reparent
    pub reparent: Duration,
    /// Replication lag a new primary may have and still be chosen
    pub tolerable_replication_lag: Duration,
    /// Asking candidates for their replication position
    pub candidate: Duration,
    /// Delay before retrying after a read failure or a blocked drain
    pub requeue_delay: Duration,
}

impl Default for DrainTimeouts {
    fn default() -> Self {
        Self {
            pass: Duration::from_secs(60),
            read: Duration::from_secs(10),
            reparent: Duration::from_secs(30),
            tolerable_replication_lag: Duration::from_secs(15),
            candidate: Duration::from_secs(2),
            requeue_delay: Duration::from_secs(10),
        }
    }
}

/// Runs drain passes against injected collaborators
pub struct DrainReconciler {
    pods: Arc<dyn PodStore>,
    topo: Arc<dyn TopologyStore>,
    tmc: Arc<dyn TabletManager>,
    events: Arc<dyn EventRecorder>,
    metrics: Arc<dyn DrainMetrics>,
    timeouts: DrainTimeouts,
    dry_run: bool,
}

/// Everything read at the start of a pass
struct ShardState {
    pods: BTreeMap<String, Pod>,
    record: ShardRecord,
    tablets: BTreeMap<String, Tablet>,
}

/// Bound `fut` by `deadline`, turning an overrun into [`Error::Timeout`]
async fn within<T>(
    deadline: Instant,
    operation: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout_at(deadline, fut)
        .await
        .unwrap_or_else(|_| Err(Error::Timeout { operation, after }))
}

impl DrainReconciler {
    pub fn new(
        pods: Arc<dyn PodStore>,
        topo: Arc<dyn TopologyStore>,
        tmc: Arc<dyn TabletManager>,
        events: Arc<dyn EventRecorder>,
        metrics: Arc<dyn DrainMetrics>,
    ) -> Self {
        Self {
            pods,
            topo,
            tmc,
            events,
            metrics,
            timeouts: DrainTimeouts::default(),
            dry_run: false,
        }
    }

    pub fn with_timeouts(mut self, timeouts: DrainTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Decide and log, but write nothing and send no commands
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn timeouts(&self) -> &DrainTimeouts {
        &self.timeouts
    }

    /// Run one drain pass for `shard`.
    ///
    /// Returns how long to wait before the next pass, if it should come
    /// sooner than the regular resync.
    #[instrument(skip(self, shard), fields(name = %shard.name_any(), namespace = shard.namespace()))]
    pub async fn reconcile_drain(&self, shard: &ReplicatedShard) -> Result<Option<Duration>> {
        let deadline = Instant::now() + self.timeouts.pass;
        within(deadline, "drain pass", self.timeouts.pass, self.drain_pass(shard)).await
    }

    async fn drain_pass(&self, shard: &ReplicatedShard) -> Result<Option<Duration>> {
        let mut results = ResultBuilder::default();
        let shard_ref = shard.object_ref(&());

        let ShardState {
            mut pods,
            record,
            tablets,
        } = match self.read_state(shard, &shard_ref).await {
            Some(state) => state,
            None => {
                results.requeue_after(self.timeouts.requeue_delay);
                return results.result();
            }
        };

        //
        // 1. Do not take any action while the shard is unhealthy.
        //
        let primary = match check_shard_health(shard, &record) {
            Ok(primary) => primary,
            Err(unhealthy) => {
                self.warn(&shard_ref, "NotReconcilingDrain", &unhealthy.to_string())
                    .await;
                return results.result();
            }
        };
        let primary_alias = primary.to_string();

        //
        // 2. Load drain state and clear markers of pods without a request.
        //
        let mut aborting_drain = false;
        let mut drains: BTreeMap<String, DrainState> = BTreeMap::new();
        for (alias, pod) in pods.iter_mut() {
            let markers = DrainMarkers::from_pod(pod);
            if markers.started {
                let state = match drain_state(pod) {
                    Ok(state) => state,
                    Err(invalid) => {
                        self.warn(
                            &shard_ref,
                            "InvalidDrainState",
                            &format!(
                                "Found a pod in an invalid drain state: {}, {}",
                                pod.name_any(),
                                invalid
                            ),
                        )
                        .await;
                        invalid.state
                    }
                };
                drains.insert(alias.clone(), state);
                continue;
            }

            // Markers without a request mean the drainer backed out part way.
            if markers.is_aborted() {
                aborting_drain = true;
                self.warn(
                    &shard_ref,
                    "AbortingDrain",
                    &format!(
                        "found a partially drained Pod that does not have a drain request: {}",
                        pod.name_any()
                    ),
                )
                .await;
            }
            self.update_drain_state(&shard_ref, pod, DrainState::NotDraining, &mut results)
                .await;
        }

        if drains.is_empty() {
            return results.result();
        }
        if aborting_drain {
            // Treated as an emergency: no transitions and no reparent until the
            // drainer has cleaned up after itself.
            self.warn(&shard_ref, "AbortingDrain", "detected that we are aborting drain")
                .await;
            return results.result();
        }

        //
        // 3. Move markers along. The primary is never marked finished.
        //
        let transitions = state_transitions(&drains, Some(primary_alias.as_str()));
        let mut acknowledged_drain = false;
        for (alias, state) in &transitions {
            if *state == DrainState::Finished && *alias == primary_alias {
                debug!("Not marking primary {} as finished", alias);
                continue;
            }
            if *state == DrainState::Acknowledged && drains.get(alias) == Some(&DrainState::Draining)
            {
                acknowledged_drain = true;
            }
            if let Some(pod) = pods.get_mut(alias) {
                self.update_drain_state(&shard_ref, pod, *state, &mut results)
                    .await;
            }
        }

        let desired_image = shard.spec.images.mysqld.as_deref().unwrap_or_default();
        if self.dry_run {
            debug!("Dry run: not preparing mysqld upgrades to {:?}", desired_image);
        } else if let Err(e) = disable_fast_shutdown(
            self.tmc.as_ref(),
            self.events.as_ref(),
            &pods,
            &tablets,
            desired_image,
        )
        .await
        {
            self.warn(
                &shard_ref,
                "MysqldSafeUpgradeFailed",
                &format!("failed to disable fast shutdown: {}", e),
            )
            .await;
            results.error(e);
            return results.result();
        }

        //
        // 4. Reparent a draining primary only once it is or will be finished.
        //
        let primary_finished = drains.get(&primary_alias) == Some(&DrainState::Finished);

        // A drain acknowledged this pass may still change which tablet gets
        // finished next, so let things settle first. A primary that is already
        // finished was reparented onto by someone else and is moved away from.
        if acknowledged_drain && !primary_finished {
            self.normal(
                &shard_ref,
                "NotReparentingPrimary",
                "We have acknowledged a drain this loop",
            )
            .await;
            return results.result();
        }
        if !primary_finished && transitions.get(&primary_alias) != Some(&DrainState::Finished) {
            self.normal(
                &shard_ref,
                "NotReparentingPrimary",
                "We are not marking primary as finished",
            )
            .await;
            return results.result();
        }

        let using_external = shard.spec.using_external_datastore();
        let Some(new_primary) = candidate_primary(
            self.tmc.as_ref(),
            &record,
            &tablets,
            &pods,
            using_external,
            self.timeouts.candidate,
        )
        .await
        else {
            self.warn(
                &shard_ref,
                "DrainBlocked",
                &format!(
                    "unable to drain primary tablet {}: no other tablet is a suitable primary candidate",
                    primary_alias
                ),
            )
            .await;
            results.requeue_after(self.timeouts.requeue_delay);
            return results.result();
        };

        if self.dry_run {
            info!(
                "Dry run: would reparent shard {}/{} from {} to {}",
                record.keyspace, record.name, primary_alias, new_primary.alias
            );
            return results.result();
        }

        info!(
            "Reparenting shard {}/{} from {} to {}",
            record.keyspace, record.name, primary_alias, new_primary.alias
        );
        let reparent = if using_external {
            self.external_reparent(&new_primary.alias, &primary).await
        } else {
            self.planned_reparent(&record, &new_primary.alias).await
        };

        let outcome = match &reparent {
            Ok(()) => {
                self.normal(
                    &shard_ref,
                    "PlannedReparent",
                    &format!(
                        "planned reparent from old primary {} to new primary {} succeeded",
                        primary_alias, new_primary.alias
                    ),
                )
                .await;
                ReparentOutcome::Success
            }
            Err(e) => {
                self.warn(
                    &shard_ref,
                    "PlannedReparentFailed",
                    &format!(
                        "planned reparent from current primary {} to candidate primary {} failed: {}",
                        primary_alias, new_primary.alias, e
                    ),
                )
                .await;
                ReparentOutcome::Failure
            }
        };
        self.metrics.record_planned_reparent(
            &ShardMetricLabels {
                cluster: shard.spec.cluster.clone(),
                keyspace: shard.spec.keyspace.clone(),
                shard: shard.spec.key_range.safe_name(),
            },
            outcome,
        );

        results.result()
    }

    /// Read pods and topology under the read timeout. Failures are reported
    /// as events and yield `None`.
    async fn read_state(
        &self,
        shard: &ReplicatedShard,
        shard_ref: &ObjectReference,
    ) -> Option<ShardState> {
        let deadline = Instant::now() + self.timeouts.read;
        let after = self.timeouts.read;
        let namespace = shard.namespace().unwrap_or_else(|| "default".to_string());

        let pod_list = match within(
            deadline,
            "listing pods",
            after,
            self.pods.list(&namespace, &shard.tablet_pod_labels()),
        )
        .await
        {
            Ok(pods) => pods,
            Err(e) => {
                self.warn(shard_ref, "ListFailed", &format!("failed to list Pods: {}", e))
                    .await;
                return None;
            }
        };

        let record = match within(
            deadline,
            "reading shard record",
            after,
            self.topo.get_shard(&shard.spec.keyspace, &shard.spec.name),
        )
        .await
        {
            Ok(record) => record,
            Err(e) => {
                self.warn(
                    shard_ref,
                    "TopoGetFailed",
                    &format!("failed to get shard record: {}", e),
                )
                .await;
                return None;
            }
        };

        // Only cells this shard deploys to; other cells have their own operator.
        let tablets = match within(
            deadline,
            "reading tablet records",
            after,
            self.topo
                .get_tablet_map(&shard.spec.keyspace, &shard.spec.name, &shard.spec.cells()),
        )
        .await
        {
            Ok(tablets) => tablets,
            Err(e) => {
                self.warn(
                    shard_ref,
                    "TopoGetFailed",
                    &format!("failed to get tablet records: {}", e),
                )
                .await;
                return None;
            }
        };

        let mut pods = BTreeMap::new();
        for pod in pod_list {
            match tablet_alias_from_pod(&pod) {
                Some(alias) => {
                    pods.insert(alias.to_string(), pod);
                }
                None => warn!(
                    "Ignoring pod {} without tablet cell and uid labels",
                    pod.name_any()
                ),
            }
        }

        Some(ShardState {
            pods,
            record,
            tablets,
        })
    }

    /// Move `pod` towards `state`, writing it back if anything changed.
    /// Failures are reported and recorded, and the pass carries on.
    async fn update_drain_state(
        &self,
        shard_ref: &ObjectReference,
        pod: &mut Pod,
        state: DrainState,
        results: &mut ResultBuilder,
    ) {
        let mut updated = pod.clone();
        if !set_drain_state(&mut updated, state) {
            return;
        }
        if self.dry_run {
            info!("Dry run: would mark pod {} as {}", pod.name_any(), state);
            *pod = updated;
            return;
        }

        debug!("Marking pod {} as {}", pod.name_any(), state);
        match self.pods.update(&updated).await {
            Ok(stored) => *pod = stored,
            Err(e) => {
                self.warn(
                    shard_ref,
                    "UpdateFailed",
                    &format!(
                        "failed to update drain annotation on Pod {}: {}",
                        pod.name_any(),
                        e
                    ),
                )
                .await;
                results.error(e);
            }
        }
    }

    async fn planned_reparent(&self, record: &ShardRecord, new_primary: &TabletAlias) -> Result<()> {
        let request = PlannedReparentRequest {
            keyspace: record.keyspace.clone(),
            shard: record.name.clone(),
            new_primary: new_primary.clone(),
            avoid_primary: None,
            wait_replicas_timeout: self.timeouts.reparent,
            tolerable_replication_lag: self.timeouts.tolerable_replication_lag,
        };
        let deadline = Instant::now() + self.timeouts.reparent;
        within(
            deadline,
            "planned reparent",
            self.timeouts.reparent,
            self.tmc.planned_reparent_shard(&request),
        )
        .await
    }

    /// Hand the primary role over when primary election happens outside the
    /// shard: record the new primary, then demote the old one to spare.
    async fn external_reparent(
        &self,
        new_primary: &TabletAlias,
        old_primary: &TabletAlias,
    ) -> Result<()> {
        self.tmc.tablet_externally_reparented(new_primary).await?;
        // Old external primaries do not demote themselves.
        self.tmc
            .change_tablet_type(old_primary, TabletType::Spare)
            .await
    }

    async fn warn(&self, object: &ObjectReference, reason: &str, message: &str) {
        warn!("{}: {}", reason, message);
        self.events
            .publish(object, EventType::Warning, reason, message)
            .await;
    }

    async fn normal(&self, object: &ObjectReference, reason: &str, message: &str) {
        info!("{}: {}", reason, message);
        self.events
            .publish(object, EventType::Normal, reason, message)
            .await;
    }
}
