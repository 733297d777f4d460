//! Choosing the tablet to hand the primary role to
//!
//! Eligible tablets are probed concurrently for their replication position and
//! the one furthest ahead wins, so the reparent has the least to catch up.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info};

use crate::crd::{EXTERNAL_MASTER_TABLET_POOL_NAME, TABLET_TYPE_LABEL};
use crate::drain::DrainMarkers;
use crate::error::{Error, Result};
use crate::topo::{Position, ShardRecord, Tablet, TabletManager, TabletType};

use super::pods::is_pod_ready;

/// Result of probing one candidate
struct CandidateInfo<'a> {
    tablet: &'a Tablet,
    position: Result<Position>,
}

/// Tablets that could take over as primary, in alias order.
///
/// A candidate is not the current primary, has a ready pod, has a role that
/// can be promoted, and is not being drained.
pub fn eligible_candidates<'a>(
    shard: &ShardRecord,
    tablets: &'a BTreeMap<String, Tablet>,
    pods: &BTreeMap<String, Pod>,
    using_external_datastore: bool,
) -> Vec<&'a Tablet> {
    tablets
        .iter()
        .filter(|(_, tablet)| shard.primary_alias.as_ref() != Some(&tablet.alias))
        .filter_map(|(alias, tablet)| pods.get(alias).map(|pod| (tablet, pod)))
        .filter(|(tablet, pod)| {
            if using_external_datastore {
                // No MySQL replication to worry about: a tablet that already
                // thinks it is primary is as good as a spare.
                let pool = pod
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(TABLET_TYPE_LABEL));
                pool.map(String::as_str) == Some(EXTERNAL_MASTER_TABLET_POOL_NAME)
                    && matches!(tablet.tablet_type, TabletType::Spare | TabletType::Primary)
            } else {
                tablet.tablet_type == TabletType::Replica
            }
        })
        .filter(|(_, pod)| is_pod_ready(pod))
        .filter(|(_, pod)| !DrainMarkers::from_pod(pod).any())
        .map(|(tablet, _)| tablet)
        .collect()
}

/// Pick the best candidate to become the new primary, or `None` if no tablet
/// is eligible.
///
/// Every candidate is asked for its replication position, all within
/// `timeout`. The furthest-ahead responder wins; on ties the first to answer
/// is kept. Candidates that fail or answer too late are skipped, and if none
/// answers in time the first eligible candidate is returned anyway, since all
/// of them passed the eligibility checks.
pub async fn candidate_primary(
    tmc: &dyn TabletManager,
    shard: &ShardRecord,
    tablets: &BTreeMap<String, Tablet>,
    pods: &BTreeMap<String, Pod>,
    using_external_datastore: bool,
    timeout: Duration,
) -> Option<Tablet> {
    let candidates = eligible_candidates(shard, tablets, pods, using_external_datastore);
    let first = *candidates.first()?;

    let deadline = tokio::time::Instant::now() + timeout;

    // Each probe resolves exactly once, with a timeout error if it runs past
    // the deadline, so draining the set always yields one result per candidate.
    let mut probes: FuturesUnordered<_> = candidates
        .iter()
        .map(|&tablet| async move {
            let position =
                match tokio::time::timeout_at(deadline, tmc.replication_status(tablet)).await {
                    Ok(Ok(status)) => Position::decode(&status.position),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(Error::Timeout {
                        operation: "replication status",
                        after: timeout,
                    }),
                };
            CandidateInfo { tablet, position }
        })
        .collect();

    let mut best: Option<&Tablet> = None;
    let mut highest = Position::Zero;
    while let Some(result) = probes.next().await {
        match result.position {
            Ok(position) => {
                if highest.is_zero() || !highest.at_least(&position) {
                    best = Some(result.tablet);
                    highest = position;
                }
            }
            Err(e) => debug!(
                "Skipping candidate primary {}: {}",
                result.tablet.alias, e
            ),
        }
    }

    let chosen = match best {
        Some(tablet) => tablet,
        None => {
            info!(
                "No candidate primary reported its position in time, falling back to {}",
                first.alias
            );
            first
        }
    };
    Some(chosen.clone())
}
