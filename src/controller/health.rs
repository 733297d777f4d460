//! Shard health gate
//!
//! Drains are only acted on while the shard is healthy: every tablet tracked in
//! the ReplicatedShard status reports `available: True` and the topology names a
//! primary. Reparenting during an incident risks making it worse.

use thiserror::Error;

use crate::crd::{ConditionStatus, ReplicatedShard};
use crate::topo::{ShardRecord, TabletAlias};

/// Why drains are not being reconciled
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnhealthyShard {
    #[error("Shard is in an unhealthy state: tablet {0} is not Available")]
    TabletUnavailable(String),

    #[error("Shard does not have a primary")]
    NoPrimary,
}

/// Check whether the shard is healthy enough to reconcile drains, returning its
/// primary
pub fn check_shard_health(
    shard: &ReplicatedShard,
    record: &ShardRecord,
) -> Result<TabletAlias, UnhealthyShard> {
    if let Some(status) = &shard.status {
        if let Some((alias, _)) = status
            .tablets
            .iter()
            .find(|(_, tablet)| tablet.available != ConditionStatus::True)
        {
            return Err(UnhealthyShard::TabletUnavailable(alias.clone()));
        }
    }

    record.primary_alias.clone().ok_or(UnhealthyShard::NoPrimary)
}
