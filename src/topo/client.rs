//! Interfaces to the topology store and to tablet managers
//!
//! Both are external collaborators. The controller only depends on these
//! traits; [`super::VtctldClient`] implements them against a vtctld HTTP
//! endpoint and the tests provide in-memory fakes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use super::types::{ShardRecord, Tablet, TabletAlias, TabletType};
use crate::error::Result;

/// Read access to shard and tablet records
#[async_trait]
pub trait TopologyStore: Send + Sync {
    /// Fetch the shard record, which names the current primary
    async fn get_shard(&self, keyspace: &str, shard: &str) -> Result<ShardRecord>;

    /// Fetch every tablet of the shard in the given cells, keyed by alias string
    async fn get_tablet_map(
        &self,
        keyspace: &str,
        shard: &str,
        cells: &[String],
    ) -> Result<BTreeMap<String, Tablet>>;
}

/// Replication state reported by a tablet
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplicationStatus {
    /// Encoded replication position, see [`super::Position::decode`]
    pub position: String,
}

/// Parameters of a planned (graceful) reparent
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedReparentRequest {
    pub keyspace: String,
    pub shard: String,
    pub new_primary: TabletAlias,
    /// Tablet that must not be chosen as the new primary
    pub avoid_primary: Option<TabletAlias>,
    /// How long to wait for replicas to catch up during the reparent
    pub wait_replicas_timeout: Duration,
    /// Maximum replication lag of the new primary that is still acceptable
    pub tolerable_replication_lag: Duration,
}

/// Commands issued to individual tablets and to the shard as a whole
#[async_trait]
pub trait TabletManager: Send + Sync {
    async fn replication_status(&self, tablet: &Tablet) -> Result<ReplicationStatus>;

    /// Run an administrative SQL statement on the tablet's mysqld
    async fn execute_fetch_as_dba(&self, tablet: &Tablet, query: &str) -> Result<()>;

    async fn planned_reparent_shard(&self, request: &PlannedReparentRequest) -> Result<()>;

    /// Tell the topology that `new_primary` became primary outside of our control
    async fn tablet_externally_reparented(&self, new_primary: &TabletAlias) -> Result<()>;

    async fn change_tablet_type(&self, alias: &TabletAlias, tablet_type: TabletType)
        -> Result<()>;
}
