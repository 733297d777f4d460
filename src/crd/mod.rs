//! Custom Resource Definitions and label conventions for shard-drain-k8s

mod replicated_shard;
pub mod types;


pub use replicated_shard::{
    ReplicatedShard, ReplicatedShardSpec, ReplicatedShardStatus, SpecValidationError,
};
pub use types::*;

/// Label identifying the component a pod belongs to
pub const COMPONENT_LABEL: &str = "shardops.io/component";
/// Label naming the cluster a tablet pod belongs to
pub const CLUSTER_LABEL: &str = "shardops.io/cluster";
/// Label naming the keyspace a tablet pod belongs to
pub const KEYSPACE_LABEL: &str = "shardops.io/keyspace";
/// Label holding the key range safe name of the tablet's shard
pub const SHARD_LABEL: &str = "shardops.io/shard";
/// Label holding the tablet's cell
pub const CELL_LABEL: &str = "shardops.io/cell";
/// Label holding the tablet's numeric uid
pub const TABLET_UID_LABEL: &str = "shardops.io/tablet-uid";
/// Label holding the tablet pool type
pub const TABLET_TYPE_LABEL: &str = "shardops.io/tablet-type";

/// Component label value for tablet pods
pub const VTTABLET_COMPONENT_NAME: &str = "vttablet";
/// Pool type label value for the external-primary pool
pub const EXTERNAL_MASTER_TABLET_POOL_NAME: &str = "externalmaster";
/// Name of the mysqld container inside a tablet pod
pub const MYSQLD_CONTAINER_NAME: &str = "mysqld";
