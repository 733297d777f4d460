//! Topology store records, replication positions and tablet manager access

mod client;
mod position;
mod types;
mod vtctld;

pub use client::{PlannedReparentRequest, ReplicationStatus, TabletManager, TopologyStore};
pub use position::Position;
pub use types::{ShardRecord, Tablet, TabletAlias, TabletType};
pub use vtctld::VtctldClient;
