//! ReplicatedShard Custom Resource Definition
//!
//! A ReplicatedShard describes one shard of a keyspace: the tablet pools that
//! back it and the mysqld image they should run. Tablet pods belonging to the
//! shard are found through the labels in [`ReplicatedShard::tablet_pod_labels`].

use std::collections::{BTreeMap, BTreeSet};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, KeyRange, ShardImages, TabletPool, TabletPoolType, TabletStatus};
use super::{
    CLUSTER_LABEL, COMPONENT_LABEL, KEYSPACE_LABEL, SHARD_LABEL, VTTABLET_COMPONENT_NAME,
};

/// Structured validation error for `ReplicatedShardSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
}

impl SpecValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "shardops.io",
    version = "v1alpha1",
    kind = "ReplicatedShard",
    namespaced,
    status = "ReplicatedShardStatus",
    shortname = "rs",
    printcolumn = r#"{"name":"Keyspace","type":"string","jsonPath":".spec.keyspace"}"#,
    printcolumn = r#"{"name":"Shard","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedShardSpec {
    /// Name of the cluster this shard belongs to
    pub cluster: String,

    pub keyspace: String,

    /// Shard name as known to the topology store, e.g. `-80`
    pub name: String,

    #[serde(default)]
    pub key_range: KeyRange,

    #[serde(default)]
    pub tablet_pools: Vec<TabletPool>,

    #[serde(default)]
    pub images: ShardImages,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedShardStatus {
    /// Per-tablet observed state, keyed by tablet alias
    #[serde(default)]
    pub tablets: BTreeMap<String, TabletStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ReplicatedShardSpec {
    /// Cells that have at least one tablet pool, sorted and de-duplicated
    pub fn cells(&self) -> Vec<String> {
        self.tablet_pools
            .iter()
            .map(|pool| pool.cell.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether primary election for this shard is handled outside the shard
    pub fn using_external_datastore(&self) -> bool {
        self.tablet_pools.iter().any(|pool| {
            pool.external_datastore || pool.pool_type == TabletPoolType::Externalmaster
        })
    }

    /// Validate the spec
    ///
    /// # Errors
    ///
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();

        if self.cluster.is_empty() {
            errors.push(SpecValidationError::new(
                "spec.cluster",
                "cluster must not be empty",
            ));
        }
        if self.keyspace.is_empty() {
            errors.push(SpecValidationError::new(
                "spec.keyspace",
                "keyspace must not be empty",
            ));
        }
        if self.name.is_empty() {
            errors.push(SpecValidationError::new(
                "spec.name",
                "shard name must not be empty",
            ));
        }
        for (i, pool) in self.tablet_pools.iter().enumerate() {
            if pool.cell.is_empty() {
                errors.push(SpecValidationError::new(
                    format!("spec.tabletPools[{}].cell", i),
                    "cell must not be empty",
                ));
            }
            if pool.replicas < 0 {
                errors.push(SpecValidationError::new(
                    format!("spec.tabletPools[{}].replicas", i),
                    "replicas must not be negative",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl ReplicatedShard {
    /// Label selector matching every tablet pod of this shard
    pub fn tablet_pod_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                COMPONENT_LABEL.to_string(),
                VTTABLET_COMPONENT_NAME.to_string(),
            ),
            (CLUSTER_LABEL.to_string(), self.spec.cluster.clone()),
            (KEYSPACE_LABEL.to_string(), self.spec.keyspace.clone()),
            (SHARD_LABEL.to_string(), self.spec.key_range.safe_name()),
        ])
    }
}
