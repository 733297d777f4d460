//! Shared types for the ReplicatedShard CRD

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Key range covered by a shard.
///
/// Empty bounds are open-ended: `{start: "", end: "80"}` is the shard `-80`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyRange {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

impl KeyRange {
    /// Name safe for use in labels and object names, with `x` standing in for
    /// an open bound (`-80` becomes `x-80`, the full range becomes `x-x`).
    pub fn safe_name(&self) -> String {
        let start = if self.start.is_empty() {
            "x"
        } else {
            self.start.as_str()
        };
        let end = if self.end.is_empty() {
            "x"
        } else {
            self.end.as_str()
        };
        format!("{}-{}", start, end)
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Kind of tablets a pool runs
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TabletPoolType {
    Replica,
    Rdonly,
    /// Tablets fronting an externally managed primary datastore
    Externalmaster,
}

impl TabletPoolType {
    /// Value used in the `tablet-type` pod label
    pub fn label_value(&self) -> &'static str {
        match self {
            TabletPoolType::Replica => "replica",
            TabletPoolType::Rdonly => "rdonly",
            TabletPoolType::Externalmaster => super::EXTERNAL_MASTER_TABLET_POOL_NAME,
        }
    }
}

/// A group of tablets of one type in one cell
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabletPool {
    pub cell: String,

    #[serde(rename = "type")]
    pub pool_type: TabletPoolType,

    #[serde(default = "default_pool_replicas")]
    pub replicas: i32,

    /// MySQL for this pool is managed outside the shard (e.g. a cloud database)
    #[serde(default)]
    pub external_datastore: bool,
}

fn default_pool_replicas() -> i32 {
    2
}

/// Container images used by tablet pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShardImages {
    /// Desired mysqld image, e.g. `mysql:8.0.36`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mysqld: Option<String>,
}

/// Tri-state condition status (Kubernetes convention)
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Observed state of one tablet, keyed by alias in the shard status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabletStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_type: Option<String>,

    /// Whether the tablet is serving and reported healthy
    #[serde(default)]
    pub available: ConditionStatus,
}

/// Condition for status reporting (Kubernetes convention)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "Progressing", "Degraded")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition
    pub status: ConditionStatus,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
}
