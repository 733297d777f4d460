//! shard-drain-k8s: Kubernetes operator draining replicated database shards
//!
//! Tablet pods of a shard are deleted only after the operator has confirmed
//! they are no longer needed, and a draining primary is handed over to the most
//! caught-up replica first.

pub mod controller;
pub mod crd;
pub mod drain;
pub mod error;
pub mod leader;
pub mod topo;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
